use std::collections::BTreeMap;

use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use models::{
    Bounty, BountyStatus, ThreadStatus,
    payloads::{AwardBountyRequest, BountyList, CreateBountyRequest},
};
use tracing::info;
use uuid::Uuid;

use super::{
    Id, Payload, Shared, bounty_or_404, solution_or_404, thread_or_404, threads::future_deadline,
};
use crate::{
    auth::AuthUser, error::AppError, state::State as AppState, utils::normalize_currency,
};

/// Reputation for winning a bounty.
pub const AWARD_REPUTATION: i64 = 25;

pub async fn create(
    State(state): Shared,
    caller: AuthUser,
    Id(thread_id): Id,
    Payload(payload): Payload<CreateBountyRequest>,
) -> Result<(StatusCode, Json<Bounty>), AppError> {
    let thread = thread_or_404(&state, thread_id).await?;
    if thread.status == ThreadStatus::Closed {
        return Err(AppError::conflict("thread is closed"));
    }
    if payload.amount == 0 {
        return Err(AppError::validation("amount must be positive"));
    }

    let currency = normalize_currency(payload.currency.as_deref())?;
    let active = active_totals(&state.db.list_bounties(thread_id).await?);
    active
        .get(&currency)
        .copied()
        .unwrap_or(0)
        .checked_add(payload.amount)
        .ok_or_else(|| AppError::validation("active bounty total is too large"))?;

    let now = Utc::now();
    let bounty = Bounty {
        id: Uuid::new_v4(),
        thread_id,
        sponsor_id: caller.id(),
        amount: payload.amount,
        currency,
        status: BountyStatus::Active,
        deadline: future_deadline(payload.deadline)?,
        awarded_solution_id: None,
        awarded_to: None,
        created_at: now,
        updated_at: now,
    };
    state.db.insert_bounty(&bounty).await?;
    info!(
        "Bounty {} of {} {} on thread {thread_id}",
        bounty.id, bounty.amount, bounty.currency
    );

    Ok((StatusCode::CREATED, Json(bounty)))
}

pub async fn list(State(state): Shared, Id(thread_id): Id) -> Result<Json<BountyList>, AppError> {
    thread_or_404(&state, thread_id).await?;
    let bounties = state.db.list_bounties(thread_id).await?;

    Ok(Json(BountyList {
        active_total: active_totals(&bounties),
        bounties,
    }))
}

/// Saturates instead of wrapping, so a store that predates the create check
/// still lists.
pub fn active_totals(bounties: &[Bounty]) -> BTreeMap<String, u64> {
    bounties
        .iter()
        .filter(|bounty| bounty.status == BountyStatus::Active)
        .fold(BTreeMap::new(), |mut totals, bounty| {
            let total = totals.entry(bounty.currency.clone()).or_default();
            *total = total.saturating_add(bounty.amount);
            totals
        })
}

/// Moves an active bounty to `next`. Losing the race to another transition
/// is a conflict.
async fn transition(state: &AppState, next: &Bounty) -> Result<(), AppError> {
    if state.db.transition_bounty(BountyStatus::Active, next).await? {
        Ok(())
    } else {
        Err(AppError::conflict("bounty is no longer active"))
    }
}

pub async fn award(
    State(state): Shared,
    caller: AuthUser,
    Id(id): Id,
    Payload(payload): Payload<AwardBountyRequest>,
) -> Result<Json<Bounty>, AppError> {
    let mut bounty = bounty_or_404(&state, id).await?;
    if bounty.sponsor_id != caller.id() {
        return Err(AppError::Forbidden);
    }
    if bounty.status != BountyStatus::Active {
        return Err(AppError::conflict("bounty is no longer active"));
    }

    let now = Utc::now();
    if bounty.is_past_deadline(now) {
        bounty.status = BountyStatus::Expired;
        bounty.updated_at = now;
        // Whoever wins the race, the bounty is no longer awardable.
        state
            .db
            .transition_bounty(BountyStatus::Active, &bounty)
            .await?;
        return Err(AppError::conflict("bounty deadline has passed"));
    }

    let solution = solution_or_404(&state, payload.solution_id).await?;
    if solution.thread_id != bounty.thread_id {
        return Err(AppError::validation("solution belongs to another thread"));
    }
    if solution.author_id == bounty.sponsor_id {
        return Err(AppError::validation("sponsors cannot award their own solution"));
    }

    bounty.status = BountyStatus::Awarded;
    bounty.awarded_solution_id = Some(solution.id);
    bounty.awarded_to = Some(solution.author_id);
    bounty.updated_at = now;
    transition(&state, &bounty).await?;

    state
        .db
        .adjust_reputation(solution.author_id, AWARD_REPUTATION)
        .await?;

    info!("Bounty {id} awarded to solution {}", solution.id);
    Ok(Json(bounty))
}

pub async fn cancel(
    State(state): Shared,
    caller: AuthUser,
    Id(id): Id,
) -> Result<Json<Bounty>, AppError> {
    let mut bounty = bounty_or_404(&state, id).await?;
    caller.require_owner(bounty.sponsor_id)?;
    if bounty.status != BountyStatus::Active {
        return Err(AppError::conflict("bounty is no longer active"));
    }

    bounty.status = BountyStatus::Cancelled;
    bounty.updated_at = Utc::now();
    transition(&state, &bounty).await?;

    info!("Bounty {id} cancelled by {}", caller.id());
    Ok(Json(bounty))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounty(amount: u64, currency: &str, status: BountyStatus) -> Bounty {
        let now = Utc::now();
        Bounty {
            id: Uuid::new_v4(),
            thread_id: Uuid::nil(),
            sponsor_id: Uuid::nil(),
            amount,
            currency: currency.to_string(),
            status,
            deadline: None,
            awarded_solution_id: None,
            awarded_to: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn totals_only_count_active() {
        let totals = active_totals(&[
            bounty(500, "USD", BountyStatus::Active),
            bounty(250, "USD", BountyStatus::Active),
            bounty(9000, "USD", BountyStatus::Awarded),
            bounty(100, "EUR", BountyStatus::Active),
            bounty(100, "EUR", BountyStatus::Cancelled),
        ]);

        assert_eq!(totals.get("USD"), Some(&750));
        assert_eq!(totals.get("EUR"), Some(&100));
        assert_eq!(totals.len(), 2);
    }

    #[test]
    fn totals_saturate() {
        let totals = active_totals(&[
            bounty(u64::MAX, "USD", BountyStatus::Active),
            bounty(1, "USD", BountyStatus::Active),
        ]);

        assert_eq!(totals.get("USD"), Some(&u64::MAX));
    }
}
