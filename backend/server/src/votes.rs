//! # Votes
//!
//! One vote per user per target. Posting the same kind twice withdraws it,
//! posting the other kind flips it. Every change is expressed as a
//! [`VoteTransition`] so the counters, the ranking score and the author's
//! reputation all move by the same deltas.
use models::{VoteKind, VoteTally};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VoteTransition {
    pub previous: Option<VoteKind>,
    pub current: Option<VoteKind>,
    pub up_delta: i64,
    pub down_delta: i64,
}

impl VoteTransition {
    /// `request` of `None` means withdraw.
    pub fn resolve(previous: Option<VoteKind>, request: Option<VoteKind>) -> Self {
        let current = match request {
            Some(kind) if previous == Some(kind) => None,
            other => other,
        };

        let (mut up_delta, mut down_delta) = (0, 0);
        match previous {
            Some(VoteKind::Up) => up_delta -= 1,
            Some(VoteKind::Down) => down_delta -= 1,
            None => {}
        }
        match current {
            Some(VoteKind::Up) => up_delta += 1,
            Some(VoteKind::Down) => down_delta += 1,
            None => {}
        }

        Self {
            previous,
            current,
            up_delta,
            down_delta,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.up_delta == 0 && self.down_delta == 0
    }

    /// Change to the ranking score, which is also the author's reputation change.
    pub fn score_delta(&self) -> i64 {
        self.up_delta - self.down_delta
    }

    pub fn apply(&self, tally: &mut VoteTally) {
        tally.upvotes += self.up_delta;
        tally.downvotes += self.down_delta;
    }
}

/// Counters rebuilt from raw vote records.
pub fn tally<'a>(votes: impl IntoIterator<Item = &'a VoteKind>) -> VoteTally {
    votes
        .into_iter()
        .fold(VoteTally::default(), |mut tally, kind| {
            match kind {
                VoteKind::Up => tally.upvotes += 1,
                VoteKind::Down => tally.downvotes += 1,
            }
            tally
        })
}
