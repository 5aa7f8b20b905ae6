use axum::{Json, extract::State};
use models::{
    Thread,
    payloads::{Page, SearchQuery},
};
use tracing::error;

use super::{Params, Shared, page};
use crate::{database::page_window, error::AppError, search::SearchRequest};

pub const MAX_QUERY_LEN: usize = 200;

/// Ranked by the search engine, hydrated from the store. Hits for threads
/// deleted since the last sync are dropped.
pub async fn search(
    State(state): Shared,
    Params(query): Params<SearchQuery>,
) -> Result<Json<Page<Thread>>, AppError> {
    let text = query.q.trim();
    if text.chars().count() > MAX_QUERY_LEN {
        return Err(AppError::validation(format!(
            "query must be at most {MAX_QUERY_LEN} characters"
        )));
    }

    let (page_number, limit, offset) = page_window(query.page, query.limit);
    let request = SearchRequest {
        query: text.to_string(),
        category: query.category,
        status: query.status,
        offset,
        limit: limit as usize,
    };

    let hits = state.search.search(&request).await.map_err(|e| {
        error!("Search failed: {e}");
        AppError::Unavailable
    })?;

    let mut threads = Vec::with_capacity(hits.ids.len());
    for id in hits.ids {
        if let Some(thread) = state.db.get_thread(id).await? {
            threads.push(thread);
        }
    }

    Ok(Json(page(threads, page_number, limit, hits.total)))
}
