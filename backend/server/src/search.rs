//! # Meilisearch
//!
//! Full-text search over threads, proxied through the backend.
//!
//!
//!
//! ## Schema
//! - One index, `threads`
//! - Searchable: title, tags, content (in that priority)
//! - Filterable: category, status
//! - Sortable: score (upvotes minus downvotes), views, createdAt
//!
//!
//!
//! ## Sync
//! Redis is the source of truth. Writes that change a thread add its id to
//! the `search:dirty` set; [`spawn_index_sync`] drains that set on an
//! interval and upserts the current records. Eventual consistency is fine
//! here: a hit that no longer exists is dropped when results are hydrated
//! from Redis, and `reindex threads` rebuilds everything after an outage.
//!
//! Deleted threads are removed from the index right away so they stop
//! showing up before the next sync.
//!
//!
//!
//! ## Commands
//!
//! Grab relevant keys.
//! ```sh
//! curl -H "Authorization: Bearer $(cat /run/secrets/MEILI_MASTER_KEY)" http://localhost:7700/keys
//! ```
use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use meilisearch_sdk::{
    client::Client,
    settings::{MinWordSizeForTypos, Settings, TypoToleranceSettings},
    task_info::TaskInfo,
};
use models::{Category, Thread, ThreadStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinHandle, time::interval};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::database::Database;

pub const THREAD_INDEX: &str = "threads";
pub const THREAD_ID: &str = "id";
pub const THREAD_TITLE: &str = "title";
pub const THREAD_CONTENT: &str = "content";
pub const THREAD_TAGS: &str = "tags";
pub const THREAD_CATEGORY: &str = "category";
pub const THREAD_STATUS: &str = "status";
pub const THREAD_SCORE: &str = "score";
pub const THREAD_VIEWS: &str = "views";
pub const THREAD_CREATED: &str = "createdAt";

#[derive(Error, Debug)]
pub enum SearchError {
    #[error(transparent)]
    Meili(#[from] meilisearch_sdk::errors::Error),

    #[error("Meilisearch task failed: {0}")]
    Task(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadDocument {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub category: Category,
    pub status: ThreadStatus,
    pub score: i64,
    pub views: i64,
    pub created_at: i64,
}

impl From<&Thread> for ThreadDocument {
    fn from(thread: &Thread) -> Self {
        Self {
            id: thread.id,
            title: thread.title.clone(),
            content: thread.content.clone(),
            tags: thread.tags.clone(),
            category: thread.category,
            status: thread.status,
            score: thread.votes.score(),
            views: thread.views,
            created_at: thread.created_at.timestamp(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SearchRequest {
    pub query: String,
    pub category: Option<Category>,
    pub status: Option<ThreadStatus>,
    pub offset: usize,
    pub limit: usize,
}

impl SearchRequest {
    /// Meilisearch filter expression, `None` when unfiltered.
    pub fn filter(&self) -> Option<String> {
        let mut clauses = Vec::new();
        if let Some(category) = self.category {
            clauses.push(format!("{THREAD_CATEGORY} = \"{}\"", category.as_str()));
        }
        if let Some(status) = self.status {
            clauses.push(format!("{THREAD_STATUS} = \"{}\"", status.as_str()));
        }

        (!clauses.is_empty()).then(|| clauses.join(" AND "))
    }
}

/// Ranked thread ids; the caller hydrates them from the store.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchHits {
    pub ids: Vec<Uuid>,
    pub total: u64,
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn configure(&self) -> Result<(), SearchError>;
    async fn upsert(&self, documents: &[ThreadDocument]) -> Result<(), SearchError>;
    async fn remove(&self, id: Uuid) -> Result<(), SearchError>;
    async fn search(&self, request: &SearchRequest) -> Result<SearchHits, SearchError>;
}

pub struct MeiliIndex {
    client: Client,
}

/// Connects and pushes index settings. An unreachable Meilisearch is logged
/// rather than fatal so the forum still serves while search catches up.
pub async fn init_meilisearch(
    meili_url: &str,
    meili_admin_key: Option<&str>,
) -> Result<MeiliIndex, SearchError> {
    let index = MeiliIndex {
        client: Client::new(meili_url, meili_admin_key)?,
    };

    if let Err(e) = index.configure().await {
        warn!("Meilisearch settings not applied: {e}");
    }

    Ok(index)
}

impl MeiliIndex {
    async fn wait(&self, task: TaskInfo) -> Result<(), SearchError> {
        let _result = task.wait_for_completion(&self.client, None, None).await?;

        #[cfg(feature = "verbose")]
        println!("Meili task result: {:?}", _result);

        if _result.is_failure() {
            return Err(SearchError::Task(format!("{:?}", _result)));
        }
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for MeiliIndex {
    async fn configure(&self) -> Result<(), SearchError> {
        let task = self
            .client
            .index(THREAD_INDEX)
            .set_settings(&init_settings())
            .await?;

        self.wait(task).await
    }

    async fn upsert(&self, documents: &[ThreadDocument]) -> Result<(), SearchError> {
        if documents.is_empty() {
            return Ok(());
        }

        let task = self
            .client
            .index(THREAD_INDEX)
            .add_or_update(documents, Some(THREAD_ID))
            .await?;

        self.wait(task).await
    }

    async fn remove(&self, id: Uuid) -> Result<(), SearchError> {
        let task = self
            .client
            .index(THREAD_INDEX)
            .delete_document(id.to_string())
            .await?;

        self.wait(task).await
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchHits, SearchError> {
        let index = self.client.index(THREAD_INDEX);
        let filter = request.filter();

        let mut query = index.search();
        query
            .with_query(&request.query)
            .with_offset(request.offset)
            .with_limit(request.limit);
        if let Some(filter) = filter.as_deref() {
            query.with_filter(filter);
        }

        let results = query.execute::<ThreadDocument>().await?;
        let total = results
            .total_hits
            .or(results.estimated_total_hits)
            .unwrap_or(results.hits.len()) as u64;

        Ok(SearchHits {
            ids: results.hits.into_iter().map(|hit| hit.result.id).collect(),
            total,
        })
    }
}

fn init_settings() -> Settings {
    Settings::new()
        .with_ranking_rules([
            "words",
            "typo",
            "proximity",
            "attribute",
            "exactness",
            "score:desc",
            "sort",
        ])
        .with_filterable_attributes([THREAD_CATEGORY, THREAD_STATUS])
        .with_searchable_attributes([THREAD_TITLE, THREAD_TAGS, THREAD_CONTENT])
        .with_sortable_attributes([THREAD_SCORE, THREAD_VIEWS, THREAD_CREATED])
        .with_typo_tolerance(TypoToleranceSettings {
            enabled: Some(true),
            disable_on_attributes: None,
            disable_on_words: None,
            min_word_size_for_typos: Some(MinWordSizeForTypos {
                one_typo: Some(5),
                two_typos: Some(9),
            }),
        })
}

/// Process-local index for tests and `DATA_BACKEND=memory`. Every query
/// word must appear in the title, content or tags, case-insensitively.
#[derive(Default)]
pub struct MemoryIndex {
    documents: Mutex<BTreeMap<Uuid, ThreadDocument>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.lock().await.len()
    }

    pub async fn get(&self, id: Uuid) -> Option<ThreadDocument> {
        self.documents.lock().await.get(&id).cloned()
    }
}

fn matches(document: &ThreadDocument, words: &[String]) -> bool {
    let title = document.title.to_lowercase();
    let content = document.content.to_lowercase();

    words.iter().all(|word| {
        title.contains(word)
            || content.contains(word)
            || document.tags.iter().any(|tag| tag.contains(word))
    })
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn configure(&self) -> Result<(), SearchError> {
        Ok(())
    }

    async fn upsert(&self, documents: &[ThreadDocument]) -> Result<(), SearchError> {
        let mut stored = self.documents.lock().await;
        for document in documents {
            stored.insert(document.id, document.clone());
        }
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<(), SearchError> {
        self.documents.lock().await.remove(&id);
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchHits, SearchError> {
        let words: Vec<String> = request
            .query
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();

        let stored = self.documents.lock().await;
        let mut found: Vec<&ThreadDocument> = stored
            .values()
            .filter(|doc| request.category.is_none_or(|c| doc.category == c))
            .filter(|doc| request.status.is_none_or(|s| doc.status == s))
            .filter(|doc| matches(doc, &words))
            .collect();
        found.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then(b.created_at.cmp(&a.created_at))
        });

        Ok(SearchHits {
            total: found.len() as u64,
            ids: found
                .into_iter()
                .skip(request.offset)
                .take(request.limit)
                .map(|doc| doc.id)
                .collect(),
        })
    }
}

type SyncError = Box<dyn std::error::Error + Send + Sync>;

/// Flushes dirty threads into the index. Ids whose thread is gone are
/// removed. Returns how many documents were written. On failure the ids go
/// back into the dirty set for the next run.
pub async fn sync_dirty(db: &dyn Database, index: &dyn SearchIndex) -> Result<usize, SyncError> {
    let dirty = db.take_dirty_threads().await?;
    if dirty.is_empty() {
        return Ok(0);
    }

    match flush(db, index, &dirty).await {
        Ok(written) => Ok(written),
        Err(e) => {
            if let Err(requeue) = db.mark_dirty(&dirty).await {
                error!("Lost {} dirty threads: {requeue}", dirty.len());
            }
            Err(e)
        }
    }
}

async fn flush(
    db: &dyn Database,
    index: &dyn SearchIndex,
    ids: &[Uuid],
) -> Result<usize, SyncError> {
    let mut documents = Vec::with_capacity(ids.len());
    for id in ids {
        match db.get_thread(*id).await? {
            Some(thread) => documents.push(ThreadDocument::from(&thread)),
            None => index.remove(*id).await?,
        }
    }

    index.upsert(&documents).await?;
    Ok(documents.len())
}

pub fn spawn_index_sync(
    db: Arc<dyn Database>,
    index: Arc<dyn SearchIndex>,
    every: Duration,
) -> JoinHandle<()> {
    info!("Search sync every {}s", every.as_secs());

    tokio::spawn(async move {
        let mut ticker = interval(every);
        loop {
            ticker.tick().await;

            match sync_dirty(db.as_ref(), index.as_ref()).await {
                Ok(0) => {}
                Ok(count) => debug!("Synced {count} threads to search"),
                Err(e) => error!("Search sync failed: {e}"),
            }
        }
    })
}
