//! # Reindex
//!
//! Operator tooling for the forum store.
//!
//! - `threads`: pushes every thread in Redis to Meilisearch. Use after wiping
//!   the index or when the background sync has been failing for a while.
//! - `recount`: rebuilds the vote counters of every thread, solution and
//!   comment from the per-user vote records and reports what had drifted.
//!
//! Both are idempotent and safe to run against a live server.
use anyhow::{Result, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use models::{Target, TargetKind};
use server::{
    database::Database,
    search::{SearchIndex, ThreadDocument},
};
use tracing::{info, warn};

/// Documents pushed to the search engine per request.
pub const BATCH_SIZE: usize = 500;

pub fn progress(len: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )
        .map_err(|e| anyhow!("bad progress template: {e}"))?
        .progress_chars("=> "),
    );
    Ok(pb)
}

/// Returns how many documents were written.
pub async fn reindex_threads(
    db: &dyn Database,
    index: &dyn SearchIndex,
    pb: &ProgressBar,
) -> Result<usize> {
    index.configure().await?;

    let ids = db.list_ids(TargetKind::Thread).await?;
    pb.set_length(ids.len() as u64);
    info!("Reindexing {} threads", ids.len());

    let mut written = 0;
    for chunk in ids.chunks(BATCH_SIZE) {
        let mut documents = Vec::with_capacity(chunk.len());
        for id in chunk {
            match db.get_thread(*id).await? {
                Some(thread) => documents.push(ThreadDocument::from(&thread)),
                None => warn!("Thread {id} vanished during reindex"),
            }
            pb.inc(1);
        }

        pb.set_message(format!("Pushing {} documents", documents.len()));
        index.upsert(&documents).await?;
        written += documents.len();
    }

    pb.finish_with_message("Done");
    Ok(written)
}

/// Returns how many records had drifted counters.
pub async fn recount(db: &dyn Database, pb: &ProgressBar) -> Result<usize> {
    let mut targets = Vec::new();
    for kind in [TargetKind::Thread, TargetKind::Solution, TargetKind::Comment] {
        targets.extend(
            db.list_ids(kind)
                .await?
                .into_iter()
                .map(|id| Target { kind, id }),
        );
    }
    pb.set_length(targets.len() as u64);

    let mut drifted = 0;
    for target in targets {
        pb.set_message(format!("{target}"));
        if db.recount_votes(target).await? {
            warn!("Vote counters of {target} had drifted");
            drifted += 1;
        }
        pb.inc(1);
    }

    pb.finish_with_message("Done");
    Ok(drifted)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use models::{Category, Thread, ThreadStatus, VoteKind, VoteTally};
    use server::{database::MemoryDatabase, search::MemoryIndex};
    use uuid::Uuid;

    use super::*;

    fn thread(title: &str) -> Thread {
        let now = Utc::now();
        Thread {
            id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            title: title.to_string(),
            content: "Needs a fielded answer".to_string(),
            category: Category::Sensors,
            tags: vec!["eo-ir".to_string()],
            status: ThreadStatus::Open,
            urgency: Default::default(),
            trl: None,
            deadline: None,
            is_pinned: false,
            is_locked: false,
            accepted_solution_id: None,
            votes: VoteTally::default(),
            views: 0,
            solution_count: 0,
            comment_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn reindex_pushes_every_thread() {
        let db = MemoryDatabase::new();
        let index = MemoryIndex::new();
        for title in ["Night vision payload", "Thermal gimbal drift", "Wide area EO"] {
            db.insert_thread(&thread(title)).await.unwrap();
        }

        let written = reindex_threads(&db, &index, &ProgressBar::hidden())
            .await
            .unwrap();

        assert_eq!(written, 3);
        assert_eq!(index.len().await, 3);
    }

    #[tokio::test]
    async fn recount_finds_nothing_on_a_consistent_store() {
        let db = MemoryDatabase::new();
        let record = thread("Counter swarm cueing");
        db.insert_thread(&record).await.unwrap();
        db.apply_vote(Uuid::new_v4(), Target::thread(record.id), Some(VoteKind::Up))
            .await
            .unwrap();

        assert_eq!(recount(&db, &ProgressBar::hidden()).await.unwrap(), 0);
        let stored = db.get_thread(record.id).await.unwrap().unwrap();
        assert_eq!(stored.votes.score(), 1);
    }
}
