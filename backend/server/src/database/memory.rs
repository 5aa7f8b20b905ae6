use std::{
    collections::{HashMap, HashSet},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use models::{
    Attachment, Bounty, BountyStatus, Comment, Solution, Target, TargetKind, Thread, User,
    VoteKind, VoteOutcome, VoteTally,
    payloads::{SolutionSort, ThreadSort},
};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Database, DbError, ThreadFilter, UserPatch};
use crate::votes::{VoteTransition, tally};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    sessions: HashMap<Uuid, (Uuid, Instant)>,
    blacklist: HashMap<Uuid, Instant>,
    login_failures: HashMap<String, (u64, Instant)>,
    threads: HashMap<Uuid, Thread>,
    solutions: HashMap<Uuid, Solution>,
    comments: HashMap<Uuid, Comment>,
    votes: HashMap<Target, HashMap<Uuid, VoteKind>>,
    bounties: HashMap<Uuid, Bounty>,
    attachments: HashMap<Uuid, Attachment>,
    dirty: HashSet<Uuid>,
}

impl Inner {
    fn tally_mut(&mut self, target: Target) -> Option<&mut VoteTally> {
        match target.kind {
            TargetKind::Thread => self.threads.get_mut(&target.id).map(|t| &mut t.votes),
            TargetKind::Solution => self.solutions.get_mut(&target.id).map(|s| &mut s.votes),
            TargetKind::Comment => self.comments.get_mut(&target.id).map(|c| &mut c.votes),
        }
    }

    fn bump_comment_count(&mut self, target: Target, delta: i64) {
        match target.kind {
            TargetKind::Thread => {
                if let Some(thread) = self.threads.get_mut(&target.id) {
                    thread.comment_count += delta;
                }
            }
            TargetKind::Solution => {
                if let Some(solution) = self.solutions.get_mut(&target.id) {
                    solution.comment_count += delta;
                }
            }
            TargetKind::Comment => {}
        }
    }

    fn drop_children(&mut self, target: Target) {
        let comment_ids: Vec<Uuid> = self
            .comments
            .values()
            .filter(|c| c.target == target)
            .map(|c| c.id)
            .collect();
        for id in comment_ids {
            self.comments.remove(&id);
            self.votes.remove(&Target::comment(id));
        }

        self.attachments.retain(|_, a| a.target != target);
        self.votes.remove(&target);
    }

    fn remove_solution(&mut self, id: Uuid) {
        if let Some(solution) = self.solutions.remove(&id) {
            self.drop_children(Target::solution(id));

            if let Some(thread) = self.threads.get_mut(&solution.thread_id) {
                thread.solution_count -= 1;
                if thread.accepted_solution_id == Some(id) {
                    thread.accepted_solution_id = None;
                }
            }
        }
    }
}

/// Process-local store. Expired sessions and blacklist entries are treated
/// as absent on read.
#[derive(Default)]
pub struct MemoryDatabase {
    inner: Mutex<Inner>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

fn expiry(ttl_secs: u64) -> Instant {
    Instant::now() + Duration::from_secs(ttl_secs)
}

fn paginate<T: Clone>(items: &[T], offset: usize, limit: usize) -> Vec<T> {
    items.iter().skip(offset).take(limit).cloned().collect()
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn ping(&self) -> Result<(), DbError> {
        Ok(())
    }

    async fn create_user(&self, user: &User) -> Result<(), DbError> {
        let mut inner = self.inner.lock().await;

        if inner.users.values().any(|u| u.email == user.email) {
            return Err(DbError::Duplicate("email"));
        }
        if inner
            .users
            .values()
            .any(|u| u.username.eq_ignore_ascii_case(&user.username))
        {
            return Err(DbError::Duplicate("username"));
        }

        inner.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, DbError> {
        Ok(self.inner.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, DbError> {
        let inner = self.inner.lock().await;
        Ok(inner.users.values().find(|u| u.email == email).cloned())
    }

    async fn patch_user(&self, id: Uuid, patch: &UserPatch) -> Result<Option<User>, DbError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.users.get_mut(&id).map(|user| {
            patch.apply(user);
            user.clone()
        }))
    }

    async fn adjust_reputation(&self, id: Uuid, delta: i64) -> Result<(), DbError> {
        if let Some(user) = self.inner.lock().await.users.get_mut(&id) {
            user.reputation += delta;
        }
        Ok(())
    }

    async fn leaderboard(&self, limit: usize) -> Result<Vec<User>, DbError> {
        let inner = self.inner.lock().await;
        let mut users: Vec<User> = inner.users.values().cloned().collect();
        users.sort_by(|a, b| {
            b.reputation
                .cmp(&a.reputation)
                .then(a.created_at.cmp(&b.created_at))
        });
        users.truncate(limit);
        Ok(users)
    }

    async fn create_session(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        ttl_secs: u64,
    ) -> Result<(), DbError> {
        let mut inner = self.inner.lock().await;
        inner.sessions.insert(session_id, (user_id, expiry(ttl_secs)));
        Ok(())
    }

    async fn session_user(&self, session_id: Uuid) -> Result<Option<Uuid>, DbError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sessions
            .get(&session_id)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(user_id, _)| *user_id))
    }

    async fn delete_session(&self, session_id: Uuid) -> Result<(), DbError> {
        self.inner.lock().await.sessions.remove(&session_id);
        Ok(())
    }

    async fn blacklist_token(&self, jti: Uuid, ttl_secs: u64) -> Result<(), DbError> {
        let mut inner = self.inner.lock().await;
        inner.blacklist.insert(jti, expiry(ttl_secs.max(1)));
        Ok(())
    }

    async fn claim_token(&self, jti: Uuid, ttl_secs: u64) -> Result<bool, DbError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        if inner.blacklist.get(&jti).is_some_and(|expires| *expires > now) {
            return Ok(false);
        }

        inner.blacklist.insert(jti, expiry(ttl_secs.max(1)));
        Ok(true)
    }

    async fn is_blacklisted(&self, jti: Uuid) -> Result<bool, DbError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .blacklist
            .get(&jti)
            .is_some_and(|expires| *expires > Instant::now()))
    }

    async fn record_login_failure(&self, key: &str, window_secs: u64) -> Result<u64, DbError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        let entry = inner
            .login_failures
            .entry(key.to_string())
            .or_insert((0, expiry(window_secs)));
        if entry.1 <= now {
            *entry = (0, expiry(window_secs));
        }
        entry.0 += 1;

        Ok(entry.0)
    }

    async fn login_failures(&self, key: &str) -> Result<u64, DbError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .login_failures
            .get(key)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(count, _)| *count)
            .unwrap_or(0))
    }

    async fn clear_login_failures(&self, key: &str) -> Result<(), DbError> {
        self.inner.lock().await.login_failures.remove(key);
        Ok(())
    }

    async fn insert_thread(&self, thread: &Thread) -> Result<(), DbError> {
        let mut inner = self.inner.lock().await;
        inner.threads.insert(thread.id, thread.clone());
        inner.dirty.insert(thread.id);
        Ok(())
    }

    async fn get_thread(&self, id: Uuid) -> Result<Option<Thread>, DbError> {
        Ok(self.inner.lock().await.threads.get(&id).cloned())
    }

    async fn save_thread(&self, thread: &Thread) -> Result<(), DbError> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .threads
            .get_mut(&thread.id)
            .ok_or(DbError::Missing("thread"))?;

        let (votes, views, solutions, comments) = (
            stored.votes,
            stored.views,
            stored.solution_count,
            stored.comment_count,
        );
        *stored = thread.clone();
        stored.votes = votes;
        stored.views = views;
        stored.solution_count = solutions;
        stored.comment_count = comments;

        inner.dirty.insert(thread.id);
        Ok(())
    }

    async fn delete_thread(&self, id: Uuid) -> Result<(), DbError> {
        let mut inner = self.inner.lock().await;

        let solution_ids: Vec<Uuid> = inner
            .solutions
            .values()
            .filter(|s| s.thread_id == id)
            .map(|s| s.id)
            .collect();
        for solution_id in solution_ids {
            inner.remove_solution(solution_id);
        }

        inner.drop_children(Target::thread(id));
        inner.bounties.retain(|_, b| b.thread_id != id);
        inner.threads.remove(&id);
        inner.dirty.remove(&id);
        Ok(())
    }

    async fn list_threads(
        &self,
        filter: &ThreadFilter,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Thread>, u64), DbError> {
        let inner = self.inner.lock().await;

        let mut threads: Vec<&Thread> = inner
            .threads
            .values()
            .filter(|t| filter.category.is_none_or(|c| t.category == c))
            .filter(|t| filter.status.is_none_or(|s| t.status == s))
            .filter(|t| filter.author.is_none_or(|a| t.author_id == a))
            .filter(|t| {
                filter
                    .tag
                    .as_ref()
                    .is_none_or(|tag| t.tags.iter().any(|x| x == tag))
            })
            .collect();

        match filter.sort {
            ThreadSort::Newest => threads.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            ThreadSort::Oldest => threads.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
            ThreadSort::Top => threads.sort_by(|a, b| b.votes.score().cmp(&a.votes.score())),
            ThreadSort::Views => threads.sort_by(|a, b| b.views.cmp(&a.views)),
        }

        let total = threads.len() as u64;
        let page = paginate(&threads, offset, limit)
            .into_iter()
            .cloned()
            .collect();

        Ok((page, total))
    }

    async fn record_view(&self, id: Uuid) -> Result<i64, DbError> {
        let mut inner = self.inner.lock().await;
        let thread = inner.threads.get_mut(&id).ok_or(DbError::Missing("thread"))?;
        thread.views += 1;
        let views = thread.views;

        inner.dirty.insert(id);
        Ok(views)
    }

    async fn take_dirty_threads(&self) -> Result<Vec<Uuid>, DbError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.dirty.drain().collect())
    }

    async fn mark_dirty(&self, ids: &[Uuid]) -> Result<(), DbError> {
        self.inner.lock().await.dirty.extend(ids.iter().copied());
        Ok(())
    }

    async fn insert_solution(&self, solution: &Solution) -> Result<(), DbError> {
        let mut inner = self.inner.lock().await;
        let thread = inner
            .threads
            .get_mut(&solution.thread_id)
            .ok_or(DbError::Missing("thread"))?;
        thread.solution_count += 1;

        inner.solutions.insert(solution.id, solution.clone());
        Ok(())
    }

    async fn get_solution(&self, id: Uuid) -> Result<Option<Solution>, DbError> {
        Ok(self.inner.lock().await.solutions.get(&id).cloned())
    }

    async fn save_solution(&self, solution: &Solution) -> Result<(), DbError> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .solutions
            .get_mut(&solution.id)
            .ok_or(DbError::Missing("solution"))?;

        let (votes, comments) = (stored.votes, stored.comment_count);
        *stored = solution.clone();
        stored.votes = votes;
        stored.comment_count = comments;
        Ok(())
    }

    async fn delete_solution(&self, id: Uuid) -> Result<(), DbError> {
        self.inner.lock().await.remove_solution(id);
        Ok(())
    }

    async fn list_solutions(
        &self,
        thread_id: Uuid,
        sort: SolutionSort,
    ) -> Result<Vec<Solution>, DbError> {
        let inner = self.inner.lock().await;
        let mut solutions: Vec<Solution> = inner
            .solutions
            .values()
            .filter(|s| s.thread_id == thread_id)
            .cloned()
            .collect();

        match sort {
            SolutionSort::Top => solutions.sort_by(|a, b| {
                b.votes
                    .score()
                    .cmp(&a.votes.score())
                    .then(b.created_at.cmp(&a.created_at))
            }),
            SolutionSort::Newest => solutions.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        }

        Ok(solutions)
    }

    async fn insert_comment(&self, comment: &Comment) -> Result<(), DbError> {
        let mut inner = self.inner.lock().await;
        inner.bump_comment_count(comment.target, 1);
        inner.comments.insert(comment.id, comment.clone());
        Ok(())
    }

    async fn get_comment(&self, id: Uuid) -> Result<Option<Comment>, DbError> {
        Ok(self.inner.lock().await.comments.get(&id).cloned())
    }

    async fn save_comment(&self, comment: &Comment) -> Result<(), DbError> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .comments
            .get_mut(&comment.id)
            .ok_or(DbError::Missing("comment"))?;

        let votes = stored.votes;
        *stored = comment.clone();
        stored.votes = votes;
        Ok(())
    }

    async fn list_comments(
        &self,
        target: Target,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Comment>, u64), DbError> {
        let inner = self.inner.lock().await;
        let mut comments: Vec<Comment> = inner
            .comments
            .values()
            .filter(|c| c.target == target)
            .cloned()
            .collect();
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let total = comments.len() as u64;
        Ok((paginate(&comments, offset, limit), total))
    }

    async fn apply_vote(
        &self,
        user_id: Uuid,
        target: Target,
        request: Option<VoteKind>,
    ) -> Result<VoteOutcome, DbError> {
        let mut inner = self.inner.lock().await;
        if inner.tally_mut(target).is_none() {
            return Err(DbError::Missing("vote target"));
        }

        let votes = inner.votes.entry(target).or_default();
        let transition = VoteTransition::resolve(votes.get(&user_id).copied(), request);
        match transition.current {
            Some(kind) => votes.insert(user_id, kind),
            None => votes.remove(&user_id),
        };

        let counters = inner.tally_mut(target).ok_or(DbError::Missing("vote target"))?;
        transition.apply(counters);
        let counters = *counters;

        if target.kind == TargetKind::Thread && !transition.is_noop() {
            inner.dirty.insert(target.id);
        }

        Ok(VoteOutcome {
            previous: transition.previous,
            current: transition.current,
            votes: counters,
        })
    }

    async fn get_vote(&self, user_id: Uuid, target: Target) -> Result<Option<VoteKind>, DbError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .votes
            .get(&target)
            .and_then(|votes| votes.get(&user_id))
            .copied())
    }

    async fn list_ids(&self, kind: TargetKind) -> Result<Vec<Uuid>, DbError> {
        let inner = self.inner.lock().await;
        Ok(match kind {
            TargetKind::Thread => inner.threads.keys().copied().collect(),
            TargetKind::Solution => inner.solutions.keys().copied().collect(),
            TargetKind::Comment => inner.comments.keys().copied().collect(),
        })
    }

    async fn recount_votes(&self, target: Target) -> Result<bool, DbError> {
        let mut inner = self.inner.lock().await;
        let counted = inner
            .votes
            .get(&target)
            .map(|votes| tally(votes.values()))
            .unwrap_or_default();

        match inner.tally_mut(target) {
            Some(stored) if *stored != counted => {
                *stored = counted;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_bounty(&self, bounty: &Bounty) -> Result<(), DbError> {
        let mut inner = self.inner.lock().await;
        inner.bounties.insert(bounty.id, bounty.clone());
        Ok(())
    }

    async fn get_bounty(&self, id: Uuid) -> Result<Option<Bounty>, DbError> {
        Ok(self.inner.lock().await.bounties.get(&id).cloned())
    }

    async fn list_bounties(&self, thread_id: Uuid) -> Result<Vec<Bounty>, DbError> {
        let inner = self.inner.lock().await;
        let mut bounties: Vec<Bounty> = inner
            .bounties
            .values()
            .filter(|b| b.thread_id == thread_id)
            .cloned()
            .collect();
        bounties.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(bounties)
    }

    async fn transition_bounty(
        &self,
        from: BountyStatus,
        bounty: &Bounty,
    ) -> Result<bool, DbError> {
        let mut inner = self.inner.lock().await;
        match inner.bounties.get_mut(&bounty.id) {
            Some(stored) if stored.status == from => {
                *stored = bounty.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_attachment(&self, attachment: &Attachment) -> Result<(), DbError> {
        let mut inner = self.inner.lock().await;
        inner.attachments.insert(attachment.id, attachment.clone());
        Ok(())
    }

    async fn get_attachment(&self, id: Uuid) -> Result<Option<Attachment>, DbError> {
        Ok(self.inner.lock().await.attachments.get(&id).cloned())
    }

    async fn list_attachments(&self, target: Target) -> Result<Vec<Attachment>, DbError> {
        let inner = self.inner.lock().await;
        let mut attachments: Vec<Attachment> = inner
            .attachments
            .values()
            .filter(|a| a.target == target)
            .cloned()
            .collect();
        attachments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(attachments)
    }

    async fn delete_attachment(&self, id: Uuid) -> Result<(), DbError> {
        self.inner.lock().await.attachments.remove(&id);
        Ok(())
    }
}
