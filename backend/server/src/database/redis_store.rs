use std::collections::HashMap;

use async_trait::async_trait;
use models::{
    Attachment, Bounty, BountyStatus, Comment, Solution, Target, TargetKind, Thread, User,
    VoteKind, VoteOutcome, VoteTally,
    payloads::{SolutionSort, ThreadSort},
};
use redis::{AsyncCommands, Pipeline, Script, aio::ConnectionManager, pipe};
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

use super::{Database, DbError, ThreadFilter, UserPatch};
use crate::votes::tally;

const REPUTATION: &str = "users:reputation";
const THREADS_CREATED: &str = "threads:created";
const THREADS_SCORE: &str = "threads:score";
const THREADS_VIEWS: &str = "threads:views";
const SOLUTIONS_ALL: &str = "solutions:all";
const COMMENTS_ALL: &str = "comments:all";
const SEARCH_DIRTY: &str = "search:dirty";

const UPVOTES: &str = "upvotes";
const DOWNVOTES: &str = "downvotes";
const VIEWS: &str = "views";
const SOLUTIONS: &str = "solutions";
const COMMENTS: &str = "comments";

/// KEYS: votes hash, counts hash, rank zset. ARGV: user, requested kind or
/// "", rank member or "". Same transition rules as `VoteTransition`.
const VOTE_SCRIPT: &str = r#"
local prev = redis.call('HGET', KEYS[1], ARGV[1])
if not prev then prev = '' end

local next = ARGV[2]
if next == prev then next = '' end

if next == '' then
    if prev ~= '' then redis.call('HDEL', KEYS[1], ARGV[1]) end
else
    redis.call('HSET', KEYS[1], ARGV[1], next)
end

local du, dd = 0, 0
if prev == 'up' then du = du - 1 elseif prev == 'down' then dd = dd - 1 end
if next == 'up' then du = du + 1 elseif next == 'down' then dd = dd + 1 end

local up = redis.call('HINCRBY', KEYS[2], 'upvotes', du)
local down = redis.call('HINCRBY', KEYS[2], 'downvotes', dd)

if ARGV[3] ~= '' and (du ~= 0 or dd ~= 0) then
    redis.call('ZINCRBY', KEYS[3], du - dd, ARGV[3])
end

return {prev, next, up, down}
"#;

/// KEYS: bounty. ARGV: expected status, replacement JSON.
const BOUNTY_CAS_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return 0 end

local current = cjson.decode(raw)
if current['status'] ~= ARGV[1] then return 0 end

redis.call('SET', KEYS[1], ARGV[2])
return 1
"#;

/// KEYS: user. ARGV: patch JSON. Overwrites only the fields present in the
/// patch so concurrent writers of other fields are not undone.
const USER_PATCH_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return 0 end

local current = cjson.decode(raw)
for field, value in pairs(cjson.decode(ARGV[1])) do
    current[field] = value
end

redis.call('SET', KEYS[1], cjson.encode(current))
return 1
"#;

pub struct RedisDatabase {
    conn: ConnectionManager,
    vote_script: Script,
    bounty_script: Script,
    user_script: Script,
}

fn counts_key(target: Target) -> String {
    format!("counts:{target}")
}

fn votes_key(target: Target) -> String {
    format!("votes:{target}")
}

fn comments_key(target: Target) -> String {
    format!("comments:{target}")
}

fn attachments_key(target: Target) -> String {
    format!("attachments:{target}")
}

fn user_key(id: Uuid) -> String {
    format!("user:{id}")
}

fn email_key(email: &str) -> String {
    format!("user:email:{email}")
}

fn username_key(username: &str) -> String {
    format!("user:username:{}", username.to_lowercase())
}

fn bounty_key(id: Uuid) -> String {
    format!("bounty:{id}")
}

fn attachment_key(id: Uuid) -> String {
    format!("attachment:{id}")
}

fn solutions_key(thread_id: Uuid) -> String {
    format!("thread:{thread_id}:solutions")
}

fn solutions_score_key(thread_id: Uuid) -> String {
    format!("thread:{thread_id}:solutions:score")
}

fn bounties_key(thread_id: Uuid) -> String {
    format!("thread:{thread_id}:bounties")
}

fn filter_keys(thread: &Thread) -> Vec<String> {
    let mut keys = vec![
        format!("threads:category:{}", thread.category.as_str()),
        format!("threads:status:{}", thread.status.as_str()),
        format!("threads:author:{}", thread.author_id),
    ];
    keys.extend(thread.tags.iter().map(|tag| format!("threads:tag:{tag}")));
    keys
}

fn created_score(created_at: &chrono::DateTime<chrono::Utc>) -> f64 {
    created_at.timestamp_millis() as f64
}

fn encode<T: Serialize>(value: &T) -> Result<String, DbError> {
    Ok(serde_json::to_string(value)?)
}

fn parse_ids(raw: Vec<String>) -> Vec<Uuid> {
    raw.iter().filter_map(|id| Uuid::parse_str(id).ok()).collect()
}

fn count(counts: &HashMap<String, i64>, field: &str) -> i64 {
    counts.get(field).copied().unwrap_or(0)
}

fn tally_of(counts: &HashMap<String, i64>) -> VoteTally {
    VoteTally {
        upvotes: count(counts, UPVOTES),
        downvotes: count(counts, DOWNVOTES),
    }
}

/// Records whose counters live in a `counts:` hash.
trait Counted: DeserializeOwned {
    const KIND: TargetKind;

    fn apply_counts(&mut self, counts: &HashMap<String, i64>);
}

impl Counted for Thread {
    const KIND: TargetKind = TargetKind::Thread;

    fn apply_counts(&mut self, counts: &HashMap<String, i64>) {
        self.votes = tally_of(counts);
        self.views = count(counts, VIEWS);
        self.solution_count = count(counts, SOLUTIONS);
        self.comment_count = count(counts, COMMENTS);
    }
}

impl Counted for Solution {
    const KIND: TargetKind = TargetKind::Solution;

    fn apply_counts(&mut self, counts: &HashMap<String, i64>) {
        self.votes = tally_of(counts);
        self.comment_count = count(counts, COMMENTS);
    }
}

impl Counted for Comment {
    const KIND: TargetKind = TargetKind::Comment;

    fn apply_counts(&mut self, counts: &HashMap<String, i64>) {
        self.votes = tally_of(counts);
    }
}

fn target_of(kind: TargetKind, id: Uuid) -> Target {
    Target { kind, id }
}

/// Queues deletion of every comment and attachment under `target`.
fn purge_children(
    pipe: &mut Pipeline,
    target: Target,
    comment_ids: &[Uuid],
    attachment_ids: &[Uuid],
) {
    for id in comment_ids {
        let comment = Target::comment(*id);
        pipe.del(vec![
            comment.to_string(),
            counts_key(comment),
            votes_key(comment),
        ])
        .ignore();
        pipe.srem(COMMENTS_ALL, id.to_string()).ignore();
    }
    for id in attachment_ids {
        pipe.del(attachment_key(*id)).ignore();
    }

    pipe.del(vec![
        counts_key(target),
        votes_key(target),
        comments_key(target),
        attachments_key(target),
    ])
    .ignore();
}

impl RedisDatabase {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            vote_script: Script::new(VOTE_SCRIPT),
            bounty_script: Script::new(BOUNTY_CAS_SCRIPT),
            user_script: Script::new(USER_PATCH_SCRIPT),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, DbError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;

        raw.map(|raw| serde_json::from_str(&raw).map_err(DbError::from))
            .transpose()
    }

    /// Loads records in order, skipping index entries whose record is gone.
    async fn get_many<T: DeserializeOwned>(&self, keys: &[String]) -> Result<Vec<T>, DbError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let raw: Vec<Option<String>> = conn.mget(keys).await?;

        raw.into_iter()
            .flatten()
            .map(|raw| serde_json::from_str(&raw).map_err(DbError::from))
            .collect()
    }

    async fn get_counted<T: Counted>(&self, ids: &[Uuid]) -> Result<Vec<T>, DbError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let targets: Vec<Target> = ids.iter().map(|id| target_of(T::KIND, *id)).collect();
        let keys: Vec<String> = targets.iter().map(Target::to_string).collect();

        let mut conn = self.conn.clone();
        let raw: Vec<Option<String>> = conn.mget(&keys).await?;

        let mut counts_pipe = pipe();
        for target in &targets {
            counts_pipe.hgetall(counts_key(*target));
        }
        let counts: Vec<HashMap<String, i64>> = counts_pipe.query_async(&mut conn).await?;

        let mut records = Vec::with_capacity(ids.len());
        for (raw, counts) in raw.into_iter().zip(counts.iter()) {
            if let Some(raw) = raw {
                let mut record: T = serde_json::from_str(&raw)?;
                record.apply_counts(counts);
                records.push(record);
            }
        }

        Ok(records)
    }

    async fn get_one_counted<T: Counted>(&self, id: Uuid) -> Result<Option<T>, DbError> {
        Ok(self.get_counted(&[id]).await?.into_iter().next())
    }

    async fn get_users(&self, ids: &[Uuid]) -> Result<Vec<User>, DbError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| user_key(*id)).collect();
        let mut conn = self.conn.clone();
        let raw: Vec<Option<String>> = conn.mget(&keys).await?;

        let mut score_pipe = pipe();
        for id in ids {
            score_pipe.zscore(REPUTATION, id.to_string());
        }
        let scores: Vec<Option<f64>> = score_pipe.query_async(&mut conn).await?;

        let mut users = Vec::with_capacity(ids.len());
        for (raw, score) in raw.into_iter().zip(scores) {
            if let Some(raw) = raw {
                let mut user: User = serde_json::from_str(&raw)?;
                user.reputation = score.unwrap_or(0.0) as i64;
                users.push(user);
            }
        }

        Ok(users)
    }

    async fn zrange_ids(&self, key: &str) -> Result<Vec<Uuid>, DbError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.zrange(key, 0, -1).await?;
        Ok(parse_ids(raw))
    }

    /// Where a target's ranking score lives, if it has one.
    async fn rank_of(&self, target: Target) -> Result<Option<String>, DbError> {
        Ok(match target.kind {
            TargetKind::Thread => Some(THREADS_SCORE.to_string()),
            TargetKind::Solution => {
                let solution: Option<Solution> = self.get_json(&target.to_string()).await?;
                solution.map(|s| solutions_score_key(s.thread_id))
            }
            TargetKind::Comment => None,
        })
    }
}

#[async_trait]
impl Database for RedisDatabase {
    async fn ping(&self) -> Result<(), DbError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn create_user(&self, user: &User) -> Result<(), DbError> {
        let mut conn = self.conn.clone();
        let id = user.id.to_string();

        let email_free: bool = conn.set_nx(email_key(&user.email), &id).await?;
        if !email_free {
            return Err(DbError::Duplicate("email"));
        }

        let username_free: bool = conn.set_nx(username_key(&user.username), &id).await?;
        if !username_free {
            let _: () = conn.del(email_key(&user.email)).await?;
            return Err(DbError::Duplicate("username"));
        }

        let _: () = pipe()
            .atomic()
            .set(user_key(user.id), encode(user)?)
            .ignore()
            .zadd(REPUTATION, &id, user.reputation)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, DbError> {
        Ok(self.get_users(&[id]).await?.into_iter().next())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, DbError> {
        let mut conn = self.conn.clone();
        let id: Option<String> = conn.get(email_key(email)).await?;

        match id.and_then(|id| Uuid::parse_str(&id).ok()) {
            Some(id) => self.get_user(id).await,
            None => Ok(None),
        }
    }

    async fn patch_user(&self, id: Uuid, patch: &UserPatch) -> Result<Option<User>, DbError> {
        let mut conn = self.conn.clone();
        let patched: i64 = self
            .user_script
            .key(user_key(id))
            .arg(encode(patch)?)
            .invoke_async(&mut conn)
            .await?;

        if patched == 0 {
            return Ok(None);
        }
        self.get_user(id).await
    }

    async fn adjust_reputation(&self, id: Uuid, delta: i64) -> Result<(), DbError> {
        let mut conn = self.conn.clone();
        let _: f64 = conn.zincr(REPUTATION, id.to_string(), delta).await?;
        Ok(())
    }

    async fn leaderboard(&self, limit: usize) -> Result<Vec<User>, DbError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.zrevrange(REPUTATION, 0, limit as isize - 1).await?;
        self.get_users(&parse_ids(raw)).await
    }

    async fn create_session(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        ttl_secs: u64,
    ) -> Result<(), DbError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(
                format!("session:{session_id}"),
                user_id.to_string(),
                ttl_secs.max(1),
            )
            .await?;
        Ok(())
    }

    async fn session_user(&self, session_id: Uuid) -> Result<Option<Uuid>, DbError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(format!("session:{session_id}")).await?;
        Ok(raw.and_then(|id| Uuid::parse_str(&id).ok()))
    }

    async fn delete_session(&self, session_id: Uuid) -> Result<(), DbError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(format!("session:{session_id}")).await?;
        Ok(())
    }

    async fn blacklist_token(&self, jti: Uuid, ttl_secs: u64) -> Result<(), DbError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(format!("blacklist:{jti}"), 1, ttl_secs.max(1))
            .await?;
        Ok(())
    }

    async fn claim_token(&self, jti: Uuid, ttl_secs: u64) -> Result<bool, DbError> {
        let mut conn = self.conn.clone();
        let set: Option<String> = redis::cmd("SET")
            .arg(format!("blacklist:{jti}"))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs.max(1))
            .query_async(&mut conn)
            .await?;
        Ok(set.is_some())
    }

    async fn is_blacklisted(&self, jti: Uuid) -> Result<bool, DbError> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(format!("blacklist:{jti}")).await?)
    }

    async fn record_login_failure(&self, key: &str, window_secs: u64) -> Result<u64, DbError> {
        let mut conn = self.conn.clone();
        let key = format!("login_failures:{key}");

        let failures: u64 = conn.incr(&key, 1).await?;
        if failures == 1 {
            let _: () = conn.expire(&key, window_secs as i64).await?;
        }

        Ok(failures)
    }

    async fn login_failures(&self, key: &str) -> Result<u64, DbError> {
        let mut conn = self.conn.clone();
        let failures: Option<u64> = conn.get(format!("login_failures:{key}")).await?;
        Ok(failures.unwrap_or(0))
    }

    async fn clear_login_failures(&self, key: &str) -> Result<(), DbError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(format!("login_failures:{key}")).await?;
        Ok(())
    }

    async fn insert_thread(&self, thread: &Thread) -> Result<(), DbError> {
        let target = Target::thread(thread.id);
        let id = thread.id.to_string();
        let mut conn = self.conn.clone();

        let mut p = pipe();
        p.atomic()
            .set(target.to_string(), encode(thread)?)
            .ignore()
            .hset_multiple(
                counts_key(target),
                &[
                    (UPVOTES, 0),
                    (DOWNVOTES, 0),
                    (VIEWS, 0),
                    (SOLUTIONS, 0),
                    (COMMENTS, 0),
                ],
            )
            .ignore()
            .zadd(THREADS_CREATED, &id, created_score(&thread.created_at))
            .ignore()
            .zadd(THREADS_SCORE, &id, 0)
            .ignore()
            .zadd(THREADS_VIEWS, &id, 0)
            .ignore()
            .sadd(SEARCH_DIRTY, &id)
            .ignore();
        for key in filter_keys(thread) {
            p.sadd(key, &id).ignore();
        }

        let _: () = p.query_async(&mut conn).await?;
        Ok(())
    }

    async fn get_thread(&self, id: Uuid) -> Result<Option<Thread>, DbError> {
        self.get_one_counted(id).await
    }

    async fn save_thread(&self, thread: &Thread) -> Result<(), DbError> {
        let key = Target::thread(thread.id).to_string();
        let id = thread.id.to_string();
        let previous: Thread = self
            .get_json(&key)
            .await?
            .ok_or(DbError::Missing("thread"))?;

        let mut p = pipe();
        p.atomic();
        for old in filter_keys(&previous) {
            p.srem(old, &id).ignore();
        }
        for new in filter_keys(thread) {
            p.sadd(new, &id).ignore();
        }
        p.set(&key, encode(thread)?)
            .ignore()
            .sadd(SEARCH_DIRTY, &id)
            .ignore();

        let mut conn = self.conn.clone();
        let _: () = p.query_async(&mut conn).await?;
        Ok(())
    }

    async fn delete_thread(&self, id: Uuid) -> Result<(), DbError> {
        let target = Target::thread(id);
        let Some(thread) = self.get_json::<Thread>(&target.to_string()).await? else {
            return Ok(());
        };

        let solution_ids = self.zrange_ids(&solutions_key(id)).await?;
        let bounty_ids = self.zrange_ids(&bounties_key(id)).await?;

        let mut p = pipe();
        p.atomic();

        for solution_id in &solution_ids {
            let solution = Target::solution(*solution_id);
            let comments = self.zrange_ids(&comments_key(solution)).await?;
            let attachments = self.zrange_ids(&attachments_key(solution)).await?;

            purge_children(&mut p, solution, &comments, &attachments);
            p.del(solution.to_string())
                .ignore()
                .srem(SOLUTIONS_ALL, solution_id.to_string())
                .ignore();
        }

        let comments = self.zrange_ids(&comments_key(target)).await?;
        let attachments = self.zrange_ids(&attachments_key(target)).await?;
        purge_children(&mut p, target, &comments, &attachments);

        for bounty_id in bounty_ids {
            p.del(bounty_key(bounty_id)).ignore();
        }

        let member = id.to_string();
        p.del(vec![
            target.to_string(),
            solutions_key(id),
            solutions_score_key(id),
            bounties_key(id),
        ])
        .ignore()
        .zrem(THREADS_CREATED, &member)
        .ignore()
        .zrem(THREADS_SCORE, &member)
        .ignore()
        .zrem(THREADS_VIEWS, &member)
        .ignore()
        .srem(SEARCH_DIRTY, &member)
        .ignore();
        for key in filter_keys(&thread) {
            p.srem(key, &member).ignore();
        }

        let mut conn = self.conn.clone();
        let _: () = p.query_async(&mut conn).await?;
        Ok(())
    }

    async fn list_threads(
        &self,
        filter: &ThreadFilter,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Thread>, u64), DbError> {
        let sort_key = match filter.sort {
            ThreadSort::Newest | ThreadSort::Oldest => THREADS_CREATED,
            ThreadSort::Top => THREADS_SCORE,
            ThreadSort::Views => THREADS_VIEWS,
        };
        let reverse = filter.sort != ThreadSort::Oldest;

        let mut sets = Vec::new();
        if let Some(category) = filter.category {
            sets.push(format!("threads:category:{}", category.as_str()));
        }
        if let Some(status) = filter.status {
            sets.push(format!("threads:status:{}", status.as_str()));
        }
        if let Some(tag) = &filter.tag {
            sets.push(format!("threads:tag:{tag}"));
        }
        if let Some(author) = filter.author {
            sets.push(format!("threads:author:{author}"));
        }

        let start = offset as isize;
        let stop = (offset + limit) as isize - 1;
        let mut conn = self.conn.clone();

        // Filters are intersected into a scratch zset that keeps the sort scores.
        let (source, scratch) = if sets.is_empty() {
            (sort_key.to_string(), None)
        } else {
            let scratch = format!("tmp:threads:{}", Uuid::new_v4());
            let mut cmd = redis::cmd("ZINTERSTORE");
            cmd.arg(&scratch).arg(sets.len() + 1).arg(sort_key).arg(&sets);
            cmd.arg("WEIGHTS").arg(1);
            for _ in &sets {
                cmd.arg(0);
            }
            let _: u64 = cmd.query_async(&mut conn).await?;
            (scratch.clone(), Some(scratch))
        };

        let mut p = pipe();
        p.zcard(&source);
        if reverse {
            p.zrevrange(&source, start, stop);
        } else {
            p.zrange(&source, start, stop);
        }
        if let Some(scratch) = &scratch {
            p.del(scratch).ignore();
        }
        let (total, raw): (u64, Vec<String>) = p.query_async(&mut conn).await?;

        let threads = self.get_counted(&parse_ids(raw)).await?;
        Ok((threads, total))
    }

    async fn record_view(&self, id: Uuid) -> Result<i64, DbError> {
        let target = Target::thread(id);
        let member = id.to_string();
        let mut conn = self.conn.clone();

        let exists: bool = conn.exists(target.to_string()).await?;
        if !exists {
            return Err(DbError::Missing("thread"));
        }

        let (views,): (i64,) = pipe()
            .atomic()
            .hincr(counts_key(target), VIEWS, 1)
            .zincr(THREADS_VIEWS, &member, 1)
            .ignore()
            .sadd(SEARCH_DIRTY, &member)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(views)
    }

    async fn take_dirty_threads(&self) -> Result<Vec<Uuid>, DbError> {
        let mut conn = self.conn.clone();
        let (raw,): (Vec<String>,) = pipe()
            .atomic()
            .smembers(SEARCH_DIRTY)
            .del(SEARCH_DIRTY)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(parse_ids(raw))
    }

    async fn mark_dirty(&self, ids: &[Uuid]) -> Result<(), DbError> {
        if ids.is_empty() {
            return Ok(());
        }

        let members: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(SEARCH_DIRTY, members).await?;
        Ok(())
    }

    async fn insert_solution(&self, solution: &Solution) -> Result<(), DbError> {
        let thread = Target::thread(solution.thread_id);
        let target = Target::solution(solution.id);
        let id = solution.id.to_string();
        let mut conn = self.conn.clone();

        let exists: bool = conn.exists(thread.to_string()).await?;
        if !exists {
            return Err(DbError::Missing("thread"));
        }

        let _: () = pipe()
            .atomic()
            .set(target.to_string(), encode(solution)?)
            .ignore()
            .hset_multiple(
                counts_key(target),
                &[(UPVOTES, 0), (DOWNVOTES, 0), (COMMENTS, 0)],
            )
            .ignore()
            .zadd(
                solutions_key(solution.thread_id),
                &id,
                created_score(&solution.created_at),
            )
            .ignore()
            .zadd(solutions_score_key(solution.thread_id), &id, 0)
            .ignore()
            .sadd(SOLUTIONS_ALL, &id)
            .ignore()
            .hincr(counts_key(thread), SOLUTIONS, 1)
            .ignore()
            .sadd(SEARCH_DIRTY, solution.thread_id.to_string())
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn get_solution(&self, id: Uuid) -> Result<Option<Solution>, DbError> {
        self.get_one_counted(id).await
    }

    async fn save_solution(&self, solution: &Solution) -> Result<(), DbError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(Target::solution(solution.id).to_string(), encode(solution)?)
            .await?;
        Ok(())
    }

    async fn delete_solution(&self, id: Uuid) -> Result<(), DbError> {
        let target = Target::solution(id);
        let Some(solution) = self.get_json::<Solution>(&target.to_string()).await? else {
            return Ok(());
        };
        let thread_target = Target::thread(solution.thread_id);
        let member = id.to_string();

        let comments = self.zrange_ids(&comments_key(target)).await?;
        let attachments = self.zrange_ids(&attachments_key(target)).await?;

        let mut p = pipe();
        p.atomic();
        purge_children(&mut p, target, &comments, &attachments);
        p.del(target.to_string())
            .ignore()
            .zrem(solutions_key(solution.thread_id), &member)
            .ignore()
            .zrem(solutions_score_key(solution.thread_id), &member)
            .ignore()
            .srem(SOLUTIONS_ALL, &member)
            .ignore()
            .hincr(counts_key(thread_target), SOLUTIONS, -1)
            .ignore();

        let thread: Option<Thread> = self.get_json(&thread_target.to_string()).await?;
        if let Some(mut thread) = thread.filter(|t| t.accepted_solution_id == Some(id)) {
            thread.accepted_solution_id = None;
            p.set(thread_target.to_string(), encode(&thread)?).ignore();
        }

        let mut conn = self.conn.clone();
        let _: () = p.query_async(&mut conn).await?;
        Ok(())
    }

    async fn list_solutions(
        &self,
        thread_id: Uuid,
        sort: SolutionSort,
    ) -> Result<Vec<Solution>, DbError> {
        let key = match sort {
            SolutionSort::Top => solutions_score_key(thread_id),
            SolutionSort::Newest => solutions_key(thread_id),
        };

        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.zrevrange(&key, 0, -1).await?;
        self.get_counted(&parse_ids(raw)).await
    }

    async fn insert_comment(&self, comment: &Comment) -> Result<(), DbError> {
        let target = Target::comment(comment.id);
        let id = comment.id.to_string();
        let mut conn = self.conn.clone();

        let _: () = pipe()
            .atomic()
            .set(target.to_string(), encode(comment)?)
            .ignore()
            .hset_multiple(counts_key(target), &[(UPVOTES, 0), (DOWNVOTES, 0)])
            .ignore()
            .zadd(
                comments_key(comment.target),
                &id,
                created_score(&comment.created_at),
            )
            .ignore()
            .sadd(COMMENTS_ALL, &id)
            .ignore()
            .hincr(counts_key(comment.target), COMMENTS, 1)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn get_comment(&self, id: Uuid) -> Result<Option<Comment>, DbError> {
        self.get_one_counted(id).await
    }

    async fn save_comment(&self, comment: &Comment) -> Result<(), DbError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(Target::comment(comment.id).to_string(), encode(comment)?)
            .await?;
        Ok(())
    }

    async fn list_comments(
        &self,
        target: Target,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Comment>, u64), DbError> {
        let key = comments_key(target);
        let mut conn = self.conn.clone();

        let (total, raw): (u64, Vec<String>) = pipe()
            .zcard(&key)
            .zrange(&key, offset as isize, (offset + limit) as isize - 1)
            .query_async(&mut conn)
            .await?;

        Ok((self.get_counted(&parse_ids(raw)).await?, total))
    }

    async fn apply_vote(
        &self,
        user_id: Uuid,
        target: Target,
        request: Option<VoteKind>,
    ) -> Result<VoteOutcome, DbError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(target.to_string()).await?;
        if !exists {
            return Err(DbError::Missing("vote target"));
        }

        let rank = self.rank_of(target).await?;
        let counts = counts_key(target);

        let (previous, current, upvotes, downvotes): (String, String, i64, i64) = self
            .vote_script
            .key(votes_key(target))
            .key(&counts)
            .key(rank.as_deref().unwrap_or(&counts))
            .arg(user_id.to_string())
            .arg(request.map(|kind| kind.as_str()).unwrap_or(""))
            .arg(if rank.is_some() {
                target.id.to_string()
            } else {
                String::new()
            })
            .invoke_async(&mut conn)
            .await?;

        let previous = VoteKind::parse(&previous);
        let current = VoteKind::parse(&current);

        if target.kind == TargetKind::Thread && previous != current {
            let _: () = conn.sadd(SEARCH_DIRTY, target.id.to_string()).await?;
        }

        Ok(VoteOutcome {
            previous,
            current,
            votes: VoteTally { upvotes, downvotes },
        })
    }

    async fn get_vote(&self, user_id: Uuid, target: Target) -> Result<Option<VoteKind>, DbError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(votes_key(target), user_id.to_string()).await?;
        Ok(raw.as_deref().and_then(VoteKind::parse))
    }

    async fn list_ids(&self, kind: TargetKind) -> Result<Vec<Uuid>, DbError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = match kind {
            TargetKind::Thread => conn.zrange(THREADS_CREATED, 0, -1).await?,
            TargetKind::Solution => conn.smembers(SOLUTIONS_ALL).await?,
            TargetKind::Comment => conn.smembers(COMMENTS_ALL).await?,
        };
        Ok(parse_ids(raw))
    }

    async fn recount_votes(&self, target: Target) -> Result<bool, DbError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(target.to_string()).await?;
        if !exists {
            return Ok(false);
        }

        let votes: HashMap<String, String> = conn.hgetall(votes_key(target)).await?;
        let kinds: Vec<VoteKind> = votes.values().filter_map(|v| VoteKind::parse(v)).collect();
        let counted = tally(kinds.iter());

        let counts: HashMap<String, i64> = conn.hgetall(counts_key(target)).await?;
        if tally_of(&counts) == counted {
            return Ok(false);
        }

        let mut p = pipe();
        p.atomic().hset_multiple(
            counts_key(target),
            &[(UPVOTES, counted.upvotes), (DOWNVOTES, counted.downvotes)],
        );
        p.ignore();
        if let Some(rank) = self.rank_of(target).await? {
            p.cmd("ZADD")
                .arg(rank)
                .arg("XX")
                .arg(counted.score())
                .arg(target.id.to_string())
                .ignore();
        }
        if target.kind == TargetKind::Thread {
            p.sadd(SEARCH_DIRTY, target.id.to_string()).ignore();
        }

        let _: () = p.query_async(&mut conn).await?;
        Ok(true)
    }

    async fn insert_bounty(&self, bounty: &Bounty) -> Result<(), DbError> {
        let mut conn = self.conn.clone();
        let _: () = pipe()
            .atomic()
            .set(bounty_key(bounty.id), encode(bounty)?)
            .ignore()
            .zadd(
                bounties_key(bounty.thread_id),
                bounty.id.to_string(),
                created_score(&bounty.created_at),
            )
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_bounty(&self, id: Uuid) -> Result<Option<Bounty>, DbError> {
        self.get_json(&bounty_key(id)).await
    }

    async fn list_bounties(&self, thread_id: Uuid) -> Result<Vec<Bounty>, DbError> {
        let ids = self.zrange_ids(&bounties_key(thread_id)).await?;
        let keys: Vec<String> = ids.into_iter().map(bounty_key).collect();
        self.get_many(&keys).await
    }

    async fn transition_bounty(
        &self,
        from: BountyStatus,
        bounty: &Bounty,
    ) -> Result<bool, DbError> {
        let mut conn = self.conn.clone();
        let swapped: i64 = self
            .bounty_script
            .key(bounty_key(bounty.id))
            .arg(from.as_str())
            .arg(encode(bounty)?)
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped == 1)
    }

    async fn insert_attachment(&self, attachment: &Attachment) -> Result<(), DbError> {
        let mut conn = self.conn.clone();
        let _: () = pipe()
            .atomic()
            .set(attachment_key(attachment.id), encode(attachment)?)
            .ignore()
            .zadd(
                attachments_key(attachment.target),
                attachment.id.to_string(),
                created_score(&attachment.created_at),
            )
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_attachment(&self, id: Uuid) -> Result<Option<Attachment>, DbError> {
        self.get_json(&attachment_key(id)).await
    }

    async fn list_attachments(&self, target: Target) -> Result<Vec<Attachment>, DbError> {
        let ids = self.zrange_ids(&attachments_key(target)).await?;
        let keys: Vec<String> = ids.into_iter().map(attachment_key).collect();
        self.get_many(&keys).await
    }

    async fn delete_attachment(&self, id: Uuid) -> Result<(), DbError> {
        let Some(attachment) = self.get_attachment(id).await? else {
            return Ok(());
        };

        let mut conn = self.conn.clone();
        let _: () = pipe()
            .atomic()
            .del(attachment_key(id))
            .ignore()
            .zrem(attachments_key(attachment.target), id.to_string())
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
