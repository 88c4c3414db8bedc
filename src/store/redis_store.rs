//! Redis-backed submission store
//!
//! Layout:
//! - `judge:submission:{id}` submission record (JSON)
//! - `judge:problem:{id}` problem with its test cases (JSON)
//! - `judge:queue` list of submission ids waiting to be judged
//! - `judge:results` channel announcing committed verdicts

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::AsyncCommands;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Problem, Submission, SubmissionQueue, SubmissionStore};
use crate::core::{StoreError, SubmissionStatus, Verdict};

/// Redis key constants
pub mod keys {
    /// Judge job queue key
    pub const JUDGE_QUEUE: &str = "judge:queue";

    /// Submission record key prefix
    pub const SUBMISSION_PREFIX: &str = "judge:submission:";

    /// Problem record key prefix
    pub const PROBLEM_PREFIX: &str = "judge:problem:";

    /// Judge result channel (for pub/sub)
    pub const JUDGE_RESULT_CHANNEL: &str = "judge:results";
}

/// Replaces the record only while it is still pending.
/// Returns 1 on success, 0 if missing, -1 if already judged.
const COMMIT_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    return 0
end
local record = cjson.decode(current)
if record.status ~= 'pending' then
    return -1
end
redis.call('SET', KEYS[1], ARGV[1])
return 1
"#;

/// Message published on [`keys::JUDGE_RESULT_CHANNEL`]
#[derive(Debug, Serialize)]
struct VerdictMessage<'a> {
    submission_id: i64,
    verdict: Verdict,
    execution_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<&'a str>,
}

pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
    /// BLPOP blocks its connection, so the queue gets its own
    queue_conn: Mutex<MultiplexedConnection>,
    commit_script: redis::Script,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let queue_conn = get_connection_with_retry(&client).await;
        let conn = ConnectionManager::new(client.clone())
            .await
            .context("Failed to create Redis connection manager")?;
        info!("Connected to Redis at {}", redis_url);

        Ok(Self {
            client,
            conn,
            queue_conn: Mutex::new(queue_conn),
            commit_script: redis::Script::new(COMMIT_SCRIPT),
        })
    }

    pub async fn put_submission(&self, submission: &Submission) -> Result<(), StoreError> {
        let json = serde_json::to_string(submission)?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(submission_key(submission.id), json)
            .await?;
        Ok(())
    }

    pub async fn put_problem(&self, problem: &Problem) -> Result<(), StoreError> {
        let json = serde_json::to_string(problem)?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(problem_key(problem.id), json).await?;
        Ok(())
    }
}

#[async_trait]
impl SubmissionQueue for RedisStore {
    /// Wait up to `timeout` for the next submission id on the queue.
    ///
    /// Reconnects on connection failure; malformed entries are skipped.
    async fn pop_submission_id(&self, timeout: Duration) -> Option<i64> {
        let mut conn = self.queue_conn.lock().await;
        let result: Option<(String, String)> =
            match conn.blpop(keys::JUDGE_QUEUE, timeout.as_secs_f64()).await {
                Ok(res) => res,
                Err(e) => {
                    warn!("Redis BLPOP failed: {}. Reconnecting...", e);
                    *conn = get_connection_with_retry(&self.client).await;
                    return None;
                }
            };

        let (_, data) = result?;
        match data.trim().parse::<i64>() {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Ignoring malformed queue entry {:?}: {}", data, e);
                None
            }
        }
    }

    async fn push_submission_id(&self, id: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(keys::JUDGE_QUEUE, id).await?;
        Ok(())
    }
}

#[async_trait]
impl SubmissionStore for RedisStore {
    async fn get_submission(&self, id: i64) -> Result<Submission, StoreError> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn.get(submission_key(id)).await?;
        let data = data.ok_or(StoreError::SubmissionNotFound(id))?;
        Ok(serde_json::from_str(&data)?)
    }

    async fn get_problem(&self, id: i64) -> Result<Problem, StoreError> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn.get(problem_key(id)).await?;
        let data = data.ok_or(StoreError::ProblemNotFound(id))?;
        let mut problem: Problem = serde_json::from_str(&data)?;
        problem.testcases.sort_by_key(|tc| tc.id);
        Ok(problem)
    }

    async fn commit_verdict(
        &self,
        submission_id: i64,
        verdict: Verdict,
        elapsed_seconds: f64,
        diagnostic: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut submission = self.get_submission(submission_id).await?;
        submission.status = SubmissionStatus::Judged(verdict);
        submission.execution_time = Some(elapsed_seconds);
        submission.error_message = diagnostic.map(str::to_string);
        let json = serde_json::to_string(&submission)?;

        // The whole record is replaced by one SET inside the script
        let mut conn = self.conn.clone();
        let outcome: i32 = self
            .commit_script
            .key(submission_key(submission_id))
            .arg(json)
            .invoke_async(&mut conn)
            .await?;
        match outcome {
            1 => {}
            0 => return Err(StoreError::SubmissionNotFound(submission_id)),
            _ => return Err(StoreError::AlreadyCommitted(submission_id)),
        }

        let message = serde_json::to_string(&VerdictMessage {
            submission_id,
            verdict,
            execution_time: elapsed_seconds,
            error_message: diagnostic,
        })?;
        // Ignore publish errors as there may be no subscribers
        if let Err(e) = conn
            .publish::<_, _, ()>(keys::JUDGE_RESULT_CHANNEL, message)
            .await
        {
            debug!("Failed to publish verdict for {}: {}", submission_id, e);
        }

        Ok(())
    }
}

fn submission_key(id: i64) -> String {
    format!("{}{}", keys::SUBMISSION_PREFIX, id)
}

fn problem_key(id: i64) -> String {
    format!("{}{}", keys::PROBLEM_PREFIX, id)
}

/// Get a Redis connection with retry logic
async fn get_connection_with_retry(client: &redis::Client) -> MultiplexedConnection {
    loop {
        match client.get_multiplexed_async_connection().await {
            Ok(conn) => return conn,
            Err(e) => {
                warn!(
                    "Failed to connect to Redis: {}. Retrying in 3 seconds...",
                    e
                );
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
        }
    }
}
