//! Error envelope: deadline-bounded calls, bounded retry with backoff,
//! catch-and-fallback, and the append-only dead-letter log.
//!
//! Retries happen only for transient failures (timeouts, 5xx, 429, transport
//! errors); client errors fail immediately. Nothing in here ever panics on an
//! upstream failure.

use crate::error::{is_retryable, ArgusError};
use anyhow::Result;
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Rotate the dead-letter file once it exceeds this size.
const ROTATE_BYTES: u64 = 10 * 1024 * 1024;

/// Wrap a single outbound call with a cancellation deadline of `ms`
/// milliseconds. The future is dropped (cancelled) on expiry.
pub async fn with_deadline<T>(ms: u64, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(Duration::from_millis(ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(ArgusError::Timeout(ms).into()),
    }
}

/// Attempt budget for `retry_with_backoff`: the first attempt gets 30 s, the
/// retry 15 s (total ≤ 45 s); delays double from 500 ms.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    pub attempt_deadlines_ms: Vec<u64>,
    pub base_delay_ms: u64,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            attempt_deadlines_ms: vec![30_000, 15_000],
            base_delay_ms: 500,
        }
    }
}

/// Invoke `op` up to `schedule.attempt_deadlines_ms.len()` times, each
/// attempt bounded by its deadline. A retry is taken only when the failure
/// classifies retryable (timeout, 5xx, 429, recognized transport error).
pub async fn retry_with_backoff<T, F, Fut>(
    op_name: &str,
    schedule: &RetrySchedule,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = schedule.attempt_deadlines_ms.len();
    if attempts == 0 {
        anyhow::bail!("retry schedule for {} has no attempts", op_name);
    }
    let mut delay_ms = schedule.base_delay_ms;

    for (i, deadline_ms) in schedule.attempt_deadlines_ms.iter().enumerate() {
        match with_deadline(*deadline_ms, op()).await {
            Ok(value) => {
                if i > 0 {
                    tracing::info!("{} succeeded on attempt {}", op_name, i + 1);
                }
                return Ok(value);
            }
            Err(e) => {
                let last = i + 1 == attempts;
                if last || !is_retryable(&e) {
                    return Err(e);
                }
                tracing::warn!(
                    "{} failed on attempt {}/{}, retrying in {}ms: {:#}",
                    op_name,
                    i + 1,
                    attempts,
                    delay_ms,
                    e
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms *= 2;
            }
        }
    }

    unreachable!("the loop returns on the last attempt")
}

/// Append-only JSONL log of payloads whose writes failed. One JSON object per
/// line; rotates to `.old` (overwriting any previous `.old`) at 10 MB.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    path: PathBuf,
}

#[derive(Serialize)]
struct DeadLetterRecord<'a> {
    timestamp: String,
    operation: &'a str,
    data: &'a serde_json::Value,
    error: String,
}

impl DeadLetter {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. Errors writing the dead-letter itself are logged
    /// and swallowed; this is the recovery surface, not a failure source.
    pub fn append(&self, operation: &str, data: &serde_json::Value, error: &anyhow::Error) {
        let record = DeadLetterRecord {
            timestamp: chrono::Utc::now().to_rfc3339(),
            operation,
            data,
            error: format!("{error:#}"),
        };
        if let Err(e) = self.append_line(&record) {
            tracing::error!("dead-letter append failed for {}: {:#}", operation, e);
        }
    }

    /// Append an arbitrary JSON record under the same rotation policy. Used
    /// by the failed-reminders log, which shares the mechanics but not the
    /// line shape.
    pub fn append_json(&self, record: &serde_json::Value) {
        if let Err(e) = self.append_raw(record) {
            tracing::error!("append to {} failed: {:#}", self.path.display(), e);
        }
    }

    fn append_line(&self, record: &DeadLetterRecord<'_>) -> Result<()> {
        self.append_raw(&serde_json::to_value(record)?)
    }

    fn append_raw(&self, record: &serde_json::Value) -> Result<()> {
        use std::io::Write;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.rotate_if_needed()?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    // The size check is racy across tasks; at most one spurious rotation.
    fn rotate_if_needed(&self) -> Result<()> {
        let size = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(()),
        };
        if size > ROTATE_BYTES {
            let old = self.path.with_extension("jsonl.old");
            std::fs::rename(&self.path, &old)?;
            tracing::info!("rotated {} to {}", self.path.display(), old.display());
        }
        Ok(())
    }

    /// Count of records in the current file. Used by health reporting.
    pub fn line_count(&self) -> usize {
        std::fs::read_to_string(&self.path)
            .map(|s| s.lines().filter(|l| !l.trim().is_empty()).count())
            .unwrap_or(0)
    }
}

/// Catch-and-fallback wrapper shared by the store adapter and the pipeline.
///
/// `run` swallows failures and hands back the caller's fallback value;
/// `run_dead_letter` additionally appends the payload to the dead-letter
/// file. With `debug_errors` set the error is re-thrown instead.
#[derive(Clone)]
pub struct Guard {
    dead_letter: Arc<DeadLetter>,
    debug_errors: bool,
}

impl Guard {
    pub fn new(dead_letter: DeadLetter, debug_errors: bool) -> Self {
        Self {
            dead_letter: Arc::new(dead_letter),
            debug_errors,
        }
    }

    pub fn dead_letter(&self) -> &DeadLetter {
        &self.dead_letter
    }

    pub async fn run<T>(
        &self,
        context: &str,
        fallback: T,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match fut.await {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::warn!("{} failed: {:#}", context, e);
                if self.debug_errors {
                    Err(e)
                } else {
                    Ok(fallback)
                }
            }
        }
    }

    pub async fn run_dead_letter<T>(
        &self,
        context: &str,
        fallback: T,
        payload: serde_json::Value,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match fut.await {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::warn!("{} failed, dead-lettering payload: {:#}", context, e);
                self.dead_letter.append(context, &payload, &e);
                if self.debug_errors {
                    Err(e)
                } else {
                    Ok(fallback)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_with_deadline_passes_through() {
        let result = with_deadline(1_000, async { Ok(42) }).await.unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn test_with_deadline_times_out() {
        let err = with_deadline(10, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1)
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ArgusError>(),
            Some(ArgusError::Timeout(10))
        ));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let calls = AtomicU32::new(0);
        let schedule = RetrySchedule {
            attempt_deadlines_ms: vec![1_000, 1_000],
            base_delay_ms: 1,
        };
        let result = retry_with_backoff("test", &schedule, || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ArgusError::upstream(503).into())
            } else {
                Ok("ok")
            }
        })
        .await
        .unwrap();
        assert_eq!(result, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_skips_client_errors() {
        let calls = AtomicU32::new(0);
        let schedule = RetrySchedule {
            attempt_deadlines_ms: vec![1_000, 1_000],
            base_delay_ms: 1,
        };
        let err = retry_with_backoff("test", &schedule, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ArgusError::upstream(400).into())
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(err.to_string().contains("400"));
    }

    #[tokio::test]
    async fn test_retry_exhausts_budget() {
        let calls = AtomicU32::new(0);
        let schedule = RetrySchedule {
            attempt_deadlines_ms: vec![1_000, 1_000],
            base_delay_ms: 1,
        };
        let err = retry_with_backoff("test", &schedule, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ArgusError::upstream(503).into())
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_guard_returns_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let guard = Guard::new(DeadLetter::new(dir.path().join("dl.jsonl")), false);
        let value = guard
            .run("op", -1, async { anyhow::bail!("boom") })
            .await
            .unwrap();
        assert_eq!(value, -1);
    }

    #[tokio::test]
    async fn test_guard_debug_mode_rethrows() {
        let dir = tempfile::tempdir().unwrap();
        let guard = Guard::new(DeadLetter::new(dir.path().join("dl.jsonl")), true);
        let result = guard.run("op", 0, async { anyhow::bail!("boom") }).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_guard_dead_letters_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dl.jsonl");
        let guard = Guard::new(DeadLetter::new(&path), false);
        let payload = serde_json::json!({"title": "lost event"});
        let value = guard
            .run_dead_letter("insert_event", -1, payload, async { anyhow::bail!("disk full") })
            .await
            .unwrap();
        assert_eq!(value, -1);

        let content = std::fs::read_to_string(&path).unwrap();
        let record: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(record["operation"], "insert_event");
        assert_eq!(record["data"]["title"], "lost event");
        assert!(record["error"].as_str().unwrap().contains("disk full"));
        assert!(record["timestamp"].is_string());
    }

    #[test]
    fn test_dead_letter_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dl.jsonl");
        // Pre-fill past the rotation threshold.
        std::fs::write(&path, vec![b'x'; (ROTATE_BYTES + 1) as usize]).unwrap();

        let dl = DeadLetter::new(&path);
        dl.append(
            "op",
            &serde_json::json!({}),
            &anyhow::anyhow!("trigger rotation"),
        );

        let old = path.with_extension("jsonl.old");
        assert!(old.exists());
        // Fresh file contains only the new record.
        assert_eq!(dl.line_count(), 1);
    }
}
