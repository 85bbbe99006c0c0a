//! Degraded-mode orchestration for AI-backed calls.
//!
//! Tracks consecutive LLM failures and selects which tier runs: T1 (LLM),
//! T2 (deterministic heuristics), or T3 (cache / safe default). While
//! degraded, a background probe retries a lightweight LLM call every 60 s
//! and re-escalates to T1 on the first success; an elapsed cooldown also
//! resets optimistically.

use anyhow::Result;
use argus_core::TierMode;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Probe cadence while degraded.
const PROBE_INTERVAL: Duration = Duration::from_secs(60);

pub type ProbeFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
pub type ProbeFn = Arc<dyn Fn() -> ProbeFuture + Send + Sync>;

/// Escalation table: consecutive failures → (tier, cooldown).
/// The base cooldown applies to the first bracket only.
fn escalate(consecutive: u32, base_cooldown: Duration) -> (u8, Duration) {
    match consecutive {
        0..=2 => (2, base_cooldown),
        3..=9 => (2, Duration::from_secs(300)),
        _ => (3, Duration::from_secs(900)),
    }
}

struct TierState {
    tier: u8,
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
    last_success: Option<i64>,
    last_failure: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TierStatus {
    pub tier: u8,
    pub mode: String,
    #[serde(rename = "consecutiveFailures")]
    pub consecutive_failures: u32,
    #[serde(rename = "cooldownRemainingSec")]
    pub cooldown_remaining_sec: Option<u64>,
    #[serde(rename = "lastSuccess")]
    pub last_success: Option<i64>,
    #[serde(rename = "lastFailure")]
    pub last_failure: Option<i64>,
}

pub struct TierOrchestrator {
    mode: TierMode,
    base_cooldown: Duration,
    state: Mutex<TierState>,
    probe_fn: Mutex<Option<ProbeFn>>,
    probe_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl TierOrchestrator {
    pub fn new(mode: TierMode, base_cooldown: Duration) -> Self {
        Self {
            mode,
            base_cooldown,
            state: Mutex::new(TierState {
                tier: 1,
                consecutive_failures: 0,
                cooldown_until: None,
                last_success: None,
                last_failure: None,
            }),
            probe_fn: Mutex::new(None),
            probe_handle: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> TierMode {
        self.mode
    }

    /// Register the lightweight probe run while degraded.
    pub fn register_probe(&self, probe: ProbeFn) {
        *self.probe_fn.lock().unwrap() = Some(probe);
    }

    /// The tier that would run right now. In auto mode an elapsed cooldown
    /// optimistically resets to T1 and cancels the probe.
    pub fn current_tier(&self) -> u8 {
        match self.mode {
            TierMode::ForceT1 => return 1,
            TierMode::ForceT2 => return 2,
            TierMode::ForceT3 => return 3,
            TierMode::Auto => {}
        }
        let mut reset = false;
        let tier = {
            let mut state = self.state.lock().unwrap();
            if let Some(until) = state.cooldown_until {
                if Instant::now() > until {
                    state.tier = 1;
                    state.cooldown_until = None;
                    reset = true;
                }
            }
            state.tier
        };
        if reset {
            self.cancel_probe();
        }
        tier
    }

    /// Record an LLM failure and apply the escalation table.
    pub fn report_failure(self: &Arc<Self>) {
        let consecutive = {
            let mut state = self.state.lock().unwrap();
            state.consecutive_failures += 1;
            state.last_failure = Some(argus_core::now_secs());
            let (tier, cooldown) = escalate(state.consecutive_failures, self.base_cooldown);
            state.tier = tier;
            state.cooldown_until = Some(Instant::now() + cooldown);
            state.consecutive_failures
        };
        tracing::warn!(
            "LLM failure #{}, degrading to tier {}",
            consecutive,
            self.state.lock().unwrap().tier
        );
        self.ensure_probe();
    }

    /// Any LLM success resets to T1 and cancels the probe.
    pub fn report_success(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.tier = 1;
            state.consecutive_failures = 0;
            state.cooldown_until = None;
            state.last_success = Some(argus_core::now_secs());
        }
        self.cancel_probe();
    }

    pub fn status(&self) -> TierStatus {
        let state = self.state.lock().unwrap();
        TierStatus {
            tier: match self.mode {
                TierMode::ForceT1 => 1,
                TierMode::ForceT2 => 2,
                TierMode::ForceT3 => 3,
                TierMode::Auto => state.tier,
            },
            mode: self.mode.as_str().to_string(),
            consecutive_failures: state.consecutive_failures,
            cooldown_remaining_sec: state.cooldown_until.and_then(|until| {
                until.checked_duration_since(Instant::now()).map(|d| d.as_secs())
            }),
            last_success: state.last_success,
            last_failure: state.last_failure,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().unwrap().consecutive_failures
    }

    /// The call-site contract. In auto mode: T1 with degradation to T2, then
    /// the safe default. Forced modes run only their tier, falling to the
    /// safe default on error so callers never observe a failure.
    pub async fn with_fallback<T>(
        self: &Arc<Self>,
        op_name: &str,
        t1: impl Future<Output = Result<T>>,
        t2: impl Future<Output = Result<T>>,
        t3: T,
    ) -> T {
        match self.mode {
            TierMode::ForceT1 => {
                return match t1.await {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!("{} forced-T1 failed: {:#}", op_name, e);
                        t3
                    }
                };
            }
            TierMode::ForceT2 => {
                return match t2.await {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!("{} forced-T2 failed: {:#}", op_name, e);
                        t3
                    }
                };
            }
            TierMode::ForceT3 => return t3,
            TierMode::Auto => {}
        }

        let tier = self.current_tier();
        if tier <= 1 {
            match t1.await {
                Ok(value) => {
                    self.report_success();
                    return value;
                }
                Err(e) => {
                    tracing::warn!("{} tier-1 failed: {:#}", op_name, e);
                    self.report_failure();
                }
            }
        }
        if tier <= 2 {
            // Heuristic failures never feed the failure counter; only LLM
            // health is tracked here.
            match t2.await {
                Ok(value) => return value,
                Err(e) => {
                    tracing::warn!("{} tier-2 failed: {:#}", op_name, e);
                }
            }
        }
        t3
    }

    fn ensure_probe(self: &Arc<Self>) {
        let probe = match self.probe_fn.lock().unwrap().clone() {
            Some(p) => p,
            None => return,
        };
        let mut handle_slot = self.probe_handle.lock().unwrap();
        if handle_slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let this = Arc::clone(self);
        *handle_slot = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(PROBE_INTERVAL).await;
                match probe().await {
                    Ok(()) => {
                        tracing::info!("health probe succeeded, re-escalating to tier 1");
                        this.report_success();
                        return;
                    }
                    Err(e) => {
                        tracing::debug!("health probe still failing: {:#}", e);
                    }
                }
            }
        }));
    }

    fn cancel_probe(&self) {
        let handle = self.probe_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for TierOrchestrator {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.probe_handle.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_core::ArgusError;

    fn orchestrator(mode: TierMode) -> Arc<TierOrchestrator> {
        Arc::new(TierOrchestrator::new(mode, Duration::from_secs(30)))
    }

    #[test]
    fn test_escalation_table() {
        let base = Duration::from_secs(30);
        assert_eq!(escalate(1, base), (2, base));
        assert_eq!(escalate(2, base), (2, base));
        assert_eq!(escalate(3, base), (2, Duration::from_secs(300)));
        assert_eq!(escalate(9, base), (2, Duration::from_secs(300)));
        assert_eq!(escalate(10, base), (3, Duration::from_secs(900)));
        assert_eq!(escalate(50, base), (3, Duration::from_secs(900)));
    }

    #[tokio::test]
    async fn test_failure_degrades_and_success_resets() {
        let orch = orchestrator(TierMode::Auto);
        assert_eq!(orch.current_tier(), 1);

        orch.report_failure();
        assert_eq!(orch.current_tier(), 2);
        assert_eq!(orch.consecutive_failures(), 1);

        orch.report_success();
        assert_eq!(orch.current_tier(), 1);
        assert_eq!(orch.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_ten_failures_reach_tier_three() {
        let orch = orchestrator(TierMode::Auto);
        for _ in 0..10 {
            orch.report_failure();
        }
        assert_eq!(orch.current_tier(), 3);
        let status = orch.status();
        assert_eq!(status.tier, 3);
        assert!(status.cooldown_remaining_sec.unwrap() > 800);
    }

    #[tokio::test]
    async fn test_with_fallback_uses_t1_on_success() {
        let orch = orchestrator(TierMode::Auto);
        let value = orch
            .with_fallback("op", async { Ok(1) }, async { Ok(2) }, 3)
            .await;
        assert_eq!(value, 1);
        assert_eq!(orch.current_tier(), 1);
    }

    #[tokio::test]
    async fn test_with_fallback_degrades_to_t2() {
        let orch = orchestrator(TierMode::Auto);
        let value = orch
            .with_fallback(
                "op",
                async { Err::<i32, _>(ArgusError::upstream(503).into()) },
                async { Ok(2) },
                3,
            )
            .await;
        assert_eq!(value, 2);
        // The failure was recorded.
        assert_eq!(orch.consecutive_failures(), 1);
        assert_eq!(orch.current_tier(), 2);

        // Next call skips T1 entirely.
        let value = orch
            .with_fallback("op", async { Ok(1) }, async { Ok(2) }, 3)
            .await;
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn test_with_fallback_t2_error_reaches_default() {
        let orch = orchestrator(TierMode::Auto);
        let value = orch
            .with_fallback(
                "op",
                async { Err::<i32, _>(ArgusError::upstream(500).into()) },
                async { Err(anyhow::anyhow!("heuristic broke")) },
                3,
            )
            .await;
        assert_eq!(value, 3);
        // Heuristic failure does not count against LLM health.
        assert_eq!(orch.consecutive_failures(), 1);
    }

    #[tokio::test]
    async fn test_forced_modes_run_only_their_tier() {
        let orch = orchestrator(TierMode::ForceT2);
        let value = orch
            .with_fallback("op", async { Ok(1) }, async { Ok(2) }, 3)
            .await;
        assert_eq!(value, 2);

        let orch = orchestrator(TierMode::ForceT3);
        let value = orch
            .with_fallback("op", async { Ok(1) }, async { Ok(2) }, 3)
            .await;
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_cooldown_elapse_resets_optimistically() {
        let orch = Arc::new(TierOrchestrator::new(TierMode::Auto, Duration::from_millis(10)));
        orch.report_failure();
        assert_eq!(orch.current_tier(), 2);
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Cooldown elapsed: back to T1 without an explicit success.
        assert_eq!(orch.current_tier(), 1);
    }

    #[tokio::test]
    async fn test_status_shape() {
        let orch = orchestrator(TierMode::Auto);
        orch.report_failure();
        let status = orch.status();
        assert_eq!(status.mode, "auto");
        assert_eq!(status.tier, 2);
        assert_eq!(status.consecutive_failures, 1);
        assert!(status.cooldown_remaining_sec.is_some());
        assert!(status.last_failure.is_some());
        assert!(status.last_success.is_none());
    }
}
