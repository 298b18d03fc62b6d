//! Per-request admission decisions.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace};

use super::counter::{Clock, RateCounter};
use super::policy::OperationName;
use super::state::RateLimitState;

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The current window is at capacity
    RateLimitExceeded,
    /// The counter could not place the request in a window; failing closed
    CounterInconsistent,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::RateLimitExceeded => "rate limit exceeded",
            RejectReason::CounterInconsistent => "rate counter inconsistent",
        }
    }
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    Admit,
    Reject(RejectReason),
}

impl AdmissionDecision {
    pub fn admit(&self) -> bool {
        matches!(self, AdmissionDecision::Admit)
    }

    pub fn reason(&self) -> Option<&'static str> {
        match self {
            AdmissionDecision::Admit => None,
            AdmissionDecision::Reject(reason) => Some(reason.as_str()),
        }
    }
}

/// Distinct operations tracked in the per-operation rejection counts.
pub const MAX_TRACKED_OPERATIONS: usize = 128;

/// Bucket for rejections of operations beyond [`MAX_TRACKED_OPERATIONS`].
pub const OTHER_OPERATIONS: &str = "<other>";

/// Running totals of admission outcomes.
///
/// The per-operation map holds at most `MAX_TRACKED_OPERATIONS` names plus the
/// `OTHER_OPERATIONS` bucket, whatever paths clients send.
#[derive(Debug, Default)]
pub struct AdmissionStats {
    admitted: AtomicU64,
    exempt: AtomicU64,
    rejected: AtomicU64,
    rejected_by_operation: DashMap<OperationName, u64>,
}

/// Point-in-time copy of [`AdmissionStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Includes exempt admissions
    pub admitted: u64,
    pub exempt: u64,
    pub rejected: u64,
    pub rejected_by_operation: Vec<(OperationName, u64)>,
}

impl AdmissionStats {
    fn record_admit(&self, exempt: bool) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
        if exempt {
            self.exempt.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_reject(&self, operation: &OperationName) {
        self.rejected.fetch_add(1, Ordering::Relaxed);

        if let Some(mut count) = self.rejected_by_operation.get_mut(operation) {
            *count += 1;
            return;
        }

        let key = if self.rejected_by_operation.len() < MAX_TRACKED_OPERATIONS {
            operation.clone()
        } else {
            OperationName::new(OTHER_OPERATIONS)
        };
        *self.rejected_by_operation.entry(key).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let mut rejected_by_operation: Vec<_> = self
            .rejected_by_operation
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        rejected_by_operation.sort();

        StatsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            exempt: self.exempt.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            rejected_by_operation,
        }
    }
}

/// Decides, before any handler runs, whether a request may proceed.
///
/// Safe to share across every request-handling task; `decide` takes no
/// locks and performs no I/O.
#[derive(Debug)]
pub struct AdmissionGate {
    state: Arc<RateLimitState>,
    counter: RateCounter,
    stats: AdmissionStats,
}

impl AdmissionGate {
    pub fn new(state: Arc<RateLimitState>) -> Self {
        Self {
            state,
            counter: RateCounter::new(),
            stats: AdmissionStats::default(),
        }
    }

    pub fn with_clock(state: Arc<RateLimitState>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state,
            counter: RateCounter::with_clock(clock),
            stats: AdmissionStats::default(),
        }
    }

    pub fn decide(&self, operation: &OperationName) -> AdmissionDecision {
        let policy = self.state.get();

        if !policy.enabled {
            self.stats.record_admit(false);
            return AdmissionDecision::Admit;
        }

        if policy.is_exempt(operation) {
            trace!(operation = %operation, "Exempt operation admitted");
            self.stats.record_admit(true);
            return AdmissionDecision::Admit;
        }

        let Some(limit) = policy.max_requests_per_second else {
            self.stats.record_admit(false);
            return AdmissionDecision::Admit;
        };

        let decision = match self.counter.try_acquire(limit) {
            Ok(true) => AdmissionDecision::Admit,
            Ok(false) => AdmissionDecision::Reject(RejectReason::RateLimitExceeded),
            Err(e) => {
                error!(operation = %operation, error = %e, "Rate counter inconsistent, rejecting");
                AdmissionDecision::Reject(RejectReason::CounterInconsistent)
            }
        };

        match decision {
            AdmissionDecision::Admit => self.stats.record_admit(false),
            AdmissionDecision::Reject(reason) => {
                debug!(
                    operation = %operation,
                    limit,
                    reason = reason.as_str(),
                    "Request rejected by congestion control"
                );
                self.stats.record_reject(operation);
            }
        }

        decision
    }

    pub fn state(&self) -> &Arc<RateLimitState> {
        &self.state
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Requests counted against the limit in the current window.
    pub fn current_window_count(&self) -> u32 {
        self.counter.current_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion::counter::{ManualClock, WINDOW};
    use crate::congestion::policy::RateLimitPolicy;
    use std::collections::BTreeSet;
    use std::time::Duration;

    const SAY_HELLO: &str = "/samples.api.GreeterService/SayHello";
    const PING: &str = "/samples.api.GreeterService/Ping";

    fn exempt_ping() -> BTreeSet<OperationName> {
        [OperationName::from(PING)].into_iter().collect()
    }

    fn gate_with_clock() -> (AdmissionGate, ManualClock) {
        let clock = ManualClock::new();
        let state = Arc::new(RateLimitState::new(RateLimitPolicy::disabled(exempt_ping())));
        (AdmissionGate::with_clock(state, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_disabled_admits_everything() {
        let (gate, _clock) = gate_with_clock();
        // A limit present on a disabled policy is ignored
        gate.state()
            .apply(RateLimitPolicy {
                enabled: false,
                max_requests_per_second: Some(0),
                exempt_operations: exempt_ping(),
            })
            .unwrap();

        for _ in 0..1000 {
            assert!(gate.decide(&SAY_HELLO.into()).admit());
        }
        assert_eq!(gate.stats().admitted, 1000);
        assert_eq!(gate.stats().rejected, 0);
    }

    #[test]
    fn test_exempt_admitted_under_full_shed() {
        let (gate, _clock) = gate_with_clock();
        gate.state().apply(RateLimitPolicy::limited(0, exempt_ping())).unwrap();

        for _ in 0..100 {
            assert_eq!(gate.decide(&PING.into()), AdmissionDecision::Admit);
        }
        assert_eq!(gate.stats().exempt, 100);
    }

    #[test]
    fn test_full_shed_rejects_non_exempt() {
        let (gate, _clock) = gate_with_clock();
        gate.state().apply(RateLimitPolicy::limited(0, exempt_ping())).unwrap();

        let decision = gate.decide(&SAY_HELLO.into());

        assert!(!decision.admit());
        assert_eq!(decision.reason(), Some("rate limit exceeded"));
        assert_eq!(
            gate.stats().rejected_by_operation,
            vec![(OperationName::from(SAY_HELLO), 1)]
        );
    }

    #[test]
    fn test_disable_after_shed_restores_admission() {
        let (gate, _clock) = gate_with_clock();
        gate.state().apply(RateLimitPolicy::limited(0, exempt_ping())).unwrap();
        assert!(!gate.decide(&SAY_HELLO.into()).admit());

        gate.state().apply(RateLimitPolicy::disabled(exempt_ping())).unwrap();

        assert!(gate.decide(&SAY_HELLO.into()).admit());
    }

    #[test]
    fn test_engaged_without_limit_admits() {
        let (gate, _clock) = gate_with_clock();
        gate.state()
            .apply(RateLimitPolicy {
                enabled: true,
                max_requests_per_second: None,
                exempt_operations: BTreeSet::new(),
            })
            .unwrap();

        assert!(gate.decide(&SAY_HELLO.into()).admit());
    }

    #[test]
    fn test_graded_limit_per_window() {
        let (gate, clock) = gate_with_clock();
        gate.state().apply(RateLimitPolicy::limited(3, exempt_ping())).unwrap();

        let admitted = (0..10).filter(|_| gate.decide(&SAY_HELLO.into()).admit()).count();
        assert_eq!(admitted, 3);
        assert_eq!(gate.current_window_count(), 3);

        // Exempt traffic does not consume the budget
        assert!(gate.decide(&PING.into()).admit());

        clock.advance(WINDOW);
        let admitted = (0..10).filter(|_| gate.decide(&SAY_HELLO.into()).admit()).count();
        assert_eq!(admitted, 3);
    }

    #[test]
    fn test_counter_inconsistency_fails_closed() {
        let (gate, clock) = gate_with_clock();
        gate.state().apply(RateLimitPolicy::limited(100, exempt_ping())).unwrap();
        clock.set(
            clock
                .now()
                .checked_sub(Duration::from_secs(1))
                .unwrap(),
        );

        assert_eq!(
            gate.decide(&SAY_HELLO.into()),
            AdmissionDecision::Reject(RejectReason::CounterInconsistent)
        );
        // Exempt traffic never reaches the counter
        assert!(gate.decide(&PING.into()).admit());
    }

    #[test]
    fn test_concurrent_deciders_respect_limit() {
        let (gate, _clock) = gate_with_clock();
        gate.state().apply(RateLimitPolicy::limited(50, exempt_ping())).unwrap();
        let gate = Arc::new(gate);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gate = gate.clone();
                std::thread::spawn(move || {
                    (0..200)
                        .filter(|_| gate.decide(&SAY_HELLO.into()).admit())
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
        assert_eq!(gate.stats().rejected, 750);
    }

    #[test]
    fn test_rejection_counts_stay_bounded() {
        let (gate, _clock) = gate_with_clock();
        gate.state().apply(RateLimitPolicy::limited(0, exempt_ping())).unwrap();

        for i in 0..50_000 {
            let op = OperationName::new(format!("/bogus.Service/Method{i}"));
            assert!(!gate.decide(&op).admit());
        }

        let stats = gate.stats();
        assert_eq!(stats.rejected, 50_000);
        assert_eq!(stats.rejected_by_operation.len(), MAX_TRACKED_OPERATIONS + 1);
        let other = stats
            .rejected_by_operation
            .iter()
            .find(|(op, _)| op.as_str() == OTHER_OPERATIONS)
            .map(|(_, count)| *count);
        assert_eq!(other, Some(50_000 - MAX_TRACKED_OPERATIONS as u64));
    }

    #[test]
    fn test_tracked_operation_keeps_counting_after_cap() {
        let (gate, _clock) = gate_with_clock();
        gate.state().apply(RateLimitPolicy::limited(0, exempt_ping())).unwrap();

        gate.decide(&SAY_HELLO.into());
        for i in 0..MAX_TRACKED_OPERATIONS {
            gate.decide(&OperationName::new(format!("/bogus.Service/Method{i}")));
        }
        gate.decide(&SAY_HELLO.into());

        let stats = gate.stats();
        assert!(stats
            .rejected_by_operation
            .contains(&(OperationName::from(SAY_HELLO), 2)));
    }

    #[test]
    fn test_update_visible_to_other_threads_after_ack() {
        let (gate, _clock) = gate_with_clock();
        let gate = Arc::new(gate);

        gate.state()
            .apply_and_acknowledge(RateLimitPolicy::limited(0, exempt_ping()))
            .unwrap();

        let remote = {
            let gate = gate.clone();
            std::thread::spawn(move || gate.decide(&SAY_HELLO.into()))
        };
        assert!(!remote.join().unwrap().admit());
    }
}
