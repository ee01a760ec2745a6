//! Lookup latency diagnostics.
//!
//! Every transport lookup is accounted to a [`Classification`]. Each
//! classification keeps one window of counters and emits two kinds of
//! rate-limited logs:
//!
//! - **Slow call**: a single lookup at or above the slow threshold. At most
//!   one per slow-log interval, however many lookups breach the threshold.
//! - **Summary**: once the window has seen `log_every_calls` lookups, the
//!   accumulated latency and call count. At most one per stats interval,
//!   whatever the call volume. Emitting a summary starts a new window.
//!
//! Logging never affects lookup results. Sink errors are dropped.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use svcmgr_common::{Classification, Result, ServiceName};
use tracing::{debug, info, warn};

/// Default interval between summaries, per classification.
pub const STATS_LOG_INTERVAL: Duration = Duration::from_millis(5000);

/// Default interval between slow-call logs, per classification.
pub const SLOW_LOG_INTERVAL: Duration = Duration::from_millis(5000);

/// One lookup that crossed the slow threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlowCall {
    pub classification: Classification,
    pub service: ServiceName,
    pub elapsed_us: u64,
}

/// Accumulated lookups of one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupSummary {
    pub classification: Classification,
    /// Service of the lookup that closed the window.
    pub service: ServiceName,
    pub calls: u64,
    pub accumulated_us: u64,
    /// Time covered by the window.
    pub window: Duration,
}

/// Destination for diagnostics logs.
pub trait DiagnosticSink: Send + Sync {
    fn slow_call(&self, event: &SlowCall) -> Result<()>;

    fn summary(&self, event: &LookupSummary) -> Result<()>;
}

/// Writes diagnostics as structured `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn slow_call(&self, event: &SlowCall) -> Result<()> {
        warn!(
            service = %event.service,
            elapsed_us = event.elapsed_us,
            classification = %event.classification,
            "Slow service lookup"
        );
        Ok(())
    }

    fn summary(&self, event: &LookupSummary) -> Result<()> {
        info!(
            service = %event.service,
            calls = event.calls,
            accumulated_us = event.accumulated_us,
            window_ms = u64::try_from(event.window.as_millis()).unwrap_or(u64::MAX),
            classification = %event.classification,
            "Service lookup summary"
        );
        Ok(())
    }
}

/// Thresholds of one classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticsThresholds {
    /// Lookups at or above this latency are slow.
    pub slow_call: Duration,
    /// Calls a window must see before a summary is considered.
    pub log_every_calls: u64,
    pub stats_interval: Duration,
    pub slow_log_interval: Duration,
}

impl DiagnosticsThresholds {
    /// 10 ms slow threshold, summary every 100 calls.
    pub fn core_default() -> Self {
        Self {
            slow_call: Duration::from_millis(10),
            log_every_calls: 100,
            stats_interval: STATS_LOG_INTERVAL,
            slow_log_interval: SLOW_LOG_INTERVAL,
        }
    }

    /// 50 ms slow threshold, summary every 200 calls.
    pub fn non_core_default() -> Self {
        Self {
            slow_call: Duration::from_millis(50),
            log_every_calls: 200,
            stats_interval: STATS_LOG_INTERVAL,
            slow_log_interval: SLOW_LOG_INTERVAL,
        }
    }
}

/// Counters of the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub calls: u64,
    pub accumulated_us: u64,
}

#[derive(Debug)]
struct Window {
    calls: u64,
    accumulated_us: u64,
    started_at: Instant,
    last_summary_at: Option<Instant>,
    last_slow_at: Option<Instant>,
}

impl Window {
    fn new(now: Instant) -> Self {
        Self {
            calls: 0,
            accumulated_us: 0,
            started_at: now,
            last_summary_at: None,
            last_slow_at: None,
        }
    }
}

#[derive(Debug)]
struct Partition {
    thresholds: DiagnosticsThresholds,
    window: Mutex<Window>,
}

/// Windowed lookup accounting, partitioned by classification.
pub struct LookupDiagnostics {
    core: Partition,
    non_core: Partition,
    sink: Arc<dyn DiagnosticSink>,
}

impl LookupDiagnostics {
    pub fn new(
        core: DiagnosticsThresholds,
        non_core: DiagnosticsThresholds,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        let now = Instant::now();
        Self {
            core: Partition {
                thresholds: core,
                window: Mutex::new(Window::new(now)),
            },
            non_core: Partition {
                thresholds: non_core,
                window: Mutex::new(Window::new(now)),
            },
            sink,
        }
    }

    /// Accounts one lookup of `service` that took `elapsed`.
    pub fn record(&self, classification: Classification, service: &ServiceName, elapsed: Duration) {
        self.record_at(classification, service, elapsed, Instant::now());
    }

    /// Same as [`record`](Self::record) with an explicit clock reading.
    pub fn record_at(
        &self,
        classification: Classification,
        service: &ServiceName,
        elapsed: Duration,
        now: Instant,
    ) {
        let partition = self.partition(classification);
        let thresholds = &partition.thresholds;
        let elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);

        // Decide under the lock, emit after releasing it
        let (slow, summary) = {
            let mut window = partition.window.lock();

            let slow = (elapsed >= thresholds.slow_call
                && due(window.last_slow_at, now, thresholds.slow_log_interval))
            .then(|| {
                window.last_slow_at = Some(now);
                SlowCall {
                    classification,
                    service: service.clone(),
                    elapsed_us,
                }
            });

            window.calls += 1;
            window.accumulated_us = window.accumulated_us.saturating_add(elapsed_us);

            let summary = (window.calls >= thresholds.log_every_calls
                && due(window.last_summary_at, now, thresholds.stats_interval))
            .then(|| {
                let summary = LookupSummary {
                    classification,
                    service: service.clone(),
                    calls: window.calls,
                    accumulated_us: window.accumulated_us,
                    window: now.saturating_duration_since(window.started_at),
                };
                window.calls = 0;
                window.accumulated_us = 0;
                window.started_at = now;
                window.last_summary_at = Some(now);
                summary
            });

            (slow, summary)
        };

        if let Some(event) = slow {
            if let Err(e) = self.sink.slow_call(&event) {
                debug!("Dropped slow-call log for {}: {}", event.service, e);
            }
        }
        if let Some(event) = summary {
            if let Err(e) = self.sink.summary(&event) {
                debug!("Dropped lookup summary for {}: {}", event.service, e);
            }
        }
    }

    /// Current window counters of `classification`.
    pub fn snapshot(&self, classification: Classification) -> WindowSnapshot {
        let window = self.partition(classification).window.lock();
        WindowSnapshot {
            calls: window.calls,
            accumulated_us: window.accumulated_us,
        }
    }

    pub fn thresholds(&self, classification: Classification) -> &DiagnosticsThresholds {
        &self.partition(classification).thresholds
    }

    fn partition(&self, classification: Classification) -> &Partition {
        match classification {
            Classification::Core => &self.core,
            Classification::NonCore => &self.non_core,
        }
    }
}

impl std::fmt::Debug for LookupDiagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupDiagnostics")
            .field("core", &self.snapshot(Classification::Core))
            .field("non_core", &self.snapshot(Classification::NonCore))
            .finish()
    }
}

fn due(last: Option<Instant>, now: Instant, interval: Duration) -> bool {
    last.map_or(true, |at| now.saturating_duration_since(at) >= interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use svcmgr_common::Error;

    #[derive(Default)]
    struct RecordingSink {
        slow: Mutex<Vec<SlowCall>>,
        summaries: Mutex<Vec<LookupSummary>>,
    }

    impl DiagnosticSink for RecordingSink {
        fn slow_call(&self, event: &SlowCall) -> Result<()> {
            self.slow.lock().push(event.clone());
            Ok(())
        }

        fn summary(&self, event: &LookupSummary) -> Result<()> {
            self.summaries.lock().push(event.clone());
            Ok(())
        }
    }

    struct FailingSink;

    impl DiagnosticSink for FailingSink {
        fn slow_call(&self, _event: &SlowCall) -> Result<()> {
            Err(Error::transport("log stream closed"))
        }

        fn summary(&self, _event: &LookupSummary) -> Result<()> {
            Err(Error::transport("log stream closed"))
        }
    }

    fn diagnostics() -> (Arc<RecordingSink>, LookupDiagnostics) {
        let sink = Arc::new(RecordingSink::default());
        let diagnostics = LookupDiagnostics::new(
            DiagnosticsThresholds::core_default(),
            DiagnosticsThresholds::non_core_default(),
            sink.clone(),
        );
        (sink, diagnostics)
    }

    fn fast() -> Duration {
        Duration::from_micros(200)
    }

    #[test]
    fn test_at_most_one_summary_per_window() {
        let (sink, diagnostics) = diagnostics();
        let name = ServiceName::from("activity");
        let start = Instant::now();

        for i in 0..250u64 {
            let now = start + Duration::from_millis(i);
            diagnostics.record_at(Classification::Core, &name, fast(), now);
        }

        let summaries = sink.summaries.lock();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].calls, 100);
        assert_eq!(summaries[0].accumulated_us, 100 * 200);

        // The window restarted at call 100; the rest keeps accumulating
        assert_eq!(diagnostics.snapshot(Classification::Core).calls, 150);
    }

    #[test]
    fn test_summary_resumes_after_interval() {
        let (sink, diagnostics) = diagnostics();
        let name = ServiceName::from("activity");
        let start = Instant::now();

        for _ in 0..250 {
            diagnostics.record_at(Classification::Core, &name, fast(), start);
        }
        assert_eq!(sink.summaries.lock().len(), 1);

        let later = start + STATS_LOG_INTERVAL;
        diagnostics.record_at(Classification::Core, &name, fast(), later);

        let summaries = sink.summaries.lock();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[1].calls, 151);
        assert_eq!(summaries[1].window, STATS_LOG_INTERVAL);
        assert_eq!(diagnostics.snapshot(Classification::Core).calls, 0);
    }

    #[test]
    fn test_no_summary_below_call_threshold() {
        let (sink, diagnostics) = diagnostics();
        let name = ServiceName::from("package");
        let start = Instant::now();

        for i in 0..199u64 {
            diagnostics.record_at(
                Classification::NonCore,
                &name,
                fast(),
                start + Duration::from_secs(i * 10),
            );
        }

        assert!(sink.summaries.lock().is_empty());
        assert_eq!(diagnostics.snapshot(Classification::NonCore).calls, 199);
    }

    #[test]
    fn test_at_most_one_slow_log_per_interval() {
        let (sink, diagnostics) = diagnostics();
        let name = ServiceName::from("storage.default");
        let slow = Duration::from_millis(25);
        let start = Instant::now();

        for i in 0..20u64 {
            diagnostics.record_at(Classification::Core, &name, slow, start + Duration::from_millis(i * 100));
        }
        assert_eq!(sink.slow.lock().len(), 1);
        assert_eq!(sink.slow.lock()[0].elapsed_us, 25_000);

        diagnostics.record_at(Classification::Core, &name, slow, start + SLOW_LOG_INTERVAL);
        assert_eq!(sink.slow.lock().len(), 2);
    }

    #[test]
    fn test_thresholds_differ_by_classification() {
        let (sink, diagnostics) = diagnostics();
        let name = ServiceName::from("storage.default");
        let now = Instant::now();

        // 25 ms is slow for core (10 ms) but not for non-core (50 ms)
        diagnostics.record_at(Classification::NonCore, &name, Duration::from_millis(25), now);
        assert!(sink.slow.lock().is_empty());

        diagnostics.record_at(Classification::Core, &name, Duration::from_millis(25), now);
        assert_eq!(sink.slow.lock()[0].classification, Classification::Core);
    }

    #[test]
    fn test_partitions_are_independent() {
        let (_sink, diagnostics) = diagnostics();
        let name = ServiceName::from("activity");

        diagnostics.record(Classification::Core, &name, fast());
        diagnostics.record(Classification::Core, &name, fast());
        diagnostics.record(Classification::NonCore, &name, fast());

        assert_eq!(diagnostics.snapshot(Classification::Core).calls, 2);
        assert_eq!(diagnostics.snapshot(Classification::NonCore).calls, 1);
    }

    #[test]
    fn test_sink_failures_are_isolated() {
        let diagnostics = LookupDiagnostics::new(
            DiagnosticsThresholds::core_default(),
            DiagnosticsThresholds::non_core_default(),
            Arc::new(FailingSink),
        );
        let name = ServiceName::from("activity");
        let now = Instant::now();

        for _ in 0..100 {
            diagnostics.record_at(Classification::Core, &name, Duration::from_millis(30), now);
        }

        // The summary was attempted (and dropped), so the window still reset
        assert_eq!(diagnostics.snapshot(Classification::Core).calls, 0);
    }

    #[test]
    fn test_tracing_sink_saturates_oversized_window() {
        let summary = LookupSummary {
            classification: Classification::NonCore,
            service: ServiceName::from("activity"),
            calls: 1,
            accumulated_us: u64::MAX,
            window: Duration::MAX,
        };
        assert!(TracingSink.summary(&summary).is_ok());
    }
}
