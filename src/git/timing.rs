//! Timing of git invocations
//!
//! Every invocation is wrapped in exactly one [`measure`] call. The collector
//! only observes; the wrapped result is passed through untouched.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::debug;

/// Receives one record per measured action
pub trait TimingCollector: Send + Sync {
    fn record(&self, name: &str, elapsed: Duration, ok: bool);
}

/// Default collector: emits a `debug` event per invocation
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTimer;

impl TimingCollector for TracingTimer {
    fn record(&self, name: &str, elapsed: Duration, ok: bool) {
        debug!(
            target: "tidyflow_git::timing",
            name = name,
            elapsed_ms = elapsed.as_millis() as u64,
            ok = ok,
            "git invocation finished"
        );
    }
}

/// Run `action`, report its duration and outcome to `collector`, and return
/// its result unchanged.
pub async fn measure<T, E, F>(collector: &dyn TimingCollector, name: &str, action: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let result = action.await;
    collector.record(name, started.elapsed(), result.is_ok());
    result
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Collector that keeps every record, for assertions
    #[derive(Default)]
    pub(crate) struct RecordingTimer {
        pub records: Mutex<Vec<(String, bool)>>,
    }

    impl TimingCollector for RecordingTimer {
        fn record(&self, name: &str, _elapsed: Duration, ok: bool) {
            if let Ok(mut records) = self.records.lock() {
                records.push((name.to_string(), ok));
            }
        }
    }

    #[tokio::test]
    async fn test_measure_passes_result_through() {
        let timer = RecordingTimer::default();

        let ok: Result<u32, String> = measure(&timer, "fetch: git fetch", async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));

        let err: Result<u32, String> =
            measure(&timer, "push: git push", async { Err("rejected".to_string()) }).await;
        assert_eq!(err, Err("rejected".to_string()));

        let records = timer.records.lock().unwrap();
        assert_eq!(
            *records,
            vec![
                ("fetch: git fetch".to_string(), true),
                ("push: git push".to_string(), false)
            ]
        );
    }
}
