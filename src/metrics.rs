use crate::Error;
use prometheus::{
    histogram_opts, opts, Encoder, HistogramVec, IntCounterVec, Registry, TextEncoder,
};
use tokio::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    pub hooks: IntCounterVec,
    pub failures: IntCounterVec,
    pub hook_duration: HistogramVec,
    pub applied: IntCounterVec,
    pub deleted: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        let hook_duration = HistogramVec::new(
            histogram_opts!(
                "istio_operator_hook_duration_seconds",
                "The duration of a hook to complete in seconds"
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &["charm", "hook"],
        )
        .unwrap();
        let failures = IntCounterVec::new(
            opts!("istio_operator_hook_errors_total", "hook errors"),
            &["charm", "hook", "error"],
        )
        .unwrap();
        let hooks = IntCounterVec::new(
            opts!("istio_operator_hooks_total", "hooks handled"),
            &["charm", "hook"],
        )
        .unwrap();
        let applied = IntCounterVec::new(
            opts!("istio_operator_objects_applied_total", "objects applied"),
            &["kind"],
        )
        .unwrap();
        let deleted = IntCounterVec::new(
            opts!("istio_operator_objects_deleted_total", "objects deleted"),
            &["kind"],
        )
        .unwrap();
        Metrics {
            hooks,
            failures,
            hook_duration,
            applied,
            deleted,
        }
    }
}

impl Metrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.hook_duration.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.hooks.clone()))?;
        registry.register(Box::new(self.applied.clone()))?;
        registry.register(Box::new(self.deleted.clone()))?;
        Ok(self)
    }

    pub fn hook_failure(&self, charm: &str, hook: &str, e: &Error) {
        self.failures
            .with_label_values(&[charm, hook, e.metric_label()])
            .inc()
    }

    pub fn object_applied(&self, kind: &str) {
        self.applied.with_label_values(&[kind]).inc()
    }

    pub fn object_deleted(&self, kind: &str) {
        self.deleted.with_label_values(&[kind]).inc()
    }

    pub fn count_and_measure(&self, charm: &str, hook: &str) -> HookMeasurer {
        self.hooks.with_label_values(&[charm, hook]).inc();
        HookMeasurer {
            start: Instant::now(),
            metric: self.hook_duration.clone(),
            labels: [charm.into(), hook.into()],
        }
    }
}

/// Text exposition of everything in `registry`
pub fn encode(registry: &Registry) -> Result<String, prometheus::Error> {
    let mut buffer = vec![];
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct HookMeasurer {
    start: Instant,
    metric: HistogramVec,
    labels: [String; 2],
}

impl Drop for HookMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        let [charm, hook] = &self.labels;
        self.metric
            .with_label_values(&[charm.as_str(), hook.as_str()])
            .observe(duration);
    }
}
