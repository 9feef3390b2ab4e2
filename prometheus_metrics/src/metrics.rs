use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::OnceCell;
use prometheus::{histogram_opts, opts, HistogramVec, IntCounterVec, IntGauge};

pub static METRICS: OnceCell<Arc<Metrics>> = OnceCell::new();

#[derive(Debug)]
pub struct Metrics {
    // Regen queue
    regen_queue_length: IntGauge,

    // Regen entrypoints
    regen_fn_call_total: IntCounterVec,
    regen_fn_queued_total: IntCounterVec,
    pub regen_fn_call_duration: HistogramVec,
    regen_fn_total_errors: IntCounterVec,

    // Cache sizes
    state_cache_states: IntGauge,
    checkpoint_state_cache_states: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        Ok(Self {
            // Regen queue
            regen_queue_length: IntGauge::new(
                "REGEN_QUEUE_LENGTH",
                "Number of regeneration jobs pending or executing",
            )?,

            // Regen entrypoints
            regen_fn_call_total: IntCounterVec::new(
                opts!(
                    "REGEN_FN_CALL_TOTAL",
                    "Total number of calls to regen functions"
                ),
                &["caller", "entrypoint"],
            )?,

            regen_fn_queued_total: IntCounterVec::new(
                opts!(
                    "REGEN_FN_QUEUED_TOTAL",
                    "Total number of regen calls that missed the caches and were queued"
                ),
                &["caller", "entrypoint"],
            )?,

            regen_fn_call_duration: HistogramVec::new(
                histogram_opts!(
                    "REGEN_FN_CALL_DURATION",
                    "Execution times of queued regen jobs"
                ),
                &["caller", "entrypoint"],
            )?,

            regen_fn_total_errors: IntCounterVec::new(
                opts!("REGEN_FN_TOTAL_ERRORS", "Total number of failed regen jobs"),
                &["caller", "entrypoint"],
            )?,

            // Cache sizes
            state_cache_states: IntGauge::new(
                "STATE_CACHE_STATES",
                "Number of states in the state cache",
            )?,

            checkpoint_state_cache_states: IntGauge::new(
                "CHECKPOINT_STATE_CACHE_STATES",
                "Number of states in the checkpoint state cache",
            )?,
        })
    }

    pub fn register_with_default_metrics(&self) -> Result<()> {
        let default_registry = prometheus::default_registry();

        default_registry.register(Box::new(self.regen_queue_length.clone()))?;
        default_registry.register(Box::new(self.regen_fn_call_total.clone()))?;
        default_registry.register(Box::new(self.regen_fn_queued_total.clone()))?;
        default_registry.register(Box::new(self.regen_fn_call_duration.clone()))?;
        default_registry.register(Box::new(self.regen_fn_total_errors.clone()))?;
        default_registry.register(Box::new(self.state_cache_states.clone()))?;
        default_registry.register(Box::new(self.checkpoint_state_cache_states.clone()))?;

        Ok(())
    }

    pub fn set_regen_queue_length(&self, length: usize) {
        self.regen_queue_length.set(length as i64)
    }

    pub fn count_regen_call(&self, caller: &str, entrypoint: &str) {
        self.increment(&self.regen_fn_call_total, caller, entrypoint)
    }

    pub fn count_regen_queued(&self, caller: &str, entrypoint: &str) {
        self.increment(&self.regen_fn_queued_total, caller, entrypoint)
    }

    pub fn count_regen_error(&self, caller: &str, entrypoint: &str) {
        self.increment(&self.regen_fn_total_errors, caller, entrypoint)
    }

    pub fn set_state_cache_size(&self, states: usize) {
        self.state_cache_states.set(states as i64)
    }

    pub fn set_checkpoint_state_cache_size(&self, states: usize) {
        self.checkpoint_state_cache_states.set(states as i64)
    }

    fn increment(&self, counter_vec: &IntCounterVec, caller: &str, entrypoint: &str) {
        counter_vec
            .get_metric_with_label_values(&[caller, entrypoint])
            .expect(
                "the number of label values should match the number \
                 of labels that the counter was created with",
            )
            .inc()
    }
}
