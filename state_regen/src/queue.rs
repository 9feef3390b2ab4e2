use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    mpsc::Sender,
    Arc,
};

use derive_more::Constructor;
use log::debug;
use prometheus_metrics::Metrics;

use crate::{error::Error, messages::RegenMessage};

/// Upper bound on regen jobs pending or executing at once.
pub const MAX_REGEN_QUEUE_LENGTH: usize = 256;

/// Submission side of the regen queue.
///
/// The channel itself is unbounded. The bound is enforced through `length`, which counts a job
/// from submission until the worker finishes it, so in-flight work counts against the limit.
#[derive(Constructor)]
pub struct RegenQueue {
    regen_tx: Sender<RegenMessage>,
    length: Arc<AtomicUsize>,
    cancelled: Arc<AtomicBool>,
    metrics: Option<Arc<Metrics>>,
}

impl RegenQueue {
    pub(crate) fn submit(&self, message: RegenMessage) -> Result<(), Error> {
        if self.cancelled.load(Ordering::Acquire) {
            return Err(Error::Cancelled);
        }

        let previous_length = self
            .length
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |length| {
                (length < MAX_REGEN_QUEUE_LENGTH).then_some(length + 1)
            })
            .map_err(|_| Error::QueueFull)?;

        if let Some(metrics) = self.metrics.as_ref() {
            metrics.set_regen_queue_length(previous_length + 1);

            if let Some((caller, entrypoint)) = message.labels() {
                metrics.count_regen_queued(caller.as_str(), entrypoint.as_str());
            }
        }

        if self.regen_tx.send(message).is_err() {
            self.length.fetch_sub(1, Ordering::AcqRel);
            debug!("send to regen worker failed because the receiver was dropped");
            return Err(Error::Cancelled);
        }

        Ok(())
    }

    /// Raises the cancellation flag and wakes the worker. `Stop` bypasses the queue bound.
    pub(crate) fn stop(&self) {
        self.cancelled.store(true, Ordering::Release);

        if self.regen_tx.send(RegenMessage::Stop).is_err() {
            debug!("send to regen worker failed because the receiver was dropped");
        }
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.length.load(Ordering::Acquire)
    }
}
