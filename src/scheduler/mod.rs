use crate::item::QueueItem;

/// Selects the next pending item to process.
///
/// Implementations must be pure: no mutation of the candidate slice, no side
/// effects, so strategies can be swapped and unit-tested independently of the
/// processor.
pub trait SchedulingStrategy: Send + Sync {
    /// Pick the next item from pending snapshots, or None when the set is empty.
    fn select_next(&self, pending: &[QueueItem]) -> Option<QueueItem>;
}

/// Default policy: highest priority first, oldest enqueue time within a
/// priority band.
pub struct PriorityScheduler;

impl SchedulingStrategy for PriorityScheduler {
    fn select_next(&self, pending: &[QueueItem]) -> Option<QueueItem> {
        pending
            .iter()
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| a.enqueued_at.cmp(&b.enqueued_at))
            })
            .cloned()
    }
}
