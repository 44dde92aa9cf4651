use std::sync::Arc;

use parking_lot::Mutex;

/// Receives "collected" signals; fire-and-forget.
pub trait CollectionSink: Send + Sync {
    fn collected(&self, object_id: u32);
}

impl<T: CollectionSink + ?Sized> CollectionSink for Arc<T> {
    fn collected(&self, object_id: u32) {
        (**self).collected(object_id);
    }
}

/// In-memory record of collected objects, in collection order.
#[derive(Debug, Default)]
pub struct CollectionLedger {
    collected: Mutex<Vec<u32>>,
}

impl CollectionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, object_id: u32) -> usize {
        self.collected
            .lock()
            .iter()
            .filter(|id| **id == object_id)
            .count()
    }

    #[cfg(test)]
    pub(crate) fn entries(&self) -> Vec<u32> {
        self.collected.lock().clone()
    }
}

impl CollectionSink for CollectionLedger {
    fn collected(&self, object_id: u32) {
        tracing::info!(object_id, "object collected");
        self.collected.lock().push(object_id);
    }
}
