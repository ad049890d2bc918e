//! Disposal of container-owned instances.

use crate::descriptor::AnyArc;
use parking_lot::Mutex;
use std::sync::Arc;

/// Implemented by services that release resources when their owning
/// container is disposed.
pub trait Dispose: Send + Sync {
    /// Release resources. Called at most once by the container.
    fn dispose(&self);
}

/// Type-erased disposal hook stored on a descriptor.
pub(crate) type Disposer = Arc<dyn Fn(&AnyArc) + Send + Sync>;

/// Instances created by one container, disposed together.
#[derive(Default)]
pub(crate) struct DisposeBag {
    entries: Mutex<Vec<(AnyArc, Disposer)>>,
}

impl DisposeBag {
    /// Collect `instance`, returning how many are now pending.
    pub(crate) fn push(&self, instance: AnyArc, disposer: Disposer) -> usize {
        let mut entries = self.entries.lock();
        entries.push((instance, disposer));
        entries.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Dispose everything collected so far, most recent first.
    pub(crate) fn drain(&self) -> usize {
        let entries = std::mem::take(&mut *self.entries.lock());
        let count = entries.len();
        for (instance, disposer) in entries.into_iter().rev() {
            disposer(&instance);
        }
        count
    }
}
