//! Progress reporting stage

use crate::stage::{item_len, StageStream, TransformStage};
use crate::stats::StatsTracker;
use futures::stream::StreamExt;
use std::fmt;
use std::sync::Arc;

/// Callback receiving `(cumulative_bytes, cumulative_units)`
pub type ProgressFn = Box<dyn FnMut(u64, usize) + Send>;

/// Passthrough stage reporting cumulative bytes and units
///
/// The callback runs synchronously for every unit before it is forwarded.
/// Failed units count toward the unit total with zero bytes. Content and
/// order are left untouched.
pub struct ProgressStage {
    on_progress: ProgressFn,
}

impl ProgressStage {
    /// Create a progress stage
    pub fn new<F>(on_progress: F) -> Self
    where
        F: FnMut(u64, usize) + Send + 'static,
    {
        Self {
            on_progress: Box::new(on_progress),
        }
    }
}

impl fmt::Debug for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressStage").finish_non_exhaustive()
    }
}

impl TransformStage for ProgressStage {
    fn name(&self) -> &'static str {
        "progress"
    }

    fn attach(self: Box<Self>, upstream: StageStream, _stats: Arc<StatsTracker>) -> StageStream {
        let mut on_progress = self.on_progress;
        let mut bytes = 0u64;
        let mut units = 0usize;

        upstream
            .inspect(move |item| {
                if let Ok(unit) = item {
                    bytes += item_len(unit) as u64;
                    units += 1;
                    on_progress(bytes, units);
                }
            })
            .boxed()
    }
}
