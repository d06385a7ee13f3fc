//! Progress reporting that can never fail a sync

use core_library::models::MirrorId;
use core_runtime::events::{CoreEvent, EventBus, MirrorEvent};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Receives 0-100 progress values per mirror
pub trait ProgressSink: Send + Sync {
    fn report(&self, mirror_id: MirrorId, percent: u8) -> Result<(), String>;
}

/// Publishes progress as [`MirrorEvent::Progress`]
pub struct EventBusProgressSink {
    event_bus: EventBus,
}

impl EventBusProgressSink {
    pub fn new(event_bus: EventBus) -> Self {
        Self { event_bus }
    }
}

impl ProgressSink for EventBusProgressSink {
    fn report(&self, mirror_id: MirrorId, percent: u8) -> Result<(), String> {
        // No subscribers is not a failure
        self.event_bus
            .emit(CoreEvent::Mirror(MirrorEvent::Progress {
                mirror_id: mirror_id.to_string(),
                percent,
            }))
            .ok();
        Ok(())
    }
}

/// Per-run reporter that drops repeated values and swallows sink failures
pub(crate) struct ProgressReporter {
    sink: Option<Arc<dyn ProgressSink>>,
    mirror_id: MirrorId,
    last: Option<u8>,
}

impl ProgressReporter {
    pub(crate) fn new(sink: Option<Arc<dyn ProgressSink>>, mirror_id: MirrorId) -> Self {
        Self {
            sink,
            mirror_id,
            last: None,
        }
    }

    pub(crate) fn report(&mut self, percent: u8) {
        let percent = percent.min(100);
        if self.last == Some(percent) {
            return;
        }
        self.last = Some(percent);

        let Some(sink) = &self.sink else {
            return;
        };

        match catch_unwind(AssertUnwindSafe(|| sink.report(self.mirror_id, percent))) {
            Ok(Ok(())) => {}
            Ok(Err(message)) => {
                warn!(mirror_id = %self.mirror_id, percent, error = %message, "Progress sink failed");
            }
            Err(_) => {
                warn!(mirror_id = %self.mirror_id, percent, "Progress sink panicked");
            }
        }
    }
}
