//! Progress and error callbacks
//!
//! Hosts can plug a [`ProgressListener`] and an [`ErrorReporter`] into the
//! engine. Everything reported through them is also mirrored onto the core
//! `EventBus` as `CoreEvent::Sync` events, so hosts that only subscribe to
//! events see the same information.

use std::sync::Arc;

use core_library::EntityKind;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use provider_ampache::{Action, ApiFault};
use tracing::warn;

use crate::SyncError;

/// Called for every decoded entity
pub trait ProgressListener: Send + Sync {
    /// `processed` counts entities of `kind` decoded by the current operation
    fn on_progress(&self, kind: EntityKind, processed: u64, total: Option<u64>);
}

/// Sink for non-fatal problems
pub trait ErrorReporter: Send + Sync {
    /// The server answered an action with an error envelope
    fn on_remote_fault(&self, action: Action, fault: &ApiFault);

    /// An operation failed locally or in transport
    fn on_error(&self, operation: &str, error: &SyncError) {
        let _ = (operation, error);
    }
}

/// Fan-out of progress and errors to callbacks and the event bus
#[derive(Clone)]
pub struct SyncObserver {
    event_bus: EventBus,
    progress: Option<Arc<dyn ProgressListener>>,
    errors: Option<Arc<dyn ErrorReporter>>,
}

impl SyncObserver {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            event_bus,
            progress: None,
            errors: None,
        }
    }

    pub fn with_progress_listener(mut self, listener: Arc<dyn ProgressListener>) -> Self {
        self.progress = Some(listener);
        self
    }

    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.errors = Some(reporter);
        self
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// One more entity decoded; callback only
    pub fn entity_decoded(&self, kind: EntityKind, processed: u64) {
        if let Some(listener) = &self.progress {
            listener.on_progress(kind, processed, None);
        }
    }

    /// A page was committed; emits `SyncEvent::Progress`
    pub fn page_committed(&self, kind: EntityKind, processed: u64, total: Option<u64>) {
        if let Some(listener) = &self.progress {
            listener.on_progress(kind, processed, total);
        }
        self.emit(SyncEvent::Progress {
            kind: kind.to_string(),
            items_processed: processed,
            total_items: total,
        });
    }

    pub fn remote_fault(&self, action: Action, fault: &ApiFault) {
        warn!(action = %action, code = fault.code, message = %fault.message, "Remote fault");
        if let Some(reporter) = &self.errors {
            reporter.on_remote_fault(action, fault);
        }
        self.emit(SyncEvent::RemoteFault {
            action: action.to_string(),
            code: fault.code,
            message: fault.message.clone(),
        });
    }

    pub fn error(&self, operation: &str, error: &SyncError) {
        warn!(operation, error = %error, "Sync operation failed");
        if let Some(reporter) = &self.errors {
            reporter.on_error(operation, error);
        }
    }

    pub fn emit(&self, event: SyncEvent) {
        let _ = self.event_bus.emit(CoreEvent::Sync(event));
    }

    pub fn emit_core(&self, event: CoreEvent) {
        let _ = self.event_bus.emit(event);
    }
}
