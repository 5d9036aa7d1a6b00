use crate::error::WriteOp;
use crate::models::{PaymentOutcome, PaymentSession};
use log::warn;
use std::collections::HashMap;
use std::sync::Mutex;

/// Enum representing different SDK events
#[derive(Clone, Debug)]
pub enum SdkEvent {
    /// A payment request was created with the provider
    PaymentCreated { session: PaymentSession },

    /// The provider reported the payment as paid
    PaymentSettled {
        payment_id: String,
        outcome: PaymentOutcome,
    },

    /// The payment reached a failed, cancelled or expired state
    PaymentFailed {
        payment_id: String,
        outcome: PaymentOutcome,
    },

    /// A collection was reloaded from the remote store
    CacheLoaded {
        collection: &'static str,
        count: usize,
    },

    /// An optimistic write failed and was undone locally
    CacheRolledBack {
        collection: &'static str,
        op: WriteOp,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    /// Called when an event occurs
    fn on_event(&self, event: &SdkEvent);
}

/// Event emitter for SDK events
#[derive(Default)]
pub struct EventEmitter {
    listeners: Mutex<HashMap<String, Box<dyn EventListener>>>,
}

impl EventEmitter {
    /// Creates a new event emitter
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener to the event emitter
    ///
    /// # Returns
    ///
    /// A unique ID for the listener
    pub fn add_listener(&self, listener: Box<dyn EventListener>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        listeners.insert(id.clone(), listener);
        id
    }

    /// Removes a listener from the event emitter
    ///
    /// # Returns
    ///
    /// `true` if the listener was found and removed, `false` otherwise
    pub fn remove_listener(&self, id: &str) -> bool {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        listeners.remove(id).is_some()
    }

    /// Emits an event to all listeners
    pub fn emit(&self, event: &SdkEvent) {
        let Ok(listeners) = self.listeners.lock() else {
            warn!("Event listeners unavailable, dropping {event:?}");
            return;
        };
        for listener in listeners.values() {
            listener.on_event(event);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use std::sync::Arc;

    /// Listener that keeps every event it sees
    #[derive(Clone, Default)]
    pub(crate) struct RecordingListener {
        pub(crate) events: Arc<Mutex<Vec<SdkEvent>>>,
    }

    impl RecordingListener {
        pub(crate) fn events(&self) -> Vec<SdkEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl EventListener for RecordingListener {
        fn on_event(&self, event: &SdkEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }
}
