//! Progress token demultiplexing

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Disposable, ProgressHandler};

type ListenerKey = (String, String);

/// Maps `(progress type, token)` to the listeners waiting for it.
///
/// Progress notifications carry no connection of their own; the token is the
/// only thing tying a notification back to the run that asked for it.
#[derive(Default)]
pub struct ProgressRouter {
    next_listener: AtomicU64,
    listeners: Arc<Mutex<HashMap<ListenerKey, Vec<(u64, ProgressHandler)>>>>,
}

impl ProgressRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; disposing the handle removes exactly this one.
    pub fn subscribe(&self, progress_type: &str, token: &str, handler: ProgressHandler) -> Disposable {
        let listener_id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        let key = (progress_type.to_string(), token.to_string());

        self.listeners
            .lock()
            .entry(key.clone())
            .or_default()
            .push((listener_id, handler));

        tracing::trace!(progress_type, token, listener_id, "progress listener registered");

        let listeners = self.listeners.clone();
        Disposable::new(move || {
            let mut listeners = listeners.lock();
            if let Some(entries) = listeners.get_mut(&key) {
                entries.retain(|(id, _)| *id != listener_id);
                if entries.is_empty() {
                    listeners.remove(&key);
                }
            }
            tracing::trace!(token = %key.1, listener_id, "progress listener removed");
        })
    }

    /// Invoke every listener for the token in registration order.
    ///
    /// Listeners run outside the table lock so they may unsubscribe themselves.
    /// Returns how many listeners were invoked.
    pub fn dispatch(&self, progress_type: &str, token: &str, value: Value) -> usize {
        let handlers: Vec<ProgressHandler> = {
            let listeners = self.listeners.lock();
            match listeners.get(&(progress_type.to_string(), token.to_string())) {
                Some(entries) => entries.iter().map(|(_, handler)| handler.clone()).collect(),
                None => Vec::new(),
            }
        };

        if handlers.is_empty() {
            tracing::debug!(progress_type, token, "progress without listener dropped");
        }

        for handler in &handlers {
            handler(value.clone());
        }
        handlers.len()
    }

    pub fn listener_count(&self, progress_type: &str, token: &str) -> usize {
        self.listeners
            .lock()
            .get(&(progress_type.to_string(), token.to_string()))
            .map_or(0, |entries| entries.len())
    }
}
