//! Readiness-gated delivery channel
//!
//! A panel can be hidden, and its content may not have finished loading when
//! the first message is posted. The channel queues everything until both the
//! panel and its content are ready, then flushes the queue in post order
//! before anything is delivered directly.

use parking_lot::Mutex;
use quarry_core::{PanelMessage, PanelRequest};
use std::collections::VecDeque;
use std::sync::Arc;

/// Delivery channel between the orchestrator and a result panel
pub type PanelChannel = DeliveryChannel<PanelMessage, PanelRequest>;

type DeliverFn<Out> = Box<dyn Fn(Out) + Send + Sync>;
type ReceiveFn<In> = Arc<dyn Fn(In) + Send + Sync>;

/// The two independent conditions gating delivery
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    /// The panel is visible and attached
    pub panel_ready: bool,
    /// The panel's content has sent at least one message
    pub content_ready: bool,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.panel_ready && self.content_ready
    }
}

struct ChannelState<Out> {
    readiness: Readiness,
    queue: VecDeque<Out>,
    disposed: bool,
}

/// Ordered, no-loss message channel to one panel.
///
/// The deliver function runs while the channel's lock is held so concurrent
/// posters cannot interleave with a flush. It must not call back into the
/// channel.
pub struct DeliveryChannel<Out, In> {
    state: Mutex<ChannelState<Out>>,
    deliver: DeliverFn<Out>,
    on_receive: Mutex<Option<ReceiveFn<In>>>,
}

impl<Out, In> DeliveryChannel<Out, In> {
    pub fn new(deliver: impl Fn(Out) + Send + Sync + 'static) -> Self {
        Self {
            state: Mutex::new(ChannelState {
                readiness: Readiness::default(),
                queue: VecDeque::new(),
                disposed: false,
            }),
            deliver: Box::new(deliver),
            on_receive: Mutex::new(None),
        }
    }

    /// Deliver now when ready, otherwise queue. Never blocks on the panel.
    pub fn post_message(&self, message: Out) {
        let mut state = self.state.lock();
        if state.disposed {
            return;
        }
        if state.readiness.is_ready() && state.queue.is_empty() {
            (self.deliver)(message);
        } else {
            state.queue.push_back(message);
            tracing::trace!(queued = state.queue.len(), "panel not ready, message queued");
            self.flush_locked(&mut state);
        }
    }

    /// Install the inbound handler, replacing any earlier one
    pub fn on_receive_message(&self, callback: impl Fn(In) + Send + Sync + 'static) {
        *self.on_receive.lock() = Some(Arc::new(callback));
    }

    /// Entry point for messages coming from the panel's content.
    ///
    /// The first one marks the content ready and flushes the queue before the
    /// handler sees it.
    pub fn receive(&self, message: In) {
        {
            let mut state = self.state.lock();
            if !state.readiness.content_ready {
                state.readiness.content_ready = true;
                tracing::debug!(pending = state.queue.len(), "panel content ready");
                self.flush_locked(&mut state);
            }
        }

        let callback = self.on_receive.lock().clone();
        if let Some(callback) = callback {
            callback(message);
        }
    }

    pub fn set_panel_visible(&self, visible: bool) {
        let mut state = self.state.lock();
        state.readiness.panel_ready = visible;
        if visible {
            self.flush_locked(&mut state);
        }
    }

    /// Deliver everything queued if both sides are ready. Safe to call repeatedly.
    pub fn flush(&self) {
        let mut state = self.state.lock();
        self.flush_locked(&mut state);
    }

    pub fn readiness(&self) -> Readiness {
        self.state.lock().readiness
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Drop queued messages and stop delivering
    pub fn dispose(&self) {
        let mut state = self.state.lock();
        state.disposed = true;
        state.queue.clear();
        drop(state);
        self.on_receive.lock().take();
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    fn flush_locked(&self, state: &mut ChannelState<Out>) {
        if state.disposed || !state.readiness.is_ready() {
            return;
        }
        while let Some(message) = state.queue.pop_front() {
            (self.deliver)(message);
        }
    }
}
