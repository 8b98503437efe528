//! Run registry
//!
//! Maps a panel identity to the run that currently owns its panel. The panel
//! and its channel outlive individual runs; only the cancel slot and the
//! owning generation change when a new run starts.

use parking_lot::{Mutex, RwLock};
use quarry_core::PanelId;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Panel, PanelChannel};

/// Cancels the run that installed it
pub type CancelFn = Box<dyn FnOnce() + Send>;

struct RunSlot {
    generation: u64,
    cancel: Option<CancelFn>,
}

/// Panel, channel and active run for one identity
pub struct RunState {
    pub panel_id: PanelId,
    pub panel: Arc<dyn Panel>,
    pub channel: Arc<PanelChannel>,
    slot: Mutex<RunSlot>,
    next_generation: AtomicU64,
}

impl RunState {
    pub fn new(panel_id: PanelId, panel: Arc<dyn Panel>, channel: Arc<PanelChannel>) -> Self {
        Self {
            panel_id,
            panel,
            channel,
            slot: Mutex::new(RunSlot {
                generation: 0,
                cancel: None,
            }),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Make a new run the owner of this panel.
    ///
    /// The previous run's cancel is invoked before this returns, after the
    /// generation has moved on, so the previous run already sees itself as
    /// superseded while it cleans up. Returns the new run's generation.
    pub fn begin_run(&self, cancel: CancelFn) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let previous = {
            let mut slot = self.slot.lock();
            slot.generation = generation;
            slot.cancel.replace(cancel)
        };

        if let Some(previous) = previous {
            tracing::debug!(panel_id = %self.panel_id, generation, "cancelling superseded run");
            previous();
        }
        generation
    }

    /// Whether `generation` still owns this panel
    pub fn is_current(&self, generation: u64) -> bool {
        self.slot.lock().generation == generation
    }

    /// Forget the cancel of a run that settled on its own.
    ///
    /// A no-op when a newer run has taken over.
    pub fn finish_run(&self, generation: u64) {
        let mut slot = self.slot.lock();
        if slot.generation == generation {
            slot.cancel = None;
        }
    }

    /// Cancel whichever run currently owns the panel, if any
    pub fn cancel_active(&self) -> bool {
        let cancel = self.slot.lock().cancel.take();
        match cancel {
            Some(cancel) => {
                cancel();
                true
            }
            None => false,
        }
    }

    pub fn has_active_run(&self) -> bool {
        self.slot.lock().cancel.is_some()
    }
}

/// Process-wide table of run states, one per panel identity
#[derive(Default)]
pub struct RunRegistry {
    states: RwLock<HashMap<PanelId, Arc<RunState>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, panel_id: &PanelId) -> Option<Arc<RunState>> {
        self.states.read().get(panel_id).cloned()
    }

    /// Register `state`, returning the one it replaced
    pub fn set(&self, panel_id: PanelId, state: Arc<RunState>) -> Option<Arc<RunState>> {
        self.states.write().insert(panel_id, state)
    }

    /// Remove `state` only if it is still the registered one
    pub fn clear_if_current(&self, panel_id: &PanelId, state: &Arc<RunState>) -> bool {
        let mut states = self.states.write();
        match states.get(panel_id) {
            Some(current) if Arc::ptr_eq(current, state) => {
                states.remove(panel_id);
                true
            }
            _ => false,
        }
    }

    /// Whether `state` is the one registered for its identity
    pub fn is_registered(&self, state: &Arc<RunState>) -> bool {
        self.states
            .read()
            .get(&state.panel_id)
            .is_some_and(|current| Arc::ptr_eq(current, state))
    }

    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }
}
