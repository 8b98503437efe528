//! Quarry Panel - Delivery to result panels
//!
//! - `DeliveryChannel` - FIFO queue gated on panel visibility and content readiness
//! - `Panel` / `PanelHost` - The seam to whatever renders results
//! - `RunRegistry` - Which run currently owns which panel

mod channel;
mod panel;
mod registry;

pub use channel::{DeliveryChannel, PanelChannel, Readiness};
pub use panel::{Panel, PanelEvent, PanelEvents, PanelHost};
pub use registry::{CancelFn, RunRegistry, RunState};
