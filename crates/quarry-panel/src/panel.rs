//! Panel seams

use async_trait::async_trait;
use quarry_core::{PanelId, PanelMessage, PanelRequest, Result};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Something that happened to a panel on the host side
#[derive(Debug, Clone, PartialEq)]
pub enum PanelEvent {
    /// The panel was hidden or shown again
    VisibilityChanged(bool),
    /// The panel's content sent a message
    Message(PanelRequest),
    /// The user closed the panel
    Disposed,
}

/// Event stream of one panel, in the order the host observed them
pub type PanelEvents = mpsc::UnboundedReceiver<PanelEvent>;

/// A visual panel that renders run output.
///
/// `post_message` delivers straight to the content; it does not queue. Use a
/// [`crate::DeliveryChannel`] in front of it.
pub trait Panel: Send + Sync {
    fn id(&self) -> &PanelId;

    fn post_message(&self, message: PanelMessage);

    /// Bring the panel to front, creating its view if needed
    fn reveal(&self);

    fn set_title(&self, title: &str);

    fn is_visible(&self) -> bool;

    fn dispose(&self);

    fn is_disposed(&self) -> bool;
}

/// Creates panels on behalf of the orchestrator
#[async_trait]
pub trait PanelHost: Send + Sync {
    async fn create_panel(&self, id: &PanelId, title: &str) -> Result<(Arc<dyn Panel>, PanelEvents)>;
}
