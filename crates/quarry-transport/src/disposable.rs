//! Subscription handles

use parking_lot::Mutex;

type DisposeFn = Box<dyn FnOnce() + Send>;

/// Handle that undoes a registration when disposed.
///
/// Disposal is explicit and idempotent: dropping a `Disposable` leaves the
/// registration in place, calling [`Disposable::dispose`] a second time does
/// nothing.
pub struct Disposable {
    dispose: Mutex<Option<DisposeFn>>,
}

impl Disposable {
    pub fn new(dispose: impl FnOnce() + Send + 'static) -> Self {
        Self {
            dispose: Mutex::new(Some(Box::new(dispose))),
        }
    }

    /// A handle with nothing to undo
    pub fn empty() -> Self {
        Self {
            dispose: Mutex::new(None),
        }
    }

    /// Combine several handles into one
    pub fn from_all(items: Vec<Disposable>) -> Self {
        Self::new(move || {
            for item in items {
                item.dispose();
            }
        })
    }

    pub fn dispose(&self) {
        let dispose = self.dispose.lock().take();
        if let Some(dispose) = dispose {
            dispose();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.dispose.lock().is_none()
    }
}

impl std::fmt::Debug for Disposable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
