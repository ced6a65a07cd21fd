//! Single-slot focus tracking for UI collaborators.

use parking_lot::Mutex;

/// Holds the id of the currently focused container, if any.
///
/// Any id may be focused, including one not present in the graph.
#[derive(Debug, Default)]
pub struct FocusManager {
    slot: Mutex<Option<String>>,
}

impl FocusManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_focus(&self, id: impl Into<String>) {
        *self.slot.lock() = Some(id.into());
    }

    pub fn clear(&self) {
        *self.slot.lock() = None;
    }

    pub fn get_focus(&self) -> Option<String> {
        self.slot.lock().clone()
    }
}
