//! The handoff point between the update path and the modbus read path.

use crate::device::RegisterImage;
use std::sync::{Arc, Mutex};

/// Holds the one current [`RegisterImage`].
///
/// The update pipeline replaces the image wholesale after each re-encode;
/// the modbus server takes point-in-time snapshots. The lock only ever
/// guards the handle swap, never encoding work, so readers and the updater
/// cannot stall each other and a reader can never observe a half-written
/// image.
pub struct RegisterStore {
    current: Mutex<Arc<RegisterImage>>,
}

impl RegisterStore {
    pub fn new(initial: RegisterImage) -> Self {
        Self { current: Mutex::new(Arc::new(initial)) }
    }

    pub fn publish(&self, image: RegisterImage) {
        let image = Arc::new(image);
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = image;
    }

    pub fn snapshot(&self) -> Arc<RegisterImage> {
        let current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&current)
    }
}
