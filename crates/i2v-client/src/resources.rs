/// Local resource handles for previews and results
///
/// The manager stores payloads behind opaque handles so a renderer can show
/// an image or play a video without copying its bytes around. It never
/// decides when to release; owners do that.
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Opaque reference to a stored payload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceHandle(Uuid);

impl ResourceHandle {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Renderable locator, e.g. `blob:i2v/6f1c...`
    pub fn url(&self) -> String {
        format!("blob:i2v/{}", self.0)
    }
}

impl std::fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url())
    }
}

/// Handle of an input image preview
pub type PreviewHandle = ResourceHandle;

/// Handle of the generated video
pub type ResultHandle = ResourceHandle;

/// A resolved payload
#[derive(Debug, Clone)]
pub struct Resource {
    pub bytes: Arc<[u8]>,
    pub mime: String,
}

/// Counters for leak checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceStats {
    pub live: usize,
    pub acquired: u64,
    pub released: u64,
}

#[derive(Debug, Default)]
struct Slots {
    live: HashMap<ResourceHandle, Resource>,
    acquired: u64,
    released: u64,
}

/// Shared allocator of resource handles
#[derive(Debug, Default)]
pub struct ResourceManager {
    slots: Mutex<Slots>,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manager ready to be shared between session and controller
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Store `bytes` and hand out a new handle for them
    pub fn acquire(&self, bytes: Arc<[u8]>, mime: impl Into<String>) -> ResourceHandle {
        let handle = ResourceHandle::new();
        let resource = Resource {
            bytes,
            mime: mime.into(),
        };

        let mut slots = self.slots.lock();
        debug!("acquire {} ({} bytes, {})", handle, resource.bytes.len(), resource.mime);
        slots.live.insert(handle.clone(), resource);
        slots.acquired += 1;
        handle
    }

    /// Release a handle. Releasing an unknown or already released handle is
    /// a no-op; returns whether something was freed.
    pub fn release(&self, handle: &ResourceHandle) -> bool {
        let mut slots = self.slots.lock();
        if slots.live.remove(handle).is_some() {
            slots.released += 1;
            debug!("release {}", handle);
            true
        } else {
            false
        }
    }

    /// Look up a live handle
    pub fn resolve(&self, handle: &ResourceHandle) -> Option<Resource> {
        self.slots.lock().live.get(handle).cloned()
    }

    pub fn is_live(&self, handle: &ResourceHandle) -> bool {
        self.slots.lock().live.contains_key(handle)
    }

    pub fn live_count(&self) -> usize {
        self.slots.lock().live.len()
    }

    pub fn stats(&self) -> ResourceStats {
        let slots = self.slots.lock();
        ResourceStats {
            live: slots.live.len(),
            acquired: slots.acquired,
            released: slots.released,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(data: &[u8]) -> Arc<[u8]> {
        Arc::from(data)
    }

    #[test]
    fn test_acquire_and_resolve() {
        let manager = ResourceManager::new();
        let handle = manager.acquire(payload(b"frame"), "image/png");

        let resource = manager.resolve(&handle).unwrap();
        assert_eq!(&resource.bytes[..], b"frame");
        assert_eq!(resource.mime, "image/png");
        assert!(handle.url().starts_with("blob:i2v/"));
        assert_eq!(manager.live_count(), 1);
    }

    #[test]
    fn test_handles_are_unique() {
        let manager = ResourceManager::new();
        let a = manager.acquire(payload(b"same"), "image/png");
        let b = manager.acquire(payload(b"same"), "image/png");
        assert_ne!(a, b);
        assert_eq!(manager.live_count(), 2);
    }

    #[test]
    fn test_release_is_idempotent() {
        let manager = ResourceManager::new();
        let keep = manager.acquire(payload(b"keep"), "image/jpeg");
        let drop = manager.acquire(payload(b"drop"), "image/jpeg");

        assert!(manager.release(&drop));
        assert!(!manager.release(&drop));
        assert!(!manager.release(&drop));

        assert!(manager.resolve(&drop).is_none());
        assert!(manager.is_live(&keep));
        assert_eq!(
            manager.stats(),
            ResourceStats {
                live: 1,
                acquired: 2,
                released: 1,
            }
        );
    }

    #[test]
    fn test_release_foreign_handle() {
        let a = ResourceManager::new();
        let b = ResourceManager::new();
        let handle = a.acquire(payload(b"x"), "video/mp4");

        assert!(!b.release(&handle));
        assert!(a.is_live(&handle));
    }
}
