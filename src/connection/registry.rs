// ABOUTME: ChannelRegistry - allocates channel IDs and owns the channel-handle map
// ABOUTME: All operations are serialized on an internal lock (§4.4)

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::channel::ChannelHandle;
use super::error::{Error, ErrorKind};

struct Inner {
    next_id: u16,
    max_channels: u16,
    channels: HashMap<u16, Arc<dyn ChannelHandle>>,
}

/// Allocates channel IDs in `1..=max_channels` and maps them to handles.
pub struct ChannelRegistry {
    inner: Mutex<Inner>,
}

impl ChannelRegistry {
    pub fn new(max_channels: u16) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                max_channels: if max_channels == 0 { u16::MAX } else { max_channels },
                channels: HashMap::new(),
            }),
        }
    }

    /// Allocates the smallest unused ID in `1..=max_channels`. Strictly
    /// sequential ascending allocation is acceptable until wrap-around,
    /// which fails with `closed` rather than reusing a live ID silently.
    pub fn next(&self) -> Result<u16, Error> {
        let mut inner = self.inner.lock().unwrap();
        let max = inner.max_channels;
        let start = inner.next_id;
        loop {
            let candidate = inner.next_id;
            if !inner.channels.contains_key(&candidate) {
                inner.next_id = if candidate == max { 1 } else { candidate + 1 };
                return Ok(candidate);
            }
            inner.next_id = if candidate == max { 1 } else { candidate + 1 };
            if inner.next_id == start {
                return Err(Error::new(
                    ErrorKind::Closed,
                    0,
                    "no free channel ids available",
                ));
            }
        }
    }

    pub fn add(&self, id: u16, handle: Arc<dyn ChannelHandle>) {
        self.inner.lock().unwrap().channels.insert(id, handle);
    }

    pub fn get(&self, id: u16) -> Option<Arc<dyn ChannelHandle>> {
        self.inner.lock().unwrap().channels.get(&id).cloned()
    }

    pub fn remove(&self, id: u16) -> Option<Arc<dyn ChannelHandle>> {
        self.inner.lock().unwrap().channels.remove(&id)
    }

    /// Atomically empties the map and returns every handle that was live.
    pub fn remove_all(&self) -> Vec<Arc<dyn ChannelHandle>> {
        let mut inner = self.inner.lock().unwrap();
        inner.channels.drain().map(|(_, handle)| handle).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingChannel {
        shutdown_calls: Arc<AtomicUsize>,
    }

    impl ChannelHandle for RecordingChannel {
        fn recv(&self, _frame: crate::frame::Frame) {}
        fn shutdown(&self, _err: Option<Error>) {
            self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn allocates_sequential_ascending_ids() {
        let registry = ChannelRegistry::new(0);
        assert_eq!(registry.next().unwrap(), 1);
        assert_eq!(registry.next().unwrap(), 2);
    }

    #[test]
    fn skips_ids_still_in_use_and_reuses_removed_ones() {
        let registry = ChannelRegistry::new(3);
        let calls = Arc::new(AtomicUsize::new(0));
        let handle: Arc<dyn ChannelHandle> = Arc::new(RecordingChannel {
            shutdown_calls: calls.clone(),
        });

        let id1 = registry.next().unwrap();
        registry.add(id1, handle.clone());
        let id2 = registry.next().unwrap();
        assert_ne!(id1, id2);

        registry.remove(id1);
        let id3 = registry.next().unwrap();
        let id4 = registry.next().unwrap();
        assert!([id3, id4].contains(&id1));
    }

    #[test]
    fn remove_all_drains_and_returns_every_handle() {
        let registry = ChannelRegistry::new(0);
        let calls = Arc::new(AtomicUsize::new(0));
        let handle: Arc<dyn ChannelHandle> = Arc::new(RecordingChannel {
            shutdown_calls: calls,
        });
        let id = registry.next().unwrap();
        registry.add(id, handle);

        let drained = registry.remove_all();
        assert_eq!(drained.len(), 1);
        assert!(registry.get(id).is_none());
        assert!(registry.remove_all().is_empty());
    }
}
