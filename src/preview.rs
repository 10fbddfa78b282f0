//! Live preview of a running stream.
//!
//! The stream loop publishes an annotated JPEG of its latest frame, but only
//! while at least one viewer is attached. Viewers pick up frames by sequence
//! number, so a slow viewer skips frames instead of queueing them.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Quality used for preview frames; alert artifacts use their own setting.
pub const PREVIEW_JPEG_QUALITY: u8 = 70;

#[derive(Default)]
struct Shared {
    latest: Mutex<Option<(u64, Arc<Vec<u8>>)>>,
    viewers: AtomicUsize,
    closed: AtomicBool,
}

/// Latest-frame slot shared by one stream worker and its viewers.
#[derive(Clone, Default)]
pub struct PreviewSlot {
    shared: Arc<Shared>,
}

impl PreviewSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_watched(&self) -> bool {
        self.shared.viewers.load(Ordering::SeqCst) > 0
    }

    pub fn viewers(&self) -> usize {
        self.shared.viewers.load(Ordering::SeqCst)
    }

    /// Replace the latest frame.
    pub fn publish(&self, jpeg: Vec<u8>) -> Result<()> {
        let mut latest = self
            .shared
            .latest
            .lock()
            .map_err(|_| anyhow!("preview lock poisoned"))?;
        let seq = latest.as_ref().map(|(seq, _)| seq + 1).unwrap_or(1);
        *latest = Some((seq, Arc::new(jpeg)));
        Ok(())
    }

    /// Mark the stream as ended. Viewers drain the last frame and stop.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn attach(&self) -> PreviewViewer {
        self.shared.viewers.fetch_add(1, Ordering::SeqCst);
        PreviewViewer {
            slot: self.clone(),
            seen: 0,
        }
    }
}

/// One attached viewer. Dropping it detaches.
pub struct PreviewViewer {
    slot: PreviewSlot,
    seen: u64,
}

impl PreviewViewer {
    /// The latest frame if it is newer than the last one returned.
    pub fn next_frame(&mut self) -> Result<Option<Arc<Vec<u8>>>> {
        let latest = self
            .slot
            .shared
            .latest
            .lock()
            .map_err(|_| anyhow!("preview lock poisoned"))?;
        match latest.as_ref() {
            Some((seq, jpeg)) if *seq > self.seen => {
                self.seen = *seq;
                Ok(Some(jpeg.clone()))
            }
            _ => Ok(None),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.slot.is_closed()
    }
}

impl Drop for PreviewViewer {
    fn drop(&mut self) {
        self.slot.shared.viewers.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewers_see_each_frame_once() -> Result<()> {
        let slot = PreviewSlot::new();
        let mut viewer = slot.attach();
        assert!(viewer.next_frame()?.is_none());

        slot.publish(vec![1])?;
        slot.publish(vec![2])?;
        assert_eq!(viewer.next_frame()?.as_deref(), Some(&vec![2]));
        assert!(viewer.next_frame()?.is_none());

        let mut late = slot.attach();
        assert_eq!(late.next_frame()?.as_deref(), Some(&vec![2]));
        Ok(())
    }

    #[test]
    fn watched_only_while_attached() {
        let slot = PreviewSlot::new();
        assert!(!slot.is_watched());
        let a = slot.attach();
        let b = slot.attach();
        assert_eq!(slot.viewers(), 2);
        drop(a);
        assert!(slot.is_watched());
        drop(b);
        assert!(!slot.is_watched());
    }

    #[test]
    fn close_is_visible_to_viewers() -> Result<()> {
        let slot = PreviewSlot::new();
        let mut viewer = slot.attach();
        slot.publish(vec![9])?;
        slot.close();
        assert!(viewer.is_closed());
        assert_eq!(viewer.next_frame()?.as_deref(), Some(&vec![9]));
        Ok(())
    }
}
