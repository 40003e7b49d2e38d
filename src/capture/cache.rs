//! Single-slot latest-wins cache for decoded frames.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use arc_swap::ArcSwapOption;

use crate::capture::frame::Frame;

/// Holds zero or one decoded frame; each publish replaces the previous one.
///
/// Publish and read are tear-free: a frame is swapped in as a single
/// reference, so a reader sees either the whole old frame or the whole new
/// one. Intermediate frames between two reads are dropped by design.
#[derive(Debug, Default)]
pub struct FrameCache {
    slot: ArcSwapOption<Frame>,
    first_published: Mutex<bool>,
    first_cond: Condvar,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held frame. Signals waiters on the first publish ever.
    pub fn publish(&self, frame: Frame) {
        self.slot.store(Some(std::sync::Arc::new(frame)));

        let mut seen = self
            .first_published
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if !*seen {
            *seen = true;
            self.first_cond.notify_all();
        }
    }

    /// Copy out the latest frame, or `None` if nothing was ever published.
    pub fn read(&self) -> Option<Frame> {
        self.slot.load_full().map(|frame| (*frame).clone())
    }

    /// Block until the first frame has been published, up to `timeout`.
    /// Returns whether a frame is available.
    pub fn wait_first(&self, timeout: Duration) -> bool {
        let seen = self
            .first_published
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let (seen, _) = self
            .first_cond
            .wait_timeout_while(seen, timeout, |published| !*published)
            .unwrap_or_else(|e| e.into_inner());
        *seen
    }

    /// Drop the held frame on session teardown.
    pub fn clear(&self) {
        self.slot.store(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{FrameMetadata, PixelFormat};
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Instant;

    fn frame(sequence: u64) -> Frame {
        Frame {
            data: Bytes::from(vec![sequence as u8; 3]),
            meta: Arc::new(FrameMetadata {
                sequence,
                width: 1,
                height: 1,
                stride: 3,
                source_format: PixelFormat::Bgr8,
                raw_len: 3,
            }),
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn empty_until_first_publish() {
        let cache = FrameCache::new();
        assert!(cache.read().is_none());
        assert!(!cache.wait_first(Duration::from_millis(10)));

        cache.publish(frame(1));
        assert_eq!(cache.read().unwrap().meta.sequence, 1);
        assert!(cache.wait_first(Duration::from_millis(10)));
    }

    #[test]
    fn latest_publish_wins() {
        let cache = FrameCache::new();
        for seq in 1..=3 {
            cache.publish(frame(seq));
        }
        assert_eq!(cache.read().unwrap().meta.sequence, 3);
    }

    #[test]
    fn payload_and_metadata_stay_paired() {
        let cache = FrameCache::new();
        cache.publish(frame(7));
        cache.publish(frame(8));
        let got = cache.read().unwrap();
        assert_eq!(got.data[0] as u64, got.meta.sequence);
    }

    #[test]
    fn wait_first_wakes_on_publish() {
        let cache = Arc::new(FrameCache::new());
        let publisher = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                cache.publish(frame(1));
            })
        };
        assert!(cache.wait_first(Duration::from_secs(2)));
        publisher.join().unwrap();
    }

    #[test]
    fn clear_empties_the_slot() {
        let cache = FrameCache::new();
        cache.publish(frame(1));
        cache.clear();
        assert!(cache.read().is_none());
    }
}
