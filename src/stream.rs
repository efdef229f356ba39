//! Streaming source stub for not-yet-fully-received modules
//!
//! The wider system feeds module bytes through an upstream buffering layer;
//! this resource object merely fronts it. Every data operation is an
//! unimplemented placeholder (the buffering layer is out of scope here) -
//! the only live state is the monitor-guarded `ended` flag the upstream
//! layer flips when the final bytes have arrived.

use std::ops::Range;

use parking_lot::Mutex;
use tracing::trace;

/// A stub resource fronting the upstream byte-buffering layer
#[derive(Debug, Default)]
pub struct StreamingSource {
    /// Protected by the monitor; set by the upstream layer
    ended: Mutex<bool>,
}

impl StreamingSource {
    /// Create a source that has not yet ended
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `buf.len()` bytes starting at `offset`
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, String> {
        trace!(offset, len = buf.len(), "StreamingSource::read_at unimplemented");
        Err("streaming source reads are not implemented".to_string())
    }

    /// Whether reads through this source should be cached
    pub fn should_cache_reads(&self) -> bool {
        trace!("StreamingSource::should_cache_reads unimplemented");
        false
    }

    /// Current read position
    pub fn tell(&self) -> Option<u64> {
        trace!("StreamingSource::tell unimplemented");
        None
    }

    /// Pin the source's buffers in place
    pub fn pin(&self) {
        trace!("StreamingSource::pin unimplemented");
    }

    /// Release a pin
    pub fn unpin(&self) {
        trace!("StreamingSource::unpin unimplemented");
    }

    /// Total length, if known
    pub fn len(&self) -> Option<u64> {
        trace!("StreamingSource::len unimplemented");
        None
    }

    /// Whether no bytes are known to exist
    pub fn is_empty(&self) -> bool {
        self.len().unwrap_or(0) == 0
    }

    /// Start of the next cached range at or after `offset`
    pub fn next_cached_data(&self, offset: u64) -> Option<u64> {
        trace!(offset, "StreamingSource::next_cached_data unimplemented");
        None
    }

    /// End of the cached range containing `offset`
    pub fn cached_data_end(&self, offset: u64) -> Option<u64> {
        trace!(offset, "StreamingSource::cached_data_end unimplemented");
        None
    }

    /// Whether everything from `offset` to the end is cached
    pub fn is_data_cached_to_end(&self, offset: u64) -> bool {
        trace!(offset, "StreamingSource::is_data_cached_to_end unimplemented");
        false
    }

    /// Read from the cache without advancing the stream
    pub fn read_from_cache(&self, offset: u64, buf: &mut [u8]) -> Result<(), String> {
        trace!(offset, len = buf.len(), "StreamingSource::read_from_cache unimplemented");
        Err("streaming source cache reads are not implemented".to_string())
    }

    /// Currently cached byte ranges
    pub fn cached_ranges(&self) -> Vec<Range<u64>> {
        trace!("StreamingSource::cached_ranges unimplemented");
        vec![0..self.len().unwrap_or(0)]
    }

    /// Mark whether the upstream layer has delivered the final bytes
    pub fn set_ended(&self, ended: bool) {
        *self.ended.lock() = ended;
    }

    /// Whether the upstream layer has delivered the final bytes
    pub fn ended(&self) -> bool {
        *self.ended.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ended_flag() {
        let source = StreamingSource::new();
        assert!(!source.ended());
        source.set_ended(true);
        assert!(source.ended());
        source.set_ended(false);
        assert!(!source.ended());
    }

    #[test]
    fn test_placeholders_report_unimplemented() {
        let source = StreamingSource::new();
        let mut buf = [0u8; 4];
        assert!(source.read_at(0, &mut buf).is_err());
        assert!(source.read_from_cache(0, &mut buf).is_err());
        assert!(!source.should_cache_reads());
        assert!(source.tell().is_none());
        assert!(source.len().is_none());
        assert!(source.next_cached_data(0).is_none());
        assert!(source.cached_data_end(0).is_none());
        assert!(!source.is_data_cached_to_end(0));
        assert_eq!(source.cached_ranges(), vec![0..0]);
    }

    #[test]
    fn test_ended_flag_across_threads() {
        let source = std::sync::Arc::new(StreamingSource::new());
        let writer = std::sync::Arc::clone(&source);
        let handle = std::thread::spawn(move || writer.set_ended(true));
        handle.join().unwrap();
        assert!(source.ended());
    }
}
