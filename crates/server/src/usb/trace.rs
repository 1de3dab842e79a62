//! SWO trace data for endpoint 2
//!
//! Trace capture happens outside the USB/IP path; whoever produces trace
//! bytes queues them on a [`SwoTrace`] handle and each endpoint-2 IN poll
//! drains one chunk. Polls that find nothing queued get an empty reply.

use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{trace, warn};

/// Maximum number of chunks held before the oldest is dropped
const MAX_QUEUED_TRANSFERS: usize = 32;

/// Largest chunk returned by one poll (one bulk packet)
pub const MAX_TRANSFER_SIZE: usize = 512;

#[derive(Debug, Default)]
struct TraceQueue {
    chunks: VecDeque<Bytes>,
    dropped: u64,
}

/// Shared handle onto the trace queue
#[derive(Debug, Clone, Default)]
pub struct SwoTrace {
    inner: Arc<Mutex<TraceQueue>>,
}

impl SwoTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue trace bytes for the host
    ///
    /// Data longer than one bulk packet is split. When the queue is full the
    /// oldest chunk is discarded.
    pub fn queue_transfer(&self, data: impl Into<Bytes>) {
        let mut data: Bytes = data.into();
        let Ok(mut queue) = self.inner.lock() else {
            warn!("SWO trace queue poisoned, dropping data");
            return;
        };

        while !data.is_empty() {
            let chunk = data.split_to(data.len().min(MAX_TRANSFER_SIZE));
            if queue.chunks.len() >= MAX_QUEUED_TRANSFERS {
                queue.chunks.pop_front();
                queue.dropped += 1;
            }
            queue.chunks.push_back(chunk);
        }
    }

    /// Take the oldest queued chunk
    pub fn take_transfer(&self) -> Option<Bytes> {
        let mut queue = self.inner.lock().ok()?;
        let chunk = queue.chunks.pop_front();
        if let Some(ref chunk) = chunk {
            trace!(len = chunk.len(), remaining = queue.chunks.len(), "SWO chunk");
        }
        chunk
    }

    /// Chunks waiting for the host
    pub fn pending(&self) -> usize {
        self.inner.lock().map(|q| q.chunks.len()).unwrap_or(0)
    }

    /// Chunks discarded because the host did not poll fast enough
    pub fn dropped(&self) -> u64 {
        self.inner.lock().map(|q| q.dropped).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let trace = SwoTrace::new();
        trace.queue_transfer(vec![1u8, 2]);
        trace.queue_transfer(vec![3u8]);

        assert_eq!(trace.take_transfer().unwrap().as_ref(), &[1, 2]);
        assert_eq!(trace.take_transfer().unwrap().as_ref(), &[3]);
        assert!(trace.take_transfer().is_none());
    }

    #[test]
    fn test_large_transfer_split() {
        let trace = SwoTrace::new();
        trace.queue_transfer(vec![0x55u8; MAX_TRANSFER_SIZE + 10]);

        assert_eq!(trace.pending(), 2);
        assert_eq!(trace.take_transfer().unwrap().len(), MAX_TRANSFER_SIZE);
        assert_eq!(trace.take_transfer().unwrap().len(), 10);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let trace = SwoTrace::new();
        for i in 0..(MAX_QUEUED_TRANSFERS + 2) {
            trace.queue_transfer(vec![i as u8]);
        }

        assert_eq!(trace.pending(), MAX_QUEUED_TRANSFERS);
        assert_eq!(trace.dropped(), 2);
        assert_eq!(trace.take_transfer().unwrap().as_ref(), &[2]);
    }

    #[test]
    fn test_clones_share_queue() {
        let producer = SwoTrace::new();
        let consumer = producer.clone();
        producer.queue_transfer(Bytes::from_static(b"swo"));
        assert_eq!(consumer.take_transfer().unwrap(), Bytes::from_static(b"swo"));
    }
}
