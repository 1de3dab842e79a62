//! Bounded queue pair between the network side and the DAP worker thread
//!
//! ```text
//! network side (DapBridge)                     worker thread (DapWorker)
//!   send_request ──► [ request queue  ] ──► recv_request
//!   recv_response ◄── [ response queue ] ◄── send_response
//!                    pending counter (+1 on send_response, -1 on recv_response)
//! ```
//!
//! Both queues hold fixed-size items so one queue slot always corresponds to
//! one USB packet. Each bridge owns its own pending counter; replacing a
//! bridge therefore resets the counter together with the queues.

use async_channel::{Receiver, Sender, bounded};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

/// Maximum DAP packet size (high-speed bulk endpoint)
pub const DAP_PACKET_SIZE: usize = 512;

/// Default number of items each queue can hold
pub const DEFAULT_QUEUE_DEPTH: usize = 20;

/// One request packet received on the DAP OUT endpoint
#[derive(Clone)]
pub struct RequestItem {
    len: usize,
    data: [u8; DAP_PACKET_SIZE],
}

impl RequestItem {
    /// Copy `payload` into a zero-padded item, truncating to capacity
    pub fn from_payload(payload: &[u8]) -> Self {
        let len = payload.len().min(DAP_PACKET_SIZE);
        let mut data = [0u8; DAP_PACKET_SIZE];
        data[..len].copy_from_slice(&payload[..len]);
        Self { len, data }
    }

    /// Bytes received from the host
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Whole fixed-size buffer, zero-padded after the payload
    pub fn buffer(&self) -> &[u8; DAP_PACKET_SIZE] {
        &self.data
    }

    pub fn buffer_mut(&mut self) -> &mut [u8; DAP_PACKET_SIZE] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for RequestItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestItem")
            .field("len", &self.len)
            .field("command", &self.data[0])
            .finish()
    }
}

/// One reply packet produced by the worker
#[derive(Clone)]
pub struct ResponseItem {
    len: u16,
    data: [u8; DAP_PACKET_SIZE],
}

impl ResponseItem {
    /// Copy `payload` into a zero-padded item, truncating to capacity
    pub fn from_payload(payload: &[u8]) -> Self {
        let len = payload.len().min(DAP_PACKET_SIZE);
        let mut data = [0u8; DAP_PACKET_SIZE];
        data[..len].copy_from_slice(&payload[..len]);
        Self {
            len: len as u16,
            data,
        }
    }

    /// Reply bytes to send to the host
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for ResponseItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseItem")
            .field("len", &self.len)
            .finish()
    }
}

/// Network-side half of the queue pair (async)
pub struct DapBridge {
    request_tx: Sender<RequestItem>,
    response_rx: Receiver<ResponseItem>,
    pending: Arc<AtomicUsize>,
}

impl DapBridge {
    /// Queue a request, waiting for space if the queue is full
    pub async fn send_request(&self, item: RequestItem) -> crate::Result<()> {
        self.request_tx
            .send(item)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Take the oldest response, waiting at most `timeout`
    ///
    /// Decrements the pending counter on success. Returns `None` if nothing
    /// arrived in time or the worker side is gone.
    pub async fn recv_response(&self, timeout: Duration) -> Option<ResponseItem> {
        match tokio::time::timeout(timeout, self.response_rx.recv()).await {
            Ok(Ok(item)) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                Some(item)
            }
            Ok(Err(_)) => {
                debug!("Response queue closed");
                None
            }
            Err(_) => {
                trace!(?timeout, pending = self.pending(), "No response within timeout");
                None
            }
        }
    }

    /// Responses produced but not yet taken
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Requests waiting for the worker
    pub fn queued_requests(&self) -> usize {
        self.request_tx.len()
    }

    /// Responses sitting in the response queue
    pub fn queued_responses(&self) -> usize {
        self.response_rx.len()
    }

    /// Close both queues
    ///
    /// The worker's blocked receive or send returns immediately with an
    /// error. Items still queued go away with the bridge once it is dropped.
    pub fn close(&self) {
        debug!(
            queued_requests = self.request_tx.len(),
            queued_responses = self.response_rx.len(),
            pending = self.pending(),
            "Closing DAP queues"
        );
        self.request_tx.close();
        self.response_rx.close();
    }

    pub fn is_closed(&self) -> bool {
        self.request_tx.is_closed()
    }
}

/// Worker-side half of the queue pair (blocking)
pub struct DapWorker {
    request_rx: Receiver<RequestItem>,
    response_tx: Sender<ResponseItem>,
    pending: Arc<AtomicUsize>,
}

impl DapWorker {
    /// Wait for the next request (blocking)
    pub fn recv_request(&self) -> crate::Result<RequestItem> {
        self.request_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Queue a response (blocking) and bump the pending counter
    pub fn send_response(&self, item: ResponseItem) -> crate::Result<()> {
        self.response_tx
            .send_blocking(item)
            .map_err(|e| crate::Error::Channel(e.to_string()))?;
        self.pending.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// True once the network side closed the queues
    pub fn is_closed(&self) -> bool {
        self.request_rx.is_closed()
    }
}

/// Create a fresh queue pair holding `depth` items per direction
///
/// Returns (DapBridge for the network side, DapWorker for the worker thread)
pub fn create_dap_bridge(depth: usize) -> (DapBridge, DapWorker) {
    let (request_tx, request_rx) = bounded(depth.max(1));
    let (response_tx, response_rx) = bounded(depth.max(1));
    let pending = Arc::new(AtomicUsize::new(0));

    (
        DapBridge {
            request_tx,
            response_rx,
            pending: pending.clone(),
        },
        DapWorker {
            request_rx,
            response_tx,
            pending,
        },
    )
}
