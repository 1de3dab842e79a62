//! DAP command pipeline
//!
//! Request packets from endpoint 1 OUT are acknowledged immediately and
//! queued for the worker thread. Replies travel back through the response
//! queue and are handed out, strictly in order, to endpoint-1 IN polls.
//!
//! Correlation is by order only: the N-th poll that finds a pending reply
//! receives the N-th reply the worker produced.

pub mod fast_path;
pub mod worker;

pub use worker::spawn_dap_worker;

use crate::usbip::{UsbIpError, framer};
use async_channel::Receiver;
use common::{DapBridge, PipelineStats, RequestItem};
use protocol::{Stage2Header, from_wire};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, trace};

/// Network-side half of the pipeline
pub struct CommandPipeline {
    bridge: DapBridge,
    /// Fresh bridges built by the worker after a restart
    handoff_rx: Receiver<DapBridge>,
    fast_path_timeout: Duration,
    stats: Arc<PipelineStats>,
}

impl CommandPipeline {
    pub(crate) fn new(
        bridge: DapBridge,
        handoff_rx: Receiver<DapBridge>,
        fast_path_timeout: Duration,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            bridge,
            handoff_rx,
            fast_path_timeout,
            stats,
        }
    }

    /// Acknowledge a DAP request and queue it for the worker
    ///
    /// The empty RET_SUBMIT goes out before the payload is queued. Waits for
    /// queue space if the worker is behind.
    pub async fn submit_request<W>(
        &self,
        writer: &mut W,
        header: Stage2Header,
        payload: &[u8],
    ) -> Result<(), UsbIpError>
    where
        W: AsyncWrite + Unpin,
    {
        framer::send_submit(writer, header, 0, &[]).await?;

        self.bridge
            .send_request(RequestItem::from_payload(payload))
            .await?;
        self.stats.record_request();

        trace!(
            seqnum = header.seqnum,
            len = payload.len(),
            command = payload.first().copied().unwrap_or_default(),
            "Queued DAP request"
        );
        Ok(())
    }

    /// Reply to an endpoint-1 IN poll that did not take the fast path
    ///
    /// Never dequeues a response.
    pub async fn respond_poll<W>(&self, writer: &mut W, header: Stage2Header) -> Result<(), UsbIpError>
    where
        W: AsyncWrite + Unpin,
    {
        framer::send_submit(writer, header, 0, &[]).await?;
        Ok(())
    }

    /// Answer `raw` directly if it is an endpoint-1 IN poll
    ///
    /// Returns `Ok(false)` without touching the stream when `raw` is any
    /// other frame. With a reply pending it is sent in a single write;
    /// otherwise `raw` is patched into an empty RET_SUBMIT and echoed back.
    pub async fn try_fast_reply<W>(&self, raw: &mut [u8], writer: &mut W) -> Result<bool, UsbIpError>
    where
        W: AsyncWrite + Unpin,
    {
        if !fast_path::is_poll_frame(raw) {
            return Ok(false);
        }

        let pending = self.bridge.pending();
        if pending == 0 {
            fast_path::patch_empty_reply(raw);
            writer.write_all(raw).await?;
            writer.flush().await?;
            self.stats.record_empty_poll();
            return Ok(true);
        }

        let mut frame = [0u8; protocol::STAGE2_HEADER_SIZE];
        frame.copy_from_slice(raw);
        let header = from_wire(&frame);

        match self.bridge.recv_response(self.fast_path_timeout).await {
            Some(response) => {
                framer::send_submit_fast(writer, header, 0, response.payload()).await?;
                self.stats.record_fast_path();
            }
            None => {
                error!(
                    pending,
                    seqnum = header.seqnum,
                    "Pending response missing from queue, replying empty"
                );
                self.stats.record_fault();
                framer::send_submit(writer, header, 0, &[]).await?;
            }
        }
        Ok(true)
    }

    /// Replace both queues and reset the pending counter
    ///
    /// Anything queued in either direction is discarded. Returns once the
    /// worker has switched to the new queues.
    pub async fn restart(&mut self) -> common::Result<()> {
        debug!(
            pending = self.bridge.pending(),
            queued_requests = self.bridge.queued_requests(),
            "Restarting command pipeline"
        );
        self.bridge.close();

        self.bridge = self
            .handoff_rx
            .recv()
            .await
            .map_err(|_| common::Error::WorkerStopped)?;

        info!("Command pipeline restarted");
        Ok(())
    }

    /// Responses produced but not yet delivered
    pub fn pending(&self) -> usize {
        self.bridge.pending()
    }

    /// Requests still waiting for the worker
    pub fn queued_requests(&self) -> usize {
        self.bridge.queued_requests()
    }

    /// Responses sitting in the response queue
    pub fn queued_responses(&self) -> usize {
        self.bridge.queued_responses()
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }
}
