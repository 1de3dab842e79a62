//! Stage-2 request routing
//!
//! | Endpoint | Direction | Handling                                   |
//! |----------|-----------|--------------------------------------------|
//! | 0        | any       | control handler, reply truncated to wLength |
//! | 1        | OUT       | ack, then queue for the DAP worker          |
//! | 1        | IN        | fast path (pending reply or empty)          |
//! | 2        | IN        | one SWO trace chunk, or empty               |
//! | 2        | OUT       | empty ack                                   |
//!
//! Endpoint-1 IN polls are matched on the raw bytes before decoding.

use crate::pipeline::CommandPipeline;
use crate::usb::{ControlRequestHandler, SwoTrace};
use crate::usbip::{UsbIpError, framer};
use protocol::{Direction, ProtocolError, STAGE2_HEADER_SIZE, Stage2Body, Stage2Header};
use tokio::io::AsyncWrite;
use tracing::{debug, trace, warn};

/// Short-frame warnings logged per session before going quiet
const MAX_SHORT_FRAME_WARNINGS: u32 = 16;

pub const EP_CONTROL: u32 = 0;
pub const EP_DAP: u32 = 1;
pub const EP_SWO: u32 = 2;

/// What happened to a dispatched request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A reply was written
    Replied,
    /// Acknowledged and queued for the worker
    Queued,
    /// Dropped without a reply
    Unanswered,
}

/// Routes attached-state requests to their handlers
pub struct EndpointDispatcher {
    control: Box<dyn ControlRequestHandler>,
    /// `None` when the trace endpoint is disabled
    trace: Option<SwoTrace>,
    short_frame_warnings: u32,
}

impl EndpointDispatcher {
    pub fn new(control: Box<dyn ControlRequestHandler>, trace: Option<SwoTrace>) -> Self {
        Self {
            control,
            trace,
            short_frame_warnings: 0,
        }
    }

    /// Handle one stage-2 request
    ///
    /// `buf` holds the 48-byte header followed by any OUT payload. It may be
    /// rewritten in place when answered through the fast path.
    pub async fn dispatch<W>(
        &mut self,
        buf: &mut [u8],
        pipeline: &CommandPipeline,
        writer: &mut W,
    ) -> Result<Outcome, UsbIpError>
    where
        W: AsyncWrite + Unpin,
    {
        if buf.len() < STAGE2_HEADER_SIZE {
            self.warn_short_frame(buf.len());
            return Err(ProtocolError::BufferTooSmall {
                needed: STAGE2_HEADER_SIZE,
                available: buf.len(),
            }
            .into());
        }

        if pipeline.try_fast_reply(buf, writer).await? {
            return Ok(Outcome::Replied);
        }

        let header = Stage2Header::decode(buf)?;
        match header.body {
            Stage2Body::CmdSubmit(_) => {
                let payload = &buf[STAGE2_HEADER_SIZE..];
                self.handle_submit(header, payload, pipeline, writer).await
            }
            Stage2Body::CmdUnlink(unlink) => {
                debug!(
                    seqnum = header.seqnum,
                    unlink_seqnum = unlink.unlink_seqnum,
                    "CMD_UNLINK"
                );
                framer::send_unlink(writer, header).await?;
                Ok(Outcome::Replied)
            }
            _ => {
                warn!(
                    command = header.command(),
                    seqnum = header.seqnum,
                    "Unknown stage-2 command, dropping"
                );
                Err(UsbIpError::UnknownStage2(header.command()))
            }
        }
    }

    async fn handle_submit<W>(
        &mut self,
        header: Stage2Header,
        payload: &[u8],
        pipeline: &CommandPipeline,
        writer: &mut W,
    ) -> Result<Outcome, UsbIpError>
    where
        W: AsyncWrite + Unpin,
    {
        match (header.ep, header.direction()) {
            (EP_CONTROL, _) => {
                let setup = header.setup_packet();
                match self.control.handle(&setup) {
                    Some(data) => {
                        framer::send_submit(writer, header, 0, &data).await?;
                        Ok(Outcome::Replied)
                    }
                    None => {
                        warn!(
                            request_type = setup.request_type,
                            request = setup.request,
                            value = setup.value,
                            index = setup.index,
                            "Unhandled control request, no reply"
                        );
                        Ok(Outcome::Unanswered)
                    }
                }
            }
            (EP_DAP, Direction::Out) => {
                pipeline.submit_request(writer, header, payload).await?;
                Ok(Outcome::Queued)
            }
            (EP_DAP, Direction::In) => {
                pipeline.respond_poll(writer, header).await?;
                Ok(Outcome::Replied)
            }
            (EP_SWO, Direction::In) => {
                let chunk = self.trace.as_ref().and_then(SwoTrace::take_transfer);
                let data = chunk.as_deref().unwrap_or_default();
                framer::send_submit(writer, header, 0, data).await?;
                Ok(Outcome::Replied)
            }
            (EP_SWO, Direction::Out) => {
                trace!(seqnum = header.seqnum, "SWO OUT, empty ack");
                framer::send_submit(writer, header, 0, &[]).await?;
                Ok(Outcome::Replied)
            }
            (ep, direction) => {
                warn!(ep, ?direction, seqnum = header.seqnum, "Invalid endpoint, dropping");
                Err(UsbIpError::InvalidEndpoint(ep))
            }
        }
    }

    fn warn_short_frame(&mut self, len: usize) {
        if self.short_frame_warnings < MAX_SHORT_FRAME_WARNINGS {
            self.short_frame_warnings += 1;
            warn!(
                len,
                needed = STAGE2_HEADER_SIZE,
                "Stage-2 frame too short"
            );
            if self.short_frame_warnings == MAX_SHORT_FRAME_WARNINGS {
                warn!("Suppressing further short-frame warnings for this session");
            }
        }
    }
}
