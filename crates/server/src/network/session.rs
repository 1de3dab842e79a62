//! Per-connection session
//!
//! A session starts detached and only accepts stage-1 requests. After a
//! successful import it switches to stage-2 framing for the rest of the
//! connection. Requests are read whole (header plus any OUT payload) before
//! they are handled.

use crate::pipeline::CommandPipeline;
use crate::usbip::{EndpointDispatcher, Stage1Handler, UsbIpError};
use protocol::{BUSID_SIZE, STAGE2_HEADER_SIZE, Stage1Command, Stage1Header, out_payload_len};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, info, warn};

/// Largest OUT payload accepted in one CMD_SUBMIT
pub const MAX_TRANSFER_SIZE: u32 = 64 * 1024;

/// Attachment state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Stage-1 requests only
    #[default]
    Detached,
    /// Import reply being written
    AttachPending,
    /// Stage-2 traffic for the imported device
    Emulating,
}

/// One client connection
pub struct Session<'a> {
    state: SessionState,
    stage1: &'a Stage1Handler,
    dispatcher: EndpointDispatcher,
    pipeline: &'a CommandPipeline,
}

impl<'a> Session<'a> {
    pub fn new(
        stage1: &'a Stage1Handler,
        dispatcher: EndpointDispatcher,
        pipeline: &'a CommandPipeline,
    ) -> Self {
        Self {
            state: SessionState::Detached,
            stage1,
            dispatcher,
            pipeline,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Serve requests until the peer disconnects
    ///
    /// Rejected requests are logged and skipped. Returns an error only when
    /// the stream or the pipeline can no longer be used.
    pub async fn run<S>(&mut self, stream: S) -> Result<(), UsbIpError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);

        loop {
            let result = match self.state {
                SessionState::Detached | SessionState::AttachPending => {
                    let Some(buf) = read_stage1_request(&mut reader).await? else {
                        break;
                    };
                    self.stage1
                        .handle(&buf, &mut self.state, &mut writer)
                        .await
                        .map(|_| ())
                }
                SessionState::Emulating => {
                    let Some(mut buf) = read_stage2_request(&mut reader).await? else {
                        break;
                    };
                    self.dispatcher
                        .dispatch(&mut buf, self.pipeline, &mut writer)
                        .await
                        .map(|_| ())
                }
            };

            match result {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(state = ?self.state, "Request dropped: {}", e),
            }
        }

        info!(state = ?self.state, "Client disconnected");
        Ok(())
    }
}

/// Fill `buf`, or return false on a clean EOF before the first byte
async fn read_frame_start<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool>
where
    R: AsyncRead + Unpin,
{
    let n = reader.read(buf).await?;
    if n == 0 {
        return Ok(false);
    }
    reader.read_exact(&mut buf[n..]).await?;
    Ok(true)
}

/// Read one stage-1 request: the header, plus the bus id for an import
pub async fn read_stage1_request<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; Stage1Header::SIZE];
    if !read_frame_start(reader, &mut buf).await? {
        return Ok(None);
    }

    // Only the header is consumed for an unrecognised command. A body sent
    // after it, if any, is read as the next header and rejected in turn, so
    // the stream stays misaligned until the body has been used up.
    let command = u16::from_be_bytes([buf[2], buf[3]]);
    if Stage1Command::from_code(command) == Some(Stage1Command::DeviceAttach) {
        buf.resize(Stage1Header::SIZE + BUSID_SIZE, 0);
        reader.read_exact(&mut buf[Stage1Header::SIZE..]).await?;
    }

    Ok(Some(buf))
}

/// Read one stage-2 request: the envelope, plus the payload of a SUBMIT OUT
///
/// The header is left in wire order. Only the words that decide the payload
/// length are looked at, so endpoint-1 polls reach the fast path undecoded.
pub async fn read_stage2_request<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; STAGE2_HEADER_SIZE];
    if !read_frame_start(reader, &mut header).await? {
        return Ok(None);
    }

    let len = out_payload_len(&header);
    let mut buf = header.to_vec();

    if len > 0 {
        if len > MAX_TRANSFER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "transfer_buffer_length {} exceeds {} bytes",
                    len, MAX_TRANSFER_SIZE
                ),
            ));
        }
        debug!(len, "Reading OUT payload");
        buf.resize(STAGE2_HEADER_SIZE + len as usize, 0);
        reader.read_exact(&mut buf[STAGE2_HEADER_SIZE..]).await?;
    }

    Ok(Some(buf))
}
