//! Reply serialisation
//!
//! Every reply reuses the request header: seqnum, devid and endpoint are
//! echoed, the direction is flipped for `RET_SUBMIT` and the setup block is
//! carried over untouched.

use bytes::{BufMut, BytesMut};
use protocol::{STAGE2_HEADER_SIZE, Stage2Header};
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Send a `RET_SUBMIT` for `request`, header and data as separate writes
///
/// Nothing follows the header when `data` is empty.
pub async fn send_submit<W>(
    writer: &mut W,
    request: Stage2Header,
    status: i32,
    data: &[u8],
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let seqnum = request.seqnum;
    let reply = request.into_ret_submit(status, data.len() as u32);

    writer.write_all(&reply.encode()).await?;
    if !data.is_empty() {
        writer.write_all(data).await?;
    }
    writer.flush().await?;

    trace!(seqnum, len = data.len(), "Sent RET_SUBMIT");
    Ok(())
}

/// Send a `RET_SUBMIT` with header and data in a single write
///
/// Used on the polling path so the host sees the reply as one segment.
pub async fn send_submit_fast<W>(
    writer: &mut W,
    request: Stage2Header,
    status: i32,
    data: &[u8],
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let seqnum = request.seqnum;
    let reply = request.into_ret_submit(status, data.len() as u32);

    let mut frame = BytesMut::with_capacity(STAGE2_HEADER_SIZE + data.len());
    frame.put_slice(&reply.encode());
    frame.put_slice(data);

    writer.write_all(&frame).await?;
    writer.flush().await?;

    trace!(seqnum, len = data.len(), "Sent RET_SUBMIT (fast)");
    Ok(())
}

/// Acknowledge a `CMD_UNLINK`
pub async fn send_unlink<W>(writer: &mut W, request: Stage2Header) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let seqnum = request.seqnum;
    let reply = request.into_ret_unlink();

    writer.write_all(&reply.encode()).await?;
    writer.flush().await?;

    trace!(seqnum, "Sent RET_UNLINK");
    Ok(())
}
