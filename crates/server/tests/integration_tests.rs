//! Server Integration Tests
//!
//! Drives a real server over loopback TCP the way `usbip` / `vhci_hcd`
//! would:
//! - Device list and import handshake
//! - Repeated device lists on one connection
//! - DAP request acknowledgment and polled responses
//! - Polls that miss the raw match
//! - Response ordering
//! - Unlink handling
//! - Pipeline restart between clients
//!
//! Run with: `cargo test -p server --test integration_tests`

use common::PipelineStats;
use common::test_utils::{
    DEFAULT_TEST_TIMEOUT, ReverseProcessor, create_control_request, create_devlist_request,
    create_import_request, create_setup_packet, create_submit_in, create_submit_out,
    create_unlink, with_timeout,
};
use protocol::{
    DeviceRecord, Direction, InterfaceRecord, OP_REP_DEVLIST, OP_REP_IMPORT, STAGE2_HEADER_SIZE,
    Stage1Header, Stage2Body, Stage2Header, USBIP_RET_SUBMIT, USBIP_RET_UNLINK,
};
use server::config::ServerConfig;
use server::usb::SwoTrace;
use server::{UsbIpServer, spawn_dap_worker};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

// ============================================================================
// Helpers
// ============================================================================

async fn start_server(trace: Option<SwoTrace>) -> SocketAddr {
    let mut config = ServerConfig::default();
    config.server.bind_addr = "127.0.0.1:0".to_string();
    config.pipeline.fast_path_timeout_ms = 200;

    let (pipeline, _worker) = spawn_dap_worker(
        ReverseProcessor,
        &config.pipeline,
        Arc::new(PipelineStats::new()),
    )
    .unwrap();

    let server = UsbIpServer::bind(&config, pipeline, trace).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    addr
}

async fn attach(addr: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(&create_import_request("1-1"))
        .await
        .unwrap();

    let mut reply = vec![0u8; Stage1Header::SIZE + DeviceRecord::SIZE];
    stream.read_exact(&mut reply).await.unwrap();
    let header = Stage1Header::decode(&reply).unwrap();
    assert_eq!(header.command, OP_REP_IMPORT);
    assert_eq!(header.status, 0);
    stream
}

/// Read one RET_SUBMIT and its data
async fn read_ret_submit(stream: &mut TcpStream) -> (Stage2Header, Vec<u8>) {
    let mut raw = [0u8; STAGE2_HEADER_SIZE];
    stream.read_exact(&mut raw).await.unwrap();
    let header = Stage2Header::decode(&raw).unwrap();

    let len = match header.body {
        Stage2Body::RetSubmit(ret) => ret.actual_length as usize,
        other => panic!("expected RET_SUBMIT, got {:?}", other),
    };
    let mut data = vec![0u8; len];
    stream.read_exact(&mut data).await.unwrap();
    (header, data)
}

/// Send a DAP request and consume its acknowledgment
async fn send_dap_request(stream: &mut TcpStream, seqnum: u32, payload: &[u8]) {
    stream
        .write_all(&create_submit_out(seqnum, 1, payload))
        .await
        .unwrap();

    let (ack, data) = read_ret_submit(stream).await;
    assert_eq!(ack.seqnum, seqnum);
    assert_eq!(ack.command(), USBIP_RET_SUBMIT);
    assert!(data.is_empty());
}

/// Poll endpoint 1 until a non-empty reply arrives
async fn poll_response(stream: &mut TcpStream, seqnum: &mut u32) -> Vec<u8> {
    for _ in 0..100 {
        *seqnum += 1;
        stream
            .write_all(&create_submit_in(*seqnum, 1))
            .await
            .unwrap();

        let (reply, data) = read_ret_submit(stream).await;
        assert_eq!(reply.seqnum, *seqnum);
        assert_eq!(reply.direction(), Direction::Out);
        if !data.is_empty() {
            return data;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no DAP response after 100 polls");
}

// ============================================================================
// Stage 1
// ============================================================================

#[tokio::test]
async fn test_device_list() {
    let addr = start_server(None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream.write_all(&create_devlist_request()).await.unwrap();

    let mut reply =
        vec![0u8; Stage1Header::SIZE + 4 + DeviceRecord::SIZE + InterfaceRecord::SIZE];
    with_timeout(DEFAULT_TEST_TIMEOUT, stream.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();

    let header = Stage1Header::decode(&reply).unwrap();
    assert_eq!(header.command, OP_REP_DEVLIST);
    assert_eq!(&reply[8..12], &[0, 0, 0, 1]);
    assert_eq!(&reply[12 + 256..12 + 260], b"1-1\0");
}

#[tokio::test]
async fn test_device_list_repeated_on_one_connection() {
    let addr = start_server(None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let reply_len = Stage1Header::SIZE + 4 + DeviceRecord::SIZE + InterfaceRecord::SIZE;

    let mut first = vec![0u8; reply_len];
    stream.write_all(&create_devlist_request()).await.unwrap();
    stream.read_exact(&mut first).await.unwrap();
    assert_eq!(Stage1Header::decode(&first).unwrap().command, OP_REP_DEVLIST);

    for _ in 0..3 {
        stream.write_all(&create_devlist_request()).await.unwrap();
        let mut reply = vec![0u8; reply_len];
        with_timeout(DEFAULT_TEST_TIMEOUT, stream.read_exact(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply, first);
    }

    // Still detached: an import is accepted afterwards
    stream
        .write_all(&create_import_request("1-1"))
        .await
        .unwrap();
    let mut reply = vec![0u8; Stage1Header::SIZE + DeviceRecord::SIZE];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(Stage1Header::decode(&reply).unwrap().command, OP_REP_IMPORT);
}

#[tokio::test]
async fn test_list_then_attach_on_new_connection() {
    let addr = start_server(None).await;

    {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&create_devlist_request()).await.unwrap();
        let mut reply = vec![0u8; 8 + 4 + 312 + 4];
        stream.read_exact(&mut reply).await.unwrap();
    }

    let mut stream = with_timeout(DEFAULT_TEST_TIMEOUT, attach(addr)).await.unwrap();

    // Enumeration starts with the device descriptor
    let setup = create_setup_packet(0x80, 0x06, 0x0100, 0, 64);
    stream
        .write_all(&create_control_request(1, setup))
        .await
        .unwrap();
    let (reply, data) = read_ret_submit(&mut stream).await;
    assert_eq!(reply.setup, setup);
    assert_eq!(data.len(), 18);
    assert_eq!(data[1], 0x01);
}

// ============================================================================
// Stage 2
// ============================================================================

#[tokio::test]
async fn test_dap_request_response() {
    let addr = start_server(None).await;
    let mut stream = attach(addr).await;
    let mut seqnum = 10;

    send_dap_request(&mut stream, seqnum, &[2, 0xAA, 0xBB]).await;

    let data = with_timeout(DEFAULT_TEST_TIMEOUT, poll_response(&mut stream, &mut seqnum))
        .await
        .unwrap();
    assert_eq!(data, vec![0xBB, 0xAA, 2]);
}

#[tokio::test]
async fn test_responses_delivered_in_order() {
    let addr = start_server(None).await;
    let mut stream = attach(addr).await;
    let mut seqnum = 0;

    for tag in 1..=3u8 {
        seqnum += 1;
        send_dap_request(&mut stream, seqnum, &[1, tag]).await;
    }

    for tag in 1..=3u8 {
        let data = poll_response(&mut stream, &mut seqnum).await;
        assert_eq!(data, vec![tag, 1]);
    }
}

#[tokio::test]
async fn test_nonstandard_poll_replies_empty_without_dequeuing() {
    let addr = start_server(None).await;
    let mut stream = attach(addr).await;
    let mut seqnum = 1;

    send_dap_request(&mut stream, seqnum, &[1, 0x42]).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // IN on endpoint 1, but the direction word is not the plain 1 the raw
    // match looks for
    seqnum += 1;
    let mut frame = create_submit_in(seqnum, 1);
    frame[12..16].copy_from_slice(&0x0000_0100u32.to_be_bytes());
    stream.write_all(&frame).await.unwrap();

    let mut raw = [0u8; STAGE2_HEADER_SIZE];
    stream.read_exact(&mut raw).await.unwrap();
    assert_eq!(&raw[0..4], &USBIP_RET_SUBMIT.to_be_bytes());
    assert_eq!(&raw[4..8], &seqnum.to_be_bytes());
    assert_eq!(&raw[12..16], &[0, 0, 0, 0]);
    assert_eq!(&raw[16..20], &1u32.to_be_bytes());
    assert_eq!(&raw[20..40], &[0u8; 20]);

    // The queued reply is still there for a regular poll
    let data = with_timeout(DEFAULT_TEST_TIMEOUT, poll_response(&mut stream, &mut seqnum))
        .await
        .unwrap();
    assert_eq!(data, vec![0x42, 1]);
}

#[tokio::test]
async fn test_unlink_acknowledged() {
    let addr = start_server(None).await;
    let mut stream = attach(addr).await;

    stream.write_all(&create_unlink(7, 6)).await.unwrap();

    let mut raw = [0u8; STAGE2_HEADER_SIZE];
    stream.read_exact(&mut raw).await.unwrap();
    let reply = Stage2Header::decode(&raw).unwrap();
    assert_eq!(reply.command(), USBIP_RET_UNLINK);
    assert_eq!(reply.seqnum, 7);
    assert_eq!(reply.direction(), Direction::Out);
}

#[tokio::test]
async fn test_invalid_endpoint_keeps_connection() {
    let addr = start_server(None).await;
    let mut stream = attach(addr).await;

    // Dropped without a reply
    stream.write_all(&create_submit_in(1, 6)).await.unwrap();

    stream.write_all(&create_unlink(2, 1)).await.unwrap();
    let mut raw = [0u8; STAGE2_HEADER_SIZE];
    stream.read_exact(&mut raw).await.unwrap();
    assert_eq!(Stage2Header::decode(&raw).unwrap().seqnum, 2);
}

#[tokio::test]
async fn test_swo_trace_endpoint() {
    let trace = SwoTrace::new();
    let addr = start_server(Some(trace.clone())).await;
    let mut stream = attach(addr).await;

    trace.queue_transfer(b"ITM".to_vec());

    stream.write_all(&create_submit_in(1, 2)).await.unwrap();
    let (_, data) = read_ret_submit(&mut stream).await;
    assert_eq!(data, b"ITM");

    stream.write_all(&create_submit_in(2, 2)).await.unwrap();
    let (_, data) = read_ret_submit(&mut stream).await;
    assert!(data.is_empty());
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_stale_response_not_delivered_to_next_client() {
    let addr = start_server(None).await;

    {
        let mut stream = attach(addr).await;
        send_dap_request(&mut stream, 1, &[1, 0x55]).await;
        // Disconnect without collecting the reply
    }

    let mut stream = with_timeout(DEFAULT_TEST_TIMEOUT, attach(addr)).await.unwrap();

    // Give the worker time to finish the old request
    tokio::time::sleep(Duration::from_millis(50)).await;

    for seqnum in 1..=5 {
        stream
            .write_all(&create_submit_in(seqnum, 1))
            .await
            .unwrap();
        let (_, data) = read_ret_submit(&mut stream).await;
        assert!(data.is_empty(), "stale response leaked: {:?}", data);
    }
}
