//! Benchmarks for the stage-2 wire codec
//!
//! Measures the per-packet cost on the hot polling path:
//! - Decoding a CMD_SUBMIT envelope
//! - Encoding a RET_SUBMIT reply
//! - Building the reply header for an endpoint-1 IN poll end to end

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use protocol::{STAGE2_HEADER_SIZE, Stage2Header, from_wire, to_wire};

fn poll_frame() -> [u8; STAGE2_HEADER_SIZE] {
    let mut raw = [0u8; STAGE2_HEADER_SIZE];
    raw[3] = 0x01;
    raw[7] = 0x2A;
    raw[11] = 0x01;
    raw[15] = 0x01;
    raw[19] = 0x01;
    raw[22] = 0x02;
    raw[26] = 0x02;
    raw
}

fn benchmark_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("stage2_codec");
    let raw = poll_frame();

    group.bench_function("from_wire", |b| b.iter(|| from_wire(black_box(&raw))));

    let header = from_wire(&raw).into_ret_submit(0, 64);
    group.bench_function("to_wire", |b| b.iter(|| to_wire(black_box(&header))));

    group.bench_function("poll_reply", |b| {
        b.iter(|| {
            let header = Stage2Header::decode(black_box(&raw)).unwrap();
            header.into_ret_submit(0, 64).encode()
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_codec);
criterion_main!(benches);
