//! Stage-2 wire codec
//!
//! Converts the stage-2 envelope between wire order and host order. The
//! envelope is a run of 32-bit big-endian words starting at offset 0 and
//! ending two words before the end of the header; those last two words hold
//! the transfer setup block, which is copied verbatim and never swapped.
//!
//! ```text
//! [ word 0 .. word 9 : swapped ][ setup (8 bytes) : untouched ]
//! ```
//!
//! `to_wire(&from_wire(raw)) == raw` for every 48-byte input; payload bytes
//! following the header are never seen by this module.

use crate::stage2::{STAGE2_HEADER_SIZE, Stage2Body, Stage2Header};
use byteorder::{BigEndian, ByteOrder};

/// Words at the end of the header excluded from byte swapping
pub const TRAILER_WORDS: usize = 2;

/// Words covered by the byte-order conversion
pub const ENVELOPE_WORDS: usize = STAGE2_HEADER_SIZE / 4 - TRAILER_WORDS;

const ENVELOPE_BYTES: usize = ENVELOPE_WORDS * 4;

/// Decode a raw header from wire order
pub fn from_wire(raw: &[u8; STAGE2_HEADER_SIZE]) -> Stage2Header {
    let mut words = [0u32; ENVELOPE_WORDS];
    BigEndian::read_u32_into(&raw[..ENVELOPE_BYTES], &mut words);

    let mut setup = [0u8; 8];
    setup.copy_from_slice(&raw[ENVELOPE_BYTES..]);

    Stage2Header {
        seqnum: words[1],
        devid: words[2],
        direction: words[3],
        ep: words[4],
        body: Stage2Body::from_words(words[0], [words[5], words[6], words[7], words[8], words[9]]),
        setup,
    }
}

/// Encode a header into wire order
pub fn to_wire(header: &Stage2Header) -> [u8; STAGE2_HEADER_SIZE] {
    let body = header.body.to_words();
    let words: [u32; ENVELOPE_WORDS] = [
        header.body.command(),
        header.seqnum,
        header.devid,
        header.direction,
        header.ep,
        body[0],
        body[1],
        body[2],
        body[3],
        body[4],
    ];

    let mut raw = [0u8; STAGE2_HEADER_SIZE];
    BigEndian::write_u32_into(&words, &mut raw[..ENVELOPE_BYTES]);
    raw[ENVELOPE_BYTES..].copy_from_slice(&header.setup);
    raw
}
