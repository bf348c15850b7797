// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fast Data-Out wire codec.
//!
//! ```text
//! Start          (4 words): [100, txid, addr, length]
//! Clear          (2 words): [101, txid]
//! First-Missing  (≤68 words): [1000, txid, batch_pkts, seq, seq, ...]
//! Next-Missing   (≤68 words): [1001, txid, seq, seq, ...]
//!
//! Monitor -> host data packet:
//!   word 0: seq_num, with bit 31 (LAST_FLAG) set on the final packet
//!   remaining bytes: payload (67 words of capacity)
//! ```
//!
//! The `Clear` command code is not fixed by the prose spec (only `Start` and
//! `ResendBatch` get concrete wire values); `101` is chosen as the next code
//! in the same numeric family as `Start` (100). See DESIGN.md.

use super::read_u32_le;
use crate::config::{
    fast_data_out_cmd::{NEXT_MISSING_SEQS, START_MISSING_SEQS, START_SENDING_DATA},
    LAST_FLAG, SDP_PAYLOAD_WORDS,
};
use crate::error::FdioError;

/// Command code for `Clear`, in the same numeric family as `Start` (100).
/// See the module doc comment and DESIGN.md for why this isn't spec-literal.
pub const CLEAR_SENDING_DATA: u32 = 101;

/// Header words (after cmd) in a First-Missing packet: txid, batch_pkts.
const FIRST_HEADER_WORDS: usize = 2;
/// Header words (after cmd) in a Next-Missing packet: txid.
const NEXT_HEADER_WORDS: usize = 1;

/// Payload capacity, in bytes, of one monitor -> host data packet.
pub const DATA_PAYLOAD_BYTES: usize = (SDP_PAYLOAD_WORDS - 1) * 4;

/// Builds a *Start* packet requesting `length` bytes from `addr`.
pub fn encode_start(txid: u32, addr: u32, length: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    buf.extend_from_slice(&u32::from(START_SENDING_DATA).to_le_bytes());
    buf.extend_from_slice(&txid.to_le_bytes());
    buf.extend_from_slice(&addr.to_le_bytes());
    buf.extend_from_slice(&length.to_le_bytes());
    buf
}

/// Builds a *Clear* packet.
pub fn encode_clear(txid: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8);
    buf.extend_from_slice(&CLEAR_SENDING_DATA.to_le_bytes());
    buf.extend_from_slice(&txid.to_le_bytes());
    buf
}

/// Builds the First-Missing + Next-Missing... packet sequence for one
/// `RequestMissing` batch. `missing` must be ascending. Returns an empty
/// vector when `missing` is empty — no resend-request packets are needed
/// when nothing is missing.
pub fn encode_resend_batch(txid: u32, missing: &[u32]) -> Vec<Vec<u8>> {
    if missing.is_empty() {
        return Vec::new();
    }

    let first_capacity = SDP_PAYLOAD_WORDS - 1 - FIRST_HEADER_WORDS;
    let next_capacity = SDP_PAYLOAD_WORDS - 1 - NEXT_HEADER_WORDS;

    let (first_chunk, rest) = missing.split_at(missing.len().min(first_capacity));
    let next_chunks: Vec<&[u32]> = rest.chunks(next_capacity).collect();
    let batch_pkts = u32::try_from(next_chunks.len()).unwrap_or(u32::MAX);

    let mut packets = Vec::with_capacity(1 + next_chunks.len());

    let mut first = Vec::with_capacity(12 + first_chunk.len() * 4);
    first.extend_from_slice(&u32::from(START_MISSING_SEQS).to_le_bytes());
    first.extend_from_slice(&txid.to_le_bytes());
    first.extend_from_slice(&batch_pkts.to_le_bytes());
    for seq in first_chunk {
        first.extend_from_slice(&seq.to_le_bytes());
    }
    packets.push(first);

    for chunk in next_chunks {
        let mut pkt = Vec::with_capacity(8 + chunk.len() * 4);
        pkt.extend_from_slice(&u32::from(NEXT_MISSING_SEQS).to_le_bytes());
        pkt.extend_from_slice(&txid.to_le_bytes());
        for seq in chunk {
            pkt.extend_from_slice(&seq.to_le_bytes());
        }
        packets.push(pkt);
    }

    packets
}

/// One parsed monitor -> host data packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket<'a> {
    pub seq: u32,
    pub last: bool,
    pub payload: &'a [u8],
}

/// Decodes a monitor -> host data packet.
pub fn decode_data_packet(bytes: &[u8]) -> Result<DataPacket<'_>, FdioError> {
    let header = read_u32_le(bytes, 0)
        .ok_or_else(|| FdioError::ProtocolError("data packet shorter than one word".into()))?;
    let seq = header & !LAST_FLAG;
    let last = header & LAST_FLAG != 0;
    Ok(DataPacket {
        seq,
        last,
        payload: &bytes[4..],
    })
}
