// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fast Data-In wire codec.
//!
//! ```text
//! Location  (5 words / 20 bytes): [200,  txid, addr, Δy:u16|Δx:u16, numPkts-1]
//! Seq       (≤68 words):          [2000, txid, seq,  payload bytes...]
//! Tell      (2 words / 8 bytes):  [2001, txid]
//!
//! Gatherer -> host:
//!   [2002, txid, seq1, seq2, ..., 0xFFFFFFFF]   RECEIVE_MISSING_SEQ_DATA_IN
//!   [2002, txid, 0xFFFFFFFE, 0xFFFFFFFF]        (all missing)
//!   [2003, txid]                                RECEIVE_FINISHED_DATA_IN
//! ```

use super::read_u32_le;
use crate::config::{
    fast_data_in_cmd::{
        RECEIVE_FINISHED_DATA_IN, RECEIVE_MISSING_SEQ_DATA_IN, SEND_DATA_TO_LOCATION,
        SEND_SEQ_DATA, SEND_TELL_DATA_IN,
    },
    SENTINEL_ALL_MISSING, SENTINEL_END_OF_LIST, UPLOAD_PAYLOAD_BYTES,
};
use crate::error::FdioError;

/// Payload capacity of one Seq packet, in bytes. Packet `k` carries bytes
/// `[k*W, (k+1)*W)` of the region.
pub const WINDOW_BYTES: usize = UPLOAD_PAYLOAD_BYTES;

/// Number of Seq packets needed to cover `region_size` bytes.
pub fn num_packets(region_size: usize) -> u32 {
    u32::try_from(region_size.div_ceil(WINDOW_BYTES.max(1))).unwrap_or(u32::MAX)
}

/// Builds a *Location* packet.
pub fn encode_location(txid: u32, addr: u32, delta_y: u16, delta_x: u16, num_pkts: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(20);
    buf.extend_from_slice(&u32::from(SEND_DATA_TO_LOCATION).to_le_bytes());
    buf.extend_from_slice(&txid.to_le_bytes());
    buf.extend_from_slice(&addr.to_le_bytes());
    let packed = (u32::from(delta_y) << 16) | u32::from(delta_x);
    buf.extend_from_slice(&packed.to_le_bytes());
    buf.extend_from_slice(&num_pkts.wrapping_sub(1).to_le_bytes());
    buf
}

/// Builds a *Seq* packet carrying bytes `[seq*W, seq*W + payload.len())` of
/// the region. Fails with `ProtocolError` if `seq*W` would fall outside
/// `region_size`.
pub fn encode_seq(txid: u32, seq: u32, region_size: usize, content: &[u8]) -> Result<Vec<u8>, FdioError> {
    let offset = seq as usize * WINDOW_BYTES;
    if offset >= region_size {
        return Err(FdioError::ProtocolError(format!(
            "seq {seq} offset {offset} is beyond region size {region_size}"
        )));
    }
    let end = (offset + WINDOW_BYTES).min(region_size).min(content.len());
    let payload = &content[offset..end];

    let mut buf = Vec::with_capacity(12 + payload.len());
    buf.extend_from_slice(&u32::from(SEND_SEQ_DATA).to_le_bytes());
    buf.extend_from_slice(&txid.to_le_bytes());
    buf.extend_from_slice(&seq.to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Builds a *Tell* packet.
pub fn encode_tell(txid: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8);
    buf.extend_from_slice(&u32::from(SEND_TELL_DATA_IN).to_le_bytes());
    buf.extend_from_slice(&txid.to_le_bytes());
    buf
}

/// A parsed `RECEIVE_MISSING_SEQ_DATA_IN` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingSeqReply {
    pub txid: u32,
    /// Seq numbers explicitly listed (excludes sentinel values).
    pub seqs: Vec<u32>,
    /// True if the all-missing sentinel was present anywhere in the list.
    pub all_missing: bool,
}

/// A decoded gatherer -> host reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GathererReply {
    Missing(MissingSeqReply),
    Finished { txid: u32 },
}

/// Decodes one gatherer reply packet.
pub fn decode_reply(bytes: &[u8]) -> Result<GathererReply, FdioError> {
    let cmd = read_u32_le(bytes, 0)
        .ok_or_else(|| FdioError::ProtocolError("reply shorter than one word".into()))?;
    let txid = read_u32_le(bytes, 4)
        .ok_or_else(|| FdioError::ProtocolError("reply missing transaction id".into()))?;

    match u16::try_from(cmd).ok() {
        Some(RECEIVE_FINISHED_DATA_IN) => Ok(GathererReply::Finished { txid }),
        Some(RECEIVE_MISSING_SEQ_DATA_IN) => {
            let mut seqs = Vec::new();
            let mut all_missing = false;
            let mut offset = 8;
            let mut terminated = false;
            while let Some(word) = read_u32_le(bytes, offset) {
                offset += 4;
                match word {
                    SENTINEL_END_OF_LIST => {
                        terminated = true;
                        break;
                    }
                    SENTINEL_ALL_MISSING => all_missing = true,
                    seq => seqs.push(seq),
                }
            }
            if !terminated {
                return Err(FdioError::ProtocolError(
                    "missing-seq reply lacks end-of-list sentinel".into(),
                ));
            }
            Ok(GathererReply::Missing(MissingSeqReply {
                txid,
                seqs,
                all_missing,
            }))
        }
        _ => Err(FdioError::ProtocolError(format!("unknown command {cmd}"))),
    }
}
