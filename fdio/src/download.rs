// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Downloader state machine: `IssueStart -> Receive ->
//! (ProcessPacket | Timeout) -> (Finish | RequestMissing)`.
//!
//! The "small retrieve" fast path below issues a direct SCP read instead of
//! opening the wire protocol. That read is meant to run only after the
//! board's monitor context has torn down; this module only implements the
//! read itself — sequencing it after teardown is the board worker's job.

use std::thread;

use crate::adapters::Transceiver;
use crate::codec::fastdata_out::{self, DataPacket};
use crate::config::{Config, DOWNLOAD_PAYLOAD_BYTES, LAST_FLAG, SDP_PAYLOAD_WORDS};
use crate::error::{FdioError, Result};
use crate::transport::ThrottledEndpoint;
use crate::types::ChipAddress;

const RECV_BUF_BYTES: usize = SDP_PAYLOAD_WORDS * 4;

/// Pulls one region's bytes from a target core's SDRAM through an extra
/// monitor, or bypasses the protocol for small reads.
pub struct Downloader<'a> {
    endpoint: &'a ThrottledEndpoint,
    config: &'a Config,
}

impl<'a> Downloader<'a> {
    pub fn new(endpoint: &'a ThrottledEndpoint, config: &'a Config) -> Self {
        Self { endpoint, config }
    }

    pub fn download(
        &self,
        transceiver: &dyn Transceiver,
        chip: ChipAddress,
        txid: u32,
        addr: u32,
        length: usize,
    ) -> Result<Vec<u8>> {
        if length < self.config.small_retrieve_threshold {
            return transceiver.read_memory(chip, addr, length);
        }
        self.download_via_monitor(txid, addr, length)
    }

    fn download_via_monitor(&self, txid: u32, addr: u32, length: usize) -> Result<Vec<u8>> {
        let max_seq = u32::try_from(length.div_ceil(DOWNLOAD_PAYLOAD_BYTES)).unwrap_or(u32::MAX);
        let mut buffer = vec![0u8; length];
        let mut received = vec![false; max_seq as usize];
        let mut ever_received = false;
        let mut timeouts_without_packet: u32 = 0;
        let mut buf = [0u8; RECV_BUF_BYTES];

        log::debug!("[fdio/download] txid {txid} starting {length}B across {max_seq} packets");
        self.endpoint
            .send(&fastdata_out::encode_start(txid, addr, u32::try_from(length).unwrap_or(u32::MAX)))?;

        loop {
            match self.endpoint.recv_timeout(self.config.download_receive_timeout, &mut buf) {
                Ok(n) => {
                    let pkt = match fastdata_out::decode_data_packet(&buf[..n]) {
                        Ok(pkt) => pkt,
                        Err(_) => continue,
                    };
                    ever_received = true;
                    timeouts_without_packet = 0;

                    let last = self.process_packet(&pkt, max_seq, &mut buffer, &mut received)?;
                    if last {
                        let missing = missing_seqs(&received);
                        if missing.is_empty() {
                            self.finish(txid)?;
                            return Ok(buffer);
                        }
                        self.request_missing(txid, &missing)?;
                    }
                }
                Err(FdioError::Timeout) => {
                    if !ever_received {
                        timeouts_without_packet += 1;
                        if timeouts_without_packet > self.config.download_timeout_retry_limit {
                            log::error!(
                                "[fdio/download] txid {txid} exhausted retry budget after {timeouts_without_packet} timeouts with no packet ever received"
                            );
                            return Err(FdioError::TimeoutExhausted {
                                attempts: timeouts_without_packet,
                            });
                        }
                        continue;
                    }
                    let missing = missing_seqs(&received);
                    if missing.is_empty() {
                        self.finish(txid)?;
                        return Ok(buffer);
                    }
                    log::debug!("[fdio/download] txid {txid} timed out, requesting {} missing packets", missing.len());
                    self.request_missing(txid, &missing)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn process_packet(
        &self,
        pkt: &DataPacket<'_>,
        max_seq: u32,
        buffer: &mut [u8],
        received: &mut [bool],
    ) -> Result<bool> {
        if pkt.seq > max_seq {
            return Err(FdioError::ProtocolError(format!(
                "seq {} exceeds max_seq {max_seq}",
                pkt.seq
            )));
        }
        if pkt.seq == max_seq {
            if !pkt.payload.is_empty() {
                return Err(FdioError::ProtocolError(
                    "terminal packet at max_seq must be empty".into(),
                ));
            }
        } else {
            let offset = pkt.seq as usize * DOWNLOAD_PAYLOAD_BYTES;
            let end = (offset + pkt.payload.len()).min(buffer.len());
            if end > offset {
                buffer[offset..end].copy_from_slice(&pkt.payload[..end - offset]);
            }
            received[pkt.seq as usize] = true;
        }
        Ok(pkt.last)
    }

    /// Tells the monitor the transaction is done, so it drops `txid`'s state
    /// instead of sitting primed for a resend request that will never come.
    fn finish(&self, txid: u32) -> Result<()> {
        self.endpoint.send(&fastdata_out::encode_clear(txid))
    }

    fn request_missing(&self, txid: u32, missing: &[u32]) -> Result<()> {
        let packets = fastdata_out::encode_resend_batch(txid, missing);
        for (i, packet) in packets.iter().enumerate() {
            if i > 0 {
                thread::sleep(self.config.delay_per_send);
            }
            self.endpoint.send(packet)?;
        }
        Ok(())
    }
}

fn missing_seqs(received: &[bool]) -> Vec<u32> {
    received
        .iter()
        .enumerate()
        .filter(|(_, &seen)| !seen)
        .map(|(i, _)| i as u32)
        .collect()
}
