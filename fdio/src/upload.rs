// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Uploader state machine: `IssueBurst -> AwaitReplies ->
//! Retransmit -> ... -> Done | FailedTimeout`.

use crate::adapters::Transceiver;
use crate::codec::fastdata_in::{self, GathererReply};
use crate::config::{Config, SDP_PAYLOAD_WORDS};
use crate::error::{FdioError, Result};
use crate::transport::ThrottledEndpoint;
use crate::types::ChipAddress;

const RECV_BUF_BYTES: usize = SDP_PAYLOAD_WORDS * 4;

/// Streams one region's content to a target core's SDRAM through a
/// gatherer, or bypasses the protocol for small writes.
pub struct Uploader<'a> {
    endpoint: &'a ThrottledEndpoint,
    config: &'a Config,
}

impl<'a> Uploader<'a> {
    pub fn new(endpoint: &'a ThrottledEndpoint, config: &'a Config) -> Self {
        Self { endpoint, config }
    }

    /// Uploads `content` to `addr` on the gatherer's target chip, choosing
    /// the Fast Data-In protocol or a direct SCP write depending on size.
    pub fn upload(
        &self,
        transceiver: &dyn Transceiver,
        target_chip: ChipAddress,
        txid: u32,
        addr: u32,
        delta_y: u16,
        delta_x: u16,
        content: &[u8],
    ) -> Result<()> {
        if content.len() < self.config.very_small_write_threshold {
            return transceiver.write_memory(target_chip, addr, content);
        }
        self.upload_via_gatherer(txid, addr, delta_y, delta_x, content)
    }

    fn upload_via_gatherer(
        &self,
        txid: u32,
        addr: u32,
        delta_y: u16,
        delta_x: u16,
        content: &[u8],
    ) -> Result<()> {
        let region_size = content.len();
        let num_pkts = fastdata_in::num_packets(region_size);
        log::debug!("[fdio/upload] txid {txid} starting {region_size}B in {num_pkts} packets");

        self.issue_burst(txid, addr, delta_y, delta_x, num_pkts, region_size, content)?;

        let mut bitmap: Option<Vec<bool>> = None;
        let mut consecutive_timeouts: u32 = 0;
        let mut buf = [0u8; RECV_BUF_BYTES];

        loop {
            match self.endpoint.recv_timeout(self.config.upload_receive_timeout, &mut buf) {
                Ok(n) => {
                    let reply = match fastdata_in::decode_reply(&buf[..n]) {
                        Ok(reply) => reply,
                        Err(_) => continue,
                    };
                    let reply_txid = match &reply {
                        GathererReply::Finished { txid } => *txid,
                        GathererReply::Missing(m) => m.txid,
                    };
                    if reply_txid != txid {
                        continue;
                    }
                    consecutive_timeouts = 0;

                    match reply {
                        GathererReply::Finished { .. } => return Ok(()),
                        GathererReply::Missing(missing) => {
                            let map = bitmap.get_or_insert_with(|| vec![false; num_pkts as usize]);
                            if missing.all_missing {
                                map.iter_mut().for_each(|bit| *bit = true);
                            }
                            for seq in missing.seqs {
                                if let Some(bit) = map.get_mut(seq as usize) {
                                    *bit = true;
                                }
                            }
                            self.retransmit(txid, addr, delta_y, delta_x, region_size, content, map)?;
                            map.iter_mut().for_each(|bit| *bit = false);
                        }
                    }
                }
                Err(FdioError::Timeout) => {
                    consecutive_timeouts += 1;
                    if consecutive_timeouts > self.config.upload_timeout_retry_limit {
                        log::error!("[fdio/upload] txid {txid} exhausted retry budget after {consecutive_timeouts} timeouts");
                        return Err(FdioError::TimeoutExhausted {
                            attempts: consecutive_timeouts,
                        });
                    }
                    log::debug!("[fdio/upload] txid {txid} timed out waiting for a reply, retry {consecutive_timeouts}");
                    match &bitmap {
                        None => {
                            self.issue_burst(txid, addr, delta_y, delta_x, num_pkts, region_size, content)?;
                        }
                        Some(map) => {
                            self.retransmit(txid, addr, delta_y, delta_x, region_size, content, map)?;
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn issue_burst(
        &self,
        txid: u32,
        addr: u32,
        delta_y: u16,
        delta_x: u16,
        num_pkts: u32,
        region_size: usize,
        content: &[u8],
    ) -> Result<()> {
        self.endpoint
            .send(&fastdata_in::encode_location(txid, addr, delta_y, delta_x, num_pkts))?;
        for seq in 0..num_pkts {
            self.endpoint
                .send(&fastdata_in::encode_seq(txid, seq, region_size, content)?)?;
        }
        self.endpoint.send(&fastdata_in::encode_tell(txid))?;
        Ok(())
    }

    fn retransmit(
        &self,
        txid: u32,
        addr: u32,
        delta_y: u16,
        delta_x: u16,
        region_size: usize,
        content: &[u8],
        bitmap: &[bool],
    ) -> Result<()> {
        let num_pkts = u32::try_from(bitmap.len()).unwrap_or(u32::MAX);
        self.endpoint
            .send(&fastdata_in::encode_location(txid, addr, delta_y, delta_x, num_pkts))?;
        for (seq, &missing) in bitmap.iter().enumerate() {
            if missing {
                self.endpoint.send(&fastdata_in::encode_seq(
                    txid,
                    seq as u32,
                    region_size,
                    content,
                )?)?;
            }
        }
        self.endpoint.send(&fastdata_in::encode_tell(txid))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransceiver;
    use std::net::UdpSocket;
    use std::thread;
    use std::time::Duration;

    fn config() -> Config {
        Config {
            throttle: Duration::from_micros(1),
            upload_receive_timeout: Duration::from_millis(200),
            upload_timeout_retry_limit: 3,
            very_small_write_threshold: 16,
            ..Config::default()
        }
    }

    #[test]
    fn small_write_bypasses_gatherer_protocol() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();
        let config = config();
        let endpoint = ThrottledEndpoint::connect(addr, &config).unwrap();
        let uploader = Uploader::new(&endpoint, &config);
        let xcvr = MockTransceiver::new();

        let content = vec![1u8, 2, 3];
        uploader
            .upload(&xcvr, ChipAddress::new(0, 0), 1, 0x7000_0000, 0, 0, &content)
            .unwrap();

        assert_eq!(xcvr.memory_at(ChipAddress::new(0, 0), 0x7000_0000), Some(content));
    }

    #[test]
    fn clean_burst_completes_on_first_finished_reply() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let server_addr = server.local_addr().unwrap();
        let config = config();
        let endpoint = ThrottledEndpoint::connect(server_addr, &config).unwrap();
        let uploader = Uploader::new(&endpoint, &config);
        let xcvr = MockTransceiver::new();

        let content = vec![0xAB; 600];
        let client_addr = server_addr;
        let txid: u32 = 5;

        let responder = thread::spawn(move || {
            let mut buf = [0u8; RECV_BUF_BYTES];
            let mut client_addr_seen = None;
            loop {
                let (n, from) = server.recv_from(&mut buf).unwrap();
                client_addr_seen = Some(from);
                let cmd = u32::from_le_bytes(buf[0..4].try_into().unwrap());
                if cmd == u32::from(crate::config::fast_data_in_cmd::SEND_TELL_DATA_IN) {
                    break;
                }
                let _ = n;
            }
            let mut reply = Vec::new();
            reply.extend_from_slice(&u32::from(crate::config::fast_data_in_cmd::RECEIVE_FINISHED_DATA_IN).to_le_bytes());
            reply.extend_from_slice(&txid.to_le_bytes());
            server.send_to(&reply, client_addr_seen.unwrap()).unwrap();
        });
        let _ = client_addr;

        uploader
            .upload(&xcvr, ChipAddress::new(0, 0), txid, 0x7000_0000, 0, 0, &content)
            .unwrap();

        responder.join().unwrap();
    }

    #[test]
    fn exhausts_retry_budget_when_nothing_replies() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();
        let config = config();
        let endpoint = ThrottledEndpoint::connect(addr, &config).unwrap();
        let uploader = Uploader::new(&endpoint, &config);
        let xcvr = MockTransceiver::new();

        let content = vec![0xCD; 600];
        let err = uploader
            .upload(&xcvr, ChipAddress::new(0, 0), 1, 0x7000_0000, 0, 0, &content)
            .unwrap_err();
        assert!(matches!(err, FdioError::TimeoutExhausted { .. }));
    }
}
