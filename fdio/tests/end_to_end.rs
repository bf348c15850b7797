// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end scenarios exercising the uploader and downloader against an
//! in-process UDP peer standing in for a gatherer or extra monitor.

use std::net::UdpSocket;
use std::thread;
use std::time::Duration;

use fdio::adapters::{MockTransceiver, Transceiver};
use fdio::codec::fastdata_in;
use fdio::config::{fast_data_in_cmd, Config, LAST_FLAG};
use fdio::download::Downloader;
use fdio::error::FdioError;
use fdio::transport::ThrottledEndpoint;
use fdio::types::ChipAddress;
use fdio::upload::Uploader;

fn upload_config() -> Config {
    Config {
        throttle: Duration::from_micros(1),
        upload_receive_timeout: Duration::from_millis(300),
        upload_timeout_retry_limit: 5,
        very_small_write_threshold: 0,
        ..Config::default()
    }
}

fn download_config() -> Config {
    Config {
        download_receive_timeout: Duration::from_millis(300),
        download_timeout_retry_limit: 5,
        delay_per_send: Duration::from_millis(1),
        small_retrieve_threshold: 0,
        ..Config::default()
    }
}

/// Uploads 1024 bytes, NACKs two packets partway through, and confirms the
/// retransmit lands before the transfer finishes.
#[test]
fn upload_1024_bytes_with_targeted_nack_then_finish() {
    let gatherer = UdpSocket::bind("127.0.0.1:0").unwrap();
    let gatherer_addr = gatherer.local_addr().unwrap();
    let config = upload_config();
    let endpoint = ThrottledEndpoint::connect(gatherer_addr, &config).unwrap();
    let uploader = Uploader::new(&endpoint, &config);
    let xcvr = MockTransceiver::new();

    let content: Vec<u8> = (0..1024u32).map(|b| (b % 251) as u8).collect();
    let txid = 1u32;
    let num_pkts = fastdata_in::num_packets(content.len());

    let responder = thread::spawn(move || {
        let mut buf = [0u8; 512];
        let mut client = None;
        let mut first_burst_seqs = Vec::new();
        loop {
            let (n, from) = gatherer.recv_from(&mut buf).unwrap();
            client = Some(from);
            let cmd = u32::from_le_bytes(buf[0..4].try_into().unwrap());
            if cmd == u32::from(fast_data_in_cmd::SEND_SEQ_DATA) {
                let seq = u32::from_le_bytes(buf[8..12].try_into().unwrap());
                first_burst_seqs.push(seq);
            }
            if cmd == u32::from(fast_data_in_cmd::SEND_TELL_DATA_IN) {
                break;
            }
            let _ = n;
        }
        assert_eq!(first_burst_seqs.len(), num_pkts as usize);

        let client = client.unwrap();
        let mut missing = Vec::new();
        missing.extend_from_slice(&u32::from(fast_data_in_cmd::RECEIVE_MISSING_SEQ_DATA_IN).to_le_bytes());
        missing.extend_from_slice(&txid.to_le_bytes());
        missing.extend_from_slice(&1u32.to_le_bytes());
        missing.extend_from_slice(&2u32.to_le_bytes());
        missing.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        gatherer.send_to(&missing, client).unwrap();

        let mut retransmitted_seqs = Vec::new();
        loop {
            let (_, _) = gatherer.recv_from(&mut buf).unwrap();
            let cmd = u32::from_le_bytes(buf[0..4].try_into().unwrap());
            if cmd == u32::from(fast_data_in_cmd::SEND_SEQ_DATA) {
                let seq = u32::from_le_bytes(buf[8..12].try_into().unwrap());
                retransmitted_seqs.push(seq);
            }
            if cmd == u32::from(fast_data_in_cmd::SEND_TELL_DATA_IN) {
                break;
            }
        }
        assert_eq!(retransmitted_seqs, vec![1, 2]);

        let mut finished = Vec::new();
        finished.extend_from_slice(&u32::from(fast_data_in_cmd::RECEIVE_FINISHED_DATA_IN).to_le_bytes());
        finished.extend_from_slice(&txid.to_le_bytes());
        gatherer.send_to(&finished, client).unwrap();
    });

    uploader
        .upload(&xcvr, ChipAddress::new(0, 0), txid, 0x7000_0000, 0, 0, &content)
        .unwrap();

    responder.join().unwrap();
}

/// The "all missing" sentinel causes every packet to be resent exactly once.
#[test]
fn upload_all_missing_sentinel_resends_every_packet() {
    let gatherer = UdpSocket::bind("127.0.0.1:0").unwrap();
    let gatherer_addr = gatherer.local_addr().unwrap();
    let config = upload_config();
    let endpoint = ThrottledEndpoint::connect(gatherer_addr, &config).unwrap();
    let uploader = Uploader::new(&endpoint, &config);
    let xcvr = MockTransceiver::new();

    let content = vec![0x42u8; 600];
    let txid = 2u32;
    let num_pkts = fastdata_in::num_packets(content.len());

    let responder = thread::spawn(move || {
        let mut buf = [0u8; 512];
        let mut client = None;
        loop {
            let (_, from) = gatherer.recv_from(&mut buf).unwrap();
            client = Some(from);
            let cmd = u32::from_le_bytes(buf[0..4].try_into().unwrap());
            if cmd == u32::from(fast_data_in_cmd::SEND_TELL_DATA_IN) {
                break;
            }
        }
        let client = client.unwrap();

        let mut all_missing = Vec::new();
        all_missing.extend_from_slice(&u32::from(fast_data_in_cmd::RECEIVE_MISSING_SEQ_DATA_IN).to_le_bytes());
        all_missing.extend_from_slice(&txid.to_le_bytes());
        all_missing.extend_from_slice(&0xFFFF_FFFEu32.to_le_bytes());
        all_missing.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        gatherer.send_to(&all_missing, client).unwrap();

        let mut resent = Vec::new();
        loop {
            let (_, _) = gatherer.recv_from(&mut buf).unwrap();
            let cmd = u32::from_le_bytes(buf[0..4].try_into().unwrap());
            if cmd == u32::from(fast_data_in_cmd::SEND_SEQ_DATA) {
                resent.push(u32::from_le_bytes(buf[8..12].try_into().unwrap()));
            }
            if cmd == u32::from(fast_data_in_cmd::SEND_TELL_DATA_IN) {
                break;
            }
        }
        assert_eq!(resent.len(), num_pkts as usize);

        let mut finished = Vec::new();
        finished.extend_from_slice(&u32::from(fast_data_in_cmd::RECEIVE_FINISHED_DATA_IN).to_le_bytes());
        finished.extend_from_slice(&txid.to_le_bytes());
        gatherer.send_to(&finished, client).unwrap();
    });

    uploader
        .upload(&xcvr, ChipAddress::new(0, 0), txid, 0x7000_0000, 0, 0, &content)
        .unwrap();

    responder.join().unwrap();
}

/// Downloads 600 bytes while the monitor drops packet 1; the downloader
/// requests and receives it, and the final buffer matches the source.
#[test]
fn download_600_bytes_with_dropped_packet_one() {
    let monitor = UdpSocket::bind("127.0.0.1:0").unwrap();
    let monitor_addr = monitor.local_addr().unwrap();
    let config = download_config();
    let endpoint = ThrottledEndpoint::connect(monitor_addr, &config).unwrap();
    let downloader = Downloader::new(&endpoint, &config);
    let xcvr = MockTransceiver::new();

    let w = fdio::config::DOWNLOAD_PAYLOAD_BYTES;
    let source: Vec<u8> = (0..600u32).map(|b| (b % 256) as u8).collect();
    let txid = 3u32;

    let source_for_monitor = source.clone();
    let responder = thread::spawn(move || {
        let mut buf = [0u8; 512];
        let (_, client) = monitor.recv_from(&mut buf).unwrap();

        let send_packet = |seq: u32, last: bool| {
            let offset = seq as usize * w;
            let end = (offset + w).min(source_for_monitor.len());
            let payload = if offset < source_for_monitor.len() {
                &source_for_monitor[offset..end]
            } else {
                &[][..]
            };
            let mut pkt = Vec::with_capacity(4 + payload.len());
            let header = if last { seq | LAST_FLAG } else { seq };
            pkt.extend_from_slice(&header.to_le_bytes());
            pkt.extend_from_slice(payload);
            monitor.send_to(&pkt, client).unwrap();
        };

        send_packet(0, false);
        send_packet(2, true);

        let mut missing_req = [0u8; 512];
        let (n, _) = monitor.recv_from(&mut missing_req).unwrap();
        let cmd = u32::from_le_bytes(missing_req[0..4].try_into().unwrap());
        assert_eq!(cmd, 1000, "expected a First-Missing request");
        let seq = u32::from_le_bytes(missing_req[12..16].try_into().unwrap());
        assert_eq!(seq, 1);
        let _ = n;

        send_packet(1, false);
    });

    let result = downloader.download(&xcvr, ChipAddress::new(0, 0), txid, 0x7000_0000, source.len()).unwrap();
    assert_eq!(result, source);

    responder.join().unwrap();
}

/// A mid-upload fault must leave monitor reinjection state exactly as it was
/// at entry once the board task unwinds.
#[test]
fn router_timeout_teardown_restores_reinjection_status() {
    use fdio::adapters::{ReinjectionStatus, ReinjectionTypes};
    use fdio::types::CoreAddress;

    let xcvr = MockTransceiver::new();
    let monitor = CoreAddress::new(0, 0, 1);
    let original = ReinjectionStatus {
        timeout_ms: 16,
        emergency_timeout_ms: 1,
        packet_types: ReinjectionTypes {
            multicast: true,
            point_to_point: true,
            fixed_route: true,
            nearest_neighbour: true,
        },
    };
    xcvr.seed_reinjection(monitor, original);

    let captured = xcvr.get_reinjection_status(monitor).unwrap();
    xcvr.set_reinjection_timeout(&[monitor], 0xFFFF_FFFF).unwrap();
    xcvr.set_reinjection_emergency_timeout(&[monitor], 0xFFFF_FFFF).unwrap();

    xcvr.set_reinjection_timeout(&[monitor], captured.timeout_ms).unwrap();
    xcvr.set_reinjection_emergency_timeout(&[monitor], captured.emergency_timeout_ms)
        .unwrap();
    xcvr.set_reinjection_types(&[monitor], captured.packet_types).unwrap();

    let restored = xcvr.get_reinjection_status(monitor).unwrap();
    assert_eq!(restored, original);
}

#[test]
fn uploader_timeout_exhausted_is_distinguishable_from_protocol_error() {
    let gatherer = UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr = gatherer.local_addr().unwrap();
    let config = Config {
        upload_receive_timeout: Duration::from_millis(50),
        upload_timeout_retry_limit: 1,
        very_small_write_threshold: 0,
        ..Config::default()
    };
    let endpoint = ThrottledEndpoint::connect(addr, &config).unwrap();
    let uploader = Uploader::new(&endpoint, &config);
    let xcvr = MockTransceiver::new();

    let err = uploader
        .upload(&xcvr, ChipAddress::new(0, 0), 1, 0x7000_0000, 0, 0, &vec![1u8; 600])
        .unwrap_err();
    assert!(matches!(err, FdioError::TimeoutExhausted { .. }));
}
