// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tunable knobs for the streaming protocols.
//!
//! Every timing/threshold magic number lives here as a `Config` field rather
//! than a `const` — the right value, starting with `throttle`, is
//! board-model-dependent, so it must be a runtime knob rather than baked in.

use std::time::Duration;

/// SDP payload capacity, in 32-bit words, of one UDP datagram on this
/// transport.
pub const SDP_PAYLOAD_WORDS: usize = 68;

/// Per-seq-packet header size in bytes (command + transaction-id + seq-num).
pub const SEQ_HEADER_BYTES: usize = 12;

/// Upload payload capacity per Seq packet, in bytes.
pub const UPLOAD_PAYLOAD_BYTES: usize = (SDP_PAYLOAD_WORDS - 3) * 4;

/// Download header words consumed by the monitor's seq|LAST_FLAG word.
pub const DOWNLOAD_HEADER_WORDS: usize = 1;

/// Download payload capacity per data packet, in bytes.
pub const DOWNLOAD_PAYLOAD_BYTES: usize = (SDP_PAYLOAD_WORDS - DOWNLOAD_HEADER_WORDS) * 4;

/// Sentinel meaning "every packet in the stream is missing".
pub const SENTINEL_ALL_MISSING: u32 = 0xFFFF_FFFE;

/// Sentinel marking the end of a missing-seq list.
pub const SENTINEL_END_OF_LIST: u32 = 0xFFFF_FFFF;

/// High bit of the download header word marking the last packet.
pub const LAST_FLAG: u32 = 0x8000_0000;

/// Magic value at word 0 of the pointer table.
pub const POINTER_TABLE_MAGIC: u32 = 0xAD13_0AD6;

/// Version value at word 1 of the pointer table.
pub const POINTER_TABLE_VERSION: u32 = 0x0001_0000;

/// Number of region slots per core.
pub const REGIONS_PER_CORE: usize = 32;

/// Pointer table size in bytes: 2 header words + 32 * 3 region words.
pub const POINTER_TABLE_BYTES: usize = (2 + REGIONS_PER_CORE * 3) * 4;

/// SDP command codes for the Fast Data-In family.
pub mod fast_data_in_cmd {
    pub const SEND_DATA_TO_LOCATION: u16 = 200;
    pub const SEND_SEQ_DATA: u16 = 2000;
    pub const SEND_TELL_DATA_IN: u16 = 2001;
    pub const RECEIVE_MISSING_SEQ_DATA_IN: u16 = 2002;
    pub const RECEIVE_FINISHED_DATA_IN: u16 = 2003;
}

/// SDP command codes for the Fast Data-Out family.
pub mod fast_data_out_cmd {
    pub const START_SENDING_DATA: u16 = 100;
    pub const START_MISSING_SEQS: u16 = 1000;
    pub const NEXT_MISSING_SEQS: u16 = 1001;
}

/// Runtime configuration for one streaming run.
///
/// Every timing/threshold knob here (e.g. `throttle`, nominally 35-50 µs) is
/// a field with a reasonable default, never a constant baked into the
/// protocol logic.
#[derive(Debug, Clone)]
pub struct Config {
    /// Minimum spacing between two sends on one throttled endpoint.
    pub throttle: Duration,

    /// Receive timeout for one AwaitReplies step of the uploader.
    pub upload_receive_timeout: Duration,

    /// Consecutive-timeout budget before the uploader fails with
    /// `TimeoutExhausted`.
    pub upload_timeout_retry_limit: u32,

    /// Receive timeout for one Receive step of the downloader.
    pub download_receive_timeout: Duration,

    /// Consecutive-timeout budget (with no packet ever received) before the
    /// downloader fails with `TimeoutExhausted`.
    pub download_timeout_retry_limit: u32,

    /// Spacing enforced between successive messages within one
    /// `RequestMissing` batch.
    pub delay_per_send: Duration,

    /// Writes smaller than this many bytes bypass the Fast Data-In protocol
    /// entirely and use an ordinary SCP memory write.
    pub very_small_write_threshold: usize,

    /// Downloads smaller than this many bytes are deferred past monitor
    /// teardown and served by a direct SCP read.
    pub small_retrieve_threshold: usize,

    /// Maximum boards processed concurrently by the scheduler.
    pub parallel_size: usize,

    /// Maximum attempts for a single IP-tag reprogram call.
    pub ip_tag_reprogram_attempts: u32,

    /// Fixed backoff between IP-tag reprogram attempts.
    pub ip_tag_reprogram_backoff: Duration,

    /// Grace period before a closed endpoint's socket is actually dropped.
    pub endpoint_close_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            throttle: Duration::from_nanos(40_000),
            upload_receive_timeout: Duration::from_secs(2),
            upload_timeout_retry_limit: 100,
            download_receive_timeout: Duration::from_secs(2),
            download_timeout_retry_limit: 20,
            delay_per_send: Duration::from_millis(10),
            very_small_write_threshold: 256,
            small_retrieve_threshold: 256,
            parallel_size: 4,
            ip_tag_reprogram_attempts: 3,
            ip_tag_reprogram_backoff: Duration::from_millis(100),
            endpoint_close_grace: Duration::from_secs(1),
        }
    }
}
