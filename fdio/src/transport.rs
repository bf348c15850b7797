// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Throttled UDP endpoint.
//!
//! Every send on one endpoint is spaced at least `Config::throttle` apart,
//! measured against a monotonic clock rather than wall time, so the
//! scheduler survives NTP adjustments mid-transfer. Receive is a bounded
//! wait; a missed deadline surfaces as `FdioError::Timeout`, never a panic
//! or a busy spin past the caller's budget.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};

use crate::adapters::Transceiver;
use crate::config::Config;
use crate::error::{FdioError, Result};

/// A UDP socket bound for one board's Fast Data-In/-Out traffic, rate
/// limited on send and bounded on receive.
pub struct ThrottledEndpoint {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    throttle: Duration,
    last_send: AtomicU64,
    epoch: Instant,
}

impl ThrottledEndpoint {
    /// Binds an ephemeral local UDP socket and connects it to `peer` so that
    /// every `send`/`recv` afterwards addresses that one board.
    pub fn connect(peer: SocketAddr, config: &Config) -> Result<Self> {
        let domain = if peer.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let raw = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        raw.set_reuse_address(true)?;
        let bind_addr: SocketAddr = if peer.is_ipv6() {
            "[::]:0".parse().unwrap()
        } else {
            "0.0.0.0:0".parse().unwrap()
        };
        raw.bind(&bind_addr.into())?;
        raw.set_nonblocking(false)?;

        let socket: UdpSocket = raw.into();
        socket.set_read_timeout(Some(config.upload_receive_timeout))?;
        socket.connect(peer)?;

        log::debug!(
            "[fdio/transport] endpoint bound local={:?} peer={} throttle={:?}",
            socket.local_addr(),
            peer,
            config.throttle
        );

        Ok(Self {
            socket: Arc::new(socket),
            peer,
            throttle: config.throttle,
            last_send: AtomicU64::new(0),
            epoch: Instant::now(),
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Sends `payload`, first waiting out whatever is left of the minimum
    /// inter-send gap since the previous send on this endpoint.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        self.wait_for_slot()?;
        self.socket.send(payload)?;
        Ok(())
    }

    fn wait_for_slot(&self) -> Result<()> {
        loop {
            let now_nanos = self.epoch.elapsed().as_nanos() as u64;
            let last = self.last_send.load(Ordering::Acquire);
            let earliest = last.saturating_add(self.throttle.as_nanos() as u64);
            if now_nanos >= earliest {
                if self
                    .last_send
                    .compare_exchange(last, now_nanos, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return Ok(());
                }
                continue;
            }
            let remaining = Duration::from_nanos(earliest - now_nanos);
            thread::sleep(remaining.min(self.throttle));
        }
    }

    /// Blocks up to `timeout` for one datagram, returning its bytes.
    pub fn recv_timeout(&self, timeout: Duration, buf: &mut [u8]) -> Result<usize> {
        self.socket.set_read_timeout(Some(timeout))?;
        match self.socket.recv(buf) {
            Ok(n) => Ok(n),
            Err(e) => Err(FdioError::from(e)),
        }
    }

    /// Reprograms the board's IP tag to point at this endpoint's local
    /// address, retrying with fixed backoff per `Config::ip_tag_reprogram_*`.
    pub fn reprogram_tag(&self, transceiver: &dyn Transceiver, tag: u8, config: &Config) -> Result<()> {
        let local = self.socket.local_addr().map_err(FdioError::from)?;
        let mut last_err = None;
        for attempt in 1..=config.ip_tag_reprogram_attempts {
            match transceiver.set_ip_tag(tag, local) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log::debug!("[fdio/transport] ip tag reprogram attempt {attempt} failed: {e}");
                    last_err = Some(e);
                    thread::sleep(config.ip_tag_reprogram_backoff);
                }
            }
        }
        Err(FdioError::ProtocolError(format!(
            "ip tag {tag} reprogram exhausted {} attempts: {}",
            config.ip_tag_reprogram_attempts,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Closes the endpoint after `Config::endpoint_close_grace`, letting any
    /// datagram already in flight to this socket drain before the OS frees
    /// the port.
    pub fn close(self, config: &Config) {
        let grace = config.endpoint_close_grace;
        let socket = self.socket;
        thread::spawn(move || {
            thread::sleep(grace);
            drop(socket);
        });
    }
}
