//! Probe transmit engine (component E): periodically constructs and sends
//! a small PTP-shaped packet on a port, recording the send as an `HW_TX`
//! trace record.
//!
//! The timer loop here plays the role of the original's periodic
//! `rte_timer` callback, but driven by a plain sleeping thread rather than
//! a DPDK lcore poll loop — `NicPort` hides the transmit mechanics, so a
//! plain timer is all the engine itself needs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::nic::NicPort;
use crate::record::{Location, ProbePacket, TraceRecord};
use crate::trace_buffer;

/// Default probe send rate, matching the original's `PROBE_RATE_PER_SEC`.
pub const PROBE_RATE_PER_SEC: u64 = 10;

fn gettid() -> i32 {
    unsafe { libc::syscall(libc::SYS_gettid) as i32 }
}

/// Drives one port's probe traffic. One engine per port, matching the
/// original's `probe_ctl` array indexed by port id.
pub struct ProbeEngine<P: NicPort> {
    port: P,
    port_id: u32,
    dst_mac: [u8; 6],
    next_idx: u64,
}

impl<P: NicPort> ProbeEngine<P> {
    pub fn new(port: P, port_id: u32, dst_mac: [u8; 6]) -> Self {
        ProbeEngine {
            port,
            port_id,
            dst_mac,
            next_idx: 0,
        }
    }

    /// Constructs, sends, and records one probe packet. Returns the probe
    /// index that was sent.
    pub fn tick(&mut self) -> Result<u64> {
        let idx = self.next_idx;
        let pkt = ProbePacket {
            dst_mac: self.dst_mac,
            src_mac: self.port.mac_address(),
            probe_idx: idx,
            probe_sender: self.port_id,
        };
        let frame = pkt.encode();
        let timestamp = self.port.send(&frame)?;

        trace_buffer::record_local(TraceRecord {
            tid: gettid(),
            location: Location::HwTx as u8,
            probe_sender: self.port_id,
            probe_idx: idx,
            timestamp,
        });

        self.next_idx += 1;
        Ok(idx)
    }

    /// Runs `tick` at `rate_per_sec` until `running` is cleared. Sleeps
    /// between ticks rather than busy-polling, since the probe rate is
    /// low (tens of packets per second) and this is not a data-plane hot
    /// loop.
    pub fn run(mut self, rate_per_sec: u64, running: Arc<AtomicBool>) {
        let interval = Duration::from_secs_f64(1.0 / rate_per_sec.max(1) as f64);
        let mut next_fire = Instant::now() + interval;
        while running.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now < next_fire {
                std::thread::sleep(next_fire - now);
                continue;
            }
            if let Err(e) = self.tick() {
                tracing::warn!(port = self.port_id, error = %e, "probe: tick failed");
            }
            next_fire += interval;
        }
        trace_buffer::flush_local();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nic::MockNicPort;

    #[test]
    fn tick_sends_and_increments_index() {
        let port = MockNicPort::new([9, 9, 9, 9, 9, 9]);
        let mut engine = ProbeEngine::new(port, 3, [0xff; 6]);
        let i0 = engine.tick().unwrap();
        let i1 = engine.tick().unwrap();
        assert_eq!(i0, 0);
        assert_eq!(i1, 1);
        assert_eq!(engine.port.sent.len(), 2);
    }

    #[test]
    fn sent_frame_carries_configured_port_id() {
        let port = MockNicPort::new([1; 6]);
        let mut engine = ProbeEngine::new(port, 42, [2; 6]);
        engine.tick().unwrap();
        let sent = &engine.port.sent[0];
        let decoded = crate::record::ProbePacket::decode(sent).unwrap();
        assert_eq!(decoded.probe_sender, 42);
        assert_eq!(decoded.dst_mac, [2; 6]);
    }
}
