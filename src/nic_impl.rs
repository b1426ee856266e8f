//! Software loopback `NicPort`: the one concrete backend this binary
//! ships. Real hardware register access (mbuf pools, burst TX/RX, PTP
//! clock registers) is a collaborator contract, not something this crate
//! implements — a loopback pair stands in with a channel between its two
//! halves and the software wall-clock as its "hardware" timestamp, so
//! `send` can exercise the probe engine and RX hook end to end without a
//! DPDK-capable NIC.

use crossbeam_channel::{Receiver, Sender};

use trace_core::error::Result;
use trace_core::{clock, NicPort, Timestamp};

/// The transmit half of a loopback port pair. `ProbeEngine` owns one of
/// these per port.
pub struct LoopbackTxPort {
    mac: [u8; 6],
    tx: Sender<(Vec<u8>, Timestamp)>,
}

/// The receive half of a loopback port pair. `RxHook` owns one of these
/// per port.
pub struct LoopbackRxPort {
    mac: [u8; 6],
    rx: Receiver<(Vec<u8>, Timestamp)>,
}

/// Builds a connected TX/RX pair sharing one physical MAC, modeling one
/// port's latency queue as seen from its two independent callers.
pub fn loopback_pair(mac: [u8; 6]) -> (LoopbackTxPort, LoopbackRxPort) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (LoopbackTxPort { mac, tx }, LoopbackRxPort { mac, rx })
}

impl NicPort for LoopbackTxPort {
    fn send(&mut self, frame: &[u8]) -> Result<Timestamp> {
        let ts = clock::sample_wall_clock();
        // A disconnected receiver (hook thread already exited) is not a
        // NIC fault — the port simply has nowhere to deliver the frame.
        let _ = self.tx.send((frame.to_vec(), ts));
        Ok(ts)
    }

    fn recv_burst(&mut self, _out: &mut Vec<(Vec<u8>, Timestamp)>, _max: usize) -> Result<usize> {
        Ok(0)
    }

    fn mac_address(&self) -> [u8; 6] {
        self.mac
    }
}

impl NicPort for LoopbackRxPort {
    fn send(&mut self, frame: &[u8]) -> Result<Timestamp> {
        let ts = clock::sample_wall_clock();
        let _ = frame;
        Ok(ts)
    }

    fn recv_burst(&mut self, out: &mut Vec<(Vec<u8>, Timestamp)>, max: usize) -> Result<usize> {
        let mut n = 0;
        while n < max {
            match self.rx.try_recv() {
                Ok(item) => {
                    out.push(item);
                    n += 1;
                }
                Err(_) => break,
            }
        }
        Ok(n)
    }

    fn mac_address(&self) -> [u8; 6] {
        self.mac
    }
}
