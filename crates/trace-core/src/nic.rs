//! Contract a network interface must satisfy to drive the probe engine (E)
//! and RX hook (F). Real hardware-timestamping NICs and their register
//! layouts are out of scope here; this crate only needs something that can
//! transmit and receive bursts and report a per-packet timestamp alongside
//! each one.

use crate::error::Result;
use crate::record::Timestamp;

/// One NIC port, capable of sending and receiving bursts of raw Ethernet
/// frames with a hardware (or software-fallback) timestamp per frame.
///
/// Implementations are expected to be used from a single thread at a time;
/// the probe engine (E) and RX hook (F) each own one port and never share
/// it.
pub trait NicPort: Send {
    /// Transmits `frame` and returns the timestamp the port latched for it
    /// (`HW_TX`, §4.E). A software-only port should still return some
    /// timestamp — typically `Timestamp::Cycles` sampled just before the
    /// send — rather than erroring, matching the original's soft fallback.
    fn send(&mut self, frame: &[u8]) -> Result<Timestamp>;

    /// Polls for received frames, appending up to `max` of them (with their
    /// `HW_RX` timestamps) to `out`. Returns the number of frames received.
    /// A port with nothing ready returns `Ok(0)` rather than blocking.
    fn recv_burst(&mut self, out: &mut Vec<(Vec<u8>, Timestamp)>, max: usize) -> Result<usize>;

    /// This port's own MAC address, used to fill in `src_mac` when
    /// constructing outgoing probe packets.
    fn mac_address(&self) -> [u8; 6];
}

#[cfg(test)]
pub(crate) struct MockNicPort {
    mac: [u8; 6],
    next_cycles: u64,
    inbox: std::collections::VecDeque<(Vec<u8>, Timestamp)>,
    pub sent: Vec<Vec<u8>>,
}

#[cfg(test)]
impl MockNicPort {
    pub fn new(mac: [u8; 6]) -> Self {
        MockNicPort {
            mac,
            next_cycles: 1,
            inbox: std::collections::VecDeque::new(),
            sent: Vec::new(),
        }
    }

    /// Queues a frame (with its simulated `HW_RX` timestamp) for the next
    /// `recv_burst` call to pick up.
    pub fn queue_rx(&mut self, frame: Vec<u8>, ts: Timestamp) {
        self.inbox.push_back((frame, ts));
    }
}

#[cfg(test)]
impl NicPort for MockNicPort {
    fn send(&mut self, frame: &[u8]) -> Result<Timestamp> {
        self.sent.push(frame.to_vec());
        let ts = Timestamp::Cycles(self.next_cycles);
        self.next_cycles += 1;
        Ok(ts)
    }

    fn recv_burst(&mut self, out: &mut Vec<(Vec<u8>, Timestamp)>, max: usize) -> Result<usize> {
        let mut n = 0;
        while n < max {
            match self.inbox.pop_front() {
                Some(item) => {
                    out.push(item);
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn mac_address(&self) -> [u8; 6] {
        self.mac
    }
}
