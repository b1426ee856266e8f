//! Wire and disk formats: the 60-byte probe packet, the tagged timestamp,
//! and the fixed-size on-disk trace record. Encoding follows fixed byte
//! offsets with `from_le_bytes`/`to_le_bytes`, the same manual-offset idiom
//! used elsewhere in this codebase for packed wire formats rather than a
//! derive-macro crate.

use crate::error::{Result, TraceError};

/// EtherType identifying a probe packet as PTP, the signal the NIC uses to
/// decide whether to latch a hardware timestamp.
pub const PROBE_ETHER_TYPE: u16 = 0x88F7;
/// Fixed PTP message id carried by every probe packet.
pub const PROBE_PTP_MSG: u8 = 0x00;
/// Fixed PTP version carried by every probe packet.
pub const PROBE_PTP_VERSION: u8 = 0x02;
/// Sentinel distinguishing a probe packet from ordinary PTP traffic.
pub const PROBE_MAGIC: u32 = 0x1234_5678;
/// Total length of a probe packet on the wire.
pub const PROBE_PKT_LEN: usize = 60;

const DST_MAC_OFF: usize = 0;
const SRC_MAC_OFF: usize = 6;
const ETHER_TYPE_OFF: usize = 12;
const PTP_MSG_OFF: usize = 14;
const PTP_VERSION_OFF: usize = 15;
const PROBE_IDX_OFF: usize = 16;
const PROBE_SENDER_OFF: usize = 24;
const PROBE_MAGIC_OFF: usize = 28;

/// Observation points a trace record can be taken at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Location {
    HwTx = 0,
    HwRx = 1,
    SwTx = 2,
    SwRx = 3,
}

impl Location {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Location::HwTx),
            1 => Some(Location::HwRx),
            2 => Some(Location::SwTx),
            3 => Some(Location::SwRx),
            _ => None,
        }
    }
}

/// A fully constructed probe packet, packed little-endian per §3.
#[derive(Debug, Clone, Copy)]
pub struct ProbePacket {
    pub dst_mac: [u8; 6],
    pub src_mac: [u8; 6],
    pub probe_idx: u64,
    pub probe_sender: u32,
}

impl ProbePacket {
    pub fn encode(&self) -> [u8; PROBE_PKT_LEN] {
        let mut buf = [0u8; PROBE_PKT_LEN];
        buf[DST_MAC_OFF..DST_MAC_OFF + 6].copy_from_slice(&self.dst_mac);
        buf[SRC_MAC_OFF..SRC_MAC_OFF + 6].copy_from_slice(&self.src_mac);
        buf[ETHER_TYPE_OFF..ETHER_TYPE_OFF + 2].copy_from_slice(&PROBE_ETHER_TYPE.to_be_bytes());
        buf[PTP_MSG_OFF] = PROBE_PTP_MSG;
        buf[PTP_VERSION_OFF] = PROBE_PTP_VERSION;
        buf[PROBE_IDX_OFF..PROBE_IDX_OFF + 8].copy_from_slice(&self.probe_idx.to_le_bytes());
        buf[PROBE_SENDER_OFF..PROBE_SENDER_OFF + 4]
            .copy_from_slice(&self.probe_sender.to_le_bytes());
        buf[PROBE_MAGIC_OFF..PROBE_MAGIC_OFF + 4].copy_from_slice(&PROBE_MAGIC.to_le_bytes());
        buf
    }

    /// Returns `true` if `buf` carries the PTP EtherType a NIC would latch
    /// a hardware timestamp against. Used by the RX hook (F) and by
    /// `trace_hw_tx_prepare`'s equivalent in the TX engine (E).
    pub fn is_probe_ethertype(buf: &[u8]) -> bool {
        buf.len() >= PROBE_PKT_LEN
            && u16::from_be_bytes([buf[ETHER_TYPE_OFF], buf[ETHER_TYPE_OFF + 1]])
                == PROBE_ETHER_TYPE
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < PROBE_PKT_LEN {
            return Err(TraceError::bad_format("probe packet shorter than 60 bytes"));
        }
        if !Self::is_probe_ethertype(buf) {
            return Err(TraceError::bad_format("ether type is not PTP"));
        }
        let probe_idx = u64::from_le_bytes(buf[PROBE_IDX_OFF..PROBE_IDX_OFF + 8].try_into().unwrap());
        let probe_sender =
            u32::from_le_bytes(buf[PROBE_SENDER_OFF..PROBE_SENDER_OFF + 4].try_into().unwrap());
        let magic =
            u32::from_le_bytes(buf[PROBE_MAGIC_OFF..PROBE_MAGIC_OFF + 4].try_into().unwrap());
        if magic != PROBE_MAGIC {
            return Err(TraceError::bad_format("probe magic mismatch"));
        }
        let mut dst_mac = [0u8; 6];
        dst_mac.copy_from_slice(&buf[DST_MAC_OFF..DST_MAC_OFF + 6]);
        let mut src_mac = [0u8; 6];
        src_mac.copy_from_slice(&buf[SRC_MAC_OFF..SRC_MAC_OFF + 6]);
        Ok(ProbePacket {
            dst_mac,
            src_mac,
            probe_idx,
            probe_sender,
        })
    }
}

/// A timestamp tagged by its clock source (§3, §4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamp {
    /// Raw TSC cycle count.
    Cycles(u64),
    /// Seconds + nanoseconds read from the NIC's PTP clock.
    Timespec { sec: i64, nsec: i64 },
}

const TS_CYCLES_TAG: u8 = 0;
const TS_TIMESPEC_TAG: u8 = 1;

impl Timestamp {
    fn encode(&self, buf: &mut [u8; 17]) {
        match *self {
            Timestamp::Cycles(cycles) => {
                buf[0] = TS_CYCLES_TAG;
                buf[1..9].copy_from_slice(&cycles.to_le_bytes());
                buf[9..17].fill(0);
            }
            Timestamp::Timespec { sec, nsec } => {
                buf[0] = TS_TIMESPEC_TAG;
                buf[1..9].copy_from_slice(&sec.to_le_bytes());
                buf[9..17].copy_from_slice(&nsec.to_le_bytes());
            }
        }
    }

    fn decode(buf: &[u8; 17]) -> Result<Self> {
        match buf[0] {
            TS_CYCLES_TAG => {
                let cycles = u64::from_le_bytes(buf[1..9].try_into().unwrap());
                Ok(Timestamp::Cycles(cycles))
            }
            TS_TIMESPEC_TAG => {
                let sec = i64::from_le_bytes(buf[1..9].try_into().unwrap());
                let nsec = i64::from_le_bytes(buf[9..17].try_into().unwrap());
                Ok(Timestamp::Timespec { sec, nsec })
            }
            other => Err(TraceError::bad_format(format!("unknown timestamp tag {other}"))),
        }
    }

    /// Converts to nanoseconds per §4.H. `cpu_hz` is only consulted for the
    /// `Cycles` variant.
    pub fn to_nanos(&self, cpu_hz: u64) -> u64 {
        match *self {
            Timestamp::Cycles(cycles) => {
                if cpu_hz == 0 {
                    0
                } else {
                    (cycles as u128 * 1_000_000_000u128 / cpu_hz as u128) as u64
                }
            }
            Timestamp::Timespec { sec, nsec } => (sec * 1_000_000_000 + nsec) as u64,
        }
    }
}

/// Fixed-size on-disk trace record (§3, §4.C).
///
/// Layout: tid(i32) | location(u8) | probe_sender(u32) | probe_idx(u64) |
/// timestamp tag(u8) + 16 bytes payload. No framing, no length prefix —
/// `file_size % RECORD_LEN == 0` is an on-disk invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceRecord {
    pub tid: i32,
    pub location: u8,
    pub probe_sender: u32,
    pub probe_idx: u64,
    pub timestamp: Timestamp,
}

pub const RECORD_LEN: usize = 4 + 1 + 4 + 8 + 17;

const TID_OFF: usize = 0;
const LOC_OFF: usize = 4;
const SENDER_OFF: usize = 5;
const IDX_OFF: usize = 9;
const TS_OFF: usize = 17;

impl TraceRecord {
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut buf = [0u8; RECORD_LEN];
        buf[TID_OFF..TID_OFF + 4].copy_from_slice(&self.tid.to_le_bytes());
        buf[LOC_OFF] = self.location;
        buf[SENDER_OFF..SENDER_OFF + 4].copy_from_slice(&self.probe_sender.to_le_bytes());
        buf[IDX_OFF..IDX_OFF + 8].copy_from_slice(&self.probe_idx.to_le_bytes());
        let mut ts_buf = [0u8; 17];
        self.timestamp.encode(&mut ts_buf);
        buf[TS_OFF..TS_OFF + 17].copy_from_slice(&ts_buf);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < RECORD_LEN {
            return Err(TraceError::bad_format(format!(
                "short record: {} of {RECORD_LEN} bytes",
                buf.len()
            )));
        }
        let tid = i32::from_le_bytes(buf[TID_OFF..TID_OFF + 4].try_into().unwrap());
        let location = buf[LOC_OFF];
        let probe_sender = u32::from_le_bytes(buf[SENDER_OFF..SENDER_OFF + 4].try_into().unwrap());
        let probe_idx = u64::from_le_bytes(buf[IDX_OFF..IDX_OFF + 8].try_into().unwrap());
        let ts_buf: [u8; 17] = buf[TS_OFF..TS_OFF + 17].try_into().unwrap();
        let timestamp = Timestamp::decode(&ts_buf)?;
        Ok(TraceRecord {
            tid,
            location,
            probe_sender,
            probe_idx,
            timestamp,
        })
    }
}

/// Per-run metadata record prepended once to the first trace file a run
/// creates (SPEC_FULL.md §3/§9, Decision 2): carries the TSC frequency the
/// tracing host measured so the offline analyzer can convert `Cycles`
/// timestamps without an out-of-band CLI argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunHeader {
    pub cpu_hz: u64,
    pub format_version: u32,
}

pub const RUN_HEADER_LEN: usize = 16;
pub const RUN_HEADER_MAGIC: u32 = 0x5054_4843; // "PTHC"

impl RunHeader {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn encode(&self) -> [u8; RUN_HEADER_LEN] {
        let mut buf = [0u8; RUN_HEADER_LEN];
        buf[0..4].copy_from_slice(&RUN_HEADER_MAGIC.to_le_bytes());
        buf[4..12].copy_from_slice(&self.cpu_hz.to_le_bytes());
        buf[12..16].copy_from_slice(&self.format_version.to_le_bytes());
        buf
    }

    /// Returns `Some(header)` if `buf` starts with a run header, `None` if
    /// the bytes belong to a plain trace record instead (older files, or
    /// thread files that are not the first one written in a run).
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < RUN_HEADER_LEN {
            return None;
        }
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != RUN_HEADER_MAGIC {
            return None;
        }
        let cpu_hz = u64::from_le_bytes(buf[4..12].try_into().unwrap());
        let format_version = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        Some(RunHeader {
            cpu_hz,
            format_version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_packet_roundtrip() {
        let pkt = ProbePacket {
            dst_mac: [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff],
            src_mac: [1, 2, 3, 4, 5, 6],
            probe_idx: 42,
            probe_sender: 2,
        };
        let buf = pkt.encode();
        assert_eq!(buf.len(), PROBE_PKT_LEN);
        assert!(ProbePacket::is_probe_ethertype(&buf));
        let decoded = ProbePacket::decode(&buf).unwrap();
        assert_eq!(decoded.probe_idx, 42);
        assert_eq!(decoded.probe_sender, 2);
        assert_eq!(decoded.dst_mac, pkt.dst_mac);
    }

    #[test]
    fn rejects_wrong_ethertype() {
        let mut buf = [0u8; PROBE_PKT_LEN];
        buf[ETHER_TYPE_OFF] = 0x08;
        buf[ETHER_TYPE_OFF + 1] = 0x00;
        assert!(ProbePacket::decode(&buf).is_err());
    }

    #[test]
    fn trace_record_roundtrip_timespec() {
        let rec = TraceRecord {
            tid: 7,
            location: Location::HwTx as u8,
            probe_sender: 2,
            probe_idx: 42,
            timestamp: Timestamp::Timespec {
                sec: 1,
                nsec: 500_000_000,
            },
        };
        let buf = rec.encode();
        let decoded = TraceRecord::decode(&buf).unwrap();
        assert_eq!(decoded, rec);
        assert_eq!(decoded.timestamp.to_nanos(0), 1_500_000_000);
    }

    #[test]
    fn trace_record_roundtrip_cycles() {
        let rec = TraceRecord {
            tid: 1,
            location: Location::SwRx as u8,
            probe_sender: 0,
            probe_idx: 1,
            timestamp: Timestamp::Cycles(3_000_000_000),
        };
        let buf = rec.encode();
        let decoded = TraceRecord::decode(&buf).unwrap();
        assert_eq!(decoded, rec);
        assert_eq!(decoded.timestamp.to_nanos(3_000_000_000), 1_000_000_000);
    }

    #[test]
    fn short_buffer_is_bad_format() {
        let buf = [0u8; RECORD_LEN - 1];
        assert!(TraceRecord::decode(&buf).is_err());
    }

    #[test]
    fn run_header_roundtrip_and_not_confused_with_record() {
        let hdr = RunHeader {
            cpu_hz: 2_400_000_000,
            format_version: RunHeader::CURRENT_VERSION,
        };
        let buf = hdr.encode();
        assert_eq!(RunHeader::decode(&buf), Some(hdr));

        // a plain trace record's first bytes are a thread id and almost
        // never collide with the header magic
        let rec = TraceRecord {
            tid: 7,
            location: 0,
            probe_sender: 2,
            probe_idx: 42,
            timestamp: Timestamp::Cycles(1),
        };
        assert_eq!(RunHeader::decode(&rec.encode()), None);
    }
}
