pub mod clock;
pub mod cuckoo;
pub mod error;
pub mod nic;
pub mod probe;
pub mod reassemble;
pub mod record;
pub mod ring;
pub mod rx_hook;
pub mod trace_buffer;

pub use cuckoo::CuckooHash;
pub use error::{Result, TraceError};
pub use nic::NicPort;
pub use probe::{ProbeEngine, PROBE_RATE_PER_SEC};
pub use reassemble::{reassemble, Reassembler};
pub use record::{Location, ProbePacket, RunHeader, Timestamp, TraceRecord};
pub use ring::{IndexRing, RingBuffer};
pub use rx_hook::RxHook;
