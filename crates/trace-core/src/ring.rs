//! Single-producer/single-consumer byte ring buffer over a power-of-two
//! region, backed by an mmap'd allocation.
//!
//! `put` reserves space with a CAS loop on `write_pos`, copies bytes (with
//! wraparound split), then CAS-publishes `finish_pos`. `get` reads the
//! published frontier and copies out what's available. Both sides are
//! lock-free; correctness depends on there being exactly one producer and
//! one consumer.

use std::sync::atomic::{AtomicUsize, Ordering};

use memmap2::MmapMut;

use crate::error::{Result, TraceError};

fn roundup_pow2(n: usize) -> usize {
    if n == 0 {
        return 1;
    }
    n.next_power_of_two()
}

/// An SPSC byte ring. Usable capacity is `size - 1` bytes; the ring never
/// lets `write_pos` catch up to `read_pos` so "empty" and "full" stay
/// distinguishable without a separate count.
pub struct RingBuffer {
    mask: usize,
    data: MmapMut,
    read_pos: AtomicUsize,
    write_pos: AtomicUsize,
    finish_pos: AtomicUsize,
}

impl RingBuffer {
    /// Creates a new ring with at least `size` bytes of capacity, backed by
    /// an anonymous mmap. The requested size is rounded up to a power of
    /// two, matching the original's `__roundup_2`.
    pub fn create(size: usize) -> Result<Self> {
        let size = roundup_pow2(size.max(1));
        let data = MmapMut::map_anon(size)
            .map_err(|e| TraceError::OutOfMemory(format!("mmap anon {size} bytes: {e}")))?;
        Ok(RingBuffer {
            mask: size - 1,
            data,
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
            finish_pos: AtomicUsize::new(0),
        })
    }

    /// Size of the backing region in bytes (a power of two).
    pub fn size(&self) -> usize {
        self.mask + 1
    }

    fn rest_size(&self, write_pos: usize, read_pos: usize) -> usize {
        if write_pos == read_pos {
            return self.size();
        }
        let used = write_pos.wrapping_sub(read_pos) & self.mask;
        self.size() - used
    }

    fn used_size(&self, write_pos: usize, read_pos: usize) -> usize {
        if write_pos == read_pos {
            return 0;
        }
        write_pos.wrapping_sub(read_pos) & self.mask
    }

    /// Reserves and writes `buf.len()` bytes. Returns the number of bytes
    /// written — either `buf.len()` or `0` (no partial writes; a ring with
    /// insufficient free space drops the whole item).
    pub fn put(&self, buf: &[u8]) -> usize {
        let len = buf.len();
        if len == 0 {
            return 0;
        }

        let write_old;
        let write_new;
        loop {
            let old = self.write_pos.load(Ordering::Relaxed);
            let read = self.read_pos.load(Ordering::Acquire);
            let free = self.rest_size(old, read);
            if free <= len {
                tracing::warn!(len, free, "ring: ring is full, drop item");
                return 0;
            }
            let new = old.wrapping_add(len) & self.mask;
            if self
                .write_pos
                .compare_exchange(old, new, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                write_old = old;
                write_new = new;
                break;
            }
        }

        // Safety: write_old..write_old+len (mod size) is exclusively ours —
        // no other producer can have reserved an overlapping range, and the
        // consumer never reads past `finish_pos`, which we haven't advanced
        // yet.
        let data = self.data_ptr();
        let first = (self.size() - (write_old & self.mask)).min(len);
        unsafe {
            std::ptr::copy_nonoverlapping(
                buf.as_ptr(),
                data.add(write_old & self.mask),
                first,
            );
            if len > first {
                std::ptr::copy_nonoverlapping(buf.as_ptr().add(first), data, len - first);
            }
        }

        // Publish. Single-producer use collapses this CAS loop to a single
        // store, but we keep the loop to preserve the multi-producer
        // generalization the original documents.
        while self
            .finish_pos
            .compare_exchange(write_old, write_new, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }

        len
    }

    /// Copies up to `buf.len()` bytes already published into `buf`. Returns
    /// the number of bytes copied, `0` if nothing is available.
    pub fn get(&self, buf: &mut [u8]) -> usize {
        let write_local = self.finish_pos.load(Ordering::Acquire);
        let read_old = self.read_pos.load(Ordering::Relaxed);
        let size = self.used_size(write_local, read_old).min(buf.len());
        if size == 0 {
            return 0;
        }

        let data = self.data_ptr();
        let first = (self.size() - (read_old & self.mask)).min(size);
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.add(read_old & self.mask),
                buf.as_mut_ptr(),
                first,
            );
            if size > first {
                std::ptr::copy_nonoverlapping(data, buf.as_mut_ptr().add(first), size - first);
            }
        }

        self.read_pos
            .store(read_old.wrapping_add(size) & self.mask, Ordering::Release);
        size
    }

    fn data_ptr(&self) -> *mut u8 {
        self.data.as_ptr() as *mut u8
    }
}

// SAFETY: RingBuffer is designed for exactly one producer thread calling
// `put` and exactly one consumer thread calling `get`; the atomics provide
// the cross-thread publication the original gets from its CAS loops. The
// mmap region is never resized after construction.
unsafe impl Sync for RingBuffer {}
unsafe impl Send for RingBuffer {}

/// A u32 specialization used by the cuckoo index's free-slot ring (§4.B)
/// and by the reassembler's free-slab ring (§4.G).
pub struct IndexRing {
    inner: RingBuffer,
}

impl IndexRing {
    pub fn create(entries: usize) -> Result<Self> {
        // The backing ring always keeps one byte unusable to distinguish
        // full from empty (see `RingBuffer`'s doc comment), so request
        // room for one extra slot — otherwise a caller asking for exactly
        // `entries` capacity would get only `entries - 1` usable slots
        // whenever `entries * 4` happens to already be a power of two.
        let bytes_needed = entries.saturating_add(1).saturating_mul(4);
        Ok(IndexRing {
            inner: RingBuffer::create(bytes_needed.max(4 * std::mem::size_of::<u32>()))?,
        })
    }

    pub fn put(&self, value: u32) -> bool {
        self.inner.put(&value.to_ne_bytes()) == 4
    }

    pub fn get(&self) -> Option<u32> {
        let mut buf = [0u8; 4];
        if self.inner.get(&mut buf) == 4 {
            Some(u32::from_ne_bytes(buf))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up_to_power_of_two() {
        let r = RingBuffer::create(5).unwrap();
        assert_eq!(r.size(), 8);
    }

    #[test]
    fn put_get_roundtrip() {
        let r = RingBuffer::create(16).unwrap();
        assert_eq!(r.put(b"hello"), 5);
        let mut buf = [0u8; 5];
        assert_eq!(r.get(&mut buf), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn get_on_empty_returns_zero() {
        let r = RingBuffer::create(16).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(r.get(&mut buf), 0);
    }

    #[test]
    fn put_more_than_capacity_is_dropped() {
        // capacity rounds up to 4, usable bytes = 3
        let r = RingBuffer::create(4).unwrap();
        assert_eq!(r.put(&[1, 2, 3, 4, 5]), 0);
        let mut buf = [0u8; 4];
        assert_eq!(r.get(&mut buf), 0);
    }

    #[test]
    fn wraparound_preserves_byte_order() {
        let r = RingBuffer::create(8).unwrap();
        // fill then drain to push write_pos/read_pos near the boundary
        assert_eq!(r.put(&[1, 2, 3, 4, 5, 6]), 6);
        let mut drain = [0u8; 4];
        assert_eq!(r.get(&mut drain), 4);
        assert_eq!(&drain, &[1, 2, 3, 4]);

        // this put straddles the end of the backing region
        assert_eq!(r.put(&[7, 8, 9, 10]), 4);
        let mut tail = [0u8; 6];
        assert_eq!(r.get(&mut tail), 6);
        assert_eq!(&tail, &[5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn total_get_never_exceeds_total_put() {
        let r = RingBuffer::create(32).unwrap();
        let mut accepted = 0usize;
        let mut returned = 0usize;
        let chunk = [0xABu8; 5];
        for _ in 0..20 {
            accepted += r.put(&chunk);
            let mut buf = [0u8; 3];
            returned += r.get(&mut buf);
        }
        // drain the rest
        let mut buf = [0u8; 32];
        returned += r.get(&mut buf);
        assert!(returned <= accepted);
    }

    #[test]
    fn index_ring_roundtrip() {
        let ring = IndexRing::create(16384).unwrap();
        for i in 1..=16384u32 {
            assert!(ring.put(i));
        }
        assert_eq!(ring.get(), Some(1));
    }
}
