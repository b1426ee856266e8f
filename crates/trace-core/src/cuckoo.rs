//! Fixed-capacity cuckoo hash index: 4-wide buckets addressed by two
//! independent hashes of the key, with recursive displacement when both a
//! key's buckets are full. Single-threaded, as the original is documented
//! to be (`add`/`del` "should only be called from one thread").

use crate::error::{Result, TraceError};
use crate::ring::IndexRing;

const BUCKET_ENTRIES: usize = 4;
const NULL_SIGNATURE: u32 = 0;
const HASH_INIT_VAL: u32 = 7;
const HASH_ENTRIES_MIN: usize = 8;

/// Both hashes for one key, stored together so a displaced entry can still
/// identify both of its buckets without rehashing the key bytes.
#[derive(Clone, Copy, Default)]
struct Signatures {
    current: u32,
    alt: u32,
}

impl Signatures {
    fn is_empty(&self) -> bool {
        self.current == NULL_SIGNATURE
    }
}

#[derive(Clone)]
struct Bucket {
    sig: [Signatures; BUCKET_ENTRIES],
    key_idx: [u32; BUCKET_ENTRIES],
    in_progress: [bool; BUCKET_ENTRIES],
}

impl Bucket {
    fn empty() -> Self {
        Bucket {
            sig: [Signatures::default(); BUCKET_ENTRIES],
            key_idx: [0; BUCKET_ENTRIES],
            in_progress: [false; BUCKET_ENTRIES],
        }
    }
}

struct KeySlot<V> {
    key: Vec<u8>,
    value: Option<V>,
}

/// The secondary hash is derived deterministically from the primary so
/// either of a key's two buckets can recover its signature without
/// rehashing the key bytes (§3, §4.B).
fn hash_secondary(primary: u32) -> u32 {
    const SHIFT: u32 = 12;
    const MUL: u32 = 0x5bd1_e995;
    let tag = primary >> SHIFT;
    primary ^ (tag.wrapping_add(1).wrapping_mul(MUL))
}

/// Primary hash over a key's raw bytes. Remaps a raw CRC-32C output of
/// zero to one: zero is reserved as the empty-entry sentinel, and the
/// seed/polynomial combination makes a genuine zero output vanishingly
/// unlikely but not impossible (SPEC_FULL.md §9, Decision 3).
fn signature(key: &[u8]) -> u32 {
    let raw = crc32c::crc32c_append(HASH_INIT_VAL, key);
    if raw == NULL_SIGNATURE {
        1
    } else {
        raw
    }
}

/// Fixed-capacity cuckoo hash table mapping byte-string keys (all of the
/// same length, fixed at construction) to values of type `V`.
pub struct CuckooHash<V> {
    key_len: usize,
    bucket_bitmask: u32,
    buckets: Vec<Bucket>,
    keys: Vec<KeySlot<V>>,
    free_slots: IndexRing,
}

impl<V: Clone> CuckooHash<V> {
    /// Creates a table sized for at least `entries` keys of `key_len`
    /// bytes each. `entries` is raised to `HASH_ENTRIES_MIN` and the
    /// bucket count to the next power of two, exactly as the original
    /// sizes its mmap region.
    pub fn create(key_len: usize, entries: usize) -> Result<Self> {
        if key_len == 0 {
            return Err(TraceError::bad_param("cuckoo key_len must be nonzero"));
        }
        let entries = entries.max(HASH_ENTRIES_MIN);
        let bucket_nr = entries.next_power_of_two() / BUCKET_ENTRIES;
        let bucket_nr = bucket_nr.max(1).next_power_of_two();

        let free_slots = IndexRing::create(entries + 1)?;
        // slot 0 is the null sentinel; populate 1..=entries
        for i in 1..=entries as u32 {
            free_slots.put(i);
        }

        let mut keys = Vec::with_capacity(entries + 1);
        for _ in 0..=entries {
            keys.push(KeySlot {
                key: vec![0u8; key_len],
                value: None,
            });
        }

        Ok(CuckooHash {
            key_len,
            bucket_bitmask: (bucket_nr - 1) as u32,
            buckets: vec![Bucket::empty(); bucket_nr],
            keys,
            free_slots,
        })
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.key_len {
            return Err(TraceError::bad_param(format!(
                "key length {} does not match table key_len {}",
                key.len(),
                self.key_len
            )));
        }
        Ok(())
    }

    /// Inserts or updates `key -> value`. Returns the slot id the key is
    /// stored at (stable across updates) or `Err(OutOfRange)` if the table
    /// has no space and displacement could not free any.
    pub fn add(&mut self, key: &[u8], value: V) -> Result<u32> {
        self.check_key(key)?;
        let sig = signature(key);
        let alt = hash_secondary(sig);
        let prim_idx = (sig & self.bucket_bitmask) as usize;
        let sec_idx = (alt & self.bucket_bitmask) as usize;

        // Update in place if already present.
        for i in 0..BUCKET_ENTRIES {
            let s = self.buckets[prim_idx].sig[i];
            if s.current == sig && s.alt == alt {
                let key_idx = self.buckets[prim_idx].key_idx[i] as usize;
                if self.keys[key_idx].key == key {
                    self.keys[key_idx].value = Some(value);
                    return Ok(key_idx as u32);
                }
            }
        }
        for i in 0..BUCKET_ENTRIES {
            let s = self.buckets[sec_idx].sig[i];
            if s.alt == sig && s.current == alt {
                let key_idx = self.buckets[sec_idx].key_idx[i] as usize;
                if self.keys[key_idx].key == key {
                    self.keys[key_idx].value = Some(value);
                    return Ok(key_idx as u32);
                }
            }
        }

        let slot = self
            .free_slots
            .get()
            .ok_or_else(|| TraceError::out_of_range("cuckoo table has no free slots"))?;

        // Room in the primary bucket?
        for i in 0..BUCKET_ENTRIES {
            if self.buckets[prim_idx].sig[i].is_empty() {
                self.keys[slot as usize].key = key.to_vec();
                self.keys[slot as usize].value = Some(value);
                self.buckets[prim_idx].sig[i] = Signatures { current: sig, alt };
                self.buckets[prim_idx].key_idx[i] = slot;
                return Ok(slot);
            }
        }

        // Primary bucket full: try to displace an existing entry into its
        // alternate bucket.
        match self.make_space(prim_idx) {
            Some(i) => {
                self.keys[slot as usize].key = key.to_vec();
                self.keys[slot as usize].value = Some(value);
                self.buckets[prim_idx].sig[i] = Signatures { current: sig, alt };
                self.buckets[prim_idx].key_idx[i] = slot;
                Ok(slot)
            }
            None => {
                self.free_slots.put(slot);
                Err(TraceError::out_of_range(
                    "cuckoo table full, displacement exhausted",
                ))
            }
        }
    }

    /// Recursively frees an entry slot in `bucket_idx`, returning the now
    /// free slot index within that bucket. Entries mid-recursion are
    /// marked `in_progress` so the walk can never re-enter a bucket it is
    /// already displacing through (§4.B step 5, §8 invariant 4).
    fn make_space(&mut self, bucket_idx: usize) -> Option<usize> {
        // First pass: does any occupied entry's alternate bucket have a
        // free slot we can move it to directly?
        let mut next_bucket = [0usize; BUCKET_ENTRIES];
        let mut found_direct: Option<(usize, usize)> = None;
        for i in 0..BUCKET_ENTRIES {
            let alt_idx = (self.buckets[bucket_idx].sig[i].alt & self.bucket_bitmask) as usize;
            next_bucket[i] = alt_idx;
            for j in 0..BUCKET_ENTRIES {
                if self.buckets[alt_idx].sig[j].is_empty() {
                    found_direct = Some((i, j));
                    break;
                }
            }
            if found_direct.is_some() {
                break;
            }
        }

        if let Some((i, j)) = found_direct {
            let moved_sig = self.buckets[bucket_idx].sig[i];
            let moved_key_idx = self.buckets[bucket_idx].key_idx[i];
            let alt_idx = next_bucket[i];
            self.buckets[alt_idx].sig[j] = Signatures {
                current: moved_sig.alt,
                alt: moved_sig.current,
            };
            self.buckets[alt_idx].key_idx[j] = moved_key_idx;
            return Some(i);
        }

        // No direct space; pick an entry not already being displaced and
        // recurse into its alternate bucket.
        let candidate = (0..BUCKET_ENTRIES).find(|&i| !self.buckets[bucket_idx].in_progress[i])?;

        self.buckets[bucket_idx].in_progress[candidate] = true;
        let alt_idx = (self.buckets[bucket_idx].sig[candidate].alt & self.bucket_bitmask) as usize;
        let result = self.make_space(alt_idx);
        self.buckets[bucket_idx].in_progress[candidate] = false;

        let j = result?;
        let moved_sig = self.buckets[bucket_idx].sig[candidate];
        let moved_key_idx = self.buckets[bucket_idx].key_idx[candidate];
        self.buckets[alt_idx].sig[j] = Signatures {
            current: moved_sig.alt,
            alt: moved_sig.current,
        };
        self.buckets[alt_idx].key_idx[j] = moved_key_idx;
        Some(candidate)
    }

    /// Looks up `key`. Returns `None` if absent.
    pub fn lookup(&self, key: &[u8]) -> Option<&V> {
        self.check_key(key).ok()?;
        let sig = signature(key);
        let prim_idx = (sig & self.bucket_bitmask) as usize;
        for i in 0..BUCKET_ENTRIES {
            let s = self.buckets[prim_idx].sig[i];
            if s.current == sig && !s.is_empty() {
                let key_idx = self.buckets[prim_idx].key_idx[i] as usize;
                if self.keys[key_idx].key == key {
                    return self.keys[key_idx].value.as_ref();
                }
            }
        }
        let alt = hash_secondary(sig);
        let sec_idx = (alt & self.bucket_bitmask) as usize;
        for i in 0..BUCKET_ENTRIES {
            let s = self.buckets[sec_idx].sig[i];
            if s.current == alt && s.alt == sig {
                let key_idx = self.buckets[sec_idx].key_idx[i] as usize;
                if self.keys[key_idx].key == key {
                    return self.keys[key_idx].value.as_ref();
                }
            }
        }
        None
    }

    /// Mutable lookup — used by the reassembler to update a row in place
    /// without going through `add` again.
    pub fn lookup_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        if self.check_key(key).is_err() {
            return None;
        }
        let sig = signature(key);
        let prim_idx = (sig & self.bucket_bitmask) as usize;
        for i in 0..BUCKET_ENTRIES {
            let s = self.buckets[prim_idx].sig[i];
            if s.current == sig && !s.is_empty() {
                let key_idx = self.buckets[prim_idx].key_idx[i] as usize;
                if self.keys[key_idx].key == key {
                    return self.keys[key_idx].value.as_mut();
                }
            }
        }
        let alt = hash_secondary(sig);
        let sec_idx = (alt & self.bucket_bitmask) as usize;
        for i in 0..BUCKET_ENTRIES {
            let s = self.buckets[sec_idx].sig[i];
            if s.current == alt && s.alt == sig {
                let key_idx = self.buckets[sec_idx].key_idx[i] as usize;
                if self.keys[key_idx].key == key {
                    return self.keys[key_idx].value.as_mut();
                }
            }
        }
        None
    }

    /// Removes `key`, returning its value if present.
    pub fn del(&mut self, key: &[u8]) -> Option<V> {
        self.check_key(key).ok()?;
        let sig = signature(key);
        let prim_idx = (sig & self.bucket_bitmask) as usize;
        for i in 0..BUCKET_ENTRIES {
            let s = self.buckets[prim_idx].sig[i];
            if s.current == sig && !s.is_empty() {
                let key_idx = self.buckets[prim_idx].key_idx[i];
                if self.keys[key_idx as usize].key == key {
                    self.buckets[prim_idx].sig[i] = Signatures::default();
                    self.free_slots.put(key_idx);
                    return self.keys[key_idx as usize].value.take();
                }
            }
        }
        let alt = hash_secondary(sig);
        let sec_idx = (alt & self.bucket_bitmask) as usize;
        for i in 0..BUCKET_ENTRIES {
            let s = self.buckets[sec_idx].sig[i];
            if s.current == alt && !s.is_empty() {
                let key_idx = self.buckets[sec_idx].key_idx[i];
                if self.keys[key_idx as usize].key == key {
                    self.buckets[sec_idx].sig[i] = Signatures::default();
                    self.free_slots.put(key_idx);
                    return self.keys[key_idx as usize].value.take();
                }
            }
        }
        None
    }

    /// Iterates occupied entries in bucket order, yielding `(key, value)`.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &V)> {
        self.buckets.iter().flat_map(move |bkt| {
            (0..BUCKET_ENTRIES).filter_map(move |i| {
                if bkt.sig[i].is_empty() {
                    None
                } else {
                    let key_idx = bkt.key_idx[i] as usize;
                    self.keys[key_idx]
                        .value
                        .as_ref()
                        .map(|v| (self.keys[key_idx].key.as_slice(), v))
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u64) -> [u8; 8] {
        n.to_le_bytes()
    }

    #[test]
    fn add_then_lookup() {
        let mut h: CuckooHash<u32> = CuckooHash::create(8, 16).unwrap();
        h.add(&key(1), 100).unwrap();
        h.add(&key(2), 200).unwrap();
        assert_eq!(h.lookup(&key(1)), Some(&100));
        assert_eq!(h.lookup(&key(2)), Some(&200));
        assert_eq!(h.lookup(&key(3)), None);
    }

    #[test]
    fn add_same_key_updates_value() {
        let mut h: CuckooHash<u32> = CuckooHash::create(8, 16).unwrap();
        let slot_a = h.add(&key(5), 1).unwrap();
        let slot_b = h.add(&key(5), 2).unwrap();
        assert_eq!(slot_a, slot_b);
        assert_eq!(h.lookup(&key(5)), Some(&2));
    }

    #[test]
    fn delete_then_miss() {
        let mut h: CuckooHash<u32> = CuckooHash::create(8, 16).unwrap();
        h.add(&key(9), 42).unwrap();
        assert_eq!(h.del(&key(9)), Some(42));
        assert_eq!(h.lookup(&key(9)), None);
        assert_eq!(h.del(&key(9)), None);
    }

    #[test]
    fn uniqueness_under_many_inserts() {
        let mut h: CuckooHash<u64> = CuckooHash::create(8, 256).unwrap();
        for i in 0..200u64 {
            h.add(&key(i), i).unwrap();
        }
        for i in 0..200u64 {
            assert_eq!(h.lookup(&key(i)), Some(&i));
        }
        let count = h.iter().count();
        assert_eq!(count, 200);
    }

    #[test]
    fn full_table_reports_out_of_range() {
        let mut h: CuckooHash<u64> = CuckooHash::create(8, 8).unwrap();
        let mut inserted = 0;
        for i in 0..64u64 {
            if h.add(&key(i), i).is_ok() {
                inserted += 1;
            } else {
                break;
            }
        }
        assert!(inserted >= 8);
        // one more, guaranteed distinct from anything placed so far, must
        // eventually fail once the table (capacity rounded up) is full
        let mut saw_failure = false;
        for i in 1000..1200u64 {
            if h.add(&key(i), i).is_err() {
                saw_failure = true;
                break;
            }
        }
        assert!(saw_failure);
    }

    #[test]
    fn iterate_reflects_deletes() {
        let mut h: CuckooHash<u32> = CuckooHash::create(8, 16).unwrap();
        h.add(&key(1), 1).unwrap();
        h.add(&key(2), 2).unwrap();
        h.del(&key(1));
        let remaining: Vec<_> = h.iter().map(|(_, v)| *v).collect();
        assert_eq!(remaining, vec![2]);
    }
}
