//! Per-thread trace record buffering and disk spill.
//!
//! Each thread that calls into the tracer gets its own [`TraceBuffer`],
//! lazily opening `trace_<tid>` the first time it has anything to flush.
//! Records accumulate in a small in-memory cache and are written out in
//! batches rather than one syscall per record.

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::record::{RunHeader, TraceRecord};
#[cfg(test)]
use crate::record::{RECORD_LEN, RUN_HEADER_LEN};

/// Records held in memory before a flush, matching the original's fixed
/// ten-entry cache.
const CACHE_SIZE: usize = 10;

fn gettid() -> i32 {
    unsafe { libc::syscall(libc::SYS_gettid) as i32 }
}

/// Accumulates [`TraceRecord`]s for one thread and spills them to a
/// `trace_<tid>` file under `dir` once the cache fills or [`flush`] is
/// called explicitly.
pub struct TraceBuffer {
    dir: PathBuf,
    tid: i32,
    /// Set once the lazy file open fails; every later `record`/`flush`
    /// becomes a no-op instead of retrying and re-logging the same
    /// failure, matching `__local_init`'s disabled-thread behavior.
    disabled: bool,
    cache: Vec<TraceRecord>,
    file: Option<File>,
    run_header: Option<RunHeader>,
}

impl TraceBuffer {
    /// Creates a buffer for the calling thread. Nothing is opened on disk
    /// until the first flush.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        TraceBuffer {
            dir: dir.as_ref().to_path_buf(),
            tid: gettid(),
            disabled: false,
            cache: Vec::with_capacity(CACHE_SIZE),
            file: None,
            run_header: None,
        }
    }

    /// Disables this buffer after an unrecoverable open failure: the tid
    /// is cleared to `-1` and the unwritable cache is dropped rather than
    /// retried, so every later call becomes a cheap no-op.
    fn disable(&mut self) {
        if !self.disabled {
            tracing::warn!(tid = self.tid, "trace: disabling thread, trace file open failed");
        }
        self.disabled = true;
        self.tid = -1;
        self.cache.clear();
    }

    /// Path this buffer's records will land in: `<dir>/trace_<tid>`.
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("trace_{}", self.tid))
    }

    /// Arranges for a [`RunHeader`] to be written once, immediately before
    /// this buffer's first record (§9 Decision 2: `cpu_hz` travels with the
    /// trace file rather than out of band).
    pub fn set_run_header(&mut self, header: RunHeader) {
        self.run_header = Some(header);
    }

    fn open_file(&mut self) -> Result<&mut File> {
        if self.file.is_none() {
            let path = self.path();
            let mut f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            if let Some(header) = self.run_header.take() {
                f.write_all(&header.encode())?;
            }
            tracing::debug!(tid = self.tid, path = %path.display(), "trace: opened trace file");
            self.file = Some(f);
        }
        Ok(self.file.as_mut().unwrap())
    }

    /// Appends one record to the in-memory cache, flushing automatically
    /// once it reaches [`CACHE_SIZE`]. A no-op once this buffer is
    /// disabled.
    pub fn record(&mut self, rec: TraceRecord) -> Result<()> {
        if self.disabled {
            return Ok(());
        }
        self.cache.push(rec);
        if self.cache.len() >= CACHE_SIZE {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes every cached record to disk and clears the cache. A no-op on
    /// an empty cache (never opens the file just to flush nothing) or once
    /// disabled. The cache is only drained once the file is confirmed
    /// open, so a failed open leaves the batch intact for `disable` to
    /// account for rather than silently dropping it mid-flush.
    pub fn flush(&mut self) -> Result<()> {
        if self.disabled || self.cache.is_empty() {
            return Ok(());
        }
        let records = std::mem::take(&mut self.cache);
        let file = match self.open_file() {
            Ok(f) => f,
            Err(e) => {
                self.disable();
                return Err(e);
            }
        };
        for rec in &records {
            file.write_all(&rec.encode())?;
        }
        file.flush()?;
        Ok(())
    }
}

impl Drop for TraceBuffer {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!(tid = self.tid, error = %e, "trace: final flush failed");
        }
    }
}

thread_local! {
    static LOCAL: RefCell<Option<TraceBuffer>> = const { RefCell::new(None) };
}

/// Initializes this thread's trace buffer, directing output under `dir`.
/// Calling it again replaces (and flushes) any prior buffer.
pub fn init_local(dir: impl AsRef<Path>) {
    LOCAL.with(|cell| {
        *cell.borrow_mut() = Some(TraceBuffer::new(dir));
    });
}

/// Attaches a [`RunHeader`] to this thread's buffer, if one has been
/// initialized.
pub fn set_local_run_header(header: RunHeader) {
    LOCAL.with(|cell| {
        if let Some(buf) = cell.borrow_mut().as_mut() {
            buf.set_run_header(header);
        }
    });
}

/// Records `rec` against this thread's buffer. Silently drops the record
/// (with a warning) if [`init_local`] was never called — matches the
/// original's behavior of skipping tracing on un-initialized threads
/// rather than panicking.
pub fn record_local(rec: TraceRecord) {
    LOCAL.with(|cell| match cell.borrow_mut().as_mut() {
        Some(buf) => {
            if let Err(e) = buf.record(rec) {
                tracing::warn!(error = %e, "trace: record failed");
            }
        }
        None => tracing::warn!("trace: record_local called before init_local"),
    });
}

/// Flushes this thread's buffer, if any.
pub fn flush_local() {
    LOCAL.with(|cell| {
        if let Some(buf) = cell.borrow_mut().as_mut() {
            if let Err(e) = buf.flush() {
                tracing::warn!(error = %e, "trace: flush_local failed");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Location, RunHeader, Timestamp};

    fn temp_subdir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "probe-trace-test-{}-{}-{}",
            tag,
            std::process::id(),
            gettid()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn rec(idx: u64) -> TraceRecord {
        TraceRecord {
            tid: 1234,
            location: Location::HwTx as u8,
            probe_sender: 7,
            probe_idx: idx,
            timestamp: Timestamp::Cycles(1_000_000 + idx),
        }
    }

    #[test]
    fn flush_is_noop_on_empty_cache() {
        let dir = temp_subdir("empty");
        let mut buf = TraceBuffer::new(&dir);
        buf.flush().unwrap();
        assert!(!buf.path().exists());
    }

    #[test]
    fn cache_fills_and_autoflushes() {
        let dir = temp_subdir("autoflush");
        let mut buf = TraceBuffer::new(&dir);
        for i in 0..CACHE_SIZE as u64 {
            buf.record(rec(i)).unwrap();
        }
        assert!(buf.path().exists());
        let bytes = std::fs::read(buf.path()).unwrap();
        assert_eq!(bytes.len(), CACHE_SIZE * RECORD_LEN);
    }

    #[test]
    fn run_header_precedes_first_record_only() {
        let dir = temp_subdir("runheader");
        let mut buf = TraceBuffer::new(&dir);
        buf.set_run_header(RunHeader {
            cpu_hz: 2_400_000_000,
            format_version: 1,
        });
        buf.record(rec(1)).unwrap();
        buf.flush().unwrap();
        buf.record(rec(2)).unwrap();
        buf.flush().unwrap();

        let bytes = std::fs::read(buf.path()).unwrap();
        assert_eq!(bytes.len(), RUN_HEADER_LEN + 2 * RECORD_LEN);
        assert!(RunHeader::decode(&bytes[..RUN_HEADER_LEN]).is_some());
    }

    #[test]
    fn thread_local_roundtrip() {
        let dir = temp_subdir("threadlocal");
        init_local(&dir);
        record_local(rec(1));
        flush_local();
    }

    #[test]
    fn disables_thread_after_open_failure_and_stops_retrying() {
        let dir = temp_subdir("disable");
        // A regular file standing where the trace directory should be
        // makes every open under it fail with ENOTDIR.
        let blocker = dir.join("not-a-directory");
        std::fs::write(&blocker, b"x").unwrap();

        let mut buf = TraceBuffer::new(&blocker);
        buf.record(rec(1)).unwrap();
        assert!(buf.flush().is_err());

        // The failed batch is gone, not silently requeued, and further
        // calls are cheap no-ops rather than repeated failing opens.
        buf.record(rec(2)).unwrap();
        assert!(buf.flush().is_ok());
    }
}
