//! Clock sources (component H): TSC cycle sampling plus the one-time
//! calibration that turns a cycle count into nanoseconds, and a
//! software-clock fallback for hosts without a hardware PTP register to
//! read. The tagged [`crate::record::Timestamp`] already knows how to
//! convert either representation to nanoseconds; this module is just
//! where samples come from.

use std::time::Duration;

use crate::record::Timestamp;

/// Reads the raw TSC. x86_64 uses the `RDTSC` instruction directly;
/// other architectures fall back to a monotonic nanosecond clock, which
/// is not cycle-accurate but keeps the `Cycles` code path exercised
/// everywhere this crate builds.
#[inline]
pub fn rdtsc() -> u64 {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        std::arch::x86_64::_rdtsc()
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        now_ns()
    }
}

/// Nanosecond timestamp via `CLOCK_MONOTONIC_RAW` on Linux (immune to NTP
/// slew), `Instant`-based elsewhere.
#[inline]
pub fn now_ns() -> u64 {
    #[cfg(target_os = "linux")]
    {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut ts);
        }
        (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
    }
    #[cfg(not(target_os = "linux"))]
    {
        use std::time::Instant;
        static EPOCH: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let epoch = EPOCH.get_or_init(Instant::now);
        epoch.elapsed().as_nanos() as u64
    }
}

/// Samples the TSC now, tagged for storage in a [`crate::record::TraceRecord`].
pub fn sample_cycles() -> Timestamp {
    Timestamp::Cycles(rdtsc())
}

/// Samples the wall clock now as a `(sec, nsec)` pair — the software
/// stand-in a [`crate::nic::NicPort`] without real PTP hardware returns
/// in place of a register read.
pub fn sample_wall_clock() -> Timestamp {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts);
    }
    Timestamp::Timespec {
        sec: ts.tv_sec as i64,
        nsec: ts.tv_nsec as i64,
    }
}

/// Measures the TSC's rate in Hz by comparing cycle counts across a known
/// wall-clock interval. Run once at startup; the result becomes the
/// `cpu_hz` carried in a run's [`crate::record::RunHeader`].
pub fn calibrate_cpu_hz(sample_duration: Duration) -> u64 {
    let start_cycles = rdtsc();
    let start_wall = std::time::Instant::now();
    std::thread::sleep(sample_duration);
    let elapsed = start_wall.elapsed();
    let delta_cycles = rdtsc().saturating_sub(start_cycles);

    if elapsed.as_nanos() == 0 {
        return 0;
    }
    (delta_cycles as u128 * 1_000_000_000 / elapsed.as_nanos()) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ns_is_monotonic_across_two_samples() {
        let a = now_ns();
        let b = now_ns();
        assert!(b >= a);
    }

    #[test]
    fn rdtsc_advances() {
        let a = rdtsc();
        for _ in 0..1000 {
            std::hint::spin_loop();
        }
        let b = rdtsc();
        assert!(b >= a);
    }

    #[test]
    fn calibrate_cpu_hz_returns_plausible_frequency() {
        let hz = calibrate_cpu_hz(Duration::from_millis(20));
        // Any real host's TSC runs well above 100 MHz; this just guards
        // against the zero-elapsed-time degenerate case.
        assert!(hz > 0);
    }

    #[test]
    fn sample_wall_clock_roundtrips_through_to_nanos() {
        let ts = sample_wall_clock();
        let nanos = ts.to_nanos(0);
        assert!(nanos > 0);
    }
}
