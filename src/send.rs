//! Live sender: wires the probe transmit engine (E) and probe receive
//! hook (F) to a set of ports, runs until SIGINT, and performs the
//! two-phase shutdown described in SPEC_FULL.md §5 — the first SIGINT
//! stops new probe sends, the second stops receiving too.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use trace_core::{ProbeEngine, RunHeader, RxHook};

use crate::config::TracerConfig;
use crate::nic_impl::loopback_pair;

const STATE_RUNNING: u8 = 0;
const STATE_TX_STOPPED: u8 = 1;
const STATE_ALL_STOPPED: u8 = 2;

static SHUTDOWN_STATE: AtomicU8 = AtomicU8::new(STATE_RUNNING);

extern "C" fn handle_sigint(_: libc::c_int) {
    // Advance the state machine by one step per signal; a third SIGINT
    // while already fully stopped is a no-op.
    let _ = SHUTDOWN_STATE.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| {
        if s < STATE_ALL_STOPPED {
            Some(s + 1)
        } else {
            None
        }
    });
}

fn pin_to_core(core_id: u32) {
    #[cfg(target_os = "linux")]
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(core_id as usize, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
    }
    #[cfg(not(target_os = "linux"))]
    let _ = core_id;
}

/// Watches `SHUTDOWN_STATE` and clears `flag` once it reaches `threshold`,
/// giving `ProbeEngine::run`/`RxHook::run` the plain `Arc<AtomicBool>` they
/// expect without coupling them to the two-phase state machine directly.
fn spawn_phase_watcher(threshold: u8, flag: Arc<AtomicBool>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        while SHUTDOWN_STATE.load(Ordering::Relaxed) < threshold {
            std::thread::sleep(Duration::from_millis(10));
        }
        flag.store(false, Ordering::Relaxed);
    })
}

fn derive_mac(port_id: u32) -> [u8; 6] {
    [0x02, 0x00, 0x00, 0x00, 0x00, port_id as u8]
}

fn lcore_for(cfg: &TracerConfig, port_id: u32, role: &str) -> Option<u32> {
    cfg.ports
        .iter()
        .find(|p| p.port == port_id && p.role.eq_ignore_ascii_case(role))
        .map(|p| p.lcore)
}

/// Runs the live tracer until both shutdown phases have completed.
pub fn run(cfg: &TracerConfig) -> Result<()> {
    let dst_mac = cfg.dst_mac()?;
    let ports = cfg.enabled_ports()?;
    if ports.is_empty() {
        anyhow::bail!("no ports enabled in portmask {}", cfg.portmask);
    }

    std::fs::create_dir_all(&cfg.output_prefix)?;

    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as *const () as libc::sighandler_t);
    }

    let cpu_hz = trace_core::clock::calibrate_cpu_hz(Duration::from_millis(20));
    tracing::info!(cpu_hz, "send: calibrated TSC frequency");

    let rate_per_sec = trace_core::PROBE_RATE_PER_SEC;
    let mut handles = Vec::new();

    for port_id in ports.iter().copied() {
        let (tx_port, rx_port) = loopback_pair(derive_mac(port_id));
        let tx_core = lcore_for(cfg, port_id, "T");
        let rx_core = lcore_for(cfg, port_id, "R");
        let tx_dir = cfg.output_prefix.clone();
        let rx_dir = cfg.output_prefix.clone();

        let tx_handle = std::thread::Builder::new()
            .name(format!("probe-tx-{port_id}"))
            .spawn(move || {
                if let Some(core) = tx_core {
                    pin_to_core(core);
                }
                trace_core::trace_buffer::init_local(&tx_dir);
                trace_core::trace_buffer::set_local_run_header(RunHeader {
                    cpu_hz,
                    format_version: RunHeader::CURRENT_VERSION,
                });

                let engine = ProbeEngine::new(tx_port, port_id, dst_mac);
                let running = Arc::new(AtomicBool::new(true));
                let watch = spawn_phase_watcher(STATE_TX_STOPPED, running.clone());
                engine.run(rate_per_sec, running);
                let _ = watch.join();
            })?;

        let rx_handle = std::thread::Builder::new()
            .name(format!("probe-rx-{port_id}"))
            .spawn(move || {
                if let Some(core) = rx_core {
                    pin_to_core(core);
                }
                trace_core::trace_buffer::init_local(&rx_dir);

                let hook = RxHook::new(rx_port, 32);
                let running = Arc::new(AtomicBool::new(true));
                let watch = spawn_phase_watcher(STATE_ALL_STOPPED, running.clone());
                hook.run(running);
                let _ = watch.join();
            })?;

        handles.push(tx_handle);
        handles.push(rx_handle);
    }

    for h in handles {
        let _ = h.join();
    }

    Ok(())
}
