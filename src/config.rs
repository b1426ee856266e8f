//! `probe.toml` configuration for probe-trace.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level tracer configuration, mirroring the `send` subcommand's flags
/// so either surface can drive the same run.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TracerConfig {
    /// Hex port bitmap of ports to enable, e.g. "0x3".
    #[serde(default = "TracerConfig::default_portmask")]
    pub portmask: String,
    /// Probe send rate with an optional bit-rate suffix (k/K/m/M/g/G).
    #[serde(default = "TracerConfig::default_rate")]
    pub rate: String,
    /// Directory trace files are written under.
    #[serde(default = "TracerConfig::default_output_prefix")]
    pub output_prefix: String,
    /// Destination MAC for outgoing probe packets.
    #[serde(default = "TracerConfig::default_mac_dst")]
    pub mac_dst: String,
    /// Per-port queue/lcore assignment.
    #[serde(default)]
    pub ports: Vec<PortConfig>,
}

/// One `(port, role, lcore)` entry from `--config`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PortConfig {
    pub port: u32,
    /// "R" (RX) or "T" (TX).
    pub role: String,
    pub lcore: u32,
}

impl TracerConfig {
    fn default_portmask() -> String {
        "0x1".into()
    }
    fn default_rate() -> String {
        "10".into()
    }
    fn default_output_prefix() -> String {
        "./trace-out".into()
    }
    fn default_mac_dst() -> String {
        "FF:FF:FF:FF:FF:FF".into()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let cfg: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(cfg)
    }

    pub fn default_example() -> Self {
        Self {
            portmask: Self::default_portmask(),
            rate: "10".into(),
            output_prefix: Self::default_output_prefix(),
            mac_dst: Self::default_mac_dst(),
            ports: vec![
                PortConfig {
                    port: 0,
                    role: "T".into(),
                    lcore: 1,
                },
                PortConfig {
                    port: 0,
                    role: "R".into(),
                    lcore: 2,
                },
            ],
        }
    }

    /// Parses the hex portmask into the set of enabled port ids.
    pub fn enabled_ports(&self) -> Result<Vec<u32>> {
        let trimmed = self
            .portmask
            .strip_prefix("0x")
            .or_else(|| self.portmask.strip_prefix("0X"))
            .unwrap_or(&self.portmask);
        let mask = u32::from_str_radix(trimmed, 16)
            .with_context(|| format!("invalid portmask: {}", self.portmask))?;
        Ok((0..32).filter(|b| mask & (1 << b) != 0).collect())
    }

    /// Parses `mac_dst` into six octets.
    pub fn dst_mac(&self) -> Result<[u8; 6]> {
        parse_mac(&self.mac_dst)
    }
}

pub fn parse_mac(s: &str) -> Result<[u8; 6]> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 6 {
        bail!("MAC address must have 6 colon-separated octets: {s}");
    }
    let mut mac = [0u8; 6];
    for (i, p) in parts.iter().enumerate() {
        mac[i] = u8::from_str_radix(p, 16).with_context(|| format!("bad MAC octet: {p}"))?;
    }
    Ok(mac)
}

/// Parses a rate string with an optional bit-rate suffix into a plain
/// integer rate. `g`/`G` is x2^30 (SPEC_FULL.md §9, Decision 1) — the
/// donor's `k/K`=x1024, `m/M`=x2^20 table extends consistently rather
/// than jumping to x2^40 for `g`/`G`.
pub fn parse_rate(s: &str) -> Result<u64> {
    let s = s.trim();
    let (digits, mult) = match s.chars().last() {
        Some('k') | Some('K') => (&s[..s.len() - 1], 1024u64),
        Some('m') | Some('M') => (&s[..s.len() - 1], 1u64 << 20),
        Some('g') | Some('G') => (&s[..s.len() - 1], 1u64 << 30),
        _ => (s, 1u64),
    };
    let base: u64 = digits
        .parse()
        .with_context(|| format!("invalid rate value: {s}"))?;
    Ok(base.saturating_mul(mult))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rate_plain() {
        assert_eq!(parse_rate("10").unwrap(), 10);
    }

    #[test]
    fn parse_rate_kilo() {
        assert_eq!(parse_rate("2k").unwrap(), 2048);
    }

    #[test]
    fn parse_rate_mega() {
        assert_eq!(parse_rate("1M").unwrap(), 1 << 20);
    }

    #[test]
    fn parse_rate_giga_is_two_pow_30() {
        assert_eq!(parse_rate("1G").unwrap(), 1u64 << 30);
        assert_eq!(parse_rate("1g").unwrap(), 1u64 << 30);
    }

    #[test]
    fn enabled_ports_reads_hex_mask() {
        let mut cfg = TracerConfig::default_example();
        cfg.portmask = "0x5".into();
        assert_eq!(cfg.enabled_ports().unwrap(), vec![0, 2]);
    }

    #[test]
    fn dst_mac_parses_colon_hex() {
        let cfg = TracerConfig {
            mac_dst: "AA:BB:CC:DD:EE:FF".into(),
            ..TracerConfig::default_example()
        };
        assert_eq!(cfg.dst_mac().unwrap(), [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
    }
}
