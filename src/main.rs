//! probe-trace — PTP-assisted kernel-bypass packet latency tracer.
//!
//! Live sender measures end-to-end latency of probe packets through a
//! data plane via hardware TX/RX timestamps; the offline analyzer
//! reassembles per-thread trace files into a single table. Run
//! `probe-trace --help` for usage.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod analyzer;
mod cli;
mod config;
mod nic_impl;
mod send;

use cli::{AnalyzerCommand, Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            let example = config::TracerConfig::default_example();
            print!("{}", toml::to_string_pretty(&example)?);
        }
        Commands::Send {
            portmask,
            rate,
            output_prefix,
            mac_dst,
            port_config,
            config_file,
        } => {
            let mut cfg = if let Some(path) = config_file.as_ref() {
                config::TracerConfig::load(path)?
            } else if cli.config.exists() {
                config::TracerConfig::load(&cli.config)?
            } else {
                config::TracerConfig::default_example()
            };

            if let Some(p) = portmask {
                cfg.portmask = p;
            }
            if let Some(r) = rate {
                // Validate the suffix grammar eagerly so a typo fails
                // before any thread spawns.
                config::parse_rate(&r)?;
                cfg.rate = r;
            }
            if let Some(o) = output_prefix {
                cfg.output_prefix = o.display().to_string();
            }
            if let Some(m) = mac_dst {
                cfg.mac_dst = m;
            }
            if let Some(pc) = port_config {
                cfg.ports = parse_port_config(&pc)?;
            }

            send::run(&cfg)?;
        }
        Commands::Analyzer(AnalyzerCommand::Dump { output, inputs }) => {
            analyzer::dump(output, inputs)?;
        }
    }

    Ok(())
}

/// Parses `--config (port,{R|T},lcore)[,(...)]` into `PortConfig` entries.
fn parse_port_config(s: &str) -> Result<Vec<config::PortConfig>> {
    let mut out = Vec::new();
    for group in s.split("),(") {
        let trimmed = group.trim_matches(|c| c == '(' || c == ')');
        let parts: Vec<&str> = trimmed.split(',').collect();
        if parts.len() != 3 {
            anyhow::bail!("malformed --config entry: {group}");
        }
        out.push(config::PortConfig {
            port: parts[0].parse()?,
            role: parts[1].to_string(),
            lcore: parts[2].parse()?,
        });
    }
    Ok(out)
}
