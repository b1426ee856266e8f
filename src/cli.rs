//! CLI definitions for probe-trace.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[clap(
    name = "probe-trace",
    version,
    about = "PTP-assisted kernel-bypass packet latency tracer and offline reassembler",
    long_about = None
)]
pub struct Cli {
    /// Path to probe.toml config file
    #[clap(long, short, default_value = "probe.toml")]
    pub config: PathBuf,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print an example probe.toml to stdout
    Init,

    /// Run the live tracer: send probes and record hardware timestamps
    /// until SIGINT
    Send {
        /// Hex port bitmap of ports to enable
        #[clap(short = 'p', long)]
        portmask: Option<String>,

        /// Probe send rate; accepts a bit-rate suffix (k/K=x1024,
        /// m/M=x2^20, g/G=x2^30)
        #[clap(short = 'r', long)]
        rate: Option<String>,

        /// Output prefix for trace files (still named trace_<tid>, but
        /// written under this directory)
        #[clap(short = 'o', long)]
        output_prefix: Option<PathBuf>,

        /// Destination MAC for probe packets, e.g. AA:BB:CC:DD:EE:FF
        #[clap(long = "mac-dst")]
        mac_dst: Option<String>,

        /// Per-port queue/lcore assignment: (port,{R|T},lcore)[,(...)]
        #[clap(long)]
        port_config: Option<String>,

        /// Alternative to CLI flags: a TOML file with the same fields.
        /// CLI flags win over the file when both are given.
        #[clap(long)]
        config_file: Option<PathBuf>,
    },

    /// Offline analyzer subcommands
    #[clap(subcommand)]
    Analyzer(AnalyzerCommand),
}

#[derive(Subcommand)]
pub enum AnalyzerCommand {
    /// Merge per-thread trace files into a single tab-separated table
    Dump {
        /// Output file path (default: trace.data)
        #[clap(short = 'o', long)]
        output: Option<PathBuf>,

        /// Input trace files, up to 10
        #[clap(required = true, num_args = 1..=10)]
        inputs: Vec<PathBuf>,
    },
}
