use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, Level};

use pcap_forensics::{export, spawn_analysis, AnalysisResult, AnalyzerOptions, ArtifactType};

#[derive(Parser, Debug)]
#[command(name = "pcap-forensics")]
#[command(about = "Extract forensic artifacts from a packet capture file")]
#[command(version)]
struct Args {
    /// Capture file to analyze
    input: PathBuf,

    /// Load analyzer options from a JSON file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the full result as JSON
    #[arg(long)]
    json: Option<PathBuf>,

    /// Write the IP, domain and URL indicators
    #[arg(long)]
    ioc: Option<PathBuf>,

    /// Write the connection table as CSV
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Disable the DNS domain heuristic
    #[arg(long)]
    no_dns: bool,

    /// Disable HTTP request parsing
    #[arg(long)]
    no_http: bool,

    /// Disable TLS server name extraction
    #[arg(long)]
    no_tls_sni: bool,

    /// Stop after this many packets
    #[arg(long)]
    max_packets: Option<u64>,

    /// Bytes of each HTTP payload kept in the result (0 keeps none)
    #[arg(long)]
    max_payload_bytes: Option<usize>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn options(&self) -> Result<AnalyzerOptions> {
        let mut options = match &self.config {
            Some(path) => {
                let file = File::open(path)
                    .with_context(|| format!("cannot open config {}", path.display()))?;
                serde_json::from_reader(BufReader::new(file))
                    .with_context(|| format!("invalid config {}", path.display()))?
            }
            None => AnalyzerOptions::default(),
        };
        if self.no_dns {
            options.extract_dns = false;
        }
        if self.no_http {
            options.extract_http = false;
        }
        if self.no_tls_sni {
            options.extract_tls_sni = false;
        }
        if self.max_packets.is_some() {
            options.max_packets = self.max_packets;
        }
        if let Some(n) = self.max_payload_bytes {
            options.max_payload_bytes = n;
        }
        Ok(options)
    }
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn print_summary(result: &AnalysisResult) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "File:        {}", result.source.as_deref().unwrap_or("-"))?;
    writeln!(out, "Link type:   {}", result.header.network)?;
    writeln!(
        out,
        "Packets:     {} ({} bytes)",
        result.total_packets, result.total_bytes
    )?;
    if let (Some(first), Some(last)) = (result.first_packet_time, result.last_packet_time) {
        writeln!(out, "Time span:   {} .. {}", first, last)?;
    }
    if let Some(end) = result.end_reason {
        writeln!(out, "End:         {}", end)?;
    }
    writeln!(out, "Connections: {}", result.connections.len())?;
    writeln!(out, "DNS names:   {}", result.dns_records.len())?;
    writeln!(out, "HTTP:        {}", result.http_requests.len())?;
    for ty in [
        ArtifactType::IpAddress,
        ArtifactType::Domain,
        ArtifactType::Url,
        ArtifactType::TlsSni,
        ArtifactType::UserAgent,
    ] {
        writeln!(out, "  {:<16} {}", ty, result.artifacts_of(ty).count())?;
    }
    writeln!(out, "Protocols:")?;
    for (name, count) in &result.protocol_counts {
        writeln!(out, "  {:<16} {}", name, count)?;
    }
    if !result.errors.is_empty() {
        writeln!(
            out,
            "Notes:       {} ({} suppressed)",
            result.errors.len(),
            result.errors_suppressed
        )?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let options = args.options()?;
    let handle = spawn_analysis(&args.input, options)
        .with_context(|| format!("cannot analyze {}", args.input.display()))?;
    // the channel closes when the worker is done
    for progress in handle.progress().iter() {
        info!(
            packets = progress.packets,
            bytes = progress.bytes_read,
            "analyzing {}",
            args.input.display()
        );
    }
    let result = handle
        .join()
        .with_context(|| format!("cannot analyze {}", args.input.display()))?;

    if let Some(path) = &args.json {
        let mut w = create(path)?;
        export::write_json(&result, &mut w)?;
        w.flush()?;
    }
    if let Some(path) = &args.ioc {
        export::write_ioc_text(&result, create(path)?)?;
    }
    if let Some(path) = &args.csv {
        export::write_connections_csv(&result, create(path)?)?;
    }
    print_summary(&result)
}
