//! Exports of an [`AnalysisResult`]: JSON, IOC list, CSV connection table

use csv::{QuoteStyle, WriterBuilder};
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::Write;
use std::net::IpAddr;

use crate::error::ExportError;
use crate::model::{AnalysisResult, ArtifactType};

/// Header line of the connection table
pub const CSV_HEADER: &str = "SourceIP,SourcePort,DestIP,DestPort,Protocol,Packets,BytesSent,BytesReceived,FirstSeen,LastSeen,Flags";

const CSV_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Write the whole result as pretty-printed JSON
pub fn write_json<W: Write>(result: &AnalysisResult, writer: W) -> Result<(), ExportError> {
    serde_json::to_writer_pretty(writer, result)?;
    Ok(())
}

pub fn to_json_string(result: &AnalysisResult) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(result)?)
}

/// Write the indicator list
///
/// Three sections, `# IP Addresses`, `# Domains` and `# URLs`, each sorted without duplicates
/// with one value per line. TLS server names are listed with the domains.
pub fn write_ioc_text<W: Write>(result: &AnalysisResult, mut writer: W) -> Result<(), ExportError> {
    let mut ips = BTreeSet::new();
    let mut domains = BTreeSet::new();
    let mut urls = BTreeSet::new();
    for artifact in &result.artifacts {
        match artifact.artifact_type {
            ArtifactType::IpAddress => {
                if let Ok(ip) = artifact.value.parse::<IpAddr>() {
                    ips.insert(ip);
                }
            }
            ArtifactType::Domain | ArtifactType::TlsSni => {
                domains.insert(artifact.value.to_lowercase());
            }
            ArtifactType::Url => {
                urls.insert(artifact.value.as_str());
            }
            ArtifactType::UserAgent => (),
        }
    }

    writeln!(writer, "# IP Addresses")?;
    for ip in &ips {
        writeln!(writer, "{}", ip)?;
    }
    writeln!(writer)?;
    writeln!(writer, "# Domains")?;
    for domain in &domains {
        writeln!(writer, "{}", domain)?;
    }
    writeln!(writer)?;
    writeln!(writer, "# URLs")?;
    for url in &urls {
        writeln!(writer, "{}", url)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn to_ioc_string(result: &AnalysisResult) -> Result<String, ExportError> {
    let mut buf = Vec::new();
    write_ioc_text(result, &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[derive(Serialize)]
struct ConnectionRow<'a> {
    source_ip: String,
    source_port: u16,
    dest_ip: String,
    dest_port: u16,
    protocol: &'a str,
    packets: u64,
    bytes_sent: u64,
    bytes_received: u64,
    first_seen: String,
    last_seen: String,
    flags: String,
}

/// Write the connection table, busiest connections first
///
/// Text fields are quoted, timestamps are UTC, and TCP flags are joined with `;`.
pub fn write_connections_csv<W: Write>(
    result: &AnalysisResult,
    mut writer: W,
) -> Result<(), ExportError> {
    writer.write_all(CSV_HEADER.as_bytes())?;
    writer.write_all(b"\n")?;
    let mut wtr = WriterBuilder::new()
        .has_headers(false)
        .quote_style(QuoteStyle::NonNumeric)
        .from_writer(writer);

    let mut connections: Vec<_> = result.connections.iter().collect();
    connections.sort_by(|a, b| b.total_packets().cmp(&a.total_packets()));
    for conn in connections {
        wtr.serialize(ConnectionRow {
            source_ip: conn.src_ip.to_string(),
            source_port: conn.src_port,
            dest_ip: conn.dst_ip.to_string(),
            dest_port: conn.dst_port,
            protocol: &conn.protocol,
            packets: conn.total_packets(),
            bytes_sent: conn.bytes_sent,
            bytes_received: conn.bytes_received,
            first_seen: conn.first_seen.format(CSV_TIME_FORMAT).to_string(),
            last_seen: conn.last_seen.format(CSV_TIME_FORMAT).to_string(),
            flags: conn.tcp_flags.to_string(),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn to_csv_string(result: &AnalysisResult) -> Result<String, ExportError> {
    let mut buf = Vec::new();
    write_connections_csv(result, &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
