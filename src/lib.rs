//! # Forensic analysis of packet captures
//!
//! This crate reads capture files in the classic pcap format, decodes the link, network and
//! transport layers of each packet, and extracts forensic artifacts from what it finds: IP
//! addresses, per-flow connection statistics, domain names seen in DNS traffic, plaintext HTTP
//! requests, and TLS server names. Results can be exported as JSON, as a flat list of
//! indicators of compromise, or as a CSV connection table.
//!
//! All decoding is done by this crate, over untrusted input: a malformed packet never stops
//! the scan, and memory use does not depend on the size of the capture. Files in the pcapng
//! format are recognized and read on a best-effort basis.
//!
//! # Example: analyzing a file
//!
//! ```rust
//! use pcap_forensics::{export, Analyzer, AnalyzerOptions, ArtifactType};
//!
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let analyzer = Analyzer::new(AnalyzerOptions::default());
//! let result = analyzer.analyze_file("capture.pcap")?;
//! println!("{} packets, {} connections", result.total_packets, result.connections.len());
//! for sni in result.artifacts_of(ArtifactType::TlsSni) {
//!     println!("TLS server name: {} ({} times)", sni.value, sni.count);
//! }
//! export::write_ioc_text(&result, std::io::stdout())?;
//! # Ok(())
//! # }
//! ```
//!
//! # Example: background scan
//!
//! [`spawn_analysis`] runs the scan in its own thread. The returned handle gives access to
//! progress reports and can cancel the scan, in which case the partial result is returned.
//!
//! ```rust
//! use pcap_forensics::{spawn_analysis, AnalyzerOptions};
//!
//! # fn run() -> Result<(), pcap_forensics::CaptureError> {
//! let handle = spawn_analysis("capture.pcap", AnalyzerOptions::default())?;
//! while !handle.is_finished() {
//!     if let Ok(p) = handle.progress().recv_timeout(std::time::Duration::from_millis(200)) {
//!         println!("{} packets", p.packets);
//!     }
//! }
//! let result = handle.join()?;
//! println!("{} artifacts", result.artifacts.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Example: reading packets
//!
//! The lower layers can be used on their own: [`CaptureReader`] is a streaming reader
//! returning raw packets, and [`decode::decode_packet`] decodes them.
//!
//! ```rust
//! use pcap_forensics::decode::decode_packet;
//! use pcap_forensics::{CaptureError, CaptureReader};
//!
//! # fn run(data: &[u8]) -> Result<(), CaptureError> {
//! let mut reader = CaptureReader::new(data)?;
//! while let Some(packet) = reader.next_packet()? {
//!     let decoded = decode_packet(packet.data, packet.linktype);
//!     println!("{}", decoded.flow_label());
//! }
//! # Ok(())
//! # }
//! ```

mod aggregate;
mod endianness;
mod error;
mod linktype;
mod model;
mod options;
mod scan;

pub mod capture;
pub mod decode;
pub mod export;
pub mod extract;

pub use capture::*;
pub use error::*;
pub use linktype::*;
pub use model::*;
pub use options::*;
pub use scan::*;

#[cfg(test)]
#[macro_use]
extern crate hex_literal;
