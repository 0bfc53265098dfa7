//! Analysis result types

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::IpAddr;

use crate::capture::{CaptureEnd, CaptureHeader};
use crate::decode::TcpFlags;

/// Kind of indicator held by a [`NetworkArtifact`]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize)]
pub enum ArtifactType {
    IpAddress,
    Domain,
    Url,
    TlsSni,
    UserAgent,
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ArtifactType::IpAddress => "IP address",
            ArtifactType::Domain => "domain",
            ArtifactType::Url => "URL",
            ArtifactType::TlsSni => "TLS server name",
            ArtifactType::UserAgent => "user agent",
        };
        f.pad(s)
    }
}

/// Deduplicated indicator seen in the capture
///
/// Artifacts are identified by their type and their value, compared without regard to case.
/// The stored value is the spelling of the first sighting.
#[derive(Clone, Debug, Serialize)]
pub struct NetworkArtifact {
    pub artifact_type: ArtifactType,
    pub value: String,
    /// Where the artifact was first seen
    pub context: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Number of sightings, always equal to the length of `packet_indices`
    pub count: u64,
    pub packet_indices: Vec<u64>,
}

/// Identity of a flow, as seen from its first packet
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ConnectionKey {
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
    pub protocol: u8,
}

impl ConnectionKey {
    /// The same flow seen from the other endpoint
    pub fn reverse(&self) -> ConnectionKey {
        ConnectionKey {
            src_ip: self.dst_ip,
            src_port: self.dst_port,
            dst_ip: self.src_ip,
            dst_port: self.src_port,
            protocol: self.protocol,
        }
    }
}

/// Traffic exchanged between two endpoints over one transport protocol
///
/// The source is the sender of the first packet seen. Ports are 0 for protocols without ports.
#[derive(Clone, Debug, Serialize)]
pub struct NetworkConnection {
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
    pub protocol: String,
    pub packets_sent: u64,
    pub packets_received: u64,
    /// Original lengths of the packets sent by the source
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Union of the TCP flags seen in both directions
    pub tcp_flags: TcpFlags,
}

impl NetworkConnection {
    pub fn total_packets(&self) -> u64 {
        self.packets_sent + self.packets_received
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_sent + self.bytes_received
    }
}

/// Domain name seen in DNS traffic
#[derive(Clone, Debug, Serialize)]
pub struct DnsRecord {
    pub packet_index: u64,
    pub timestamp: DateTime<Utc>,
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
    pub domain: String,
    /// Sent from port 53
    pub is_response: bool,
}

/// HTTP request seen in plaintext traffic
#[derive(Clone, Debug, Serialize)]
pub struct HttpRequest {
    pub packet_index: u64,
    pub timestamp: DateTime<Utc>,
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
    pub method: String,
    pub path: String,
    pub version: String,
    /// `Host` header value, or the server address when the header is missing
    pub host: String,
    pub user_agent: Option<String>,
    pub url: String,
    pub payload_preview: Option<String>,
}

/// Everything learned from one capture
///
/// The result is built by a single scan and handed out when the scan completes or is
/// cancelled. A cancelled scan yields a consistent partial result: each packet is either fully
/// accounted for or not at all.
#[derive(Clone, Debug, Serialize)]
pub struct AnalysisResult {
    /// Path of the analyzed file, if read from disk
    pub source: Option<String>,
    pub header: CaptureHeader,
    pub total_packets: u64,
    /// Sum of original packet lengths
    pub total_bytes: u64,
    /// Sum of captured packet lengths
    pub total_captured_bytes: u64,
    pub first_packet_time: Option<DateTime<Utc>>,
    pub last_packet_time: Option<DateTime<Utc>>,
    /// Why the scan stopped, once it has
    pub end_reason: Option<CaptureEnd>,
    pub artifacts: Vec<NetworkArtifact>,
    pub connections: Vec<NetworkConnection>,
    pub dns_records: Vec<DnsRecord>,
    pub http_requests: Vec<HttpRequest>,
    /// Packet count per top-most decoded protocol
    pub protocol_counts: BTreeMap<String, u64>,
    /// Packet count per `destination port/protocol`
    pub port_counts: BTreeMap<String, u64>,
    /// Non-fatal notes: decode issues, degraded reading, early end of capture
    pub errors: Vec<String>,
    /// Notes dropped once `errors` was full
    pub errors_suppressed: u64,

    #[serde(skip)]
    pub(crate) artifact_index: HashMap<(ArtifactType, String), usize>,
    #[serde(skip)]
    pub(crate) connection_index: HashMap<ConnectionKey, usize>,
    #[serde(skip)]
    pub(crate) max_errors: usize,
}

impl AnalysisResult {
    /// Create an empty result for a capture with the given header
    pub fn new(header: CaptureHeader, max_errors: usize) -> AnalysisResult {
        AnalysisResult {
            source: None,
            header,
            total_packets: 0,
            total_bytes: 0,
            total_captured_bytes: 0,
            first_packet_time: None,
            last_packet_time: None,
            end_reason: None,
            artifacts: Vec::new(),
            connections: Vec::new(),
            dns_records: Vec::new(),
            http_requests: Vec::new(),
            protocol_counts: BTreeMap::new(),
            port_counts: BTreeMap::new(),
            errors: Vec::new(),
            errors_suppressed: 0,
            artifact_index: HashMap::new(),
            connection_index: HashMap::new(),
            max_errors,
        }
    }

    /// Look up an artifact, ignoring the case of `value`
    pub fn artifact(&self, artifact_type: ArtifactType, value: &str) -> Option<&NetworkArtifact> {
        let &idx = self
            .artifact_index
            .get(&(artifact_type, value.to_lowercase()))?;
        self.artifacts.get(idx)
    }

    /// Iterate over the artifacts of one type
    pub fn artifacts_of(
        &self,
        artifact_type: ArtifactType,
    ) -> impl Iterator<Item = &NetworkArtifact> + '_ {
        self.artifacts
            .iter()
            .filter(move |a| a.artifact_type == artifact_type)
    }

    /// Look up the connection of a flow, in either direction
    pub fn connection(&self, key: &ConnectionKey) -> Option<&NetworkConnection> {
        let idx = self
            .connection_index
            .get(key)
            .or_else(|| self.connection_index.get(&key.reverse()))?;
        self.connections.get(*idx)
    }

    /// Time between the first and the last packet
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.last_packet_time? - self.first_packet_time?)
    }
}
