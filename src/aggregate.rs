//! Folding decoded packets into an [`AnalysisResult`]

use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::capture::RawPacket;
use crate::decode::{DecodedPacket, IpProtocol, TcpFlags};
use crate::extract::{Extraction, HttpFields};
use crate::model::{
    AnalysisResult, ArtifactType, ConnectionKey, DnsRecord, HttpRequest, NetworkArtifact,
    NetworkConnection,
};

fn bump(counts: &mut BTreeMap<String, u64>, key: Cow<str>) {
    match counts.get_mut(key.as_ref()) {
        Some(count) => *count += 1,
        None => {
            counts.insert(key.into_owned(), 1);
        }
    }
}

/// Host part of a `Host` header, if it is a name rather than an address literal
fn host_domain(host: &str) -> Option<&str> {
    // bracketed or bare IPv6 literal
    if host.starts_with('[') || host.matches(':').count() > 1 || host.parse::<IpAddr>().is_ok() {
        return None;
    }
    let name = match host.split_once(':') {
        Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
        Some(_) => return None,
        None => host,
    };
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.' || b == b'_');
    if !valid || name.parse::<IpAddr>().is_ok() {
        None
    } else {
        Some(name)
    }
}

impl AnalysisResult {
    /// Store a non-fatal note, or count it once the configured maximum is reached
    pub fn add_error<S: Into<String>>(&mut self, note: S) {
        if self.errors.len() < self.max_errors {
            self.errors.push(note.into());
        } else {
            self.errors_suppressed += 1;
        }
    }

    /// Record one sighting of an artifact
    ///
    /// `context` is only evaluated for the first sighting.
    pub fn upsert_artifact<F>(
        &mut self,
        artifact_type: ArtifactType,
        value: &str,
        context: F,
        packet_index: u64,
        timestamp: DateTime<Utc>,
    ) where
        F: FnOnce() -> String,
    {
        let key = (artifact_type, value.to_lowercase());
        if let Some(&idx) = self.artifact_index.get(&key) {
            let artifact = &mut self.artifacts[idx];
            artifact.count += 1;
            artifact.packet_indices.push(packet_index);
            artifact.first_seen = artifact.first_seen.min(timestamp);
            artifact.last_seen = artifact.last_seen.max(timestamp);
            return;
        }
        self.artifact_index.insert(key, self.artifacts.len());
        self.artifacts.push(NetworkArtifact {
            artifact_type,
            value: value.to_string(),
            context: context(),
            first_seen: timestamp,
            last_seen: timestamp,
            count: 1,
            packet_indices: vec![packet_index],
        });
    }

    /// Account one packet of `bytes` original bytes to the flow `key`
    ///
    /// If the flow was first seen in the other direction, the packet counts as received by
    /// that connection.
    pub fn upsert_connection(
        &mut self,
        key: ConnectionKey,
        bytes: u64,
        flags: TcpFlags,
        timestamp: DateTime<Utc>,
    ) {
        let (idx, forward) = if let Some(&idx) = self.connection_index.get(&key) {
            (idx, true)
        } else if let Some(&idx) = self.connection_index.get(&key.reverse()) {
            (idx, false)
        } else {
            let idx = self.connections.len();
            self.connection_index.insert(key, idx);
            self.connections.push(NetworkConnection {
                src_ip: key.src_ip,
                src_port: key.src_port,
                dst_ip: key.dst_ip,
                dst_port: key.dst_port,
                protocol: IpProtocol(key.protocol).name().into_owned(),
                packets_sent: 0,
                packets_received: 0,
                bytes_sent: 0,
                bytes_received: 0,
                first_seen: timestamp,
                last_seen: timestamp,
                tcp_flags: TcpFlags::default(),
            });
            (idx, true)
        };
        let conn = &mut self.connections[idx];
        if forward {
            conn.packets_sent += 1;
            conn.bytes_sent += bytes;
        } else {
            conn.packets_received += 1;
            conn.bytes_received += bytes;
        }
        conn.tcp_flags |= flags;
        conn.first_seen = conn.first_seen.min(timestamp);
        conn.last_seen = conn.last_seen.max(timestamp);
    }

    /// Account for one packet and what was extracted from it
    pub(crate) fn fold_packet(
        &mut self,
        raw: &RawPacket,
        packet: &DecodedPacket,
        extractions: &[Extraction],
    ) {
        let ts = raw.timestamp;
        self.total_packets += 1;
        self.total_bytes += u64::from(raw.origlen);
        self.total_captured_bytes += u64::from(raw.caplen);
        self.first_packet_time = Some(self.first_packet_time.map_or(ts, |t| t.min(ts)));
        self.last_packet_time = Some(self.last_packet_time.map_or(ts, |t| t.max(ts)));

        bump(&mut self.protocol_counts, packet.protocol_name());
        if let (Some(port), Some(protocol)) = (packet.dst_port, packet.protocol) {
            bump(
                &mut self.port_counts,
                Cow::Owned(format!("{}/{}", port, protocol.name())),
            );
        }
        if let Some(issue) = &packet.issue {
            self.add_error(format!("packet {}: {}", raw.index, issue));
        }

        let (Some(src_ip), Some(dst_ip)) = (packet.src_ip, packet.dst_ip) else {
            return;
        };
        let key = ConnectionKey {
            src_ip,
            src_port: packet.src_port.unwrap_or(0),
            dst_ip,
            dst_port: packet.dst_port.unwrap_or(0),
            protocol: packet.protocol.unwrap_or_default().0,
        };
        self.upsert_connection(key, u64::from(raw.origlen), packet.tcp_flags, ts);

        let flow = || packet.flow_label();
        self.upsert_artifact(
            ArtifactType::IpAddress,
            &src_ip.to_string(),
            || format!("source of {}", flow()),
            raw.index,
            ts,
        );
        self.upsert_artifact(
            ArtifactType::IpAddress,
            &dst_ip.to_string(),
            || format!("destination of {}", flow()),
            raw.index,
            ts,
        );

        for extraction in extractions {
            match extraction {
                Extraction::Domains(domains) => {
                    for domain in domains {
                        self.fold_dns(raw, &key, domain);
                    }
                }
                Extraction::Http(fields) => self.fold_http(raw, packet, &key, fields),
                Extraction::ServerName(name) => self.upsert_artifact(
                    ArtifactType::TlsSni,
                    name,
                    || format!("TLS Client Hello, {}", flow()),
                    raw.index,
                    ts,
                ),
            }
        }
    }

    fn fold_dns(&mut self, raw: &RawPacket, key: &ConnectionKey, domain: &str) {
        self.upsert_artifact(
            ArtifactType::Domain,
            domain,
            || format!("DNS payload, {} -> {}", key.src_ip, key.dst_ip),
            raw.index,
            raw.timestamp,
        );
        self.dns_records.push(DnsRecord {
            packet_index: raw.index,
            timestamp: raw.timestamp,
            src_ip: key.src_ip,
            src_port: key.src_port,
            dst_ip: key.dst_ip,
            dst_port: key.dst_port,
            domain: domain.to_string(),
            is_response: key.src_port == 53,
        });
    }

    fn fold_http(
        &mut self,
        raw: &RawPacket,
        packet: &DecodedPacket,
        key: &ConnectionKey,
        fields: &HttpFields,
    ) {
        let ts = raw.timestamp;
        if let Some(domain) = fields.host.as_deref().and_then(host_domain) {
            self.upsert_artifact(
                ArtifactType::Domain,
                domain,
                || format!("HTTP Host header, {}", packet.flow_label()),
                raw.index,
                ts,
            );
        }
        self.upsert_artifact(
            ArtifactType::Url,
            &fields.url,
            || format!("HTTP {} request, {}", fields.method, packet.flow_label()),
            raw.index,
            ts,
        );
        if let Some(user_agent) = fields.user_agent.as_deref().filter(|ua| !ua.is_empty()) {
            self.upsert_artifact(
                ArtifactType::UserAgent,
                user_agent,
                || format!("HTTP User-Agent header, {}", packet.flow_label()),
                raw.index,
                ts,
            );
        }
        let host = match &fields.host {
            Some(host) => host.clone(),
            None => key.dst_ip.to_string(),
        };
        self.http_requests.push(HttpRequest {
            packet_index: raw.index,
            timestamp: ts,
            src_ip: key.src_ip,
            src_port: key.src_port,
            dst_ip: key.dst_ip,
            dst_port: key.dst_port,
            method: fields.method.clone(),
            path: fields.path.clone(),
            version: fields.version.clone(),
            host,
            user_agent: fields.user_agent.clone(),
            url: fields.url.clone(),
            payload_preview: fields.payload_preview.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{parse_capture_header, CaptureHeader};
    use crate::linktype::Linktype;
    use std::net::Ipv4Addr;

    fn empty_result(max_errors: usize) -> AnalysisResult {
        let header = hex!(
            "d4 c3 b2 a1 02 00 04 00 00 00 00 00 00 00 00 00
             ff ff 00 00 01 00 00 00"
        );
        let (_, header): (_, CaptureHeader) = parse_capture_header(&header).unwrap();
        AnalysisResult::new(header, max_errors)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn udp(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16) -> DecodedPacket<'static> {
        DecodedPacket {
            src_ip: Some(IpAddr::from(src)),
            dst_ip: Some(IpAddr::from(dst)),
            protocol: Some(IpProtocol::UDP),
            src_port: Some(sport),
            dst_port: Some(dport),
            ..Default::default()
        }
    }

    fn raw(index: u64, secs: i64, origlen: u32) -> RawPacket<'static> {
        RawPacket {
            index,
            timestamp: at(secs),
            caplen: origlen.min(64),
            origlen,
            linktype: Linktype::ETHERNET,
            data: &[],
        }
    }

    #[test]
    fn test_bidirectional_connection() {
        let mut r = empty_result(10);
        let query = udp([10, 0, 0, 5], 40000, [8, 8, 8, 8], 53);
        let reply = udp([8, 8, 8, 8], 53, [10, 0, 0, 5], 40000);
        r.fold_packet(&raw(0, 100, 74), &query, &[]);
        r.fold_packet(&raw(1, 101, 90), &reply, &[]);
        assert_eq!(r.connections.len(), 1);
        let c = &r.connections[0];
        assert_eq!(c.src_ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!((c.packets_sent, c.packets_received), (1, 1));
        assert_eq!(c.bytes_sent + c.bytes_received, 74 + 90);
        assert_eq!(c.protocol, "UDP");
        assert_eq!((c.first_seen, c.last_seen), (at(100), at(101)));
        assert_eq!(r.total_bytes, 164);
        assert_eq!(r.port_counts.get("53/UDP"), Some(&1));
        assert_eq!(r.port_counts.get("40000/UDP"), Some(&1));
        assert_eq!(r.protocol_counts.get("UDP"), Some(&2));
    }

    #[test]
    fn test_repeated_ip_artifact() {
        let mut r = empty_result(10);
        let p = udp([10, 0, 0, 5], 40000, [8, 8, 8, 8], 53);
        for n in 0..4 {
            r.fold_packet(&raw(n, 10 - n as i64, 60), &p, &[]);
        }
        assert_eq!(r.artifacts_of(ArtifactType::IpAddress).count(), 2);
        let a = r.artifact(ArtifactType::IpAddress, "8.8.8.8").unwrap();
        assert_eq!(a.count, 4);
        assert_eq!(a.count as usize, a.packet_indices.len());
        assert_eq!(a.packet_indices, vec![0, 1, 2, 3]);
        // out-of-order timestamps still widen the window
        assert_eq!((a.first_seen, a.last_seen), (at(7), at(10)));
        assert!(a.context.starts_with("destination of UDP"));
    }

    #[test]
    fn test_artifact_identity_ignores_case() {
        let mut r = empty_result(10);
        r.upsert_artifact(ArtifactType::Domain, "Evil.Example", String::new, 0, at(1));
        r.upsert_artifact(ArtifactType::Domain, "evil.example", String::new, 1, at(2));
        r.upsert_artifact(ArtifactType::TlsSni, "evil.example", String::new, 1, at(2));
        assert_eq!(r.artifacts.len(), 2);
        assert_eq!(r.artifacts[0].value, "Evil.Example");
        assert_eq!(r.artifacts[0].count, 2);
        assert!(r.artifact(ArtifactType::Domain, "EVIL.EXAMPLE").is_some());
    }

    #[test]
    fn test_http_extraction_fold() {
        let mut r = empty_result(10);
        let p = DecodedPacket {
            protocol: Some(IpProtocol::TCP),
            ..udp([10, 0, 0, 5], 50000, [198, 51, 100, 7], 80)
        };
        let fields = HttpFields {
            method: "GET".into(),
            path: "/a".into(),
            version: "HTTP/1.1".into(),
            host: Some("evil.example:8080".into()),
            user_agent: Some("agent/1.0".into()),
            url: "http://evil.example:8080/a".into(),
            payload_preview: None,
        };
        r.fold_packet(&raw(0, 1, 200), &p, &[Extraction::Http(fields)]);
        assert_eq!(r.http_requests.len(), 1);
        assert_eq!(r.http_requests[0].host, "evil.example:8080");
        assert!(r.artifact(ArtifactType::Domain, "evil.example").is_some());
        assert!(r.artifact(ArtifactType::Url, "http://evil.example:8080/a").is_some());
        assert!(r.artifact(ArtifactType::UserAgent, "agent/1.0").is_some());
    }

    #[test]
    fn test_error_bound() {
        let mut r = empty_result(2);
        for n in 0..5 {
            r.add_error(format!("note {}", n));
        }
        assert_eq!(r.errors, vec!["note 0", "note 1"]);
        assert_eq!(r.errors_suppressed, 3);
    }

    #[test]
    fn test_host_domain() {
        assert_eq!(host_domain("evil.example"), Some("evil.example"));
        assert_eq!(host_domain("evil.example:8080"), Some("evil.example"));
        assert_eq!(host_domain("192.0.2.1:80"), None);
        assert_eq!(host_domain("[2001:db8::1]:80"), None);
        assert_eq!(host_domain(""), None);
        // bare IPv6 literals are not split at their last colon
        assert_eq!(host_domain("fe80::1"), None);
        assert_eq!(host_domain("::1"), None);
        assert_eq!(host_domain("evil.example:http"), None);
        assert_eq!(host_domain("evil example"), None);
        assert_eq!(host_domain("<script>.example"), None);
    }
}
