use super::{Extraction, Extractor};
use crate::decode::DecodedPacket;

const DNS_PORT: u16 = 53;
const MIN_CANDIDATE_LEN: usize = 5;

/// Domain name heuristic for DNS traffic (port 53)
///
/// This is a text scan, not a DNS message parser: wire-format names are length-prefixed
/// labels, and the length bytes split them into pieces that are not joined back together.
/// Names only show up when they appear as dotted text in the payload.
#[derive(Clone, Copy, Debug, Default)]
pub struct DnsExtractor;

impl Extractor for DnsExtractor {
    fn name(&self) -> &'static str {
        "dns"
    }

    fn applies_to(&self, packet: &DecodedPacket) -> bool {
        packet.has_port(DNS_PORT) && !packet.payload.is_empty()
    }

    fn extract(&self, packet: &DecodedPacket) -> Option<Extraction> {
        let domains = scan_domains(packet.payload);
        if domains.is_empty() {
            None
        } else {
            Some(Extraction::Domains(domains))
        }
    }
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'.' || b == b'-'
}

fn is_candidate(run: &[u8]) -> bool {
    if run.len() < MIN_CANDIDATE_LEN {
        return false;
    }
    let Some(dot) = run.iter().rposition(|&b| b == b'.') else {
        return false;
    };
    let tld = &run[dot + 1..];
    (2..=10).contains(&tld.len()) && tld.iter().all(u8::is_ascii_alphabetic)
}

/// Collect runs of name characters that look like domain names
///
/// A run is kept if it is at least 5 characters long, contains a dot, and ends with a label
/// of 2 to 10 letters. Each name is reported once, in order of first appearance; repeats that
/// differ only by case are dropped.
pub fn scan_domains(payload: &[u8]) -> Vec<String> {
    let mut domains: Vec<String> = Vec::new();
    for run in payload.split(|&b| !is_name_byte(b)) {
        if !is_candidate(run) {
            continue;
        }
        // run only holds ASCII
        let name: String = run.iter().map(|&b| char::from(b)).collect();
        if !domains.iter().any(|d| d.eq_ignore_ascii_case(&name)) {
            domains.push(name);
        }
    }
    domains
}
