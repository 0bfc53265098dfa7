//! Content extractors
//!
//! Each extractor is a best-effort heuristic over the transport payload of one packet, gated on
//! a well-known port on either endpoint. Extractors never fail: anything they cannot make sense
//! of yields no extraction. Their results are investigative leads, not decoded protocol data;
//! false positives and false negatives are expected.

mod dns;
mod http;
mod tls;

pub use dns::{scan_domains, DnsExtractor};
pub use http::{parse_http_request, HttpExtractor, HttpFields};
pub use tls::{scan_server_name, TlsSniExtractor};

use crate::decode::DecodedPacket;
use crate::options::AnalyzerOptions;

/// Result of a successful extraction
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Extraction {
    /// Domain-like names found in a DNS payload, each reported once
    Domains(Vec<String>),
    /// An HTTP request line and its interesting headers
    Http(HttpFields),
    /// Host name announced in a TLS Client Hello
    ServerName(String),
}

/// A payload extraction strategy
pub trait Extractor: Send + Sync {
    /// Short identifier, used in logs
    fn name(&self) -> &'static str;

    /// Returns true if the packet should be handed to [`extract`](Extractor::extract)
    fn applies_to(&self, packet: &DecodedPacket) -> bool;

    /// Inspect the packet payload
    fn extract(&self, packet: &DecodedPacket) -> Option<Extraction>;
}

/// Build the extractors enabled by `options`, in a fixed order
pub fn build_extractors(options: &AnalyzerOptions) -> Vec<Box<dyn Extractor>> {
    let mut extractors: Vec<Box<dyn Extractor>> = Vec::with_capacity(3);
    if options.extract_dns {
        extractors.push(Box::new(DnsExtractor));
    }
    if options.extract_http {
        extractors.push(Box::new(HttpExtractor::new(options.max_payload_bytes)));
    }
    if options.extract_tls_sni {
        extractors.push(Box::new(TlsSniExtractor));
    }
    extractors
}
