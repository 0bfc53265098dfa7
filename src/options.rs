use serde::{Deserialize, Serialize};

/// Settings of one analysis run
///
/// Every field has a default, so a partial JSON document is enough to override a few of them:
///
/// ```rust
/// use pcap_forensics::AnalyzerOptions;
///
/// let options: AnalyzerOptions =
///     serde_json::from_str(r#"{ "extract_dns": false, "max_packets": 5000 }"#).unwrap();
/// assert!(!options.extract_dns);
/// assert!(options.extract_http);
/// assert_eq!(options.max_packets, Some(5000));
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyzerOptions {
    /// Scan port 53 payloads for domain names
    pub extract_dns: bool,
    /// Parse port 80 payloads as HTTP requests
    pub extract_http: bool,
    /// Look for the server name in port 443 Client Hellos
    pub extract_tls_sni: bool,
    /// Bytes of each HTTP payload kept as a preview, 0 to keep none
    pub max_payload_bytes: usize,
    /// Stop after this many packets
    pub max_packets: Option<u64>,
    /// Packets between two progress reports, 0 to disable them
    pub progress_interval: u64,
    /// Number of non-fatal notes stored in the result; further notes are only counted
    pub max_errors: usize,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        AnalyzerOptions {
            extract_dns: true,
            extract_http: true,
            extract_tls_sni: true,
            max_payload_bytes: 512,
            max_packets: None,
            progress_interval: 10_000,
            max_errors: 1000,
        }
    }
}
