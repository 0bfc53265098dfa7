use std::net::IpAddr;

use super::{Extraction, Extractor};
use crate::decode::DecodedPacket;

const HTTP_PORT: u16 = 80;
const METHODS: [&str; 5] = ["GET", "POST", "PUT", "HEAD", "DELETE"];

/// Request line and headers of an HTTP request
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HttpFields {
    pub method: String,
    /// Request target, as sent
    pub path: String,
    /// Protocol version, empty for HTTP/0.9 style requests
    pub version: String,
    /// Value of the `Host` header, if any
    pub host: Option<String>,
    pub user_agent: Option<String>,
    /// Absolute URL of the request
    pub url: String,
    /// Beginning of the payload, when previews are enabled
    pub payload_preview: Option<String>,
}

/// Request parser for plaintext HTTP (port 80)
#[derive(Clone, Copy, Debug)]
pub struct HttpExtractor {
    max_payload_bytes: usize,
}

impl HttpExtractor {
    /// Create an extractor keeping up to `max_payload_bytes` of each payload (0 keeps none)
    pub fn new(max_payload_bytes: usize) -> HttpExtractor {
        HttpExtractor { max_payload_bytes }
    }
}

impl Extractor for HttpExtractor {
    fn name(&self) -> &'static str {
        "http"
    }

    fn applies_to(&self, packet: &DecodedPacket) -> bool {
        packet.has_port(HTTP_PORT) && !packet.payload.is_empty()
    }

    fn extract(&self, packet: &DecodedPacket) -> Option<Extraction> {
        let mut fields = parse_http_request(packet.payload, packet.dst_ip)?;
        if self.max_payload_bytes > 0 {
            let n = packet.payload.len().min(self.max_payload_bytes);
            let preview = String::from_utf8_lossy(&packet.payload[..n]);
            fields.payload_preview = Some(preview.into_owned());
        }
        Some(Extraction::Http(fields))
    }
}

fn starts_with_method(payload: &[u8]) -> bool {
    METHODS.iter().any(|m| {
        payload.len() > m.len() && payload.starts_with(m.as_bytes()) && payload[m.len()] == b' '
    })
}

/// Parse the request line and headers at the start of `payload`
///
/// Returns `None` unless the payload starts with one of `GET`, `POST`, `PUT`, `HEAD` or
/// `DELETE` followed by a space. When there is no `Host` header, `server` (the destination
/// address) stands in for the host in the URL. Header names are case-insensitive and the first
/// occurrence wins.
pub fn parse_http_request(payload: &[u8], server: Option<IpAddr>) -> Option<HttpFields> {
    if !starts_with_method(payload) {
        return None;
    }
    let text = String::from_utf8_lossy(payload);
    let mut lines = text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next().unwrap_or("/").to_string();
    let version = parts.next().unwrap_or_default().to_string();

    let mut host = None;
    let mut user_agent = None;
    for line in lines {
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.trim().eq_ignore_ascii_case("host") {
            host.get_or_insert_with(|| value.to_string());
        } else if name.trim().eq_ignore_ascii_case("user-agent") {
            user_agent.get_or_insert_with(|| value.to_string());
        }
    }

    let lower = path.to_ascii_lowercase();
    let url = if lower.starts_with("http://") || lower.starts_with("https://") {
        path.clone()
    } else {
        let authority = match (&host, server) {
            (Some(h), _) if !h.is_empty() => h.clone(),
            (_, Some(IpAddr::V6(ip))) => format!("[{}]", ip),
            (_, Some(ip)) => ip.to_string(),
            (_, None) => String::new(),
        };
        format!("http://{}{}", authority, path)
    };

    Some(HttpFields {
        method,
        path,
        version,
        host,
        user_agent,
        url,
        payload_preview: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const REQUEST: &[u8] = b"GET /payload/stage2.bin?id=7 HTTP/1.1\r\n\
        host: evil.example\r\n\
        User-Agent: curl/8.4.0\r\n\
        Accept: */*\r\n\
        Host: ignored.example\r\n\
        \r\n";

    #[test]
    fn test_parse_request() {
        let fields = parse_http_request(REQUEST, None).expect("request");
        assert_eq!(fields.method, "GET");
        assert_eq!(fields.path, "/payload/stage2.bin?id=7");
        assert_eq!(fields.version, "HTTP/1.1");
        assert_eq!(fields.host.as_deref(), Some("evil.example"));
        assert_eq!(fields.user_agent.as_deref(), Some("curl/8.4.0"));
        assert_eq!(fields.url, "http://evil.example/payload/stage2.bin?id=7");
    }

    #[test]
    fn test_missing_host_uses_server_address() {
        let server = Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)));
        let fields = parse_http_request(b"POST /upload HTTP/1.0\n\n", server).unwrap();
        assert!(fields.host.is_none());
        assert_eq!(fields.url, "http://203.0.113.9/upload");

        let server = Some("2001:db8::1".parse().unwrap());
        let fields = parse_http_request(b"HEAD / HTTP/1.1\r\n", server).unwrap();
        assert_eq!(fields.url, "http://[2001:db8::1]/");
    }

    #[test]
    fn test_absolute_target() {
        let fields =
            parse_http_request(b"GET http://proxy.example/x HTTP/1.1\r\nHost: a.example\r\n", None)
                .unwrap();
        assert_eq!(fields.url, "http://proxy.example/x");
    }

    #[test]
    fn test_not_a_request() {
        for payload in [
            &b"HTTP/1.1 200 OK\r\n"[..],
            b"GETX / HTTP/1.1\r\n",
            b"OPTIONS * HTTP/1.1\r\n",
            b"GET",
            b"",
        ] {
            assert!(parse_http_request(payload, None).is_none());
        }
    }

    #[test]
    fn test_payload_preview_cap() {
        let packet = DecodedPacket {
            dst_port: Some(80),
            payload: REQUEST,
            ..Default::default()
        };
        let Some(Extraction::Http(fields)) = HttpExtractor::new(16).extract(&packet) else {
            panic!("no extraction");
        };
        assert_eq!(fields.payload_preview.as_deref(), Some("GET /payload/sta"));
        let Some(Extraction::Http(fields)) = HttpExtractor::new(0).extract(&packet) else {
            panic!("no extraction");
        };
        assert!(fields.payload_preview.is_none());
    }
}
