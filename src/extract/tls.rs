use super::{Extraction, Extractor};
use crate::decode::DecodedPacket;

const TLS_PORT: u16 = 443;
const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
// record header (5), handshake header (4), client version (2), random (32)
const CLIENT_HELLO_FIXED_LEN: usize = 43;
// extension type (2), extension length (2), list length (2), name type (1), name length (2)
const SNI_PREFIX_LEN: usize = 9;

/// Server Name Indication heuristic for TLS (port 443)
///
/// The Client Hello is not walked field by field: after the record marker, the payload is
/// scanned for an extension of type 0 whose nested lengths agree with each other. Handshakes
/// split over several segments are missed.
#[derive(Clone, Copy, Debug, Default)]
pub struct TlsSniExtractor;

impl Extractor for TlsSniExtractor {
    fn name(&self) -> &'static str {
        "tls-sni"
    }

    fn applies_to(&self, packet: &DecodedPacket) -> bool {
        packet.has_port(TLS_PORT) && packet.payload.len() > CLIENT_HELLO_FIXED_LEN
    }

    fn extract(&self, packet: &DecodedPacket) -> Option<Extraction> {
        scan_server_name(packet.payload).map(Extraction::ServerName)
    }
}

fn be16(data: &[u8], at: usize) -> usize {
    usize::from(u16::from_be_bytes([data[at], data[at + 1]]))
}

fn is_hostname(name: &[u8]) -> bool {
    !name.is_empty()
        && name
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.' || b == b'_')
}

fn find_handshake(payload: &[u8]) -> Option<usize> {
    payload
        .windows(3)
        .position(|w| w[0] == CONTENT_TYPE_HANDSHAKE && w[1] == 0x03 && (1..=3).contains(&w[2]))
}

/// Look for a host name in what may be a TLS Client Hello
///
/// The first handshake record marker (`0x16 0x03 0x01..=0x03`) anchors the scan. From the
/// first possible extension offset, each `0x00 0x00` pair is tried as an SNI extension: its
/// extension, list and name lengths must be consistent, the name must fit in the payload and
/// hold only host name characters. Candidates failing any check are skipped.
pub fn scan_server_name(payload: &[u8]) -> Option<String> {
    let start = find_handshake(payload)? + CLIENT_HELLO_FIXED_LEN;
    let mut i = start;
    while i + SNI_PREFIX_LEN <= payload.len() {
        if payload[i] != 0 || payload[i + 1] != 0 {
            i += 1;
            continue;
        }
        let ext_len = be16(payload, i + 2);
        let list_len = be16(payload, i + 4);
        let name_type = payload[i + 6];
        let name_len = be16(payload, i + 7);
        let name_start = i + SNI_PREFIX_LEN;
        let consistent = name_type == 0
            && ext_len == list_len + 2
            && list_len == name_len + 3
            && name_start + name_len <= payload.len();
        if consistent {
            let name = &payload[name_start..name_start + name_len];
            if is_hostname(name) {
                // is_hostname only accepts ASCII
                return Some(name.iter().map(|&b| char::from(b)).collect());
            }
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_hello(server_name: &str) -> Vec<u8> {
        let name = server_name.as_bytes();
        let mut sni = vec![0x00, 0x00];
        sni.extend_from_slice(&(name.len() as u16 + 5).to_be_bytes());
        sni.extend_from_slice(&(name.len() as u16 + 3).to_be_bytes());
        sni.push(0);
        sni.extend_from_slice(&(name.len() as u16).to_be_bytes());
        sni.extend_from_slice(name);
        // supported_versions, after the SNI extension
        let other = hex!("00 2b 00 03 02 03 04");

        let mut body = hex!("03 03").to_vec();
        body.extend_from_slice(&[0x5a; 32]);
        // empty session id, one cipher suite, null compression
        body.extend_from_slice(&hex!("00 00 02 13 01 01 00"));
        body.extend_from_slice(&((sni.len() + other.len()) as u16).to_be_bytes());
        body.extend_from_slice(&sni);
        body.extend_from_slice(&other);

        let mut hs = vec![0x01, 0x00];
        hs.extend_from_slice(&(body.len() as u16).to_be_bytes());
        hs.extend_from_slice(&body);

        let mut record = hex!("16 03 01").to_vec();
        record.extend_from_slice(&(hs.len() as u16).to_be_bytes());
        record.extend_from_slice(&hs);
        record
    }

    #[test]
    fn test_client_hello_sni() {
        let hello = client_hello("example.test");
        assert_eq!(scan_server_name(&hello).as_deref(), Some("example.test"));
    }

    #[test]
    fn test_sni_after_leading_bytes() {
        let mut payload = vec![0x00; 7];
        payload.extend(client_hello("cdn.example.net"));
        assert_eq!(
            scan_server_name(&payload).as_deref(),
            Some("cdn.example.net")
        );
    }

    #[test]
    fn test_truncated_hello() {
        let hello = client_hello("example.test");
        // cut inside the host name
        assert!(scan_server_name(&hello[..hello.len() - 12]).is_none());
        assert!(scan_server_name(&hello[..20]).is_none());
    }

    #[test]
    fn test_invalid_name_is_skipped() {
        let mut hello = client_hello("bad name");
        assert!(scan_server_name(&hello).is_none());
        // no handshake marker
        hello[0] = 0x17;
        assert!(scan_server_name(&hello).is_none());
    }

    #[test]
    fn test_extractor() {
        let hello = client_hello("example.test");
        let packet = DecodedPacket {
            src_port: Some(51000),
            dst_port: Some(443),
            payload: &hello,
            ..Default::default()
        };
        assert!(TlsSniExtractor.applies_to(&packet));
        assert_eq!(
            TlsSniExtractor.extract(&packet),
            Some(Extraction::ServerName("example.test".into()))
        );
    }
}
