//! Layer decoding: link layer, IPv4/IPv6, TCP/UDP
//!
//! Decoding is a pure function of the captured bytes and the link type. Every indexed read is
//! preceded by a bounds check; when a layer is too short the decoder stops there, leaving the
//! deeper fields unset, and reports a [`DecodeIssue`]. It never fails.
//!
//! ## Example
//!
//! ```rust
//! use pcap_forensics::decode::{decode_packet, IpProtocol};
//! use pcap_forensics::Linktype;
//!
//! fn describe(data: &[u8]) {
//!     let packet = decode_packet(data, Linktype::ETHERNET);
//!     if packet.protocol == Some(IpProtocol::TCP) {
//!         println!("{} flags {}", packet.flow_label(), packet.tcp_flags);
//!     }
//! }
//! ```

mod ip;
mod link;
mod transport;

pub use transport::TcpFlags;

use rusticata_macros::newtype_enum;
use std::borrow::Cow;
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;

use crate::linktype::Linktype;

/// Protocol carried by a link-layer frame
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct EtherType(pub u16);

newtype_enum! {
impl display EtherType {
    IPV4 = 0x0800,
    ARP = 0x0806,
    VLAN = 0x8100,
    IPV6 = 0x86dd,
}
}

/// Protocol number of the IPv4 `protocol` / IPv6 `next header` field
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct IpProtocol(pub u8);

newtype_enum! {
impl display IpProtocol {
    ICMP = 1,
    TCP = 6,
    UDP = 17,
    ICMPV6 = 58,
}
}

impl IpProtocol {
    /// Short protocol name used in histograms and exports
    pub fn name(self) -> Cow<'static, str> {
        match self {
            IpProtocol::TCP => Cow::Borrowed("TCP"),
            IpProtocol::UDP => Cow::Borrowed("UDP"),
            IpProtocol::ICMP => Cow::Borrowed("ICMP"),
            IpProtocol::ICMPV6 => Cow::Borrowed("ICMPv6"),
            IpProtocol(n) => Cow::Owned(format!("IP-{}", n)),
        }
    }
}

/// Hardware address
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Structural problem found while decoding a packet
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DecodeIssue {
    #[error("{layer} header truncated: need {needed} bytes, have {available}")]
    Truncated {
        layer: &'static str,
        needed: usize,
        available: usize,
    },
    #[error("{layer} header length {length} is invalid")]
    BadHeaderLength { layer: &'static str, length: usize },
}

/// Fields recovered from one packet
///
/// Fields of layers that could not be decoded are `None`; `payload` is the transport payload
/// of TCP and UDP packets, and empty otherwise.
#[derive(Clone, Debug, Default)]
pub struct DecodedPacket<'a> {
    pub src_mac: Option<MacAddr>,
    pub dst_mac: Option<MacAddr>,
    pub ethertype: Option<EtherType>,
    pub src_ip: Option<IpAddr>,
    pub dst_ip: Option<IpAddr>,
    pub protocol: Option<IpProtocol>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub tcp_flags: TcpFlags,
    pub payload: &'a [u8],
    pub issue: Option<DecodeIssue>,
}

impl<'a> DecodedPacket<'a> {
    /// Name of the deepest protocol that was identified
    pub fn protocol_name(&self) -> Cow<'static, str> {
        if let Some(proto) = self.protocol {
            return proto.name();
        }
        match self.ethertype {
            Some(EtherType::IPV4) => Cow::Borrowed("IPv4"),
            Some(EtherType::IPV6) => Cow::Borrowed("IPv6"),
            Some(EtherType::ARP) => Cow::Borrowed("ARP"),
            Some(EtherType(n)) => Cow::Owned(format!("EtherType-0x{:04x}", n)),
            None => Cow::Borrowed("Unknown"),
        }
    }

    /// Returns true if either endpoint uses `port`
    pub fn has_port(&self, port: u16) -> bool {
        self.src_port == Some(port) || self.dst_port == Some(port)
    }

    /// `src:port -> dst:port` description of the packet endpoints
    pub fn flow_label(&self) -> String {
        fn endpoint(ip: Option<IpAddr>, port: Option<u16>) -> String {
            match (ip, port) {
                (Some(IpAddr::V6(ip)), Some(port)) => format!("[{}]:{}", ip, port),
                (Some(ip), Some(port)) => format!("{}:{}", ip, port),
                (Some(ip), None) => ip.to_string(),
                (None, _) => "?".to_string(),
            }
        }
        format!(
            "{} {} -> {}",
            self.protocol_name(),
            endpoint(self.src_ip, self.src_port),
            endpoint(self.dst_ip, self.dst_port)
        )
    }
}

/// Decode the link, network and transport layers of a packet
pub fn decode_packet(data: &[u8], linktype: Linktype) -> DecodedPacket<'_> {
    let mut packet = DecodedPacket::default();
    let Some((ethertype, l3)) = link::decode_link(data, linktype, &mut packet) else {
        return packet;
    };
    packet.ethertype = Some(ethertype);
    let transport = match ethertype {
        EtherType::IPV4 => ip::decode_ipv4(l3, &mut packet),
        EtherType::IPV6 => ip::decode_ipv6(l3, &mut packet),
        _ => None,
    };
    if let Some((protocol, l4)) = transport {
        transport::decode_transport(protocol, l4, &mut packet);
    }
    packet
}

pub(crate) fn truncated(layer: &'static str, needed: usize, available: usize) -> DecodeIssue {
    DecodeIssue::Truncated {
        layer,
        needed,
        available,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    // Ethernet + IPv4 + TCP SYN/ACK, 4 bytes of payload
    const TCP_FRAME: [u8; 58] = hex!(
        "00 11 22 33 44 55 66 77 88 99 aa bb 08 00
         45 00 00 2c 00 01 00 00 40 06 00 00 0a 00 00 01 c0 a8 01 02
         d4 31 00 50 00 00 00 01 00 00 00 00 50 12 ff ff 00 00 00 00
         de ad be ef"
    );

    #[test]
    fn test_decode_ethernet_ipv4_tcp() {
        let p = decode_packet(&TCP_FRAME, Linktype::ETHERNET);
        assert_eq!(p.dst_mac, Some(MacAddr(hex!("00 11 22 33 44 55"))));
        assert_eq!(p.src_mac, Some(MacAddr(hex!("66 77 88 99 aa bb"))));
        assert_eq!(p.ethertype, Some(EtherType::IPV4));
        assert_eq!(p.src_ip, Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
        assert_eq!(p.dst_ip, Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2))));
        assert_eq!(p.protocol, Some(IpProtocol::TCP));
        assert_eq!(p.src_port, Some(54321));
        assert_eq!(p.dst_port, Some(80));
        assert_eq!(p.tcp_flags, TcpFlags::SYN | TcpFlags::ACK);
        assert_eq!(p.payload, &hex!("de ad be ef"));
        assert!(p.issue.is_none());
        assert_eq!(p.protocol_name(), "TCP");
        assert_eq!(p.flow_label(), "TCP 10.0.0.1:54321 -> 192.168.1.2:80");
    }

    #[test]
    fn test_decode_ip_and_tcp_options() {
        // IHL 6 (router alert), TCP data offset 8 (MSS, NOPs, window scale, SACK permitted)
        let frame = hex!(
            "00 11 22 33 44 55 66 77 88 99 aa bb 08 00
             46 00 00 3c 00 01 00 00 40 06 00 00 0a 00 00 01 c0 a8 01 02
             94 04 00 00
             d4 31 00 50 00 00 00 01 00 00 00 00 80 18 ff ff 00 00 00 00
             02 04 05 b4 01 01 03 03 07 04 02 00
             6f 70 74 21"
        );
        let p = decode_packet(&frame, Linktype::ETHERNET);
        assert!(p.issue.is_none());
        assert_eq!(p.dst_ip, Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2))));
        assert_eq!(p.src_port, Some(54321));
        assert_eq!(p.dst_port, Some(80));
        assert_eq!(p.tcp_flags, TcpFlags::PSH | TcpFlags::ACK);
        assert_eq!(p.payload, b"opt!");
    }

    #[test]
    fn test_decode_short_frames() {
        for len in 0..TCP_FRAME.len() {
            // must never panic, whatever the cut
            let p = decode_packet(&TCP_FRAME[..len], Linktype::ETHERNET);
            if len < 14 {
                assert!(p.ethertype.is_none());
            }
            if len < 34 {
                assert!(p.src_ip.is_none());
            }
            if len < 54 {
                assert!(p.src_port.is_none());
                assert!(len == 0 || p.issue.is_some());
            }
        }
    }

    #[test]
    fn test_decode_arp() {
        let mut frame = TCP_FRAME[..42].to_vec();
        frame[12] = 0x08;
        frame[13] = 0x06;
        let p = decode_packet(&frame, Linktype::ETHERNET);
        assert_eq!(p.ethertype, Some(EtherType::ARP));
        assert!(p.src_ip.is_none());
        assert!(p.issue.is_none());
        assert_eq!(p.protocol_name(), "ARP");
    }

    #[test]
    fn test_decode_raw_ip() {
        let p = decode_packet(&TCP_FRAME[14..], Linktype::RAW);
        assert_eq!(p.dst_port, Some(80));
        let p = decode_packet(&TCP_FRAME[14..], Linktype::IPV4);
        assert_eq!(p.src_port, Some(54321));
        assert!(p.src_mac.is_none());
    }

    #[test]
    fn test_unsupported_linktype() {
        let p = decode_packet(&TCP_FRAME, Linktype(147));
        assert!(p.ethertype.is_none());
        assert!(p.issue.is_none());
        assert_eq!(p.protocol_name(), "Unknown");
    }
}
