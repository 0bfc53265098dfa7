use nom::number::complete::{be_u16, be_u32, be_u8};
use nom::IResult;
use serde::{Serialize, Serializer};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use super::{truncated, DecodeIssue, DecodedPacket, IpProtocol};

const TCP_MIN_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;

/// Set of TCP control flags
///
/// Only the flags relevant to connection bookkeeping are kept: `FIN`, `SYN`, `RST`, `PSH` and
/// `ACK`. `Display` joins their names with `;`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct TcpFlags(u8);

impl TcpFlags {
    pub const FIN: TcpFlags = TcpFlags(0x01);
    pub const SYN: TcpFlags = TcpFlags(0x02);
    pub const RST: TcpFlags = TcpFlags(0x04);
    pub const PSH: TcpFlags = TcpFlags(0x08);
    pub const ACK: TcpFlags = TcpFlags(0x10);

    const MASK: u8 = 0x1f;
    const NAMES: [(TcpFlags, &'static str); 5] = [
        (TcpFlags::SYN, "SYN"),
        (TcpFlags::ACK, "ACK"),
        (TcpFlags::FIN, "FIN"),
        (TcpFlags::RST, "RST"),
        (TcpFlags::PSH, "PSH"),
    ];

    /// Build from the TCP flag byte, ignoring the flags that are not tracked
    pub const fn from_bits(bits: u8) -> TcpFlags {
        TcpFlags(bits & Self::MASK)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: TcpFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Names of the flags that are set, in the order SYN, ACK, FIN, RST, PSH
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        Self::NAMES
            .into_iter()
            .filter(move |(flag, _)| self.contains(*flag))
            .map(|(_, name)| name)
    }
}

impl BitOr for TcpFlags {
    type Output = TcpFlags;

    fn bitor(self, rhs: TcpFlags) -> TcpFlags {
        TcpFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for TcpFlags {
    fn bitor_assign(&mut self, rhs: TcpFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (n, name) in self.names().enumerate() {
            if n > 0 {
                f.write_str(";")?;
            }
            f.write_str(name)?;
        }
        Ok(())
    }
}

impl Serialize for TcpFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.names())
    }
}

struct TcpHeader {
    src_port: u16,
    dst_port: u16,
    data_offset: usize,
    flags: u8,
}

fn parse_tcp_header(i: &[u8]) -> IResult<&[u8], TcpHeader> {
    let (i, src_port) = be_u16(i)?;
    let (i, dst_port) = be_u16(i)?;
    let (i, _seq) = be_u32(i)?;
    let (i, _ack) = be_u32(i)?;
    let (i, offset_reserved) = be_u8(i)?;
    let (i, flags) = be_u8(i)?;
    let (i, _window) = be_u16(i)?;
    let (i, _checksum) = be_u16(i)?;
    let (i, _urgent) = be_u16(i)?;
    let header = TcpHeader {
        src_port,
        dst_port,
        data_offset: usize::from(offset_reserved >> 4) * 4,
        flags,
    };
    Ok((i, header))
}

fn parse_udp_header(i: &[u8]) -> IResult<&[u8], (u16, u16, u16)> {
    let (i, src_port) = be_u16(i)?;
    let (i, dst_port) = be_u16(i)?;
    let (i, length) = be_u16(i)?;
    let (i, _checksum) = be_u16(i)?;
    Ok((i, (src_port, dst_port, length)))
}

fn decode_tcp<'a>(i: &'a [u8], packet: &mut DecodedPacket<'a>) {
    let Ok((_, header)) = parse_tcp_header(i) else {
        packet.issue = Some(truncated("TCP", TCP_MIN_HEADER_LEN, i.len()));
        return;
    };
    packet.src_port = Some(header.src_port);
    packet.dst_port = Some(header.dst_port);
    packet.tcp_flags = TcpFlags::from_bits(header.flags);
    if header.data_offset < TCP_MIN_HEADER_LEN {
        packet.issue = Some(DecodeIssue::BadHeaderLength {
            layer: "TCP",
            length: header.data_offset,
        });
    } else if header.data_offset > i.len() {
        packet.issue = Some(truncated("TCP", header.data_offset, i.len()));
    } else {
        packet.payload = &i[header.data_offset..];
    }
}

fn decode_udp<'a>(i: &'a [u8], packet: &mut DecodedPacket<'a>) {
    let Ok((rem, (src_port, dst_port, length))) = parse_udp_header(i) else {
        packet.issue = Some(truncated("UDP", UDP_HEADER_LEN, i.len()));
        return;
    };
    packet.src_port = Some(src_port);
    packet.dst_port = Some(dst_port);
    let length = usize::from(length);
    packet.payload = if length >= UDP_HEADER_LEN && length - UDP_HEADER_LEN <= rem.len() {
        &rem[..length - UDP_HEADER_LEN]
    } else {
        rem
    };
}

/// Decode the TCP or UDP header; other protocols carry no ports or payload
pub(crate) fn decode_transport<'a>(
    protocol: IpProtocol,
    i: &'a [u8],
    packet: &mut DecodedPacket<'a>,
) {
    match protocol {
        IpProtocol::TCP => decode_tcp(i, packet),
        IpProtocol::UDP => decode_udp(i, packet),
        _ => (),
    }
}
