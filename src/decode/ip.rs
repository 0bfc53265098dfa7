use nom::bytes::complete::take;
use nom::number::complete::{be_u128, be_u16, be_u32, be_u8};
use nom::IResult;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::{truncated, DecodeIssue, DecodedPacket, IpProtocol};

const IPV4_MIN_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;

const IPV6_HOP_BY_HOP: u8 = 0;
const IPV6_ROUTING: u8 = 43;
const IPV6_FRAGMENT: u8 = 44;
const IPV6_DEST_OPTIONS: u8 = 60;

struct Ipv4Header {
    version_ihl: u8,
    total_length: u16,
    flags_fragment: u16,
    protocol: u8,
    src: Ipv4Addr,
    dst: Ipv4Addr,
}

fn parse_ipv4_header(i: &[u8]) -> IResult<&[u8], Ipv4Header> {
    let (i, version_ihl) = be_u8(i)?;
    let (i, _tos) = be_u8(i)?;
    let (i, total_length) = be_u16(i)?;
    let (i, _id) = be_u16(i)?;
    let (i, flags_fragment) = be_u16(i)?;
    let (i, _ttl) = be_u8(i)?;
    let (i, protocol) = be_u8(i)?;
    let (i, _checksum) = be_u16(i)?;
    let (i, src) = be_u32(i)?;
    let (i, dst) = be_u32(i)?;
    let header = Ipv4Header {
        version_ihl,
        total_length,
        flags_fragment,
        protocol,
        src: Ipv4Addr::from(src),
        dst: Ipv4Addr::from(dst),
    };
    Ok((i, header))
}

/// Decode an IPv4 header, returning the transport protocol and its bytes
///
/// Link-layer padding beyond the total length is dropped. Non-first fragments have their
/// addresses recorded but no transport layer.
pub(crate) fn decode_ipv4<'a>(
    i: &'a [u8],
    packet: &mut DecodedPacket<'a>,
) -> Option<(IpProtocol, &'a [u8])> {
    let Ok((_, header)) = parse_ipv4_header(i) else {
        packet.issue = Some(truncated("IPv4", IPV4_MIN_HEADER_LEN, i.len()));
        return None;
    };
    let protocol = IpProtocol(header.protocol);
    packet.src_ip = Some(IpAddr::V4(header.src));
    packet.dst_ip = Some(IpAddr::V4(header.dst));
    packet.protocol = Some(protocol);

    let ihl = usize::from(header.version_ihl & 0x0f) * 4;
    if ihl < IPV4_MIN_HEADER_LEN {
        packet.issue = Some(DecodeIssue::BadHeaderLength {
            layer: "IPv4",
            length: ihl,
        });
        return None;
    }
    if ihl > i.len() {
        packet.issue = Some(truncated("IPv4", ihl, i.len()));
        return None;
    }
    // a zero total length is common with segmentation offload
    let total_length = usize::from(header.total_length);
    let end = if total_length >= ihl && total_length <= i.len() {
        total_length
    } else {
        i.len()
    };
    if header.flags_fragment & 0x1fff != 0 {
        return None;
    }
    Some((protocol, &i[ihl..end]))
}

struct Ipv6Header {
    payload_length: u16,
    next_header: u8,
    src: Ipv6Addr,
    dst: Ipv6Addr,
}

fn parse_ipv6_header(i: &[u8]) -> IResult<&[u8], Ipv6Header> {
    let (i, _version_class_flow) = be_u32(i)?;
    let (i, payload_length) = be_u16(i)?;
    let (i, next_header) = be_u8(i)?;
    let (i, _hop_limit) = be_u8(i)?;
    let (i, src) = be_u128(i)?;
    let (i, dst) = be_u128(i)?;
    let header = Ipv6Header {
        payload_length,
        next_header,
        src: Ipv6Addr::from(src),
        dst: Ipv6Addr::from(dst),
    };
    Ok((i, header))
}

/// Generic extension header: next header, length in 8-octet units not counting the first
fn parse_extension(i: &[u8]) -> IResult<&[u8], u8> {
    let (_, (next_header, len)) = nom::sequence::pair(be_u8, be_u8)(i)?;
    let (rem, _) = take((usize::from(len) + 1) * 8)(i)?;
    Ok((rem, next_header))
}

/// Fragment header: fixed 8 bytes, returns next header and fragment offset
fn parse_fragment(i: &[u8]) -> IResult<&[u8], (u8, u16)> {
    let (i, next_header) = be_u8(i)?;
    let (i, _reserved) = be_u8(i)?;
    let (i, offset_flags) = be_u16(i)?;
    let (i, _id) = be_u32(i)?;
    Ok((i, (next_header, offset_flags >> 3)))
}

/// Decode an IPv6 header and its extension headers
pub(crate) fn decode_ipv6<'a>(
    i: &'a [u8],
    packet: &mut DecodedPacket<'a>,
) -> Option<(IpProtocol, &'a [u8])> {
    let Ok((mut rem, header)) = parse_ipv6_header(i) else {
        packet.issue = Some(truncated("IPv6", IPV6_HEADER_LEN, i.len()));
        return None;
    };
    packet.src_ip = Some(IpAddr::V6(header.src));
    packet.dst_ip = Some(IpAddr::V6(header.dst));

    let payload_length = usize::from(header.payload_length);
    if payload_length > 0 && payload_length <= rem.len() {
        rem = &rem[..payload_length];
    }
    let mut next_header = header.next_header;
    loop {
        match next_header {
            IPV6_HOP_BY_HOP | IPV6_ROUTING | IPV6_DEST_OPTIONS => match parse_extension(rem) {
                Ok((r, nh)) => {
                    rem = r;
                    next_header = nh;
                }
                Err(_) => {
                    packet.protocol = Some(IpProtocol(next_header));
                    packet.issue = Some(truncated("IPv6 extension", 8, rem.len()));
                    return None;
                }
            },
            IPV6_FRAGMENT => match parse_fragment(rem) {
                Ok((r, (nh, offset))) => {
                    rem = r;
                    next_header = nh;
                    if offset != 0 {
                        packet.protocol = Some(IpProtocol(next_header));
                        return None;
                    }
                }
                Err(_) => {
                    packet.protocol = Some(IpProtocol(next_header));
                    packet.issue = Some(truncated("IPv6 fragment", 8, rem.len()));
                    return None;
                }
            },
            _ => break,
        }
    }
    let protocol = IpProtocol(next_header);
    packet.protocol = Some(protocol);
    Some((protocol, rem))
}
