use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u32, be_u64};
use nom::IResult;

use super::{truncated, DecodedPacket, EtherType, MacAddr};
use crate::linktype::Linktype;

const ETHERNET_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const SLL_HEADER_LEN: usize = 16;
const SLL2_HEADER_LEN: usize = 20;

struct EthernetHeader {
    dst: MacAddr,
    src: MacAddr,
    ethertype: u16,
}

fn parse_mac(i: &[u8]) -> IResult<&[u8], MacAddr> {
    let (i, b) = take(6usize)(i)?;
    Ok((i, MacAddr([b[0], b[1], b[2], b[3], b[4], b[5]])))
}

fn parse_ethernet_header(i: &[u8]) -> IResult<&[u8], EthernetHeader> {
    let (i, dst) = parse_mac(i)?;
    let (i, src) = parse_mac(i)?;
    let (i, ethertype) = be_u16(i)?;
    Ok((i, EthernetHeader { dst, src, ethertype }))
}

/// IEEE 802.3 Ethernet, with at most one 802.1Q tag
fn decode_ethernet<'a>(
    i: &'a [u8],
    packet: &mut DecodedPacket<'a>,
) -> Option<(EtherType, &'a [u8])> {
    let Ok((rem, eth)) = parse_ethernet_header(i) else {
        if !i.is_empty() {
            packet.issue = Some(truncated("Ethernet", ETHERNET_HEADER_LEN, i.len()));
        }
        return None;
    };
    packet.dst_mac = Some(eth.dst);
    packet.src_mac = Some(eth.src);
    let ethertype = EtherType(eth.ethertype);
    if ethertype != EtherType::VLAN {
        return Some((ethertype, rem));
    }
    let tagged: IResult<&[u8], u16> = take(2usize)(rem).and_then(|(rem, _tci)| be_u16(rem));
    match tagged {
        Ok((rem, inner)) => Some((EtherType(inner), rem)),
        Err(_) => {
            packet.ethertype = Some(ethertype);
            packet.issue = Some(truncated("802.1Q", VLAN_TAG_LEN, rem.len()));
            None
        }
    }
}

/// Raw IP: the version nibble tells IPv4 from IPv6
fn decode_raw(i: &[u8]) -> Option<(EtherType, &[u8])> {
    let version = i.first()? >> 4;
    match version {
        4 => Some((EtherType::IPV4, i)),
        6 => Some((EtherType::IPV6, i)),
        _ => None,
    }
}

/// BSD loopback encapsulation
///
/// The 4-byte address family is in the byte order of the capturing host for `NULL`, and in
/// network order for `LOOP`; both orders are accepted. 2 is IPv4; 24, 28 and 30 are IPv6.
fn decode_null<'a>(
    i: &'a [u8],
    packet: &mut DecodedPacket<'a>,
) -> Option<(EtherType, &'a [u8])> {
    if i.len() < 4 {
        packet.issue = Some(truncated("Loopback", 4, i.len()));
        return None;
    }
    let mut family = u32::from_le_bytes([i[0], i[1], i[2], i[3]]);
    if family > 0xffff {
        family = family.swap_bytes();
    }
    match family {
        2 => Some((EtherType::IPV4, &i[4..])),
        24 | 28 | 30 => Some((EtherType::IPV6, &i[4..])),
        _ => None,
    }
}

fn parse_sll_header(i: &[u8]) -> IResult<&[u8], u16> {
    let (i, _packet_type) = be_u16(i)?;
    let (i, _arphrd_type) = be_u16(i)?;
    let (i, _ll_addr_len) = be_u16(i)?;
    let (i, _ll_addr) = be_u64(i)?;
    let (i, proto) = be_u16(i)?;
    Ok((i, proto))
}

fn parse_sll2_header(i: &[u8]) -> IResult<&[u8], u16> {
    let (i, protocol_type) = be_u16(i)?;
    let (i, _reserved) = be_u16(i)?;
    let (i, _interface_index) = be_u32(i)?;
    let (i, _arphrd_type) = be_u16(i)?;
    let (i, _addr) = take(10usize)(i)?;
    Ok((i, protocol_type))
}

/// Strip the link layer, returning the layer-3 protocol and data
pub(crate) fn decode_link<'a>(
    data: &'a [u8],
    linktype: Linktype,
    packet: &mut DecodedPacket<'a>,
) -> Option<(EtherType, &'a [u8])> {
    match linktype {
        Linktype::ETHERNET => decode_ethernet(data, packet),
        Linktype::RAW => decode_raw(data),
        Linktype::IPV4 => Some((EtherType::IPV4, data)),
        Linktype::IPV6 => Some((EtherType::IPV6, data)),
        Linktype::NULL | Linktype::LOOP => decode_null(data, packet),
        Linktype::LINUX_SLL => match parse_sll_header(data) {
            Ok((rem, proto)) => Some((EtherType(proto), rem)),
            Err(_) => {
                packet.issue = Some(truncated("Linux SLL", SLL_HEADER_LEN, data.len()));
                None
            }
        },
        Linktype::LINUX_SLL2 => match parse_sll2_header(data) {
            Ok((rem, proto)) => Some((EtherType(proto), rem)),
            Err(_) => {
                packet.issue = Some(truncated("Linux SLL2", SLL2_HEADER_LEN, data.len()));
                None
            }
        },
        _ => None,
    }
}
