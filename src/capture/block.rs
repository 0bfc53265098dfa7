//! Best-effort walk over pcapng blocks
//!
//! Only what is needed to reach packet bytes is decoded: the link type and snapshot length of
//! each Interface Description Block, and the fixed fields of each Enhanced Packet Block.
//! Options are never parsed, so timestamps always assume the default microsecond resolution.

use nom::bytes::streaming::take;
use nom::{Err, IResult};
use rusticata_macros::align32;

use crate::endianness::{CaptureBE, CaptureEndianness, CaptureLE};
use crate::error::CaptureError;
use crate::linktype::Linktype;

pub(crate) const IDB_MAGIC: u32 = 0x0000_0001;
pub(crate) const EPB_MAGIC: u32 = 0x0000_0006;

// block type, block length, trailing block length
const BLOCK_OVERHEAD: u32 = 12;
// EPB fixed fields: interface id, timestamp (2), caplen, origlen
const EPB_FIXED_LEN: u32 = 20;

#[derive(Debug)]
pub(crate) enum NgBlock<'a> {
    Interface {
        linktype: Linktype,
        snaplen: u32,
    },
    Packet {
        if_id: u32,
        ts_high: u32,
        ts_low: u32,
        caplen: u32,
        origlen: u32,
        data: &'a [u8],
    },
    Other {
        block_type: u32,
    },
}

fn malformed(block_type: u32, block_len: u32) -> Err<CaptureError> {
    Err::Failure(CaptureError::MalformedBlock {
        block_type,
        block_len,
    })
}

fn parse_block_e<E: CaptureEndianness>(
    i: &[u8],
) -> IResult<&[u8], NgBlock<'_>, CaptureError> {
    let (i, block_type) = E::parse_u32(i)?;
    let (i, block_len) = E::parse_u32(i)?;
    if block_len < BLOCK_OVERHEAD || block_len % 4 != 0 {
        return Err(malformed(block_type, block_len));
    }
    let (rem, body) = take((block_len - 8) as usize)(i)?;
    let body_len = block_len - BLOCK_OVERHEAD;
    let block = match block_type {
        IDB_MAGIC if body_len >= 8 => {
            let (b, linktype) = E::parse_u16(body)?;
            let (b, _reserved) = E::parse_u16(b)?;
            let (_, snaplen) = E::parse_u32(b)?;
            NgBlock::Interface {
                linktype: Linktype(i32::from(linktype)),
                snaplen,
            }
        }
        EPB_MAGIC if body_len >= EPB_FIXED_LEN => {
            let (b, if_id) = E::parse_u32(body)?;
            let (b, ts_high) = E::parse_u32(b)?;
            let (b, ts_low) = E::parse_u32(b)?;
            let (b, caplen) = E::parse_u32(b)?;
            let (b, origlen) = E::parse_u32(b)?;
            let room = body_len - EPB_FIXED_LEN;
            if caplen > room || align32!(caplen) > room {
                return Err(malformed(block_type, block_len));
            }
            NgBlock::Packet {
                if_id,
                ts_high,
                ts_low,
                caplen,
                origlen,
                data: &b[..caplen as usize],
            }
        }
        IDB_MAGIC | EPB_MAGIC => return Err(malformed(block_type, block_len)),
        _ => NgBlock::Other { block_type },
    };
    Ok((rem, block))
}

pub(crate) fn parse_block_le(i: &[u8]) -> IResult<&[u8], NgBlock<'_>, CaptureError> {
    parse_block_e::<CaptureLE>(i)
}

pub(crate) fn parse_block_be(i: &[u8]) -> IResult<&[u8], NgBlock<'_>, CaptureError> {
    parse_block_e::<CaptureBE>(i)
}
