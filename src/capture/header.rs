use chrono::{DateTime, Utc};
use nom::bytes::streaming::take;
use nom::number::streaming::le_u32;
use nom::{Err, IResult, Needed};
use serde::Serialize;

use crate::endianness::{CaptureBE, CaptureEndianness, CaptureLE};
use crate::error::CaptureError;
use crate::linktype::Linktype;

/// Little-endian file, microsecond timestamps (as read little-endian)
pub const MAGIC_LE_USEC: u32 = 0xa1b2_c3d4;
/// Little-endian file, nanosecond timestamps
pub const MAGIC_LE_NSEC: u32 = 0xa1b2_3c4d;
/// Big-endian file, microsecond timestamps
pub const MAGIC_BE_USEC: u32 = 0xd4c3_b2a1;
/// Big-endian file, nanosecond timestamps
pub const MAGIC_BE_NSEC: u32 = 0x4d3c_b2a1;
/// Block type of a pcapng Section Header Block
pub const BLOCK_MAGIC: u32 = 0x0a0d_0d0a;
/// Byte-order magic of a pcapng section, as read in the section's byte order
pub const BOM_MAGIC: u32 = 0x1a2b_3c4d;

/// Largest captured length accepted for a single record, whatever the snapshot length says
pub const MAX_CAPLEN: u32 = 65535;

pub(crate) const MICROS_PER_SEC: u64 = 1_000_000;
pub(crate) const NANOS_PER_SEC: u64 = 1_000_000_000;

const CLASSIC_HEADER_LEN: usize = 24;

/// Container layout of the capture file
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureFormat {
    /// Global header followed by fixed-layout packet records
    Classic,
    /// pcapng: typed, length-delimited blocks (best-effort support only)
    BlockStructured,
}

/// Capture global header
#[derive(Clone, Debug, Serialize)]
pub struct CaptureHeader {
    pub format: CaptureFormat,
    /// File magic, read as little-endian. Encodes byte order and timestamp resolution for
    /// classic captures, and is the Section Header Block type for block-structured ones.
    pub magic_number: u32,
    /// Version major number (currently 2 for classic captures)
    pub version_major: u16,
    /// Version minor number (currently 4 for classic captures)
    pub version_minor: u16,
    /// Correction in seconds between UTC and the timezone of the packet timestamps
    pub thiszone: i32,
    /// Timestamp accuracy; all tools set it to 0
    pub sigfigs: u32,
    /// Max length of captured packets, in octets
    pub snaplen: u32,
    /// Data link type
    pub network: Linktype,
    pub big_endian: bool,
    pub nanosecond_precision: bool,
    #[serde(skip)]
    pub(crate) header_len: usize,
}

impl CaptureHeader {
    /// Number of bytes occupied by the header in the file
    pub const fn size(&self) -> usize {
        self.header_len
    }

    /// Largest captured length a record may declare before the reader stops
    pub fn caplen_limit(&self) -> u32 {
        caplen_limit(self.snaplen)
    }

    /// Rebuild the absolute time of a record from its two timestamp components
    ///
    /// The fractional part is read as microseconds or nanoseconds depending on the magic
    /// number, and the header timezone correction is applied to the seconds. Returns `None` if
    /// the result is out of the representable range.
    pub fn timestamp(&self, ts_sec: u32, ts_fraction: u32) -> Option<DateTime<Utc>> {
        let units_per_sec = if self.nanosecond_precision {
            NANOS_PER_SEC
        } else {
            MICROS_PER_SEC
        };
        build_timestamp(
            i64::from(ts_sec) + i64::from(self.thiszone),
            u64::from(ts_fraction),
            units_per_sec,
        )
    }
}

/// A snapshot length of 0 is written by some tools; only the absolute ceiling applies then.
pub(crate) fn caplen_limit(snaplen: u32) -> u32 {
    if snaplen == 0 {
        MAX_CAPLEN
    } else {
        snaplen.min(MAX_CAPLEN)
    }
}

/// Fractional values of a second or more carry into the seconds.
pub(crate) fn build_timestamp(
    secs: i64,
    fraction: u64,
    units_per_sec: u64,
) -> Option<DateTime<Utc>> {
    let carry = i64::try_from(fraction / units_per_sec).ok()?;
    let nanos = (fraction % units_per_sec) * (NANOS_PER_SEC / units_per_sec);
    DateTime::from_timestamp(secs.checked_add(carry)?, nanos as u32)
}

/// Read the capture global header
///
/// The magic number is checked before anything else is read: an unknown value fails with
/// [`CaptureError::HeaderNotRecognized`]. The pcapng Section Header Block is accepted, but only
/// its byte order and version are used.
pub fn parse_capture_header(i: &[u8]) -> IResult<&[u8], CaptureHeader, CaptureError> {
    let (rem, magic_number) = le_u32(i)?;
    match magic_number {
        MAGIC_LE_USEC | MAGIC_LE_NSEC => parse_classic_header::<CaptureLE>(rem, magic_number),
        MAGIC_BE_USEC | MAGIC_BE_NSEC => parse_classic_header::<CaptureBE>(rem, magic_number),
        BLOCK_MAGIC => parse_section_header(rem),
        _ => Err(Err::Error(CaptureError::HeaderNotRecognized(magic_number))),
    }
}

fn parse_classic_header<E: CaptureEndianness>(
    i: &[u8],
    magic_number: u32,
) -> IResult<&[u8], CaptureHeader, CaptureError> {
    let (i, version_major) = E::parse_u16(i)?;
    let (i, version_minor) = E::parse_u16(i)?;
    let (i, thiszone) = E::parse_i32(i)?;
    let (i, sigfigs) = E::parse_u32(i)?;
    let (i, snaplen) = E::parse_u32(i)?;
    let (i, network) = E::parse_i32(i)?;
    let header = CaptureHeader {
        format: CaptureFormat::Classic,
        magic_number,
        version_major,
        version_minor,
        thiszone,
        sigfigs,
        snaplen,
        network: Linktype(network),
        big_endian: E::BIG_ENDIAN,
        nanosecond_precision: magic_number == MAGIC_LE_NSEC || magic_number == MAGIC_BE_NSEC,
        header_len: CLASSIC_HEADER_LEN,
    };
    Ok((i, header))
}

// Input starts right after the block type.
fn parse_section_header(i: &[u8]) -> IResult<&[u8], CaptureHeader, CaptureError> {
    if i.len() < 8 {
        return Err(Err::Incomplete(Needed::new(8 - i.len())));
    }
    let bom = u32::from_le_bytes([i[4], i[5], i[6], i[7]]);
    if bom == BOM_MAGIC {
        parse_section_header_e::<CaptureLE>(i)
    } else if bom == BOM_MAGIC.swap_bytes() {
        parse_section_header_e::<CaptureBE>(i)
    } else {
        Err(Err::Error(CaptureError::HeaderNotRecognized(BLOCK_MAGIC)))
    }
}

fn parse_section_header_e<E: CaptureEndianness>(
    i: &[u8],
) -> IResult<&[u8], CaptureHeader, CaptureError> {
    let (i, block_len) = E::parse_u32(i)?;
    let (i, _bom) = E::parse_u32(i)?;
    let (i, version_major) = E::parse_u16(i)?;
    let (i, version_minor) = E::parse_u16(i)?;
    // type, length, byte-order magic and versions are 16 bytes; the trailing length makes 28
    if block_len < 28 || block_len % 4 != 0 {
        return Err(Err::Error(CaptureError::HeaderNotRecognized(BLOCK_MAGIC)));
    }
    let (i, _rest) = take(block_len as usize - 16)(i)?;
    let header = CaptureHeader {
        format: CaptureFormat::BlockStructured,
        magic_number: BLOCK_MAGIC,
        version_major,
        version_minor,
        thiszone: 0,
        sigfigs: 0,
        snaplen: MAX_CAPLEN,
        network: Linktype::ETHERNET,
        big_endian: E::BIG_ENDIAN,
        nanosecond_precision: false,
        header_len: block_len as usize,
    };
    Ok((i, header))
}
