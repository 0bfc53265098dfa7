use chrono::{DateTime, Utc};
use nom::IResult;

use crate::endianness::{CaptureBE, CaptureEndianness, CaptureLE};
use crate::error::CaptureError;
use crate::linktype::Linktype;

pub(crate) const RECORD_HEADER_LEN: usize = 16;

/// Fixed part of a classic capture record, preceding the packet data
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RecordHeader {
    pub ts_sec: u32,
    /// Microseconds or nanoseconds, depending on the header magic
    pub ts_fraction: u32,
    /// Number of bytes of packet data saved in the file
    pub caplen: u32,
    /// Length of the packet as it appeared on the network
    pub origlen: u32,
}

/// One packet read from a capture
///
/// The data borrows the reader's buffer: the packet has to be dropped before the next record
/// can be read, so packet bytes never outlive their iteration.
#[derive(Clone, Debug)]
pub struct RawPacket<'a> {
    /// Position of the packet in the capture, starting at 0
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub caplen: u32,
    /// May exceed `caplen` if the packet was truncated at capture time
    pub origlen: u32,
    pub linktype: Linktype,
    pub data: &'a [u8],
}

impl<'a> RawPacket<'a> {
    /// Returns true if fewer bytes were saved than seen on the wire
    pub fn is_truncated(&self) -> bool {
        self.origlen > self.caplen
    }
}

fn parse_record_header_e<E: CaptureEndianness>(
    i: &[u8],
) -> IResult<&[u8], RecordHeader, CaptureError> {
    let (i, ts_sec) = E::parse_u32(i)?;
    let (i, ts_fraction) = E::parse_u32(i)?;
    let (i, caplen) = E::parse_u32(i)?;
    let (i, origlen) = E::parse_u32(i)?;
    let header = RecordHeader {
        ts_sec,
        ts_fraction,
        caplen,
        origlen,
    };
    Ok((i, header))
}

/// Read a classic record header (little-endian)
///
/// Only the 16-byte header is consumed; the caller checks the captured length before taking
/// the packet data.
pub fn parse_record_header_le(i: &[u8]) -> IResult<&[u8], RecordHeader, CaptureError> {
    parse_record_header_e::<CaptureLE>(i)
}

/// Read a classic record header (big-endian)
pub fn parse_record_header_be(i: &[u8]) -> IResult<&[u8], RecordHeader, CaptureError> {
    parse_record_header_e::<CaptureBE>(i)
}
