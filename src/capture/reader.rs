use circular::Buffer;
use nom::{Err, IResult, Offset};
use serde::Serialize;
use std::fmt;
use std::io::{self, Read};
use tracing::{debug, warn};

use super::block::{parse_block_be, parse_block_le, NgBlock};
use super::frame::{
    parse_record_header_be, parse_record_header_le, RawPacket, RecordHeader, RECORD_HEADER_LEN,
};
use super::header::{
    build_timestamp, caplen_limit, parse_capture_header, CaptureFormat, CaptureHeader,
    BLOCK_MAGIC, MAX_CAPLEN, MICROS_PER_SEC,
};
use crate::error::CaptureError;
use crate::linktype::Linktype;

/// Default size of the circular read buffer
pub const DEFAULT_BUFFER_SIZE: usize = 128 * 1024;
/// Smallest buffer able to hold a record of the maximum accepted size
pub const MIN_BUFFER_SIZE: usize = RECORD_HEADER_LEN + MAX_CAPLEN as usize;

const MAX_INTERFACES: usize = 1024;

/// Why a capture stopped producing packets
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CaptureEnd {
    /// All bytes were read
    Exhausted,
    /// The input ended inside a record header or record data
    TruncatedRecord,
    /// A record declared a captured length above the accepted limit
    OversizedRecord { caplen: u32, limit: u32 },
    /// A pcapng block could not be walked
    MalformedBlock { block_type: u32, block_len: u32 },
    /// Reading from the underlying input failed
    ReadError,
    /// The configured packet limit was reached
    PacketLimit,
    /// The scan was cancelled by the caller
    Cancelled,
}

impl CaptureEnd {
    /// Returns true if the capture was read to its last complete record
    pub fn is_complete(&self) -> bool {
        matches!(self, CaptureEnd::Exhausted)
    }
}

impl fmt::Display for CaptureEnd {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CaptureEnd::Exhausted => f.write_str("end of input"),
            CaptureEnd::TruncatedRecord => f.write_str("truncated record"),
            CaptureEnd::OversizedRecord { caplen, limit } => write!(
                f,
                "record captured length {} exceeds limit {}",
                caplen, limit
            ),
            CaptureEnd::MalformedBlock {
                block_type,
                block_len,
            } => write!(
                f,
                "malformed block (type {:#x}, length {})",
                block_type, block_len
            ),
            CaptureEnd::ReadError => f.write_str("read error"),
            CaptureEnd::PacketLimit => f.write_str("packet limit reached"),
            CaptureEnd::Cancelled => f.write_str("cancelled"),
        }
    }
}

type RecordParseFn = fn(&[u8]) -> IResult<&[u8], RecordHeader, CaptureError>;

#[derive(Clone, Copy, Debug)]
struct Interface {
    linktype: Linktype,
    snaplen: u32,
}

/// Location of the next packet inside the buffer
struct PacketSlot {
    start: usize,
    caplen: u32,
    origlen: u32,
    consumed: usize,
    timestamp: Option<chrono::DateTime<chrono::Utc>>,
    linktype: Linktype,
}

enum Step {
    Packet(PacketSlot),
    Skip(usize),
    Section { big_endian: bool, consumed: usize },
    Interface { iface: Interface, consumed: usize },
    NeedMore,
    End(CaptureEnd),
}

/// Streaming packet reader over capture data
///
/// This reader is based on a circular buffer: memory usage is constant, and it can be used on
/// captures of any size. The global header is read when the reader is created; each call to
/// [`next_packet`](CaptureReader::next_packet) then returns the next packet, borrowing the
/// buffer, until the capture ends.
///
/// The sequence is finite and cannot be restarted. It ends, without error, when the input is
/// exhausted, when a record is cut short, or when a record declares a captured length above the
/// snapshot length or 65535 bytes. [`end_reason`](CaptureReader::end_reason) tells which.
///
/// ## Example
///
/// ```rust
/// use pcap_forensics::CaptureReader;
/// # use pcap_forensics::CaptureError;
///
/// # fn run(file: std::fs::File) -> Result<(), CaptureError> {
/// let mut reader = CaptureReader::new(file)?;
/// while let Some(packet) = reader.next_packet()? {
///     println!("#{} {} bytes at {}", packet.index, packet.caplen, packet.timestamp);
/// }
/// println!("end of capture: {:?}", reader.end_reason());
/// # Ok(())
/// # }
/// ```
pub struct CaptureReader<R>
where
    R: Read,
{
    header: CaptureHeader,
    reader: R,
    buffer: Buffer,
    consumed: usize,
    pending: usize,
    reader_exhausted: bool,
    next_index: u64,
    invalid_timestamps: u64,
    end: Option<CaptureEnd>,
    parse_record: RecordParseFn,
    section_big_endian: bool,
    interfaces: Vec<Interface>,
}

impl<R> CaptureReader<R>
where
    R: Read,
{
    /// Creates a new `CaptureReader<R>` with the default buffer size, and reads the header.
    pub fn new(reader: R) -> Result<CaptureReader<R>, CaptureError> {
        Self::with_capacity(DEFAULT_BUFFER_SIZE, reader)
    }

    /// Creates a new `CaptureReader<R>` with the provided buffer capacity.
    ///
    /// The capacity is raised to [`MIN_BUFFER_SIZE`] if smaller.
    pub fn with_capacity(capacity: usize, reader: R) -> Result<CaptureReader<R>, CaptureError> {
        let buffer = Buffer::with_capacity(capacity.max(MIN_BUFFER_SIZE));
        let mut this = CaptureReader {
            header: placeholder_header(),
            reader,
            buffer,
            consumed: 0,
            pending: 0,
            reader_exhausted: false,
            next_index: 0,
            invalid_timestamps: 0,
            end: None,
            parse_record: parse_record_header_le,
            section_big_endian: false,
            interfaces: Vec::new(),
        };
        let header = loop {
            let data = this.buffer.data();
            match parse_capture_header(data) {
                Ok((rem, header)) => {
                    let offset = data.offset(rem);
                    this.consume(offset);
                    break header;
                }
                Err(Err::Incomplete(needed)) => {
                    if this.reader_exhausted || this.buffer.available_space() == 0 {
                        let needed = match needed {
                            nom::Needed::Size(n) => n.get(),
                            nom::Needed::Unknown => 1,
                        };
                        return Err(CaptureError::HeaderTruncated { needed });
                    }
                    this.refill()?;
                }
                Err(Err::Error(e)) | Err(Err::Failure(e)) => return Err(e),
            }
        };
        debug!(
            format = ?header.format,
            big_endian = header.big_endian,
            nanosecond = header.nanosecond_precision,
            snaplen = header.snaplen,
            linktype = %header.network,
            "capture header parsed"
        );
        this.parse_record = if header.big_endian {
            parse_record_header_be
        } else {
            parse_record_header_le
        };
        this.section_big_endian = header.big_endian;
        this.header = header;
        Ok(this)
    }

    /// The capture global header
    pub fn header(&self) -> &CaptureHeader {
        &self.header
    }

    /// Why the sequence ended, or `None` while packets may still follow
    pub fn end_reason(&self) -> Option<CaptureEnd> {
        self.end
    }

    /// Number of packets whose timestamp could not be represented
    ///
    /// These packets are returned with a timestamp of 1970-01-01.
    pub fn invalid_timestamps(&self) -> u64 {
        self.invalid_timestamps
    }

    /// Total number of bytes consumed from the input, header included
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Read the next packet
    ///
    /// Returns `Ok(None)` once the capture has ended; every following call returns `Ok(None)`
    /// as well. An error is only returned if reading from the input fails, and also ends the
    /// sequence.
    pub fn next_packet(&mut self) -> Result<Option<RawPacket<'_>>, CaptureError> {
        if self.pending > 0 {
            let pending = self.pending;
            self.pending = 0;
            self.consume(pending);
        }
        if self.end.is_some() {
            return Ok(None);
        }
        let slot = loop {
            let step = match self.header.format {
                CaptureFormat::Classic => self.parse_record(),
                CaptureFormat::BlockStructured => self.parse_block(),
            };
            match step {
                Step::Packet(slot) => break slot,
                Step::Skip(n) => self.consume(n),
                Step::Section {
                    big_endian,
                    consumed,
                } => {
                    self.section_big_endian = big_endian;
                    self.interfaces.clear();
                    self.consume(consumed);
                }
                Step::Interface { iface, consumed } => {
                    if self.interfaces.len() < MAX_INTERFACES {
                        self.interfaces.push(iface);
                    }
                    self.consume(consumed);
                }
                Step::NeedMore => {
                    if self.reader_exhausted {
                        let end = if self.buffer.available_data() == 0 {
                            CaptureEnd::Exhausted
                        } else {
                            CaptureEnd::TruncatedRecord
                        };
                        self.finish(end);
                        return Ok(None);
                    }
                    if self.buffer.available_data() >= self.buffer.capacity() {
                        // only a pcapng block can be larger than the buffer
                        self.finish(CaptureEnd::MalformedBlock {
                            block_type: 0,
                            block_len: self.buffer.available_data() as u32,
                        });
                        return Ok(None);
                    }
                    if let Err(e) = self.refill() {
                        self.finish(CaptureEnd::ReadError);
                        return Err(e);
                    }
                }
                Step::End(end) => {
                    self.finish(end);
                    return Ok(None);
                }
            }
        };
        let index = self.next_index;
        self.next_index += 1;
        self.pending = slot.consumed;
        let timestamp = match slot.timestamp {
            Some(ts) => ts,
            None => {
                debug!(index, "record timestamp out of range, using the epoch");
                self.invalid_timestamps += 1;
                chrono::DateTime::default()
            }
        };
        let data = &self.buffer.data()[slot.start..slot.start + slot.caplen as usize];
        Ok(Some(RawPacket {
            index,
            timestamp,
            caplen: slot.caplen,
            origlen: slot.origlen,
            linktype: slot.linktype,
            data,
        }))
    }

    fn parse_record(&self) -> Step {
        let data = self.buffer.data();
        match (self.parse_record)(data) {
            Ok((rem, record)) => {
                let limit = self.header.caplen_limit();
                if record.caplen > limit {
                    return Step::End(CaptureEnd::OversizedRecord {
                        caplen: record.caplen,
                        limit,
                    });
                }
                let start = data.offset(rem);
                let end = start + record.caplen as usize;
                if data.len() < end {
                    return Step::NeedMore;
                }
                Step::Packet(PacketSlot {
                    start,
                    caplen: record.caplen,
                    origlen: record.origlen,
                    consumed: end,
                    timestamp: self.header.timestamp(record.ts_sec, record.ts_fraction),
                    linktype: self.header.network,
                })
            }
            Err(Err::Incomplete(_)) => Step::NeedMore,
            Err(_) => Step::End(CaptureEnd::TruncatedRecord),
        }
    }

    fn parse_block(&self) -> Step {
        let data = self.buffer.data();
        if data.len() < 8 {
            return Step::NeedMore;
        }
        // the section header block type reads the same in both byte orders
        if u32::from_le_bytes([data[0], data[1], data[2], data[3]]) == BLOCK_MAGIC {
            return match parse_capture_header(data) {
                Ok((rem, header)) => Step::Section {
                    big_endian: header.big_endian,
                    consumed: data.offset(rem),
                },
                Err(Err::Incomplete(_)) => Step::NeedMore,
                Err(_) => Step::End(CaptureEnd::MalformedBlock {
                    block_type: BLOCK_MAGIC,
                    block_len: 0,
                }),
            };
        }
        let parsed = if self.section_big_endian {
            parse_block_be(data)
        } else {
            parse_block_le(data)
        };
        match parsed {
            Ok((rem, NgBlock::Interface { linktype, snaplen })) => Step::Interface {
                iface: Interface { linktype, snaplen },
                consumed: data.offset(rem),
            },
            Ok((
                rem,
                NgBlock::Packet {
                    if_id,
                    ts_high,
                    ts_low,
                    caplen,
                    origlen,
                    data: packet_data,
                },
            )) => {
                let iface = self
                    .interfaces
                    .get(if_id as usize)
                    .copied()
                    .unwrap_or(Interface {
                        linktype: self.header.network,
                        snaplen: self.header.snaplen,
                    });
                let limit = caplen_limit(iface.snaplen);
                if caplen > limit {
                    return Step::End(CaptureEnd::OversizedRecord { caplen, limit });
                }
                let ts = (u64::from(ts_high) << 32) | u64::from(ts_low);
                Step::Packet(PacketSlot {
                    start: data.offset(packet_data),
                    caplen,
                    origlen,
                    consumed: data.offset(rem),
                    timestamp: build_timestamp(0, ts, MICROS_PER_SEC),
                    linktype: iface.linktype,
                })
            }
            Ok((rem, NgBlock::Other { block_type })) => {
                debug!(block_type, "skipping pcapng block");
                Step::Skip(data.offset(rem))
            }
            Err(Err::Incomplete(_)) => Step::NeedMore,
            Err(Err::Error(CaptureError::MalformedBlock {
                block_type,
                block_len,
            }))
            | Err(Err::Failure(CaptureError::MalformedBlock {
                block_type,
                block_len,
            })) => Step::End(CaptureEnd::MalformedBlock {
                block_type,
                block_len,
            }),
            Err(_) => Step::End(CaptureEnd::TruncatedRecord),
        }
    }

    fn finish(&mut self, end: CaptureEnd) {
        match end {
            CaptureEnd::Exhausted => debug!(packets = self.next_index, "end of capture"),
            _ => warn!(packets = self.next_index, ?end, "capture ended early"),
        }
        self.end = Some(end);
    }

    fn consume(&mut self, offset: usize) {
        self.consumed += offset;
        self.buffer.consume(offset);
    }

    fn refill(&mut self) -> Result<(), CaptureError> {
        self.buffer.shift();
        let space = self.buffer.space();
        // check if available space is empty, so we can distinguish
        // a read() returning 0 because of EOF or because we requested 0
        if space.is_empty() {
            return Ok(());
        }
        let sz = loop {
            match self.reader.read(space) {
                Ok(sz) => break sz,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CaptureError::Io(e)),
            }
        };
        self.reader_exhausted = sz == 0;
        self.buffer.fill(sz);
        Ok(())
    }
}

fn placeholder_header() -> CaptureHeader {
    CaptureHeader {
        format: CaptureFormat::Classic,
        magic_number: 0,
        version_major: 0,
        version_minor: 0,
        thiszone: 0,
        sigfigs: 0,
        snaplen: 0,
        network: Linktype::ETHERNET,
        big_endian: false,
        nanosecond_precision: false,
        header_len: 0,
    }
}
