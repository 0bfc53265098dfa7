//! Capture file reading
//!
//! Classic capture files start with a 24-byte global header, whose magic number gives the byte
//! order and timestamp resolution of everything that follows. Each packet is then stored as a
//! 16-byte record header followed by the captured bytes.
//!
//! See <https://wiki.wireshark.org/Development/LibpcapFileFormat> for details.
//!
//! Files in the block-structured pcapng format are recognized from their first block. They are
//! read on a best-effort basis only: see the `block` module for what is decoded.

mod block;
mod frame;
mod header;
mod reader;

pub use frame::*;
pub use header::*;
pub use reader::*;
