#![allow(dead_code)]

//! Synthetic captures for the integration tests

pub const LINKTYPE_ETHERNET: u32 = 1;
pub const LINKTYPE_RAW: u32 = 101;

pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;

pub const TCP_SYN: u8 = 0x02;
pub const TCP_PSH_ACK: u8 = 0x18;
pub const TCP_ACK: u8 = 0x10;

const CLIENT_MAC: [u8; 6] = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];
const SERVER_MAC: [u8; 6] = [0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb];

/// Classic pcap file writer
pub struct CaptureBuilder {
    buf: Vec<u8>,
    big_endian: bool,
}

impl CaptureBuilder {
    /// Little-endian, microsecond timestamps, Ethernet
    pub fn new() -> CaptureBuilder {
        CaptureBuilder::with_header(false, false, 0, 65535, LINKTYPE_ETHERNET)
    }

    pub fn with_header(
        big_endian: bool,
        nanos: bool,
        thiszone: i32,
        snaplen: u32,
        linktype: u32,
    ) -> CaptureBuilder {
        let mut b = CaptureBuilder {
            buf: Vec::new(),
            big_endian,
        };
        let magic = if nanos { 0xa1b2_3c4d } else { 0xa1b2_c3d4 };
        b.u32(magic);
        b.u16(2);
        b.u16(4);
        b.u32(thiszone as u32);
        b.u32(0);
        b.u32(snaplen);
        b.u32(linktype);
        b
    }

    fn u16(&mut self, v: u16) {
        if self.big_endian {
            self.buf.extend_from_slice(&v.to_be_bytes());
        } else {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    fn u32(&mut self, v: u32) {
        if self.big_endian {
            self.buf.extend_from_slice(&v.to_be_bytes());
        } else {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    pub fn record(self, ts_sec: u32, ts_fraction: u32, frame: &[u8]) -> CaptureBuilder {
        let origlen = frame.len() as u32;
        self.record_with_origlen(ts_sec, ts_fraction, frame, origlen)
    }

    pub fn record_with_origlen(
        mut self,
        ts_sec: u32,
        ts_fraction: u32,
        frame: &[u8],
        origlen: u32,
    ) -> CaptureBuilder {
        self.u32(ts_sec);
        self.u32(ts_fraction);
        self.u32(frame.len() as u32);
        self.u32(origlen);
        self.buf.extend_from_slice(frame);
        self
    }

    /// Raw bytes appended as is, for malformed records
    pub fn raw(mut self, bytes: &[u8]) -> CaptureBuilder {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

/// Little-endian pcapng file: section header, one Ethernet interface, one EPB per frame
pub fn pcapng(frames: &[&[u8]]) -> Vec<u8> {
    let mut v = Vec::new();
    // section header block, no options
    v.extend_from_slice(&0x0a0d_0d0au32.to_le_bytes());
    v.extend_from_slice(&28u32.to_le_bytes());
    v.extend_from_slice(&0x1a2b_3c4du32.to_le_bytes());
    v.extend_from_slice(&1u16.to_le_bytes());
    v.extend_from_slice(&0u16.to_le_bytes());
    v.extend_from_slice(&u64::MAX.to_le_bytes());
    v.extend_from_slice(&28u32.to_le_bytes());
    // interface description block
    v.extend_from_slice(&1u32.to_le_bytes());
    v.extend_from_slice(&20u32.to_le_bytes());
    v.extend_from_slice(&(LINKTYPE_ETHERNET as u16).to_le_bytes());
    v.extend_from_slice(&0u16.to_le_bytes());
    v.extend_from_slice(&65535u32.to_le_bytes());
    v.extend_from_slice(&20u32.to_le_bytes());
    for (n, frame) in frames.iter().enumerate() {
        let padded = (frame.len() + 3) & !3;
        let block_len = (32 + padded) as u32;
        let ts = 1_700_000_000_000_000u64 + n as u64;
        v.extend_from_slice(&6u32.to_le_bytes());
        v.extend_from_slice(&block_len.to_le_bytes());
        v.extend_from_slice(&0u32.to_le_bytes());
        v.extend_from_slice(&((ts >> 32) as u32).to_le_bytes());
        v.extend_from_slice(&(ts as u32).to_le_bytes());
        v.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        v.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        v.extend_from_slice(frame);
        v.resize(v.len() + padded - frame.len(), 0);
        v.extend_from_slice(&block_len.to_le_bytes());
    }
    v
}

pub fn ethernet(ethertype: u16, payload: &[u8]) -> Vec<u8> {
    let mut v = SERVER_MAC.to_vec();
    v.extend_from_slice(&CLIENT_MAC);
    v.extend_from_slice(&ethertype.to_be_bytes());
    v.extend_from_slice(payload);
    v
}

pub fn ipv4(src: [u8; 4], dst: [u8; 4], protocol: u8, payload: &[u8]) -> Vec<u8> {
    let total = (20 + payload.len()) as u16;
    let mut v = vec![0x45, 0x00];
    v.extend_from_slice(&total.to_be_bytes());
    // id, flags and fragment offset, ttl
    v.extend_from_slice(&[0x00, 0x01, 0x40, 0x00, 0x40]);
    v.push(protocol);
    v.extend_from_slice(&[0x00, 0x00]);
    v.extend_from_slice(&src);
    v.extend_from_slice(&dst);
    v.extend_from_slice(payload);
    v
}

/// IPv4 header carrying `options` (padded to a multiple of 4 bytes)
pub fn ipv4_with_options(
    src: [u8; 4],
    dst: [u8; 4],
    protocol: u8,
    options: &[u8],
    payload: &[u8],
) -> Vec<u8> {
    let mut opts = options.to_vec();
    opts.resize((opts.len() + 3) & !3, 0);
    let mut v = ipv4(src, dst, protocol, payload);
    v[0] = 0x40 | (5 + opts.len() / 4) as u8;
    let total = (v.len() + opts.len()) as u16;
    v[2..4].copy_from_slice(&total.to_be_bytes());
    v.splice(20..20, opts);
    v
}

pub fn ipv6(src: [u8; 16], dst: [u8; 16], next_header: u8, payload: &[u8]) -> Vec<u8> {
    let mut v = vec![0x60, 0x00, 0x00, 0x00];
    v.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    v.push(next_header);
    v.push(64);
    v.extend_from_slice(&src);
    v.extend_from_slice(&dst);
    v.extend_from_slice(payload);
    v
}

pub fn tcp(src_port: u16, dst_port: u16, flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut v = Vec::new();
    v.extend_from_slice(&src_port.to_be_bytes());
    v.extend_from_slice(&dst_port.to_be_bytes());
    v.extend_from_slice(&1u32.to_be_bytes());
    v.extend_from_slice(&0u32.to_be_bytes());
    v.push(0x50);
    v.push(flags);
    v.extend_from_slice(&[0xff, 0xff, 0x00, 0x00, 0x00, 0x00]);
    v.extend_from_slice(payload);
    v
}

/// TCP header carrying `options` (padded to a multiple of 4 bytes)
pub fn tcp_with_options(
    src_port: u16,
    dst_port: u16,
    flags: u8,
    options: &[u8],
    payload: &[u8],
) -> Vec<u8> {
    let mut opts = options.to_vec();
    opts.resize((opts.len() + 3) & !3, 0);
    let mut v = tcp(src_port, dst_port, flags, payload);
    v[12] = ((5 + opts.len() / 4) as u8) << 4;
    v.splice(20..20, opts);
    v
}

pub fn udp(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut v = Vec::new();
    v.extend_from_slice(&src_port.to_be_bytes());
    v.extend_from_slice(&dst_port.to_be_bytes());
    v.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    v.extend_from_slice(&[0x00, 0x00]);
    v.extend_from_slice(payload);
    v
}

/// Ethernet + IPv4 + TCP
pub fn tcp_frame(src: [u8; 4], dst: [u8; 4], ports: (u16, u16), flags: u8, payload: &[u8]) -> Vec<u8> {
    ethernet(0x0800, &ipv4(src, dst, PROTO_TCP, &tcp(ports.0, ports.1, flags, payload)))
}

/// Ethernet + IPv4 + UDP
pub fn udp_frame(src: [u8; 4], dst: [u8; 4], ports: (u16, u16), payload: &[u8]) -> Vec<u8> {
    ethernet(0x0800, &ipv4(src, dst, PROTO_UDP, &udp(ports.0, ports.1, payload)))
}

/// TLS 1.2 record holding a Client Hello with a server name extension
pub fn client_hello(server_name: &str) -> Vec<u8> {
    let name = server_name.as_bytes();
    let mut sni = vec![0x00, 0x00];
    sni.extend_from_slice(&(name.len() as u16 + 5).to_be_bytes());
    sni.extend_from_slice(&(name.len() as u16 + 3).to_be_bytes());
    sni.push(0);
    sni.extend_from_slice(&(name.len() as u16).to_be_bytes());
    sni.extend_from_slice(name);

    let mut body = vec![0x03, 0x03];
    body.extend_from_slice(&[0x11; 32]);
    // empty session id, two cipher suites, null compression
    body.extend_from_slice(&[0x00, 0x00, 0x04, 0x13, 0x01, 0x13, 0x02, 0x01, 0x00]);
    body.extend_from_slice(&(sni.len() as u16).to_be_bytes());
    body.extend_from_slice(&sni);

    let mut hs = vec![0x01, 0x00];
    hs.extend_from_slice(&(body.len() as u16).to_be_bytes());
    hs.extend_from_slice(&body);

    let mut record = vec![0x16, 0x03, 0x01];
    record.extend_from_slice(&(hs.len() as u16).to_be_bytes());
    record.extend_from_slice(&hs);
    record
}

pub fn http_get(path: &str, host: Option<&str>, user_agent: Option<&str>) -> Vec<u8> {
    let mut s = format!("GET {} HTTP/1.1\r\n", path);
    if let Some(host) = host {
        s.push_str(&format!("Host: {}\r\n", host));
    }
    if let Some(ua) = user_agent {
        s.push_str(&format!("User-Agent: {}\r\n", ua));
    }
    s.push_str("Accept: */*\r\n\r\n");
    s.into_bytes()
}

/// DNS-like payload carrying `name` as dotted text
pub fn dns_text_query(name: &str) -> Vec<u8> {
    let mut v = vec![0xbe, 0xef, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00];
    v.extend_from_slice(name.as_bytes());
    v.extend_from_slice(&[0x00, 0x00, 0x01, 0x00, 0x01]);
    v
}

/// DNS query with the name in wire format (length-prefixed labels)
pub fn dns_wire_query(name: &str) -> Vec<u8> {
    let mut v = vec![0xbe, 0xef, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
    for label in name.split('.') {
        v.push(label.len() as u8);
        v.extend_from_slice(label.as_bytes());
    }
    v.extend_from_slice(&[0x00, 0x00, 0x01, 0x00, 0x01]);
    v
}
