use rusticata_macros::newtype_enum;
use serde::Serialize;

/// Data link type
///
/// The link-layer header type specifies the type of headers at the beginning
/// of the packet.
///
/// See <http://www.tcpdump.org/linktypes.html>
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Linktype(pub i32);

newtype_enum! {
impl display Linktype {
    NULL = 0,
    ETHERNET = 1,

    RAW = 101,

    LOOP = 108,
    LINUX_SLL = 113,
    LINUX_SLL2 = 276,

    // Raw IPv4; the packet begins with an IPv4 header.
    IPV4 = 228,
    // Raw IPv6; the packet begins with an IPv6 header.
    IPV6 = 229,
}
}

impl Linktype {
    /// Returns true if the layer decoder knows how to strip this link layer
    pub fn is_supported(self) -> bool {
        matches!(
            self,
            Linktype::NULL
                | Linktype::ETHERNET
                | Linktype::RAW
                | Linktype::LOOP
                | Linktype::LINUX_SLL
                | Linktype::LINUX_SLL2
                | Linktype::IPV4
                | Linktype::IPV6
        )
    }
}
