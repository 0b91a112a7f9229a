pub mod enums;
pub mod name;
pub mod rdata;
pub mod resource;

pub use enums::{RecordClass, RecordType};
pub use name::Name;
pub use rdata::{Dnskey, Ds, Nsec, Nsec3, Nsec3Param, RData, Rrsig, Soa, TypeBitmap, Zonemd};
pub use resource::{ResourceRecord, RRset};

/// Wire format limits (RFC 1035 section 2.3.4)
pub mod constants {
    /// Maximum label length in octets
    pub const MAX_LABEL_LEN: usize = 63;

    /// Maximum name length in wire format, root label included
    pub const MAX_NAME_LEN: usize = 255;

    /// Maximum length of a character-string
    pub const MAX_CHARACTER_STRING_LEN: usize = 255;
}
