use thiserror::Error;

/// Zone loading and output errors
#[derive(Debug, Clone, Error)]
pub enum ZoneError {
    /// Malformed zone file content at a given line
    #[error("Zone parse error at {location}: {message}")]
    ParseError { location: String, message: String },

    /// Record that is well-formed text but not acceptable in the zone
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Zone missing required SOA record")]
    MissingSOA,

    #[error("Zone contains duplicate SOA records")]
    DuplicateSOA,

    /// Neither `$ORIGIN`, a caller supplied origin nor an SOA owner
    #[error("Zone origin is unknown: {0}")]
    MissingOrigin(String),

    #[error("Record {0} is outside the zone origin {1}")]
    OutOfZone(String, String),

    /// Records of one RRset disagree on their TTL
    #[error("Divergent TTLs in RRset {name} {rtype}: {first} and {second}")]
    TtlMismatch {
        name: String,
        rtype: String,
        first: u32,
        second: u32,
    },

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Zone file exceeds maximum size")]
    FileTooLarge,
}

impl ZoneError {
    pub(crate) fn parse(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ParseError {
            location: location.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ZoneError {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ZoneError>;
