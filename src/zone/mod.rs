pub mod errors;
pub mod io;
pub mod parser;
#[allow(clippy::module_inception)]
pub mod zone;

pub use errors::{Result, ZoneError};
pub use io::{
    AtomicFileSink, FileSource, MemorySink, StrSource, ZoneSink, ZoneSource, format_zone,
    write_zone,
};
pub use parser::ZoneParser;
pub use zone::Zone;

/// Zone constants
pub mod constants {
    /// Maximum zone file size (1GB)
    pub const MAX_ZONE_FILE_SIZE: u64 = 1024 * 1024 * 1024;

    /// Maximum `$INCLUDE` nesting
    pub const MAX_INCLUDE_DEPTH: usize = 8;
}
