pub mod config;
pub mod dns;
pub mod dnssec;
pub mod error;
pub mod hsm;
pub mod tools;
pub mod zone;

pub use config::ToolConfig;
pub use error::{Error, Result};
pub use zone::Zone;
