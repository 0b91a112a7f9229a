use super::{Result, Zone, ZoneError, constants};
use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where zone text comes from
pub trait ZoneSource {
    /// Whole zone file contents
    fn read_to_string(&self) -> Result<String>;

    /// Directory relative `$INCLUDE` paths resolve against
    fn base_dir(&self) -> Option<PathBuf> {
        None
    }

    /// Name used in log and error messages
    fn describe(&self) -> String;
}

/// Where zone text goes
pub trait ZoneSink {
    /// Store the complete zone text. Implementations either keep all of it
    /// or none of it.
    fn write_text(&mut self, contents: &str) -> Result<()>;
}

/// Zone file on disk
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ZoneSource for FileSource {
    fn read_to_string(&self) -> Result<String> {
        let metadata = fs::metadata(&self.path)
            .map_err(|e| ZoneError::IoError(format!("{}: {}", self.path.display(), e)))?;
        if metadata.len() > constants::MAX_ZONE_FILE_SIZE {
            return Err(ZoneError::FileTooLarge);
        }
        fs::read_to_string(&self.path)
            .map_err(|e| ZoneError::IoError(format!("{}: {}", self.path.display(), e)))
    }

    fn base_dir(&self) -> Option<PathBuf> {
        self.path.parent().map(Path::to_path_buf)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Zone text held in memory
#[derive(Debug, Clone)]
pub struct StrSource {
    contents: String,
}

impl StrSource {
    pub fn new(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
        }
    }
}

impl ZoneSource for StrSource {
    fn read_to_string(&self) -> Result<String> {
        Ok(self.contents.clone())
    }

    fn describe(&self) -> String {
        "<memory>".to_string()
    }
}

/// Writes to a temporary file next to the target and renames it into place,
/// so readers see either the old file or the complete new one.
#[derive(Debug, Clone)]
pub struct AtomicFileSink {
    path: PathBuf,
}

impl AtomicFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ZoneSink for AtomicFileSink {
    fn write_text(&mut self, contents: &str) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        // A replaced file keeps its mode, a new one is 0644
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = fs::metadata(&self.path)
                .map(|meta| meta.permissions())
                .unwrap_or_else(|_| fs::Permissions::from_mode(0o644));
            tmp.as_file().set_permissions(permissions)?;
        }
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| ZoneError::IoError(format!("{}: {}", self.path.display(), e.error)))?;

        debug!("Wrote {} bytes to {}", contents.len(), self.path.display());
        Ok(())
    }
}

/// Collects zone text in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub contents: Option<String>,
}

impl ZoneSink for MemorySink {
    fn write_text(&mut self, contents: &str) -> Result<()> {
        self.contents = Some(contents.to_string());
        Ok(())
    }
}

/// Presentation format: `$ORIGIN` header then one record per line with
/// absolute owner names, in canonical order.
pub fn format_zone(zone: &Zone) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "$ORIGIN {}", zone.origin());
    for record in zone.records() {
        let _ = writeln!(out, "{}", record);
    }
    out
}

/// Format `zone` and hand it to `sink`
pub fn write_zone(zone: &Zone, sink: &mut dyn ZoneSink) -> Result<()> {
    sink.write_text(&format_zone(zone))
}
