use super::{Result, ZoneError, constants};
use crate::dns::rdata::parse_ttl_field;
use crate::dns::{Name, RData, RecordClass, RecordType, ResourceRecord};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// One logical zone file entry: a directive or a record, possibly spread
/// over several physical lines by parentheses.
#[derive(Debug)]
struct Entry {
    /// First physical line of the entry
    line: usize,
    /// The line started with whitespace, so the owner is inherited
    blank_owner: bool,
    /// Tokens; quoted strings keep their quotes
    tokens: Vec<String>,
}

/// Split zone file text into logical entries.
///
/// Handles `;` comments outside quotes, quoted strings with escapes and
/// parentheses continuation.
fn tokenize(contents: &str, source: &str) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut current: Option<Entry> = None;
    let mut depth = 0usize;
    let mut paren_line = 0usize;

    for (index, line) in contents.lines().enumerate() {
        let line_number = index + 1;
        let bytes = line.as_bytes();

        if depth == 0 {
            if let Some(entry) = current.take() {
                if !entry.tokens.is_empty() {
                    entries.push(entry);
                }
            }
            current = Some(Entry {
                line: line_number,
                blank_owner: bytes.first().is_some_and(|b| *b == b' ' || *b == b'\t'),
                tokens: Vec::new(),
            });
        }

        let entry = match current.as_mut() {
            Some(entry) => entry,
            None => continue,
        };

        let mut i = 0;
        let mut token = String::new();
        let mut in_token = false;

        while i < bytes.len() {
            let c = bytes[i];
            match c {
                b';' => break,
                b' ' | b'\t' | b'\r' => {
                    if in_token {
                        entry.tokens.push(std::mem::take(&mut token));
                        in_token = false;
                    }
                }
                b'(' => {
                    if in_token {
                        entry.tokens.push(std::mem::take(&mut token));
                        in_token = false;
                    }
                    if depth == 0 {
                        paren_line = line_number;
                    }
                    depth += 1;
                }
                b')' => {
                    if in_token {
                        entry.tokens.push(std::mem::take(&mut token));
                        in_token = false;
                    }
                    if depth == 0 {
                        return Err(ZoneError::parse(
                            format!("{}:{}", source, line_number),
                            "Unbalanced closing parenthesis",
                        ));
                    }
                    depth -= 1;
                }
                b'"' => {
                    if in_token {
                        entry.tokens.push(std::mem::take(&mut token));
                    }
                    let start = i;
                    i += 1;
                    while i < bytes.len() && bytes[i] != b'"' {
                        if bytes[i] == b'\\' {
                            i += 1;
                        }
                        i += 1;
                    }
                    if i >= bytes.len() {
                        return Err(ZoneError::parse(
                            format!("{}:{}", source, line_number),
                            "Unterminated quoted string",
                        ));
                    }
                    entry.tokens.push(line[start..=i].to_string());
                    in_token = false;
                }
                b'\\' => {
                    // Escapes stay in the token; names and strings decode them
                    token.push('\\');
                    if let Some(next) = line[i + 1..].chars().next() {
                        token.push(next);
                        i += next.len_utf8();
                    }
                    in_token = true;
                }
                _ => {
                    let ch = line[i..].chars().next().unwrap_or(' ');
                    token.push(ch);
                    in_token = true;
                    i += ch.len_utf8();
                    continue;
                }
            }
            i += 1;
        }

        if in_token {
            entry.tokens.push(token);
        }
    }

    if depth > 0 {
        return Err(ZoneError::parse(
            format!("{}:{}", source, paren_line),
            "Unclosed parentheses",
        ));
    }

    if let Some(entry) = current.take() {
        if !entry.tokens.is_empty() {
            entries.push(entry);
        }
    }

    Ok(entries)
}

/// RFC 1035 zone file parser
pub struct ZoneParser {
    /// Current origin for relative names
    current_origin: Option<Name>,
    /// Default TTL from `$TTL`
    default_ttl: Option<u32>,
    /// TTL of the previous record, used when neither is given
    last_ttl: Option<u32>,
    /// SOA minimum, the fallback TTL once the SOA has been seen
    soa_minimum: Option<u32>,
    /// Owner of the previous record, for blank owner fields
    last_owner: Option<Name>,
    /// Class of the previous record
    current_class: RecordClass,
    /// Directory `$INCLUDE` paths are resolved against
    base_dir: Option<PathBuf>,
    include_depth: usize,
}

impl Default for ZoneParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ZoneParser {
    /// Create a new zone parser
    pub fn new() -> Self {
        Self {
            current_origin: None,
            default_ttl: None,
            last_ttl: None,
            soa_minimum: None,
            last_owner: None,
            current_class: RecordClass::IN,
            base_dir: None,
            include_depth: 0,
        }
    }

    /// Start with a known origin, as if the file began with `$ORIGIN`
    pub fn with_origin(mut self, origin: Name) -> Self {
        self.current_origin = Some(origin);
        self
    }

    /// Resolve relative `$INCLUDE` paths against `dir`
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// The origin in effect after parsing
    pub fn origin(&self) -> Option<&Name> {
        self.current_origin.as_ref()
    }

    /// Parse zone file contents into records, in file order.
    ///
    /// `source` names the input in error messages.
    pub fn parse_str(&mut self, contents: &str, source: &str) -> Result<Vec<ResourceRecord>> {
        let entries = tokenize(contents, source)?;
        let mut records = Vec::new();

        for entry in entries {
            let location = format!("{}:{}", source, entry.line);
            trace!("Parsing {}: {:?}", location, entry.tokens);

            if entry.tokens[0].starts_with('$') && !entry.blank_owner {
                self.parse_directive(&entry.tokens, &location, &mut records)?;
                continue;
            }

            let record = self
                .parse_record(&entry)
                .map_err(|message| ZoneError::parse(&location, message))?;
            records.push(record);
        }

        debug!("Parsed {} records from {}", records.len(), source);
        Ok(records)
    }

    /// Parse a directive entry
    fn parse_directive(
        &mut self,
        tokens: &[String],
        location: &str,
        records: &mut Vec<ResourceRecord>,
    ) -> Result<()> {
        match tokens[0].to_uppercase().as_str() {
            "$ORIGIN" => {
                let text = tokens
                    .get(1)
                    .ok_or_else(|| ZoneError::parse(location, "$ORIGIN requires domain name"))?;
                let origin = Name::parse(text, self.current_origin.as_ref())
                    .map_err(|e| ZoneError::parse(location, e))?;
                debug!("Set origin to: {}", origin);
                self.current_origin = Some(origin);
            }
            "$TTL" => {
                let text = tokens
                    .get(1)
                    .ok_or_else(|| ZoneError::parse(location, "$TTL requires value"))?;
                let ttl = parse_ttl_field(text).map_err(|e| ZoneError::parse(location, e))?;
                debug!("Set default TTL to: {}", ttl);
                self.default_ttl = Some(ttl);
            }
            "$INCLUDE" => {
                let file = tokens
                    .get(1)
                    .ok_or_else(|| ZoneError::parse(location, "$INCLUDE requires file path"))?;
                if self.include_depth >= constants::MAX_INCLUDE_DEPTH {
                    return Err(ZoneError::parse(location, "$INCLUDE nested too deeply"));
                }

                let path = match &self.base_dir {
                    Some(dir) if Path::new(file).is_relative() => dir.join(file),
                    _ => PathBuf::from(file),
                };
                let contents = fs::read_to_string(&path).map_err(|e| {
                    ZoneError::parse(
                        location,
                        format!("Failed to read include file {}: {}", path.display(), e),
                    )
                })?;

                // The included file gets its own origin scope
                let saved_origin = self.current_origin.clone();
                if let Some(domain) = tokens.get(2) {
                    let origin = Name::parse(domain, self.current_origin.as_ref())
                        .map_err(|e| ZoneError::parse(location, e))?;
                    self.current_origin = Some(origin);
                }

                debug!("Processing $INCLUDE {}", path.display());
                self.include_depth += 1;
                let included = self.parse_str(&contents, &path.display().to_string());
                self.include_depth -= 1;
                self.current_origin = saved_origin;
                records.extend(included?);
            }
            other => {
                return Err(ZoneError::parse(
                    location,
                    format!("Unsupported directive: {}", other),
                ));
            }
        }
        Ok(())
    }

    /// Parse a single resource record entry
    fn parse_record(&mut self, entry: &Entry) -> std::result::Result<ResourceRecord, String> {
        let mut tokens = entry.tokens.iter().map(String::as_str).peekable();

        let owner = if entry.blank_owner {
            self.last_owner
                .clone()
                .ok_or_else(|| "Record without owner and no previous owner".to_string())?
        } else {
            let text = tokens.next().ok_or_else(|| "Empty record".to_string())?;
            Name::parse(text, self.current_origin.as_ref())?
        };

        // TTL and class may appear in either order
        let mut ttl = None;
        let mut class = None;
        for _ in 0..2 {
            let Some(&token) = tokens.peek() else { break };
            if ttl.is_none() && token.starts_with(|c: char| c.is_ascii_digit()) {
                ttl = Some(parse_ttl_field(token)?);
                tokens.next();
            } else if class.is_none() {
                match token.parse::<RecordClass>() {
                    Ok(c) => {
                        class = Some(c);
                        tokens.next();
                    }
                    Err(_) => break,
                }
            } else {
                break;
            }
        }

        let type_text = tokens
            .next()
            .ok_or_else(|| format!("Record for {} is missing its type", owner))?;
        let rtype: RecordType = type_text.parse()?;

        let origin = self
            .current_origin
            .clone()
            .unwrap_or_else(|| owner.clone());
        let rdata_tokens: Vec<String> = tokens.map(str::to_string).collect();
        let rdata = RData::parse(rtype, &rdata_tokens, &origin)?;

        let class = class.unwrap_or(self.current_class);

        if let RData::Soa(soa) = &rdata {
            self.soa_minimum = Some(soa.minimum);
            if self.current_origin.is_none() {
                debug!("Inferred origin {} from SOA owner", owner);
                self.current_origin = Some(owner.clone());
            }
        }

        let ttl = match ttl.or(self.default_ttl).or(self.last_ttl).or(self.soa_minimum) {
            Some(ttl) => ttl,
            None => return Err(format!("No TTL for {} and no $TTL default", owner)),
        };

        self.last_owner = Some(owner.clone());
        self.last_ttl = Some(ttl);
        self.current_class = class;

        Ok(ResourceRecord::new(owner, ttl, class, rtype, rdata))
    }
}
