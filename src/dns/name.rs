use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use super::constants::{MAX_LABEL_LEN, MAX_NAME_LEN};

/// An absolute domain name.
///
/// Labels keep the case they were written in so zone output looks like the
/// input, but equality, hashing and ordering ignore ASCII case. Ordering is
/// the canonical DNS name order of RFC 4034 section 6.1.
#[derive(Clone, Default)]
pub struct Name {
    /// Labels from leftmost to rightmost, root label excluded
    labels: Vec<Vec<u8>>,
}

impl Name {
    /// The root name `.`
    pub fn root() -> Self {
        Self { labels: Vec::new() }
    }

    /// Build a name from raw labels, leftmost first
    pub fn from_labels<I, L>(labels: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = L>,
        L: Into<Vec<u8>>,
    {
        let name = Self {
            labels: labels.into_iter().map(Into::into).collect(),
        };
        name.check_lengths()?;
        Ok(name)
    }

    /// Parse a name in presentation format.
    ///
    /// `@` and relative names are resolved against `origin`. A relative name
    /// without an origin is an error.
    pub fn parse(text: &str, origin: Option<&Name>) -> Result<Self, String> {
        let text = text.trim();
        if text.is_empty() {
            return Err("Empty domain name".to_string());
        }

        if text == "@" {
            return origin
                .cloned()
                .ok_or_else(|| "'@' used without an origin".to_string());
        }

        if text == "." {
            return Ok(Self::root());
        }

        let (labels, absolute) = Self::split_labels(text)?;
        let mut name = Self { labels };

        if !absolute {
            let origin =
                origin.ok_or_else(|| format!("Relative name '{}' without an origin", text))?;
            name.labels.extend(origin.labels.iter().cloned());
        }

        name.check_lengths()?;
        Ok(name)
    }

    /// Split presentation text into labels, resolving `\X` and `\DDD`
    /// escapes. Returns whether the name ended with an unescaped dot.
    fn split_labels(text: &str) -> Result<(Vec<Vec<u8>>, bool), String> {
        let bytes = text.as_bytes();
        let mut labels = Vec::new();
        let mut current = Vec::new();
        let mut absolute = false;
        let mut i = 0;

        while i < bytes.len() {
            let b = bytes[i];
            match b {
                b'\\' => {
                    if i + 3 < bytes.len()
                        && bytes[i + 1].is_ascii_digit()
                        && bytes[i + 2].is_ascii_digit()
                        && bytes[i + 3].is_ascii_digit()
                    {
                        let value = (bytes[i + 1] - b'0') as u16 * 100
                            + (bytes[i + 2] - b'0') as u16 * 10
                            + (bytes[i + 3] - b'0') as u16;
                        if value > 255 {
                            return Err(format!("Invalid escape in name: {}", text));
                        }
                        current.push(value as u8);
                        i += 4;
                    } else if i + 1 < bytes.len() {
                        current.push(bytes[i + 1]);
                        i += 2;
                    } else {
                        return Err(format!("Dangling escape in name: {}", text));
                    }
                    continue;
                }
                b'.' => {
                    if current.is_empty() {
                        return Err(format!("Empty label in name: {}", text));
                    }
                    labels.push(std::mem::take(&mut current));
                    if i + 1 == bytes.len() {
                        absolute = true;
                    }
                }
                _ => current.push(b),
            }
            i += 1;
        }

        if !current.is_empty() {
            labels.push(current);
        }

        Ok((labels, absolute))
    }

    fn check_lengths(&self) -> Result<(), String> {
        for label in &self.labels {
            if label.is_empty() {
                return Err("Empty label in name".to_string());
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(format!(
                    "Label too long: {}",
                    String::from_utf8_lossy(label)
                ));
            }
        }
        if self.wire_len() > MAX_NAME_LEN {
            return Err(format!("Name too long: {}", self));
        }
        Ok(())
    }

    /// Labels from leftmost to rightmost, root excluded
    pub fn labels(&self) -> &[Vec<u8>] {
        &self.labels
    }

    /// Number of labels, root excluded
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn is_root(&self) -> bool {
        self.labels.is_empty()
    }

    /// Whether the leftmost label is `*`
    pub fn is_wildcard(&self) -> bool {
        self.labels.first().is_some_and(|l| l.as_slice() == b"*")
    }

    /// Value of the RRSIG labels field (RFC 4034 section 3.1.3)
    pub fn rrsig_labels(&self) -> u8 {
        let count = if self.is_wildcard() {
            self.labels.len() - 1
        } else {
            self.labels.len()
        };
        count as u8
    }

    /// True if `self` equals `other` or lies below it
    pub fn is_subdomain_of(&self, other: &Name) -> bool {
        if other.labels.len() > self.labels.len() {
            return false;
        }
        let skip = self.labels.len() - other.labels.len();
        self.labels[skip..]
            .iter()
            .zip(other.labels.iter())
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }

    /// The name with its leftmost label removed
    pub fn parent(&self) -> Option<Name> {
        if self.labels.is_empty() {
            return None;
        }
        Some(Self {
            labels: self.labels[1..].to_vec(),
        })
    }

    /// A new name with `label` added on the left
    pub fn prepend_label(&self, label: &[u8]) -> Result<Name, String> {
        let mut labels = Vec::with_capacity(self.labels.len() + 1);
        labels.push(label.to_vec());
        labels.extend(self.labels.iter().cloned());
        let name = Self { labels };
        name.check_lengths()?;
        Ok(name)
    }

    /// Copy of the name with every label lowercased
    pub fn to_lowercase(&self) -> Name {
        Self {
            labels: self
                .labels
                .iter()
                .map(|l| l.to_ascii_lowercase())
                .collect(),
        }
    }

    /// Uncompressed wire length including the root label
    pub fn wire_len(&self) -> usize {
        self.labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1
    }

    /// Append the uncompressed wire form, lowercased if `canonical`
    pub fn write_wire(&self, out: &mut Vec<u8>, canonical: bool) {
        for label in &self.labels {
            out.push(label.len() as u8);
            if canonical {
                out.extend(label.iter().map(|b| b.to_ascii_lowercase()));
            } else {
                out.extend_from_slice(label);
            }
        }
        out.push(0);
    }

    /// Lowercased wire form
    pub fn to_canonical_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        self.write_wire(&mut out, true);
        out
    }

    /// Read an uncompressed name from wire data, returning it and the number
    /// of bytes consumed.
    pub fn from_wire(data: &[u8]) -> Result<(Name, usize), String> {
        let mut labels = Vec::new();
        let mut pos = 0;
        loop {
            let len = *data
                .get(pos)
                .ok_or_else(|| "Truncated name in wire data".to_string())?
                as usize;
            pos += 1;
            if len == 0 {
                break;
            }
            if len > MAX_LABEL_LEN {
                return Err("Compressed or invalid label in wire data".to_string());
            }
            let label = data
                .get(pos..pos + len)
                .ok_or_else(|| "Truncated label in wire data".to_string())?;
            labels.push(label.to_vec());
            pos += len;
        }
        let name = Self { labels };
        name.check_lengths()?;
        Ok((name, pos))
    }

    fn fmt_label(label: &[u8], f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in label {
            match b {
                b'.' | b'\\' | b'"' | b';' | b'(' | b')' | b'@' | b'$' => {
                    write!(f, "\\{}", b as char)?
                }
                0x21..=0x7e => write!(f, "{}", b as char)?,
                _ => write!(f, "\\{:03}", b)?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.labels.is_empty() {
            return f.write_str(".");
        }
        for label in &self.labels {
            Self::fmt_label(label, f)?;
            f.write_str(".")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({})", self)
    }
}

impl FromStr for Name {
    type Err = String;

    /// Parses the text as an absolute name, trailing dot optional
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed == "." {
            return Ok(Self::root());
        }
        let absolute = if trimmed.ends_with('.') {
            trimmed.to_string()
        } else {
            format!("{}.", trimmed)
        };
        Self::parse(&absolute, None)
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.labels.len() == other.labels.len()
            && self
                .labels
                .iter()
                .zip(other.labels.iter())
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.labels.len());
        for label in &self.labels {
            for b in label {
                state.write_u8(b.to_ascii_lowercase());
            }
            state.write_u8(0xff);
        }
    }
}

impl Ord for Name {
    /// RFC 4034 section 6.1: compare labels right to left as lowercased
    /// octet strings; a name sorts before every name below it.
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.labels.iter().rev().zip(other.labels.iter().rev()) {
            let ordering = a
                .iter()
                .map(u8::to_ascii_lowercase)
                .cmp(b.iter().map(u8::to_ascii_lowercase));
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        self.labels.len().cmp(&other.labels.len())
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_relative_and_absolute() {
        let origin = name("example.com.");
        assert_eq!(
            Name::parse("www", Some(&origin)).unwrap(),
            name("www.example.com.")
        );
        assert_eq!(Name::parse("@", Some(&origin)).unwrap(), origin);
        assert_eq!(
            Name::parse("mail.example.org.", Some(&origin)).unwrap(),
            name("mail.example.org")
        );
        assert!(Name::parse("www", None).is_err());
    }

    #[test]
    fn test_escapes() {
        let n = Name::parse("a\\.b.example.", None).unwrap();
        assert_eq!(n.label_count(), 2);
        assert_eq!(n.labels()[0], b"a.b".to_vec());
        assert_eq!(n.to_string(), "a\\.b.example.");

        let n = Name::parse("\\065bc.example.", None).unwrap();
        assert_eq!(n.labels()[0], b"Abc".to_vec());
    }

    #[test]
    fn test_label_length_limit() {
        let long = "a".repeat(64);
        assert!(Name::parse(&format!("{}.example.", long), None).is_err());
        let ok = "a".repeat(63);
        assert!(Name::parse(&format!("{}.example.", ok), None).is_ok());
    }

    #[test]
    fn test_case_insensitive_equality() {
        assert_eq!(name("WWW.Example.COM"), name("www.example.com"));
        assert_eq!(name("WWW.Example.COM").to_string(), "WWW.Example.COM.");
    }

    #[test]
    fn test_canonical_order_rfc4034_example() {
        // Section 6.1 example, already in canonical order
        let ordered = [
            "example.",
            "a.example.",
            "yljkjljk.a.example.",
            "Z.a.example.",
            "zABC.a.EXAMPLE.",
            "z.example.",
            "\\001.z.example.",
            "*.z.example.",
            "\\200.z.example.",
        ];
        let names: Vec<Name> = ordered
            .iter()
            .map(|s| Name::parse(s, None).unwrap())
            .collect();

        for pair in names.windows(2) {
            assert!(pair[0] < pair[1], "{} should sort before {}", pair[0], pair[1]);
        }

        let mut shuffled = names.clone();
        shuffled.reverse();
        shuffled.sort();
        assert_eq!(shuffled, names);
    }

    #[test]
    fn test_subdomain_and_parent() {
        let child = name("a.b.example.com");
        assert!(child.is_subdomain_of(&name("example.com")));
        assert!(child.is_subdomain_of(&child));
        assert!(!name("example.com").is_subdomain_of(&child));
        assert_eq!(child.parent().unwrap(), name("b.example.com"));
        assert!(Name::root().parent().is_none());
    }

    #[test]
    fn test_wire_roundtrip_and_canonical() {
        let n = name("WWW.Example.com");
        let wire = n.to_canonical_wire();
        assert_eq!(wire, b"\x03www\x07example\x03com\x00".to_vec());
        let (parsed, used) = Name::from_wire(&wire).unwrap();
        assert_eq!(parsed, n);
        assert_eq!(used, wire.len());
    }

    #[test]
    fn test_wildcard_labels() {
        let n = name("*.example.com");
        assert!(n.is_wildcard());
        assert_eq!(n.rrsig_labels(), 2);
        assert_eq!(name("www.example.com").rrsig_labels(), 3);
    }
}
