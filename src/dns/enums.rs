use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Resource record types handled by the signer.
///
/// Anything without a dedicated variant is carried as `Unknown` and written
/// back in RFC 3597 `TYPEnnn` notation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    HINFO,
    MX,
    TXT,
    AAAA,
    SRV,
    NAPTR,
    DNAME,
    DS,
    SSHFP,
    RRSIG,
    NSEC,
    DNSKEY,
    NSEC3,
    NSEC3PARAM,
    TLSA,
    CDS,
    CDNSKEY,
    ZONEMD,
    SVCB,
    HTTPS,
    CAA,
    Unknown(u16),
}

impl RecordType {
    /// Numeric type code
    pub fn to_u16(self) -> u16 {
        self.into()
    }

    /// Whether names embedded in RDATA of this type are lowercased in
    /// canonical form (RFC 4034 section 6.2, as amended by RFC 6840).
    pub fn has_canonical_names(self) -> bool {
        matches!(
            self,
            Self::NS
                | Self::CNAME
                | Self::SOA
                | Self::PTR
                | Self::MX
                | Self::SRV
                | Self::DNAME
                | Self::RRSIG
        )
    }

    /// Types that only ever appear as by-products of signing.
    pub fn is_dnssec_generated(self) -> bool {
        matches!(
            self,
            Self::RRSIG | Self::NSEC | Self::NSEC3 | Self::NSEC3PARAM
        )
    }
}

impl From<u16> for RecordType {
    fn from(value: u16) -> Self {
        match value {
            1 => RecordType::A,
            2 => RecordType::NS,
            5 => RecordType::CNAME,
            6 => RecordType::SOA,
            12 => RecordType::PTR,
            13 => RecordType::HINFO,
            15 => RecordType::MX,
            16 => RecordType::TXT,
            28 => RecordType::AAAA,
            33 => RecordType::SRV,
            35 => RecordType::NAPTR,
            39 => RecordType::DNAME,
            43 => RecordType::DS,
            44 => RecordType::SSHFP,
            46 => RecordType::RRSIG,
            47 => RecordType::NSEC,
            48 => RecordType::DNSKEY,
            50 => RecordType::NSEC3,
            51 => RecordType::NSEC3PARAM,
            52 => RecordType::TLSA,
            59 => RecordType::CDS,
            60 => RecordType::CDNSKEY,
            63 => RecordType::ZONEMD,
            64 => RecordType::SVCB,
            65 => RecordType::HTTPS,
            257 => RecordType::CAA,
            x => RecordType::Unknown(x),
        }
    }
}

impl From<RecordType> for u16 {
    fn from(value: RecordType) -> u16 {
        match value {
            RecordType::A => 1,
            RecordType::NS => 2,
            RecordType::CNAME => 5,
            RecordType::SOA => 6,
            RecordType::PTR => 12,
            RecordType::HINFO => 13,
            RecordType::MX => 15,
            RecordType::TXT => 16,
            RecordType::AAAA => 28,
            RecordType::SRV => 33,
            RecordType::NAPTR => 35,
            RecordType::DNAME => 39,
            RecordType::DS => 43,
            RecordType::SSHFP => 44,
            RecordType::RRSIG => 46,
            RecordType::NSEC => 47,
            RecordType::DNSKEY => 48,
            RecordType::NSEC3 => 50,
            RecordType::NSEC3PARAM => 51,
            RecordType::TLSA => 52,
            RecordType::CDS => 59,
            RecordType::CDNSKEY => 60,
            RecordType::ZONEMD => 63,
            RecordType::SVCB => 64,
            RecordType::HTTPS => 65,
            RecordType::CAA => 257,
            RecordType::Unknown(x) => x,
        }
    }
}

// Ordered by type code, which is the order RRsets take at one owner name.
impl Ord for RecordType {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_u16().cmp(&other.to_u16())
    }
}

impl PartialOrd for RecordType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::A => "A",
            Self::NS => "NS",
            Self::CNAME => "CNAME",
            Self::SOA => "SOA",
            Self::PTR => "PTR",
            Self::HINFO => "HINFO",
            Self::MX => "MX",
            Self::TXT => "TXT",
            Self::AAAA => "AAAA",
            Self::SRV => "SRV",
            Self::NAPTR => "NAPTR",
            Self::DNAME => "DNAME",
            Self::DS => "DS",
            Self::SSHFP => "SSHFP",
            Self::RRSIG => "RRSIG",
            Self::NSEC => "NSEC",
            Self::DNSKEY => "DNSKEY",
            Self::NSEC3 => "NSEC3",
            Self::NSEC3PARAM => "NSEC3PARAM",
            Self::TLSA => "TLSA",
            Self::CDS => "CDS",
            Self::CDNSKEY => "CDNSKEY",
            Self::ZONEMD => "ZONEMD",
            Self::SVCB => "SVCB",
            Self::HTTPS => "HTTPS",
            Self::CAA => "CAA",
            Self::Unknown(x) => return write!(f, "TYPE{}", x),
        };
        f.write_str(name)
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        if let Some(number) = upper.strip_prefix("TYPE") {
            return number
                .parse::<u16>()
                .map(RecordType::from)
                .map_err(|_| format!("Invalid record type: {}", s));
        }

        let rtype = match upper.as_str() {
            "A" => Self::A,
            "NS" => Self::NS,
            "CNAME" => Self::CNAME,
            "SOA" => Self::SOA,
            "PTR" => Self::PTR,
            "HINFO" => Self::HINFO,
            "MX" => Self::MX,
            "TXT" => Self::TXT,
            "AAAA" => Self::AAAA,
            "SRV" => Self::SRV,
            "NAPTR" => Self::NAPTR,
            "DNAME" => Self::DNAME,
            "DS" => Self::DS,
            "SSHFP" => Self::SSHFP,
            "RRSIG" => Self::RRSIG,
            "NSEC" => Self::NSEC,
            "DNSKEY" => Self::DNSKEY,
            "NSEC3" => Self::NSEC3,
            "NSEC3PARAM" => Self::NSEC3PARAM,
            "TLSA" => Self::TLSA,
            "CDS" => Self::CDS,
            "CDNSKEY" => Self::CDNSKEY,
            "ZONEMD" => Self::ZONEMD,
            "SVCB" => Self::SVCB,
            "HTTPS" => Self::HTTPS,
            "CAA" => Self::CAA,
            _ => return Err(format!("Invalid record type: {}", s)),
        };
        Ok(rtype)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum RecordClass {
    #[default]
    IN,
    CH,
    HS,
    Unknown(u16),
}

impl From<u16> for RecordClass {
    fn from(value: u16) -> Self {
        match value {
            1 => RecordClass::IN,
            3 => RecordClass::CH,
            4 => RecordClass::HS,
            x => RecordClass::Unknown(x),
        }
    }
}

impl From<RecordClass> for u16 {
    fn from(value: RecordClass) -> u16 {
        match value {
            RecordClass::IN => 1,
            RecordClass::CH => 3,
            RecordClass::HS => 4,
            RecordClass::Unknown(x) => x,
        }
    }
}

impl fmt::Display for RecordClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IN => f.write_str("IN"),
            Self::CH => f.write_str("CH"),
            Self::HS => f.write_str("HS"),
            Self::Unknown(x) => write!(f, "CLASS{}", x),
        }
    }
}

impl FromStr for RecordClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        match upper.as_str() {
            "IN" => Ok(Self::IN),
            "CH" => Ok(Self::CH),
            "HS" => Ok(Self::HS),
            _ => upper
                .strip_prefix("CLASS")
                .and_then(|n| n.parse::<u16>().ok())
                .map(RecordClass::from)
                .ok_or_else(|| format!("Invalid record class: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_roundtrip_through_code() {
        for code in [1u16, 2, 6, 46, 47, 48, 50, 51, 63, 257, 999] {
            let rtype = RecordType::from(code);
            assert_eq!(rtype.to_u16(), code);
        }
    }

    #[test]
    fn test_type_mnemonics() {
        assert_eq!(
            "nsec3param".parse::<RecordType>().unwrap(),
            RecordType::NSEC3PARAM
        );
        assert_eq!(
            "TYPE65280".parse::<RecordType>().unwrap(),
            RecordType::Unknown(65280)
        );
        assert_eq!(RecordType::Unknown(65280).to_string(), "TYPE65280");
        assert!("BOGUS".parse::<RecordType>().is_err());
    }

    #[test]
    fn test_types_order_by_code() {
        assert!(RecordType::A < RecordType::NS);
        assert!(RecordType::RRSIG < RecordType::NSEC);
        assert!(RecordType::ZONEMD < RecordType::CAA);
        assert!(RecordType::CAA < RecordType::Unknown(65280));
    }

    #[test]
    fn test_class_parsing() {
        assert_eq!("in".parse::<RecordClass>().unwrap(), RecordClass::IN);
        assert_eq!(
            "CLASS42".parse::<RecordClass>().unwrap(),
            RecordClass::Unknown(42)
        );
        assert!("XX".parse::<RecordClass>().is_err());
    }
}
