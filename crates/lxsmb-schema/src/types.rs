//! Validated identifier newtypes.
//!
//! Every newtype is constructed through `parse`, which rejects malformed input
//! with a [`ValidationError`]. All of them serialize as plain strings.

use crate::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::ops::Deref;
use std::str::FromStr;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident, $check:path) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap a string.
            pub fn parse(s: impl Into<String>) -> Result<Self, ValidationError> {
                let s = s.into();
                $check(&s)?;
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;
            fn try_from(s: String) -> Result<Self, ValidationError> {
                Self::parse(s)
            }
        }

        impl From<$name> for String {
            fn from(v: $name) -> String {
                v.0
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;
            fn from_str(s: &str) -> Result<Self, ValidationError> {
                Self::parse(s)
            }
        }
    };
}

string_newtype!(
    /// ZFS dataset name such as `tank/samba`. Never a snapshot name.
    DatasetName,
    check_dataset
);

string_newtype!(
    /// POSIX account name enrolled for home-directory access.
    Username,
    check_username
);

string_newtype!(
    /// NetBIOS workgroup name.
    Workgroup,
    check_workgroup
);

string_newtype!(
    /// The part after `@` in a ZFS snapshot name.
    SnapshotTag,
    check_snapshot_tag
);

impl DatasetName {
    /// Child dataset `<self>/<component>`.
    pub fn child(&self, component: &str) -> Result<Self, ValidationError> {
        Self::parse(format!("{}/{component}", self.0))
    }

    /// Parent dataset, `None` for a pool root.
    pub fn parent(&self) -> Option<Self> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| Self(parent.to_owned()))
    }

    /// Full snapshot name `<self>@<tag>`.
    pub fn at(&self, tag: &SnapshotTag) -> String {
        format!("{}@{tag}", self.0)
    }
}

impl Default for Workgroup {
    fn default() -> Self {
        Self(DEFAULT_WORKGROUP.to_owned())
    }
}

pub const DEFAULT_WORKGROUP: &str = "WORKGROUP";

/// Accounts that must never be enrolled as share principals.
const RESERVED_USERNAMES: &[&str] = &[
    "root", "daemon", "bin", "sys", "nobody", "sshd", "www-data", "homes", "global", "printers",
    "shared", "public", "guest",
];

fn check_dataset(s: &str) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::Dataset {
        value: s.to_owned(),
        reason: reason.to_owned(),
    };
    if s.is_empty() || s.len() > 255 {
        return Err(invalid("must be 1-255 characters"));
    }
    if s.starts_with('/') || s.ends_with('/') || s.contains("//") {
        return Err(invalid("components must be non-empty and separated by '/'"));
    }
    for component in s.split('/') {
        if component == "." || component == ".." {
            return Err(invalid("'.' and '..' are not valid components"));
        }
        if !component
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b':'))
        {
            return Err(invalid("components must match [A-Za-z0-9_.:-]"));
        }
    }
    if !s.as_bytes()[0].is_ascii_alphabetic() {
        return Err(invalid("pool name must start with a letter"));
    }
    Ok(())
}

fn check_username(s: &str) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::Username {
        value: s.to_owned(),
        reason: reason.to_owned(),
    };
    if s.is_empty() || s.len() > 32 {
        return Err(invalid("must be 1-32 characters"));
    }
    let first = s.as_bytes()[0];
    if !(first.is_ascii_lowercase() || first == b'_') {
        return Err(invalid("must start with a lowercase letter or '_'"));
    }
    if !s
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
    {
        return Err(invalid("must match [a-z0-9_-]"));
    }
    if RESERVED_USERNAMES.contains(&s) {
        return Err(invalid("name is reserved"));
    }
    Ok(())
}

fn check_workgroup(s: &str) -> Result<(), ValidationError> {
    if s.is_empty() || s.len() > 15 {
        return Err(ValidationError::Workgroup {
            value: s.to_owned(),
            reason: "must be 1-15 characters".to_owned(),
        });
    }
    if !s
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
    {
        return Err(ValidationError::Workgroup {
            value: s.to_owned(),
            reason: "must match [A-Za-z0-9_.-]".to_owned(),
        });
    }
    Ok(())
}

fn check_snapshot_tag(s: &str) -> Result<(), ValidationError> {
    if s.is_empty() || s.len() > 200 {
        return Err(ValidationError::SnapshotTag {
            value: s.to_owned(),
            reason: "must be 1-200 characters".to_owned(),
        });
    }
    if !s
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b':'))
    {
        return Err(ValidationError::SnapshotTag {
            value: s.to_owned(),
            reason: "must match [A-Za-z0-9_.:-]".to_owned(),
        });
    }
    Ok(())
}

/// An allowed network range: an address with an optional prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Subnet {
    addr: IpAddr,
    prefix: u8,
}

impl Subnet {
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::Subnet {
            value: s.to_owned(),
            reason: reason.to_owned(),
        };
        let (addr_part, prefix_part) = match s.split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (s, None),
        };
        let addr: IpAddr = addr_part
            .parse()
            .map_err(|_| invalid("not an IPv4 or IPv6 address"))?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix_part {
            Some(p) => {
                let n: u8 = p.parse().map_err(|_| invalid("prefix is not a number"))?;
                if n > max {
                    return Err(invalid("prefix length out of range"));
                }
                n
            }
            None => max,
        };
        Ok(Self { addr, prefix })
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let full = if self.addr.is_ipv4() { 32 } else { 128 };
        if self.prefix == full {
            write!(f, "{}", self.addr)
        } else {
            write!(f, "{}/{}", self.addr, self.prefix)
        }
    }
}

impl FromStr for Subnet {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, ValidationError> {
        Self::parse(s)
    }
}

impl Serialize for Subnet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Subnet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A dataset quota. `None` means no quota is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Quota {
    #[default]
    None,
    Bytes(u64),
}

impl Quota {
    /// Parse `none`, a byte count, or a size with a binary suffix (`K`..`P`).
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("none") || trimmed == "0" || trimmed == "-" {
            return Ok(Self::None);
        }
        let invalid = || ValidationError::Quota(s.to_owned());
        let upper = trimmed.to_ascii_uppercase();
        let digits = upper.trim_end_matches(['B', 'K', 'M', 'G', 'T', 'P']);
        let suffix = &upper[digits.len()..];
        let shift = match suffix {
            "" | "B" => 0,
            "K" | "KB" => 10,
            "M" | "MB" => 20,
            "G" | "GB" => 30,
            "T" | "TB" => 40,
            "P" | "PB" => 50,
            _ => return Err(invalid()),
        };
        let n: u64 = digits.parse().map_err(|_| invalid())?;
        n.checked_mul(1u64 << shift)
            .filter(|b| *b > 0)
            .map(Self::Bytes)
            .ok_or_else(invalid)
    }

    /// Value accepted by `zfs set quota=`.
    pub fn zfs_value(&self) -> String {
        match self {
            Self::None => "none".to_owned(),
            Self::Bytes(b) => b.to_string(),
        }
    }
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [(u32, &str); 5] = [(50, "P"), (40, "T"), (30, "G"), (20, "M"), (10, "K")];
        match self {
            Self::None => f.write_str("none"),
            Self::Bytes(b) => {
                for (shift, unit) in UNITS {
                    let scale = 1u64 << shift;
                    if *b >= scale && b % scale == 0 {
                        return write!(f, "{}{unit}", b / scale);
                    }
                }
                write!(f, "{b}")
            }
        }
    }
}

impl Serialize for Quota {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quota {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_accepts_nested_names() {
        let ds = DatasetName::parse("tank/samba").unwrap();
        assert_eq!(ds.child("homes").unwrap(), "tank/samba/homes");
        assert_eq!(ds.parent().unwrap(), "tank");
        assert!(DatasetName::parse("tank").unwrap().parent().is_none());
    }

    #[test]
    fn dataset_rejects_malformed() {
        for bad in ["", "/tank", "tank/", "tank//x", "tank@snap", "tank/a b", "1tank", "tank/.."] {
            assert!(DatasetName::parse(bad).is_err(), "{bad} must be rejected");
        }
    }

    #[test]
    fn dataset_snapshot_name() {
        let ds = DatasetName::parse("tank/samba").unwrap();
        let tag = SnapshotTag::parse("before-upgrade").unwrap();
        assert_eq!(ds.at(&tag), "tank/samba@before-upgrade");
    }

    #[test]
    fn username_rules() {
        assert!(Username::parse("alice").is_ok());
        assert!(Username::parse("_svc-01").is_ok());
        assert!(Username::parse("Alice").is_err());
        assert!(Username::parse("9lives").is_err());
        assert!(Username::parse("root").is_err());
        assert!(Username::parse("a".repeat(33)).is_err());
        assert!(Username::parse("al ice").is_err());
    }

    #[test]
    fn workgroup_rules() {
        assert!(Workgroup::parse("HOME-NET").is_ok());
        assert!(Workgroup::parse("").is_err());
        assert!(Workgroup::parse("A".repeat(16)).is_err());
        assert!(Workgroup::parse("HOME NET").is_err());
        assert_eq!(Workgroup::default(), "WORKGROUP");
    }

    #[test]
    fn snapshot_tag_rules() {
        assert!(SnapshotTag::parse("lxsmb-20260101-120000").is_ok());
        assert!(SnapshotTag::parse("a@b").is_err());
        assert!(SnapshotTag::parse("").is_err());
    }

    #[test]
    fn subnet_parsing() {
        let s = Subnet::parse("192.168.1.0/24").unwrap();
        assert_eq!(s.prefix(), 24);
        assert_eq!(s.to_string(), "192.168.1.0/24");
        assert_eq!(Subnet::parse("10.0.0.5").unwrap().to_string(), "10.0.0.5");
        assert_eq!(Subnet::parse("fd00::/8").unwrap().to_string(), "fd00::/8");
        assert!(Subnet::parse("10.0.0.0/33").is_err());
        assert!(Subnet::parse("10.0.0/8").is_err());
        assert!(Subnet::parse("lan").is_err());
    }

    #[test]
    fn quota_parsing_and_display() {
        assert_eq!(Quota::parse("none").unwrap(), Quota::None);
        assert_eq!(Quota::parse("0").unwrap(), Quota::None);
        assert_eq!(Quota::parse("50G").unwrap(), Quota::Bytes(50 << 30));
        assert_eq!(Quota::parse("512m").unwrap(), Quota::Bytes(512 << 20));
        assert_eq!(Quota::parse("1024").unwrap(), Quota::Bytes(1024));
        assert_eq!(Quota::Bytes(50 << 30).to_string(), "50G");
        assert_eq!(Quota::Bytes(1500).to_string(), "1500");
        assert_eq!(Quota::None.zfs_value(), "none");
        assert!(Quota::parse("lots").is_err());
        assert!(Quota::parse("5X").is_err());
    }

    #[test]
    fn newtypes_serialize_as_strings() {
        let u = Username::parse("bob").unwrap();
        assert_eq!(serde_json::to_string(&u).unwrap(), "\"bob\"");
        let back: Username = serde_json::from_str("\"bob\"").unwrap();
        assert_eq!(back, u);
        assert!(serde_json::from_str::<Username>("\"Bob\"").is_err());
    }
}
