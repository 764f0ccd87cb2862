use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A migration version.
///
/// Versions are sequences of numeric segments separated by `.` or `_`
/// (`2`, `002`, `1.2`, `1_2`). They compare numerically segment by segment,
/// so `10` sorts after `2`. Trailing zero segments carry no meaning: `1.0`
/// and `1` are the same version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    segments: Vec<u64>,
}

impl Version {
    /// Parse a version string.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidData("empty version".to_string()));
        }

        let mut segments = Vec::new();
        for part in s.split(['.', '_']) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::InvalidData(format!(
                    "version {s:?} must be numeric segments separated by '.' or '_'"
                )));
            }
            let value = part
                .parse::<u64>()
                .map_err(|e| Error::InvalidData(format!("version {s:?}: {e}")))?;
            segments.push(value);
        }

        while segments.len() > 1 && segments.last() == Some(&0) {
            segments.pop();
        }

        Ok(Self { segments })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_numeric_not_lexical_ordering() {
        assert!(v("2") < v("10"));
        assert!(v("002") < v("010"));
        assert!(v("1.9") < v("1.10"));
        assert!(v("1") < v("1.1"));
    }

    #[test]
    fn test_zero_padding_and_trailing_zeros_are_insignificant() {
        assert_eq!(v("001"), v("1"));
        assert_eq!(v("1.0"), v("1"));
        assert_eq!(v("1_2"), v("1.2"));
        assert_eq!(v("0"), v("0.0"));
    }

    #[test]
    fn test_display_is_canonical() {
        assert_eq!(v("003").to_string(), "3");
        assert_eq!(v("1_02_0").to_string(), "1.2");
    }

    #[test]
    fn test_rejects_non_numeric() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("1a").is_err());
        assert!(Version::parse("1..2").is_err());
        assert!(Version::parse("-1").is_err());
        assert!(Version::parse("99999999999999999999999").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&v("01.2")).unwrap();
        assert_eq!(json, "\"1.2\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v("1.2"));
    }
}
