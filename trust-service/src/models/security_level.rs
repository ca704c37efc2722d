use serde::{Deserialize, Serialize};
use std::fmt;

/// Graduated trust tier carried by tokens and credentials (0..=4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SecurityLevel(u8);

impl SecurityLevel {
    pub const MIN: SecurityLevel = SecurityLevel(0);
    pub const MAX: SecurityLevel = SecurityLevel(4);

    pub fn new(level: u8) -> Result<Self, InvalidSecurityLevel> {
        if level <= Self::MAX.0 {
            Ok(Self(level))
        } else {
            Err(InvalidSecurityLevel(level as i64))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Index into per-level tables.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("security level must be between 0 and 4, got {0}")]
pub struct InvalidSecurityLevel(pub i64);

impl TryFrom<u8> for SecurityLevel {
    type Error = InvalidSecurityLevel;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        SecurityLevel::new(value)
    }
}

impl TryFrom<i64> for SecurityLevel {
    type Error = InvalidSecurityLevel;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .map_err(|_| InvalidSecurityLevel(value))
            .and_then(SecurityLevel::new)
    }
}

impl From<SecurityLevel> for u8 {
    fn from(level: SecurityLevel) -> Self {
        level.0
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_is_enforced() {
        assert!(SecurityLevel::new(0).is_ok());
        assert!(SecurityLevel::new(4).is_ok());
        assert_eq!(SecurityLevel::new(5), Err(InvalidSecurityLevel(5)));
        assert!(SecurityLevel::try_from(-1_i64).is_err());
    }

    #[test]
    fn test_serde_as_integer() {
        let level = SecurityLevel::new(3).unwrap();
        assert_eq!(serde_json::to_string(&level).unwrap(), "3");
        let parsed: SecurityLevel = serde_json::from_str("2").unwrap();
        assert_eq!(parsed.value(), 2);
        assert!(serde_json::from_str::<SecurityLevel>("7").is_err());
    }

    #[test]
    fn test_ordering() {
        assert!(SecurityLevel::MIN < SecurityLevel::MAX);
    }
}
