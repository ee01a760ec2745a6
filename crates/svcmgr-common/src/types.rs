//! Core domain types used throughout svcmgr.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{Error, Result};

/// Longest service name the authority accepts, in bytes.
pub const MAX_SERVICE_NAME_LEN: usize = 127;

/// Service name - the process-unique key a capability is published under.
///
/// # Example
/// ```
/// use svcmgr_common::ServiceName;
///
/// let name = ServiceName::from("storage.default");
/// assert_eq!(name.as_str(), "storage.default");
/// assert!(name.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceName(String);

impl ServiceName {
    /// Creates a new ServiceName from a string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Checks the name against the authority's naming rules.
    ///
    /// Names must be non-empty, at most [`MAX_SERVICE_NAME_LEN`] bytes, and
    /// contain no whitespace or control characters.
    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(Error::invalid_name(&self.0, "name is empty"));
        }
        if self.0.len() > MAX_SERVICE_NAME_LEN {
            return Err(Error::invalid_name(
                &self.0,
                format!("name exceeds {} bytes", MAX_SERVICE_NAME_LEN),
            ));
        }
        if self.0.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(Error::invalid_name(
                &self.0,
                "name contains whitespace or control characters",
            ));
        }
        Ok(())
    }
}

impl From<&str> for ServiceName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ServiceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ServiceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dump priority flags attached to a publication.
///
/// # Rust Learning Note
///
/// This is a small bit set built on a newtype rather than a dependency:
///
/// ```rust
/// use svcmgr_common::DumpPriority;
///
/// let mask = DumpPriority::CRITICAL | DumpPriority::HIGH;
/// assert!(mask.intersects(DumpPriority::HIGH));
/// assert!(!mask.intersects(DumpPriority::NORMAL));
/// ```
///
/// `BitOr` is implemented so flags compose with `|` like integer constants,
/// while the type keeps them from being mixed up with other `u32`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DumpPriority(u32);

impl DumpPriority {
    pub const CRITICAL: DumpPriority = DumpPriority(1 << 0);
    pub const HIGH: DumpPriority = DumpPriority(1 << 1);
    pub const NORMAL: DumpPriority = DumpPriority(1 << 2);
    pub const DEFAULT: DumpPriority = DumpPriority(1 << 3);
    pub const ALL: DumpPriority = DumpPriority(0b1111);

    /// Builds a priority from raw bits, dropping unknown bits.
    pub fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if any flag is shared with `other`.
    pub fn intersects(self, other: DumpPriority) -> bool {
        self.0 & other.0 != 0
    }
}

impl Default for DumpPriority {
    fn default() -> Self {
        DumpPriority::DEFAULT
    }
}

impl std::ops::BitOr for DumpPriority {
    type Output = DumpPriority;

    fn bitor(self, rhs: DumpPriority) -> DumpPriority {
        DumpPriority(self.0 | rhs.0)
    }
}

/// Which diagnostics partition a process's lookups are accounted to.
///
/// Core processes are expected to resolve services quickly and are held to a
/// tighter slow-call threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Core,
    NonCore,
}

impl Classification {
    /// Returns the classification name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Core => "core",
            Classification::NonCore => "non_core",
        }
    }

    /// Parses `core` / `non_core` (also accepts `non-core`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "core" => Some(Classification::Core),
            "non_core" | "non-core" | "noncore" => Some(Classification::NonCore),
            _ => None,
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for Classification {
    fn default() -> Self {
        Classification::NonCore
    }
}
