//! Version parsing for vCenter/ESXi product versions and VM hardware versions

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Prefix of VM hardware version strings
const HARDWARE_VERSION_PREFIX: &str = "vmx-";

// =============================================================================
// Product Version
// =============================================================================

/// A vCenter or ESXi product version such as `7.0.2`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProductVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ProductVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for ProductVersion {
    type Err = Error;

    /// Accepts `major[.minor[.patch]]`; missing components are zero
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::VersionParse("empty version".into()));
        }

        let mut parts = [0u32; 3];
        for (i, component) in trimmed.split('.').enumerate() {
            if i >= parts.len() {
                return Err(Error::VersionParse(format!("too many components in {}", s)));
            }
            parts[i] = component
                .parse()
                .map_err(|_| Error::VersionParse(format!("invalid component {:?} in {}", component, s)))?;
        }

        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

impl std::fmt::Display for ProductVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl TryFrom<String> for ProductVersion {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ProductVersion> for String {
    fn from(v: ProductVersion) -> Self {
        v.to_string()
    }
}

// =============================================================================
// Hardware Version
// =============================================================================

/// A VM virtual hardware version such as `vmx-15`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HardwareVersion(pub u32);

impl FromStr for HardwareVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let number = s
            .trim()
            .strip_prefix(HARDWARE_VERSION_PREFIX)
            .ok_or_else(|| Error::VersionParse(format!("hardware version {:?} lacks vmx- prefix", s)))?;
        number
            .parse()
            .map(HardwareVersion)
            .map_err(|_| Error::VersionParse(format!("invalid hardware version {:?}", s)))
    }
}

impl std::fmt::Display for HardwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", HARDWARE_VERSION_PREFIX, self.0)
    }
}

impl TryFrom<String> for HardwareVersion {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<HardwareVersion> for String {
    fn from(v: HardwareVersion) -> Self {
        v.to_string()
    }
}
