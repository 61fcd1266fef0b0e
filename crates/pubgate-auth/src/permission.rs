//! Read/write permission value type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// A read and/or write permission on a topic.
///
/// The discriminants are the permission bits: bit 0 is read, bit 1 is write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
#[repr(u8)]
pub enum Permission {
    #[default]
    DenyAll = 0,
    Read = 1,
    Write = 2,
    ReadWrite = 3,
}

impl Permission {
    /// Build a permission from independent read/write flags.
    #[inline]
    pub const fn new(read: bool, write: bool) -> Self {
        match (read, write) {
            (true, true) => Self::ReadWrite,
            (true, false) => Self::Read,
            (false, true) => Self::Write,
            (false, false) => Self::DenyAll,
        }
    }

    #[inline]
    pub const fn is_read(self) -> bool {
        self as u8 & Self::Read as u8 != 0
    }

    #[inline]
    pub const fn is_write(self) -> bool {
        self as u8 & Self::Write as u8 != 0
    }

    #[inline]
    pub const fn is_read_write(self) -> bool {
        self.is_read() && self.is_write()
    }

    /// Canonical name, as accepted by [`FromStr`].
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadWrite => "read-write",
            Self::Read => "read-only",
            Self::Write => "write-only",
            Self::DenyAll => "deny-all",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "read-write" | "rw" => Ok(Self::ReadWrite),
            "read-only" | "read" | "ro" => Ok(Self::Read),
            "write-only" | "write" | "wo" => Ok(Self::Write),
            "deny-all" | "deny" | "none" => Ok(Self::DenyAll),
            _ => Err(AuthError::invalid(format!("permission '{s}'"))),
        }
    }
}

impl From<Permission> for String {
    fn from(p: Permission) -> Self {
        p.as_str().to_string()
    }
}

impl TryFrom<String> for Permission {
    type Error = AuthError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}
