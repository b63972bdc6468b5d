//! Versioned records
//!
//! Optimistic substrate: every mutable row carries a [`Version`] token that the
//! store replaces on each successful write. A writer presents the token it read;
//! the store applies the write only if the token is still current.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque version token attached to a mutable row.
///
/// Tokens are comparable and strictly increase on every successful write.
/// Callers must treat them as opaque: round-trip them, never compute them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Token assigned to a freshly inserted row
    pub const INITIAL: Version = Version(1);

    /// Rebuild a token from its storage representation
    #[inline]
    pub fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Storage representation (BIGINT column)
    #[inline]
    pub fn as_raw(&self) -> i64 {
        self.0
    }

    /// Token that replaces this one after a successful write
    #[inline]
    pub(crate) fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Optimistic concurrency expectation supplied by a caller.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedVersion {
    /// Use whatever version the operation reads inside its own transaction.
    Any,
    /// Require the row to still be at this exact version.
    Exact(Version),
}

impl ExpectedVersion {
    /// Resolve the token to present on write, given the version just read.
    pub fn resolve(self, read: Version) -> Version {
        match self {
            ExpectedVersion::Any => read,
            ExpectedVersion::Exact(v) => v,
        }
    }
}

impl From<Option<Version>> for ExpectedVersion {
    fn from(v: Option<Version>) -> Self {
        v.map_or(ExpectedVersion::Any, ExpectedVersion::Exact)
    }
}

/// A row type whose writes are gated on a [`Version`].
pub trait VersionedRecord: Clone + fmt::Debug + Send + Sync + 'static {
    /// Entity name used in logs and conflict errors
    const ENTITY: &'static str;

    /// Primary key of the row
    fn id(&self) -> i64;
}

/// A record together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Versioned<R> {
    pub record: R,
    pub version: Version,
}

impl<R> Versioned<R> {
    pub fn new(record: R, version: Version) -> Self {
        Self { record, version }
    }
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Write applied; the row now carries this token
    Written(Version),
    /// The presented token was stale (or the row vanished); nothing changed
    Conflict,
}

impl WriteOutcome {
    #[inline]
    pub fn is_conflict(&self) -> bool {
        matches!(self, WriteOutcome::Conflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_advances_strictly() {
        let v = Version::INITIAL;
        assert!(v.next() > v);
        assert_ne!(v.next(), v);
        assert_eq!(Version::from_raw(v.as_raw()), v);
    }

    #[test]
    fn test_expected_version_resolve() {
        let read = Version::from_raw(7);
        assert_eq!(ExpectedVersion::Any.resolve(read), read);
        assert_eq!(
            ExpectedVersion::Exact(Version::from_raw(3)).resolve(read),
            Version::from_raw(3)
        );
    }

    #[test]
    fn test_expected_version_from_option() {
        assert_eq!(ExpectedVersion::from(None), ExpectedVersion::Any);
        assert_eq!(
            ExpectedVersion::from(Some(Version::INITIAL)),
            ExpectedVersion::Exact(Version::INITIAL)
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Version::from_raw(42).to_string(), "v42");
    }
}
