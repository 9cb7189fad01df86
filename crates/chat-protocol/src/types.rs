//! Server-scoped identities and instants.
//!
//! A `Uuid` is a pair of 32-bit components rather than an RFC 4122 id: the
//! `generator` half names the server that minted it and the `sequence` half
//! is that server's running counter.  The textual form `[g.s]` (base 10) is
//! the only form the transaction log accepts.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Uuid
// ---------------------------------------------------------------------------

/// A server-scoped identity: `(generator, sequence)`.
///
/// Equality is componentwise; ordering is by `(generator, sequence)` so
/// ordered indices enumerate deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uuid {
    pub generator: u32,
    pub sequence: u32,
}

impl Uuid {
    /// The absent-reference sentinel `(0, 0)`.
    pub const NULL: Uuid = Uuid {
        generator: 0,
        sequence: 0,
    };

    pub const fn new(generator: u32, sequence: u32) -> Uuid {
        Uuid {
            generator,
            sequence,
        }
    }

    pub fn is_null(self) -> bool {
        self == Uuid::NULL
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}.{}]", self.generator, self.sequence)
    }
}

/// Error parsing the `[g.s]` textual form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseUuidError(pub String);

impl fmt::Display for ParseUuidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid uuid literal: {}", self.0)
    }
}

impl std::error::Error for ParseUuidError {}

impl FromStr for Uuid {
    type Err = ParseUuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ParseUuidError(s.to_owned());
        let inner = s
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(bad)?;
        let (generator, sequence) = inner.split_once('.').ok_or_else(bad)?;
        Ok(Uuid {
            generator: generator.parse().map_err(|_| bad())?,
            sequence: sequence.parse().map_err(|_| bad())?,
        })
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A millisecond instant, totally ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Time(pub i64);

impl Time {
    pub const ZERO: Time = Time(0);

    /// Current wall-clock time in milliseconds since the Unix epoch.
    pub fn now() -> Time {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Time(elapsed.as_millis() as i64)
    }

    pub fn millis(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
