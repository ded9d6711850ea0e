//! In-memory representation of a size/time limit that keeps the `-1`/`"max"` sentinel out of
//! arithmetic.
//!
//! The public API surface still speaks the sentinel callers expect (`-1` means unlimited), but
//! every internal computation — in particular the v1 swap-limit addition in [`crate::cgroup`] —
//! goes through this type first so an unbounded value can never silently participate in a
//! `limit + delta` overflow.

/// A resource limit as it is carried between the public `i64` sentinel surface and the v1/v2
/// encoders.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Limit {
    /// No limit is set (API sentinel `-1`, v2 encoding `"max"`).
    Unlimited,
    /// A concrete limit, in bytes.
    Bytes(u64),
}

impl Limit {
    /// Converts the public `-1`-means-unlimited sentinel into a `Limit`.
    pub fn from_sentinel(value: i64) -> Self {
        if value == -1 {
            Limit::Unlimited
        } else {
            Limit::Bytes(value as u64)
        }
    }

    /// Renders the value the way a v1 key expects it: the literal number, or the literal `-1`
    /// sentinel (v1 accepts `-1` directly on most memory/hugetlb knobs).
    pub fn to_v1_string(self) -> String {
        match self {
            Limit::Unlimited => "-1".to_string(),
            Limit::Bytes(n) => n.to_string(),
        }
    }

    /// Renders the value the way a v2 key expects it: the literal number, or `"max"`.
    pub fn to_v2_string(self) -> String {
        match self {
            Limit::Unlimited => "max".to_string(),
            Limit::Bytes(n) => n.to_string(),
        }
    }

    /// Parses a value read back from a v1 or v2 knob, recognizing both sentinel spellings.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw == "max" {
            return Some(Limit::Unlimited);
        }
        match raw.parse::<i64>() {
            Ok(-1) => Some(Limit::Unlimited),
            Ok(n) if n >= 0 => Some(Limit::Bytes(n as u64)),
            _ => None,
        }
    }

    pub fn bytes(self) -> Option<u64> {
        match self {
            Limit::Unlimited => None,
            Limit::Bytes(n) => Some(n),
        }
    }
}
