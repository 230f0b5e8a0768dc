//! Lease values stored under each lock name.
//!
//! The wire format is `"<owner>$<deadline>"` where the deadline is a float
//! Unix timestamp in seconds. Owner identities themselves contain `$`
//! separators, so parsing splits on the *rightmost* `$`. The format is shared
//! by both protocol handlers and by foreign-language peers, which is why it is
//! a delimited string rather than JSON.

use crate::error::StoreError;

/// Separator between the owner identity and the deadline, and between the
/// components of an owner identity.
pub const LEASE_SEPARATOR: char = '$';

/// A parsed lease: who holds a name and until when.
///
/// The deadline is authoritative even when the store-side key expiry was never
/// applied (a holder that crashed between claiming and arming expiry leaves
/// the value behind; readers treat it as free once the deadline passes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Identity of the current holder.
    pub owner: String,
    /// Absolute deadline in Unix milliseconds, per the store clock.
    pub deadline_ms: u64,
}

impl Lease {
    /// Create a lease for `owner` expiring at `deadline_ms`.
    pub fn new(owner: impl Into<String>, deadline_ms: u64) -> Self {
        Self {
            owner: owner.into(),
            deadline_ms,
        }
    }

    /// Encode to the wire format.
    pub fn encode(&self) -> String {
        format!(
            "{}{}{:.6}",
            self.owner,
            LEASE_SEPARATOR,
            self.deadline_ms as f64 / 1000.0
        )
    }

    /// Parse a stored value.
    ///
    /// Fails with [`StoreError::Protocol`] when the separator is missing or
    /// the deadline does not parse as a float.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let (owner, deadline) = raw.rsplit_once(LEASE_SEPARATOR).ok_or_else(|| StoreError::Protocol {
            reason: format!("malformed lease value: {raw:?}"),
        })?;
        let deadline_secs: f64 = deadline.parse().map_err(|_| StoreError::Protocol {
            reason: format!("malformed lease deadline: {deadline:?}"),
        })?;
        if owner.is_empty() || !deadline_secs.is_finite() || deadline_secs < 0.0 {
            return Err(StoreError::Protocol {
                reason: format!("malformed lease value: {raw:?}"),
            });
        }
        Ok(Self {
            owner: owner.to_string(),
            deadline_ms: (deadline_secs * 1000.0).round() as u64,
        })
    }

    /// Whether the lease deadline has passed at `now_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.deadline_ms <= now_ms
    }

    /// Remaining time in milliseconds (0 once expired).
    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.deadline_ms.saturating_sub(now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_parse_round_trip() {
        let lease = Lease::new("uuid$123$task-7", 1_722_600_000_500);
        let parsed = Lease::parse(&lease.encode()).unwrap();
        assert_eq!(parsed.owner, "uuid$123$task-7");
        assert_eq!(parsed.deadline_ms, 1_722_600_000_500);
    }

    #[test]
    fn parse_splits_on_rightmost_separator() {
        let parsed = Lease::parse("a$b$c$1000.25").unwrap();
        assert_eq!(parsed.owner, "a$b$c");
        assert_eq!(parsed.deadline_ms, 1_000_250);
    }

    #[test]
    fn parse_rejects_missing_separator() {
        assert!(matches!(Lease::parse("no-separator"), Err(StoreError::Protocol { .. })));
    }

    #[test]
    fn parse_rejects_bad_deadline() {
        assert!(matches!(Lease::parse("owner$not-a-number"), Err(StoreError::Protocol { .. })));
        assert!(matches!(Lease::parse("owner$inf"), Err(StoreError::Protocol { .. })));
    }

    #[test]
    fn parse_rejects_empty_owner() {
        assert!(matches!(Lease::parse("$123.0"), Err(StoreError::Protocol { .. })));
    }

    #[test]
    fn expiry_is_inclusive_of_deadline() {
        let lease = Lease::new("o$1$t", 5_000);
        assert!(!lease.is_expired(4_999));
        assert!(lease.is_expired(5_000));
        assert!(lease.is_expired(5_001));
    }

    #[test]
    fn remaining_saturates_at_zero() {
        let lease = Lease::new("o$1$t", 5_000);
        assert_eq!(lease.remaining_ms(4_000), 1_000);
        assert_eq!(lease.remaining_ms(6_000), 0);
    }
}
