//! Table-level lock mode conflicts.
//!
//! Matrix as documented for PostgreSQL's heavyweight lock modes. Row-level
//! and transaction-id locks use the same mode names.

/// Heavyweight lock modes, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockMode {
    AccessShare,
    RowShare,
    RowExclusive,
    ShareUpdateExclusive,
    Share,
    ShareRowExclusive,
    Exclusive,
    AccessExclusive,
}

impl LockMode {
    /// Parses a `pg_locks.mode` value.
    pub fn parse(mode: &str) -> Option<Self> {
        match mode {
            "AccessShareLock" => Some(Self::AccessShare),
            "RowShareLock" => Some(Self::RowShare),
            "RowExclusiveLock" => Some(Self::RowExclusive),
            "ShareUpdateExclusiveLock" => Some(Self::ShareUpdateExclusive),
            "ShareLock" => Some(Self::Share),
            "ShareRowExclusiveLock" => Some(Self::ShareRowExclusive),
            "ExclusiveLock" => Some(Self::Exclusive),
            "AccessExclusiveLock" => Some(Self::AccessExclusive),
            _ => None,
        }
    }

    pub fn conflicts_with(self, other: LockMode) -> bool {
        use LockMode::*;
        match self {
            AccessShare => other == AccessExclusive,
            RowShare => matches!(other, Exclusive | AccessExclusive),
            RowExclusive => matches!(
                other,
                Share | ShareRowExclusive | Exclusive | AccessExclusive
            ),
            ShareUpdateExclusive => matches!(
                other,
                ShareUpdateExclusive | Share | ShareRowExclusive | Exclusive | AccessExclusive
            ),
            Share => matches!(
                other,
                RowExclusive | ShareUpdateExclusive | ShareRowExclusive | Exclusive | AccessExclusive
            ),
            ShareRowExclusive => matches!(
                other,
                RowExclusive
                    | ShareUpdateExclusive
                    | Share
                    | ShareRowExclusive
                    | Exclusive
                    | AccessExclusive
            ),
            Exclusive => other != AccessShare,
            AccessExclusive => true,
        }
    }
}

/// Mode of serializable predicate locks. They are never waited on.
pub const PREDICATE_LOCK_MODE: &str = "SIReadLock";

/// Whether a request in mode `requested` has to wait for a holder of `held`.
///
/// Predicate locks never conflict. Other modes outside the matrix are assumed
/// to conflict, so an unexpected mode shows up as an edge rather than being hidden.
pub fn modes_conflict(requested: &str, held: &str) -> bool {
    if requested == PREDICATE_LOCK_MODE || held == PREDICATE_LOCK_MODE {
        return false;
    }
    match (LockMode::parse(requested), LockMode::parse(held)) {
        (Some(r), Some(h)) => r.conflicts_with(h),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [LockMode; 8] = [
        LockMode::AccessShare,
        LockMode::RowShare,
        LockMode::RowExclusive,
        LockMode::ShareUpdateExclusive,
        LockMode::Share,
        LockMode::ShareRowExclusive,
        LockMode::Exclusive,
        LockMode::AccessExclusive,
    ];

    #[test]
    fn matrix_is_symmetric() {
        for a in ALL {
            for b in ALL {
                assert_eq!(a.conflicts_with(b), b.conflicts_with(a), "{:?} vs {:?}", a, b);
            }
        }
    }

    #[test]
    fn readers_only_conflict_with_access_exclusive() {
        for m in ALL {
            assert_eq!(
                LockMode::AccessShare.conflicts_with(m),
                m == LockMode::AccessExclusive
            );
        }
    }

    #[test]
    fn share_is_self_compatible_but_row_exclusive_blocks_it() {
        assert!(!modes_conflict("ShareLock", "ShareLock"));
        assert!(modes_conflict("ShareLock", "RowExclusiveLock"));
        assert!(!modes_conflict("RowExclusiveLock", "RowExclusiveLock"));
    }

    #[test]
    fn unknown_modes_conflict() {
        assert!(modes_conflict("AccessShareLock", "SomethingNew"));
        assert!(modes_conflict("SomethingNew", "AccessShareLock"));
    }

    #[test]
    fn predicate_locks_never_conflict() {
        assert!(!modes_conflict("AccessExclusiveLock", "SIReadLock"));
        assert!(!modes_conflict("SIReadLock", "AccessExclusiveLock"));
        assert!(!modes_conflict("SIReadLock", "SIReadLock"));
    }
}
