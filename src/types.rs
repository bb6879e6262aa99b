use std::fmt;

/// Log sequence number: a position in a replicated log.
pub type Lsn = u64;

/// Sentinel for "no position".
pub const LSN_INVALID: Lsn = 0;

/// The oldest addressable position.
pub const LSN_OLDEST: Lsn = 1;

/// Sentinel for "read until the tail forever".
pub const LSN_MAX: Lsn = u64::MAX;

/// Renders an LSN for samples and logs, special-casing the sentinels.
pub fn lsn_to_string(lsn: Lsn) -> String {
    match lsn {
        LSN_INVALID => "LSN_INVALID".to_string(),
        LSN_MAX => "LSN_MAX".to_string(),
        _ => lsn.to_string(),
    }
}

/// Identifier of a log within the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogId(pub u64);

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a read stream within a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReadStreamId(pub u64);

impl fmt::Display for ReadStreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
