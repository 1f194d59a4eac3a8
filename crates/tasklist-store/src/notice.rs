//! Non-fatal notifications surfaced to the UI layer.
//!
//! Nothing in the persistence layer stops the application. Failures it
//! recovers from are reported here instead, once per occurrence.

use std::fmt;

use crate::backend::BackendError;
use crate::key::StorageKey;
use crate::quota::QuotaEstimate;

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// The backend stopped answering; data is now kept in memory only.
    /// Sent once per outage.
    BackendUnavailable { reason: BackendError },
    /// The backend answered a re-probe and the in-memory data was written back.
    BackendRestored { rewritten: usize },
    /// A write for `key` was rejected for size.
    QuotaExceeded { key: StorageKey },
    /// Usage reached the warning threshold; pruning follows.
    QuotaWarning { estimate: QuotaEstimate },
    /// Pruning could not bring usage under the critical threshold without
    /// touching protected entries.
    CapacityPressure { estimate: QuotaEstimate, pruned: usize },
    /// Invalid stored data under `key` was discarded and the cleaned value
    /// persisted.
    Repaired { key: StorageKey, dropped: usize },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BackendUnavailable { reason } => {
                write!(f, "storage unavailable ({reason}); changes are kept in memory only")
            }
            Self::BackendRestored { rewritten } => {
                write!(f, "storage available again; {rewritten} record(s) written back")
            }
            Self::QuotaExceeded { key } => write!(f, "storage full while writing {key}"),
            Self::QuotaWarning { estimate } => {
                write!(f, "storage {:.1}% full; pruning old entries", estimate.percent_used)
            }
            Self::CapacityPressure { estimate, pruned } => write!(
                f,
                "storage still {:.1}% full after pruning {pruned} entr{}",
                estimate.percent_used,
                if *pruned == 1 { "y" } else { "ies" }
            ),
            Self::Repaired { key, dropped } => {
                write!(f, "repaired {key}: discarded {dropped} invalid entr{}", if *dropped == 1 { "y" } else { "ies" })
            }
        }
    }
}
