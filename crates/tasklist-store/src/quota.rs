//! Approximate storage usage for the application's namespace.
//!
//! Browsers expose no authoritative quota for `localStorage`, so usage is
//! estimated from the stored strings themselves and compared against an
//! assumed ceiling. Thresholds should be configured conservatively.

use crate::backend::{BackendError, KeyValueBackend};
use crate::config::StoreConfig;

/// Assumed capacity of the storage area (5 MiB).
pub const DEFAULT_QUOTA_CEILING_BYTES: u64 = 5 * 1024 * 1024;

/// Bytes per stored character; browsers keep strings as UTF-16.
pub const DEFAULT_BYTES_PER_CHAR: u64 = 2;

/// Length of `s` in UTF-16 code units, the unit browsers store.
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Usage of the namespace at the moment it was computed.
///
/// Never cached: the stored data may change between two computations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuotaEstimate {
    pub bytes_used: u64,
    /// Usage relative to the assumed ceiling, `0.0..`. May exceed 100.
    pub percent_used: f64,
}

/// Whether `estimate` has reached `threshold_percent`.
pub fn is_approaching_limit(estimate: &QuotaEstimate, threshold_percent: f64) -> bool {
    estimate.percent_used >= threshold_percent
}

/// Estimates namespace usage against an assumed ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaMonitor {
    ceiling_bytes: u64,
    bytes_per_char: u64,
}

impl QuotaMonitor {
    pub fn new(ceiling_bytes: u64, bytes_per_char: u64) -> Self {
        Self {
            ceiling_bytes,
            bytes_per_char,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.quota_ceiling_bytes, config.bytes_per_char)
    }

    pub fn ceiling_bytes(&self) -> u64 {
        self.ceiling_bytes
    }

    /// Sum `(key length + value length) * bytes per char` over `entries`.
    pub fn estimate<'a, I>(&self, entries: I) -> QuotaEstimate
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let chars: u64 = entries
            .into_iter()
            .map(|(k, v)| (utf16_len(k) + utf16_len(v)) as u64)
            .sum();
        let bytes_used = chars.saturating_mul(self.bytes_per_char);
        let percent_used = if self.ceiling_bytes == 0 {
            100.0
        } else {
            bytes_used as f64 * 100.0 / self.ceiling_bytes as f64
        };
        QuotaEstimate {
            bytes_used,
            percent_used,
        }
    }

    /// Estimate usage of every backend key starting with `prefix`.
    pub fn estimate_backend<B>(&self, backend: &B, prefix: &str) -> Result<QuotaEstimate, BackendError>
    where
        B: KeyValueBackend + ?Sized,
    {
        let entries = backend.entries(prefix)?;
        Ok(self.estimate(entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))))
    }
}

impl Default for QuotaMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_QUOTA_CEILING_BYTES, DEFAULT_BYTES_PER_CHAR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBackend;

    #[test]
    fn counts_utf16_code_units_of_keys_and_values() {
        let monitor = QuotaMonitor::new(1000, 2);
        let est = monitor.estimate([("ab", "cd"), ("k", "\u{1F600}")]);
        // 4 + (1 + 2 surrogates) = 7 chars, 14 bytes.
        assert_eq!(est.bytes_used, 14);
        assert!((est.percent_used - 1.4).abs() < 1e-9);
    }

    #[test]
    fn backend_estimate_ignores_foreign_keys() {
        let mut backend = MemoryBackend::new();
        backend.set("app-tasks", "[]").unwrap();
        backend.set("unrelated", "x".repeat(500).as_str()).unwrap();

        let monitor = QuotaMonitor::new(100, 1);
        let est = monitor.estimate_backend(&backend, "app-").unwrap();
        assert_eq!(est.bytes_used, 11);
    }

    #[test]
    fn approaching_limit_is_inclusive() {
        let at = |p| QuotaEstimate {
            bytes_used: 0,
            percent_used: p,
        };
        assert!(is_approaching_limit(&at(85.0), 80.0));
        assert!(is_approaching_limit(&at(80.0), 80.0));
        assert!(!is_approaching_limit(&at(79.9), 80.0));
    }
}
