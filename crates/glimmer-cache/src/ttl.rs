//! Per-kind time-to-live table.

use std::collections::HashMap;
use std::time::Duration;

use glimmer_core::{defaults, OperationKind};

/// TTL per operation kind, with a default for kinds not listed.
#[derive(Debug, Clone, PartialEq)]
pub struct TtlTable {
    default: Duration,
    per_kind: HashMap<OperationKind, Duration>,
}

impl Default for TtlTable {
    fn default() -> Self {
        let per_kind = HashMap::from([
            (
                OperationKind::SkinAnalysis,
                Duration::from_secs(defaults::CACHE_SKIN_ANALYSIS_TTL_SECS),
            ),
            (
                OperationKind::PhotoAnalysis,
                Duration::from_secs(defaults::CACHE_PHOTO_ANALYSIS_TTL_SECS),
            ),
            (
                OperationKind::ProductRecommendation,
                Duration::from_secs(defaults::CACHE_RECOMMENDATION_TTL_SECS),
            ),
            (
                OperationKind::RoutineGeneration,
                Duration::from_secs(defaults::CACHE_ROUTINE_TTL_SECS),
            ),
            (
                OperationKind::QueryGeneration,
                Duration::from_secs(defaults::CACHE_QUERY_GENERATION_TTL_SECS),
            ),
        ]);
        Self {
            default: Duration::from_secs(defaults::CACHE_DEFAULT_TTL_SECS),
            per_kind,
        }
    }
}

impl TtlTable {
    /// Defaults overridden by `CACHE_DEFAULT_TTL_SECS` and
    /// `CACHE_TTL_<KIND>_SECS` (e.g. `CACHE_TTL_SKIN_ANALYSIS_SECS`).
    pub fn from_env() -> Self {
        let mut table = Self::default();
        table.default = Duration::from_secs(glimmer_core::env_or(
            "CACHE_DEFAULT_TTL_SECS",
            defaults::CACHE_DEFAULT_TTL_SECS,
        ));
        for kind in OperationKind::known() {
            let var = format!("CACHE_TTL_{}_SECS", kind.as_str().to_ascii_uppercase());
            if let Ok(raw) = std::env::var(&var) {
                match raw.trim().parse::<u64>() {
                    Ok(secs) => {
                        table.per_kind.insert(kind, Duration::from_secs(secs));
                    }
                    Err(_) => {
                        tracing::warn!(variable = %var, value = %raw, "Ignoring unparseable TTL");
                    }
                }
            }
        }
        table
    }

    pub fn with_default(mut self, ttl: Duration) -> Self {
        self.default = ttl;
        self
    }

    pub fn with_ttl(mut self, kind: OperationKind, ttl: Duration) -> Self {
        self.per_kind.insert(kind, ttl);
        self
    }

    /// TTL for `kind`, or the default.
    pub fn ttl_for(&self, kind: &OperationKind) -> Duration {
        self.per_kind.get(kind).copied().unwrap_or(self.default)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_kinds_have_their_own_ttl() {
        let table = TtlTable::default();
        assert_eq!(
            table.ttl_for(&OperationKind::SkinAnalysis),
            Duration::from_secs(7 * 24 * 3600)
        );
        assert_eq!(
            table.ttl_for(&OperationKind::QueryGeneration),
            Duration::from_secs(15 * 60)
        );
    }

    #[test]
    fn test_unknown_kind_uses_default() {
        let table = TtlTable::default().with_default(Duration::from_secs(42));
        assert_eq!(
            table.ttl_for(&OperationKind::Other("lip_match".into())),
            Duration::from_secs(42)
        );
    }

    #[test]
    fn test_override() {
        let table =
            TtlTable::default().with_ttl(OperationKind::SkinAnalysis, Duration::from_secs(5));
        assert_eq!(
            table.ttl_for(&OperationKind::SkinAnalysis),
            Duration::from_secs(5)
        );
    }
}
