//! Environment-backed [`SettingsProvider`] (SPEC_FULL.md §B).
//!
//! Reads `QUARTZ_LIMITED_CONCURRENCY_OVERRIDES` as a JSON object of
//! `{ typeShortName: int }`, mirroring the base store's
//! `Quartz.LimitedConcurrencyOverrides` setting (§6). Absent or malformed
//! input falls back to an empty map rather than failing construction —
//! concurrency overrides are an optimization, not a correctness
//! requirement.

use std::collections::HashMap;

use job_store_core::ports::SettingsProvider;

const OVERRIDES_ENV_VAR: &str = "QUARTZ_LIMITED_CONCURRENCY_OVERRIDES";

pub struct EnvSettingsProvider;

impl SettingsProvider for EnvSettingsProvider {
    fn limited_concurrency_overrides(&self) -> HashMap<String, u32> {
        let Ok(raw) = std::env::var(OVERRIDES_ENV_VAR) else {
            return HashMap::new();
        };
        match serde_json::from_str::<HashMap<String, u32>>(&raw) {
            Ok(map) => map,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    var = OVERRIDES_ENV_VAR,
                    "ignoring malformed limited-concurrency overrides"
                );
                HashMap::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_env_var_yields_empty_map() {
        std::env::remove_var(OVERRIDES_ENV_VAR);
        let provider = EnvSettingsProvider;
        assert!(provider.limited_concurrency_overrides().is_empty());
    }

    #[test]
    fn malformed_json_falls_back_to_empty_map() {
        std::env::set_var(OVERRIDES_ENV_VAR, "not json");
        let provider = EnvSettingsProvider;
        assert!(provider.limited_concurrency_overrides().is_empty());
        std::env::remove_var(OVERRIDES_ENV_VAR);
    }

    #[test]
    fn valid_json_object_is_parsed() {
        std::env::set_var(OVERRIDES_ENV_VAR, r#"{"AniDbSyncJob": 3}"#);
        let provider = EnvSettingsProvider;
        let overrides = provider.limited_concurrency_overrides();
        assert_eq!(overrides.get("AniDbSyncJob"), Some(&3));
        std::env::remove_var(OVERRIDES_ENV_VAR);
    }
}
