//! Executor configuration.

use std::env;

/// Default page budget, matching the service's 1 MB response page.
pub const DEFAULT_MAX_PAGE_BYTES: usize = 1024 * 1024;

/// Default maximum expression length in bytes.
pub const DEFAULT_MAX_EXPRESSION_BYTES: usize = 4096;

/// Scan/Query executor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Accumulated item bytes after which a page ends early.
    pub max_page_bytes: usize,
    /// Longest accepted expression, in bytes.
    pub max_expression_bytes: usize,
    /// Reject requests whose placeholder maps carry unused entries.
    pub strict_placeholders: bool,
}

impl ExecutorConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            max_page_bytes: env_usize("DYNALOCAL_MAX_PAGE_BYTES", DEFAULT_MAX_PAGE_BYTES),
            max_expression_bytes: env_usize(
                "DYNALOCAL_MAX_EXPRESSION_BYTES",
                DEFAULT_MAX_EXPRESSION_BYTES,
            ),
            strict_placeholders: env_bool("DYNALOCAL_STRICT_PLACEHOLDERS", true),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_page_bytes: DEFAULT_MAX_PAGE_BYTES,
            max_expression_bytes: DEFAULT_MAX_EXPRESSION_BYTES,
            strict_placeholders: true,
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key).map_or(default, |v| {
        matches!(v.as_str(), "1" | "true" | "yes" | "TRUE" | "YES")
    })
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_default_to_service_limits() {
        let config = ExecutorConfig::default();
        assert_eq!(config.max_page_bytes, 1_048_576);
        assert_eq!(config.max_expression_bytes, 4096);
        assert!(config.strict_placeholders);
    }

    #[test]
    fn test_should_fall_back_on_unparseable_values() {
        assert_eq!(env_usize("DYNALOCAL_TEST_UNSET_VARIABLE", 7), 7);
        assert!(env_bool("DYNALOCAL_TEST_UNSET_VARIABLE", true));
    }
}
