//! IC configuration
//!
//! Defaults can be overridden from the environment:
//! - `HERON_IC_DISABLE=1` keeps every site on its fallback
//! - `HERON_IC_MAX_STUBS=<n>` sets the per-entry stub cap
//! - `HERON_IC_STUB_SPACE_LIMIT=<n>` caps optimized stubs per unit

use std::sync::OnceLock;

/// Default cap on optimized stubs per chain
pub const DEFAULT_MAX_OPTIMIZED_STUBS: usize = 6;

/// Upper bound accepted for the per-entry cap
pub const MAX_OPTIMIZED_STUBS_LIMIT: usize = 64;

static IC_DISABLED: OnceLock<bool> = OnceLock::new();
static IC_MAX_STUBS: OnceLock<Option<usize>> = OnceLock::new();
static IC_STUB_SPACE_LIMIT: OnceLock<Option<usize>> = OnceLock::new();

fn parse_env_truthy(value: &str) -> bool {
    !matches!(value.trim(), "" | "0")
        && !value.trim().eq_ignore_ascii_case("false")
        && !value.trim().eq_ignore_ascii_case("off")
        && !value.trim().eq_ignore_ascii_case("no")
}

fn parse_env_usize(var_name: &str) -> Option<usize> {
    std::env::var(var_name)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
}

/// Check whether stub attachment is disabled via environment flags.
pub fn is_ic_disabled() -> bool {
    *IC_DISABLED.get_or_init(|| {
        std::env::var("HERON_IC_DISABLE")
            .ok()
            .is_some_and(|v| parse_env_truthy(&v))
    })
}

/// Tuning knobs of the IC engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcConfig {
    /// Whether stubs are attached at all
    pub enabled: bool,
    /// Cap `K` on optimized stubs in a main chain
    pub max_optimized_stubs: usize,
    /// Cap on object-kind stubs in a monitor or update chain. Primitive
    /// kinds collapse into one bitmask stub and are not counted.
    pub monitor_object_stub_cap: usize,
    /// Cap on optimized stubs allocated per unit, `None` for unbounded
    pub stub_space_limit: Option<usize>,
}

impl Default for IcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_optimized_stubs: DEFAULT_MAX_OPTIMIZED_STUBS,
            monitor_object_stub_cap: DEFAULT_MAX_OPTIMIZED_STUBS,
            stub_space_limit: None,
        }
    }
}

impl IcConfig {
    /// Defaults overridden by `HERON_IC_*` environment variables, read once
    pub fn from_env() -> Self {
        let mut config = Self {
            enabled: !is_ic_disabled(),
            ..Self::default()
        };
        if let Some(cap) = *IC_MAX_STUBS.get_or_init(|| parse_env_usize("HERON_IC_MAX_STUBS")) {
            config = config.with_max_optimized_stubs(cap);
        }
        config.stub_space_limit =
            *IC_STUB_SPACE_LIMIT.get_or_init(|| parse_env_usize("HERON_IC_STUB_SPACE_LIMIT"));
        config
    }

    /// Set the main-chain cap `K` (and the object-stub cap with it),
    /// clamped to `1..=MAX_OPTIMIZED_STUBS_LIMIT`
    pub fn with_max_optimized_stubs(mut self, cap: usize) -> Self {
        let cap = cap.clamp(1, MAX_OPTIMIZED_STUBS_LIMIT);
        self.max_optimized_stubs = cap;
        self.monitor_object_stub_cap = cap;
        self
    }

    /// Cap the number of optimized stubs a unit may allocate
    pub fn with_stub_space_limit(mut self, limit: usize) -> Self {
        self.stub_space_limit = Some(limit);
        self
    }

    /// Keep every site on its fallback
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_truthy() {
        assert!(parse_env_truthy("1"));
        assert!(parse_env_truthy("yes"));
        assert!(!parse_env_truthy(" 0 "));
        assert!(!parse_env_truthy("OFF"));
        assert!(!parse_env_truthy(""));
    }

    #[test]
    fn test_cap_is_clamped() {
        assert_eq!(IcConfig::default().with_max_optimized_stubs(0).max_optimized_stubs, 1);
        let config = IcConfig::default().with_max_optimized_stubs(1000);
        assert_eq!(config.max_optimized_stubs, MAX_OPTIMIZED_STUBS_LIMIT);
        assert_eq!(config.monitor_object_stub_cap, MAX_OPTIMIZED_STUBS_LIMIT);
    }

    #[test]
    fn test_defaults() {
        let config = IcConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_optimized_stubs, DEFAULT_MAX_OPTIMIZED_STUBS);
        assert_eq!(config.stub_space_limit, None);
        assert!(!config.disabled().enabled);
    }
}
