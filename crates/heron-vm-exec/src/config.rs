//! OSR configuration
//!
//! - `HERON_DISABLE_OSR=1` keeps every frame in the interpreter
//! - `HERON_OSR_THRESHOLD=<n>` sets the loop-entry count that requests compilation
//! - `HERON_OSR_REGION_BYTES=<n>` sizes the snapshot region

use std::sync::OnceLock;

/// Default loop-entry count before compilation is requested
pub const DEFAULT_WARMUP_THRESHOLD: u32 = 1000;

/// Default snapshot region size in bytes
pub const DEFAULT_REGION_CAPACITY: u32 = 64 * 1024;

static OSR_DISABLED: OnceLock<bool> = OnceLock::new();
static OSR_THRESHOLD: OnceLock<u32> = OnceLock::new();
static OSR_REGION_BYTES: OnceLock<u32> = OnceLock::new();

fn parse_env_truthy(value: &str) -> bool {
    !matches!(value.trim(), "" | "0")
        && !value.trim().eq_ignore_ascii_case("false")
        && !value.trim().eq_ignore_ascii_case("off")
        && !value.trim().eq_ignore_ascii_case("no")
}

fn parse_env_u32(var_name: &str) -> Option<u32> {
    std::env::var(var_name)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
}

/// Check whether OSR is disabled via environment flags.
pub fn is_osr_disabled() -> bool {
    *OSR_DISABLED.get_or_init(|| {
        std::env::var("HERON_DISABLE_OSR")
            .ok()
            .is_some_and(|v| parse_env_truthy(&v))
    })
}

/// Loop-entry count that requests compilation.
pub fn osr_threshold() -> u32 {
    *OSR_THRESHOLD.get_or_init(|| {
        parse_env_u32("HERON_OSR_THRESHOLD")
            .filter(|&v| v > 0)
            .unwrap_or(DEFAULT_WARMUP_THRESHOLD)
    })
}

/// Snapshot region size in bytes.
pub fn osr_region_bytes() -> u32 {
    *OSR_REGION_BYTES.get_or_init(|| {
        parse_env_u32("HERON_OSR_REGION_BYTES")
            .filter(|&v| v > 0)
            .unwrap_or(DEFAULT_REGION_CAPACITY)
    })
}

/// Tuning knobs of the OSR bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsrConfig {
    /// Whether frames are ever transferred
    pub enabled: bool,
    /// Loop-entry count that requests compilation
    pub warmup_threshold: u32,
    /// Bytes available to live snapshots
    pub region_capacity: usize,
}

impl Default for OsrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            warmup_threshold: DEFAULT_WARMUP_THRESHOLD,
            region_capacity: DEFAULT_REGION_CAPACITY as usize,
        }
    }
}

impl OsrConfig {
    /// Defaults overridden by the `HERON_*OSR*` environment variables, read once
    pub fn from_env() -> Self {
        Self {
            enabled: !is_osr_disabled(),
            warmup_threshold: osr_threshold(),
            region_capacity: osr_region_bytes() as usize,
        }
    }

    /// Request compilation after `threshold` loop entries (at least 1)
    pub fn with_warmup_threshold(mut self, threshold: u32) -> Self {
        self.warmup_threshold = threshold.max(1);
        self
    }

    /// Size the snapshot region
    pub fn with_region_capacity(mut self, bytes: usize) -> Self {
        self.region_capacity = bytes;
        self
    }

    /// Never transfer
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
        assert!(parse_env_truthy("true"));
        assert!(parse_env_truthy("1"));
        assert!(!parse_env_truthy("no"));
        assert!(!parse_env_truthy("0"));
    }

    #[test]
    fn test_threshold_never_zero() {
        assert_eq!(OsrConfig::default().with_warmup_threshold(0).warmup_threshold, 1);
        assert_eq!(OsrConfig::default().warmup_threshold, DEFAULT_WARMUP_THRESHOLD);
        assert_eq!(OsrConfig::default().region_capacity, 64 * 1024);
    }
}
