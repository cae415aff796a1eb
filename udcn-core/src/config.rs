//! Daemon configuration loaded from environment variables (spec.md §6).

/// Default Interest lifetime used when none is given on the wire
/// (spec.md §5 "typically ~4s").
pub const DEFAULT_INTEREST_LIFETIME_US: u64 = 4_000_000;

/// Period between FIB ageing/reap sweeps; matches the fixed 5s decrement
/// `NamePrefixTable::age_forwarding_entries` applies per call (spec.md §4.4).
pub const FIB_AGE_INTERVAL_US: u64 = 5_000_000;

/// Period between content-store capacity sweeps (spec.md §4.3).
pub const CS_EVICT_INTERVAL_US: u64 = 1_000_000;

/// Entries touched per eviction sweep, so a full store doesn't stall the
/// dispatcher for one tick.
pub const CS_EVICT_WORK_LIMIT: usize = 256;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Suffix appended to the local listener's socket path.
    pub port_suffix: String,
    /// Bitmask controlling which debug categories log at `debug` level.
    pub debug_mask: u32,
    pub content_store_capacity: usize,
    /// Path MTU used when deciding whether a pending Interest can be
    /// opportunistically stuffed onto an outgoing packet (spec.md glossary
    /// "Stuffing").
    pub path_mtu: usize,
    /// Minimum microseconds between sends on the same face (spec.md §6).
    pub per_face_data_pause_us: u64,
    /// Transitional switch: forward immediately to a brand-new face rather
    /// than waiting for an explicit `prefixreg` (spec.md §6).
    pub flood_on_new_face: bool,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self {
            port_suffix: std::env::var("UDCND_PORT_SUFFIX").unwrap_or_default(),
            debug_mask: parse_env_or("UDCND_DEBUG_MASK", 0),
            content_store_capacity: parse_env_or("UDCND_CS_CAPACITY", 50_000),
            path_mtu: parse_env_or("UDCND_MTU", 1500),
            per_face_data_pause_us: parse_env_or("UDCND_DATA_PAUSE_US", 0),
            flood_on_new_face: parse_env_or("UDCND_FLOOD_ON_NEW_FACE", 0) != 0,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port_suffix: String::new(),
            debug_mask: 0,
            content_store_capacity: 50_000,
            path_mtu: 1500,
            per_face_data_pause_us: 0,
            flood_on_new_face: false,
        }
    }
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_when_unset() {
        let config = DaemonConfig::default();
        assert_eq!(config.content_store_capacity, 50_000);
        assert!(!config.flood_on_new_face);
    }
}
