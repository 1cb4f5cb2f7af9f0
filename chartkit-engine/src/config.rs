use std::env;
use std::path::PathBuf;

/// Which `chartkit_release::ReleaseStorage` backend the engine should
/// construct, selected by `CHARTKIT_DRIVER` (spec §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageDriver {
    Memory,
    Secret,
    ConfigMap,
}

impl StorageDriver {
    fn parse(raw: &str) -> StorageDriver {
        match raw.to_ascii_lowercase().as_str() {
            "configmap" | "configmaps" => StorageDriver::ConfigMap,
            "memory" | "in-memory" => StorageDriver::Memory,
            _ => StorageDriver::Secret,
        }
    }
}

impl Default for StorageDriver {
    fn default() -> Self {
        StorageDriver::Secret
    }
}

/// The explicit configuration value every engine entry point takes instead
/// of reading global mutable state (spec AMBIENT-3). Constructed once by
/// the caller, typically via [`EngineConfig::from_env`], and threaded
/// through `Engine::install`/`upgrade`/`rollback`/`uninstall`/`test`.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub kubeconfig: Option<PathBuf>,
    pub driver: StorageDriver,
    pub namespace: String,
    pub max_history: u32,
    pub debug: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            kubeconfig: None,
            driver: StorageDriver::default(),
            namespace: "default".to_string(),
            max_history: 10,
            debug: false,
        }
    }
}

impl EngineConfig {
    /// Read the five environment variables spec §6 names for the core
    /// process: `KUBECONFIG`, `CHARTKIT_DRIVER`, `CHARTKIT_NAMESPACE`,
    /// `CHARTKIT_MAX_HISTORY`, `CHARTKIT_DEBUG`. Unset or unparsable
    /// variables fall back to `EngineConfig::default()`'s values — env
    /// parsing lives in exactly this one function, never scattered
    /// `std::env::var` calls across the engine.
    pub fn from_env() -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            kubeconfig: env::var("KUBECONFIG").ok().map(PathBuf::from),
            driver: env::var("CHARTKIT_DRIVER").ok().map(|v| StorageDriver::parse(&v)).unwrap_or(defaults.driver),
            namespace: env::var("CHARTKIT_NAMESPACE").unwrap_or(defaults.namespace),
            max_history: env::var("CHARTKIT_MAX_HISTORY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_history),
            debug: env::var("CHARTKIT_DEBUG").ok().and_then(|v| v.parse().ok()).unwrap_or(defaults.debug),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_driver_parses_case_insensitively() {
        assert_eq!(StorageDriver::parse("ConfigMap"), StorageDriver::ConfigMap);
        assert_eq!(StorageDriver::parse("memory"), StorageDriver::Memory);
        assert_eq!(StorageDriver::parse("secret"), StorageDriver::Secret);
        assert_eq!(StorageDriver::parse("garbage"), StorageDriver::Secret);
    }

    #[test]
    fn default_config_has_sane_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.namespace, "default");
        assert_eq!(cfg.max_history, 10);
        assert!(!cfg.debug);
    }
}
