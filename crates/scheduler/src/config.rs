//! Scheduler configuration: tier capacities and deadline behaviour.
//!
//! Configuration can be loaded from a TOML file, from environment variables,
//! or built programmatically.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::frame_budget::FrameBudget;

const MB: usize = 1024 * 1024;

/// Configuration for one [`TierScheduler`](crate::TierScheduler).
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Fast tier (accelerator memory) capacity in bytes
    pub fast_tier_bytes: usize,
    /// Resident (system memory) capacity in bytes
    pub resident_bytes: usize,
    /// Download bandwidth budget in bytes
    pub download_bytes: usize,
    /// Delay before re-checking after a missed deadline
    pub fallback_delay: Duration,
    /// Target refresh rate used to derive per-frame deadlines
    pub target_fps: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            fast_tier_bytes: 512 * MB,
            resident_bytes: 256 * MB,
            download_bytes: 64 * MB,
            fallback_delay: Duration::from_millis(10),
            target_fps: 60,
        }
    }
}

/// On-disk shape of [`SchedulerConfig`]; every key is optional
#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    fast_tier_mb: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resident_mb: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    download_mb: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fallback_delay_ms: Option<u64>,
    /// Takes precedence over `fallback_delay_ms`
    #[serde(skip_serializing_if = "Option::is_none")]
    fallback_delay_us: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_fps: Option<u32>,
}

impl SchedulerConfig {
    /// Creates a configuration with capacities in megabytes.
    pub fn new(fast_tier_mb: usize, resident_mb: usize, download_mb: usize) -> Self {
        Self {
            fast_tier_bytes: fast_tier_mb.saturating_mul(MB),
            resident_bytes: resident_mb.saturating_mul(MB),
            download_bytes: download_mb.saturating_mul(MB),
            ..Default::default()
        }
    }

    pub fn with_fast_tier_mb(mut self, mb: usize) -> Self {
        self.fast_tier_bytes = mb.saturating_mul(MB);
        self
    }

    pub fn with_resident_mb(mut self, mb: usize) -> Self {
        self.resident_bytes = mb.saturating_mul(MB);
        self
    }

    pub fn with_download_mb(mut self, mb: usize) -> Self {
        self.download_bytes = mb.saturating_mul(MB);
        self
    }

    pub fn with_fallback_delay(mut self, delay: Duration) -> Self {
        self.fallback_delay = delay;
        self
    }

    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = fps;
        self
    }

    /// Frame budget matching `target_fps`, starting now
    pub fn frame_budget(&self) -> FrameBudget {
        FrameBudget::for_fps(self.target_fps)
    }

    /// Default location of the configuration file.
    ///
    /// - macOS: ~/Library/Application Support/chunkstage/scheduler.toml
    /// - Linux: ~/.config/chunkstage/scheduler.toml
    /// - Windows: %APPDATA%\chunkstage\scheduler.toml
    pub fn default_config_path() -> PathBuf {
        match dirs::config_dir() {
            Some(dir) => dir.join("chunkstage").join("scheduler.toml"),
            None => PathBuf::from("chunkstage.toml"),
        }
    }

    /// Loads configuration from environment variables on top of defaults.
    ///
    /// Environment variables:
    /// - `CHUNKSTAGE_FAST_TIER_MB`: fast tier capacity in MB (default: 512)
    /// - `CHUNKSTAGE_RESIDENT_MB`: resident capacity in MB (default: 256)
    /// - `CHUNKSTAGE_DOWNLOAD_MB`: download budget in MB (default: 64)
    /// - `CHUNKSTAGE_FALLBACK_DELAY_MS`: deferral delay in ms (default: 10)
    ///
    /// # Errors
    /// Returns an error if any variable is not a valid number.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(mb) = env_number::<usize>("CHUNKSTAGE_FAST_TIER_MB")? {
            config.fast_tier_bytes = mb_to_bytes("CHUNKSTAGE_FAST_TIER_MB", mb)?;
        }
        if let Some(mb) = env_number::<usize>("CHUNKSTAGE_RESIDENT_MB")? {
            config.resident_bytes = mb_to_bytes("CHUNKSTAGE_RESIDENT_MB", mb)?;
        }
        if let Some(mb) = env_number::<usize>("CHUNKSTAGE_DOWNLOAD_MB")? {
            config.download_bytes = mb_to_bytes("CHUNKSTAGE_DOWNLOAD_MB", mb)?;
        }
        if let Some(ms) = env_number::<u64>("CHUNKSTAGE_FALLBACK_DELAY_MS")? {
            config.fallback_delay = Duration::from_millis(ms);
        }

        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format:
    /// ```toml
    /// fast_tier_mb = 512
    /// resident_mb = 256
    /// download_mb = 64
    /// fallback_delay_ms = 10
    /// target_fps = 60
    /// ```
    ///
    /// `fallback_delay_us` may be given instead of `fallback_delay_ms` for
    /// sub-millisecond delays.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string; missing keys keep defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(toml_str)?;
        let mut config = Self::default();

        if let Some(mb) = file.fast_tier_mb {
            config.fast_tier_bytes = mb_to_bytes("fast_tier_mb", mb)?;
        }
        if let Some(mb) = file.resident_mb {
            config.resident_bytes = mb_to_bytes("resident_mb", mb)?;
        }
        if let Some(mb) = file.download_mb {
            config.download_bytes = mb_to_bytes("download_mb", mb)?;
        }
        if let Some(ms) = file.fallback_delay_ms {
            config.fallback_delay = Duration::from_millis(ms);
        }
        if let Some(us) = file.fallback_delay_us {
            config.fallback_delay = Duration::from_micros(us);
        }
        if let Some(fps) = file.target_fps {
            config.target_fps = fps;
        }

        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path.as_ref(), self.to_toml()?)?;
        Ok(())
    }

    /// Delays are written in whole milliseconds when exact, otherwise in
    /// microseconds; anything finer than a microsecond is dropped.
    fn to_toml(&self) -> Result<String, ConfigError> {
        let whole_millis = self.fallback_delay.subsec_nanos() % 1_000_000 == 0;
        let file = ConfigFile {
            fast_tier_mb: Some(self.fast_tier_bytes / MB),
            resident_mb: Some(self.resident_bytes / MB),
            download_mb: Some(self.download_bytes / MB),
            fallback_delay_ms: whole_millis.then(|| self.fallback_delay.as_millis() as u64),
            fallback_delay_us: (!whole_millis).then(|| self.fallback_delay.as_micros() as u64),
            target_fps: Some(self.target_fps),
        };
        Ok(toml::to_string(&file)?)
    }
}

fn mb_to_bytes(key: &str, mb: usize) -> Result<usize, ConfigError> {
    mb.checked_mul(MB)
        .ok_or_else(|| ConfigError::InvalidValue(key.to_string()))
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(None),
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed configuration file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const VARS: [&str; 4] = [
        "CHUNKSTAGE_FAST_TIER_MB",
        "CHUNKSTAGE_RESIDENT_MB",
        "CHUNKSTAGE_DOWNLOAD_MB",
        "CHUNKSTAGE_FALLBACK_DELAY_MS",
    ];

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.fast_tier_bytes, 512 * MB);
        assert_eq!(config.resident_bytes, 256 * MB);
        assert_eq!(config.download_bytes, 64 * MB);
        assert_eq!(config.fallback_delay, Duration::from_millis(10));
        assert_eq!(config.target_fps, 60);
    }

    #[test]
    fn test_builder_methods() {
        let config = SchedulerConfig::new(1, 2, 3)
            .with_fast_tier_mb(128)
            .with_resident_mb(64)
            .with_download_mb(8)
            .with_fallback_delay(Duration::from_millis(4))
            .with_target_fps(120);

        assert_eq!(config.fast_tier_bytes, 128 * MB);
        assert_eq!(config.resident_bytes, 64 * MB);
        assert_eq!(config.download_bytes, 8 * MB);
        assert_eq!(config.fallback_delay, Duration::from_millis(4));
        assert_eq!(config.frame_budget().budget(), Duration::from_secs(1) / 120);
    }

    #[test]
    fn test_default_config_path_file_name() {
        let path = SchedulerConfig::default_config_path();
        assert!(path.ends_with("scheduler.toml") || path.ends_with("chunkstage.toml"));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let _guard = EnvGuard::new(&VARS);

        env::set_var("CHUNKSTAGE_FAST_TIER_MB", "128");
        env::set_var("CHUNKSTAGE_RESIDENT_MB", "96");
        env::set_var("CHUNKSTAGE_DOWNLOAD_MB", "16");
        env::set_var("CHUNKSTAGE_FALLBACK_DELAY_MS", "25");

        let config = SchedulerConfig::from_env().unwrap();
        assert_eq!(config.fast_tier_bytes, 128 * MB);
        assert_eq!(config.resident_bytes, 96 * MB);
        assert_eq!(config.download_bytes, 16 * MB);
        assert_eq!(config.fallback_delay, Duration::from_millis(25));
    }

    #[test]
    #[serial]
    fn test_from_env_partial() {
        let _guard = EnvGuard::new(&VARS);

        for var in VARS {
            env::remove_var(var);
        }
        env::set_var("CHUNKSTAGE_FAST_TIER_MB", "128");

        let config = SchedulerConfig::from_env().unwrap();
        assert_eq!(config.fast_tier_bytes, 128 * MB);
        assert_eq!(config.resident_bytes, 256 * MB);
        assert_eq!(config.fallback_delay, Duration::from_millis(10));
    }

    #[test]
    #[serial]
    fn test_from_env_invalid() {
        let _guard = EnvGuard::new(&["CHUNKSTAGE_FALLBACK_DELAY_MS"]);

        env::set_var("CHUNKSTAGE_FALLBACK_DELAY_MS", "soon");
        let err = SchedulerConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref key) if key == "CHUNKSTAGE_FALLBACK_DELAY_MS"));
    }

    // Saves and restores environment variables around a test
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let vars = var_names
                .iter()
                .map(|name| (name.to_string(), env::var(name).ok()))
                .collect();
            Self { vars }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
            # Test configuration
            fast_tier_mb = 128
            resident_mb = 64
            download_mb = 8
            fallback_delay_ms = 3
            target_fps = 120
        "#;

        let config = SchedulerConfig::from_toml(toml).unwrap();
        assert_eq!(config.fast_tier_bytes, 128 * MB);
        assert_eq!(config.resident_bytes, 64 * MB);
        assert_eq!(config.download_bytes, 8 * MB);
        assert_eq!(config.fallback_delay, Duration::from_millis(3));
        assert_eq!(config.target_fps, 120);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = SchedulerConfig::from_toml("resident_mb = 32").unwrap();
        assert_eq!(config.resident_bytes, 32 * MB);
        assert_eq!(config.fast_tier_bytes, 512 * MB);
    }

    #[test]
    fn test_from_toml_malformed() {
        let err = SchedulerConfig::from_toml("fast_tier_mb = \"lots\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_file_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler.toml");

        let config = SchedulerConfig::new(128, 64, 8).with_fallback_delay(Duration::from_millis(7));
        config.save_to_file(&path).unwrap();

        let loaded = SchedulerConfig::from_file(&path).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    #[serial]
    fn test_from_env_capacity_overflow() {
        let _guard = EnvGuard::new(&["CHUNKSTAGE_RESIDENT_MB"]);

        env::set_var("CHUNKSTAGE_RESIDENT_MB", usize::MAX.to_string());
        let err = SchedulerConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref key) if key == "CHUNKSTAGE_RESIDENT_MB"));
    }

    #[test]
    fn test_from_toml_capacity_overflow() {
        let toml = format!("fast_tier_mb = {}", i64::MAX);
        let err = SchedulerConfig::from_toml(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref key) if key == "fast_tier_mb"));
    }

    #[test]
    fn test_builder_capacity_saturates() {
        let config = SchedulerConfig::default().with_fast_tier_mb(usize::MAX);
        assert_eq!(config.fast_tier_bytes, usize::MAX);
    }

    #[test]
    fn test_sub_millisecond_delay_survives_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler.toml");

        let config = SchedulerConfig::default().with_fallback_delay(Duration::from_micros(500));
        config.save_to_file(&path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("fallback_delay_us = 500"));
        assert!(!contents.contains("fallback_delay_ms"));
        assert_eq!(SchedulerConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_delay_micros_override_millis() {
        let config = SchedulerConfig::from_toml("fallback_delay_ms = 4\nfallback_delay_us = 1500").unwrap();
        assert_eq!(config.fallback_delay, Duration::from_micros(1500));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SchedulerConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
