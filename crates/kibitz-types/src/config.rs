use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{backend::EngineVariant, variant::GameVariant, KibitzError, Result};

/// Named strength levels that overwrite the engine fields when applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StrengthPreset {
    #[default]
    Custom,
    Low,
    Medium,
    Max,
}

impl StrengthPreset {
    pub fn apply(self, engine: &mut EngineConfig, cores: usize) {
        let cores = cores.max(1);
        match self {
            StrengthPreset::Custom => {}
            StrengthPreset::Low => {
                engine.variant = EngineVariant::Stockfish16Nnue7;
                engine.threads = 1;
                engine.hash_mb = 32;
            }
            StrengthPreset::Medium => {
                engine.variant = EngineVariant::Stockfish16Nnue40;
                engine.threads = (cores / 2).max(1);
                engine.hash_mb = 128;
            }
            StrengthPreset::Max => {
                engine.variant = EngineVariant::Stockfish17Nnue79;
                engine.threads = cores.min(32);
                engine.hash_mb = 512;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub variant: EngineVariant,
    pub preset: StrengthPreset,
    /// Executable for local-process backends.
    pub binary_path: Option<String>,
    pub args: Vec<String>,
    /// Directory or http(s) base URL holding weight files.
    pub weights_location: Option<String>,
    pub threads: usize,
    pub hash_mb: usize,
    pub handshake_timeout_ms: u64,
    pub stop_ack_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            variant: EngineVariant::default(),
            preset: StrengthPreset::Custom,
            binary_path: None,
            args: Vec::new(),
            weights_location: None,
            threads: 1,
            hash_mb: 16,
            handshake_timeout_ms: 10_000,
            stop_ack_timeout_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub game_variant: GameVariant,
    pub compute_time_ms: u64,
    pub multipv: usize,
    pub threat_analysis: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            game_variant: GameVariant::Chess,
            compute_time_ms: 3_000,
            multipv: 4,
            threat_analysis: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AutomationConfig {
    pub enabled: bool,
    /// Random pause before each move; implies `enabled`.
    pub human_mode: bool,
    /// Play the whole principal variation instead of one move.
    pub puzzle_mode: bool,
    pub executor_url: Option<String>,
}

impl AutomationConfig {
    pub fn is_active(&self) -> bool {
        self.enabled || self.human_mode
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    pub refresh_interval_ms: u64,
    pub cache_capacity: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 100,
            cache_capacity: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9090".into(),
            request_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    pub log_level: String,
    /// Most recent session events kept in memory.
    pub telemetry_capacity: usize,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            telemetry_capacity: 1_024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KibitzConfig {
    pub engine: EngineConfig,
    pub analysis: AnalysisConfig,
    pub automation: AutomationConfig,
    pub ingestion: IngestionConfig,
    pub remote: RemoteConfig,
    pub ops: OpsConfig,
}

impl KibitzConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            KibitzError::Configuration(format!(
                "unable to read config file {}: {err}",
                path_ref.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|err| {
            KibitzError::Configuration(format!(
                "failed to parse config file {}: {err}",
                path_ref.display()
            ))
        })
    }

    /// Applies the strength preset using the host's core count.
    pub fn with_preset_applied(mut self) -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.engine.preset.apply(&mut self.engine, cores);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.threads == 0 {
            return Err(KibitzError::Configuration(
                "engine.threads must be greater than zero".into(),
            ));
        }
        if self.engine.hash_mb == 0 {
            return Err(KibitzError::Configuration(
                "engine.hash_mb must be greater than zero".into(),
            ));
        }
        if self.analysis.multipv == 0 {
            return Err(KibitzError::Configuration(
                "analysis.multipv must be at least 1".into(),
            ));
        }
        if self.analysis.compute_time_ms == 0 {
            return Err(KibitzError::Configuration(
                "analysis.compute_time_ms must be greater than zero".into(),
            ));
        }
        if self.ingestion.refresh_interval_ms == 0 {
            return Err(KibitzError::Configuration(
                "ingestion.refresh_interval_ms must be greater than zero".into(),
            ));
        }
        if self.ingestion.cache_capacity == 0 {
            return Err(KibitzError::Configuration(
                "ingestion.cache_capacity must be greater than zero".into(),
            ));
        }
        if self.ops.telemetry_capacity == 0 {
            return Err(KibitzError::Configuration(
                "ops.telemetry_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn load_kibitz_config_from_file() {
        let temp_path = std::env::temp_dir().join("kibitz-config-test.toml");
        let mut config = KibitzConfig::default();
        config.engine.variant = EngineVariant::Lc0;
        config.engine.weights_location = Some("http://127.0.0.1:8000/engines".into());
        config.analysis.game_variant = GameVariant::Antichess;
        config.analysis.multipv = 3;
        config.automation.human_mode = true;

        let doc = toml::to_string(&config).expect("serialize config");
        fs::write(&temp_path, doc).expect("write temp config");

        let loaded = KibitzConfig::from_file(&temp_path).expect("load config");
        assert_eq!(loaded.engine.variant, EngineVariant::Lc0);
        assert_eq!(loaded.analysis.game_variant, GameVariant::Antichess);
        assert_eq!(loaded.analysis.multipv, 3);
        assert!(loaded.automation.is_active());
        fs::remove_file(&temp_path).expect("cleanup temp config");
    }

    #[test]
    fn partial_documents_fill_defaults() {
        let config: KibitzConfig = toml::from_str(
            r#"
            [engine]
            variant = "stockfish-6"

            [analysis]
            compute_time_ms = 500
            "#,
        )
        .expect("parse partial config");
        assert_eq!(config.engine.variant, EngineVariant::Stockfish6);
        assert_eq!(config.analysis.compute_time_ms, 500);
        assert_eq!(config.analysis.multipv, 4);
        assert_eq!(config.ingestion.refresh_interval_ms, 100);
        assert_eq!(config.remote.base_url, "http://localhost:9090");
    }

    #[test]
    fn validate_configuration_rules() {
        let mut config = KibitzConfig::default();
        assert!(config.validate().is_ok());
        config.engine.threads = 0;
        assert!(config.validate().is_err());
        config.engine.threads = 2;
        config.analysis.multipv = 0;
        assert!(config.validate().is_err());
        config.analysis.multipv = 1;
        config.ingestion.cache_capacity = 0;
        assert!(config.validate().is_err());
        config.ingestion.cache_capacity = 10;
        config.ingestion.refresh_interval_ms = 0;
        assert!(config.validate().is_err());
        config.ingestion.refresh_interval_ms = 100;
        config.ops.telemetry_capacity = 0;
        assert!(config.validate().is_err());
        config.ops.telemetry_capacity = 64;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn presets_overwrite_engine_fields() {
        let mut engine = EngineConfig::default();
        StrengthPreset::Max.apply(&mut engine, 64);
        assert_eq!(engine.variant, EngineVariant::Stockfish17Nnue79);
        assert_eq!(engine.threads, 32);
        assert_eq!(engine.hash_mb, 512);

        StrengthPreset::Medium.apply(&mut engine, 1);
        assert_eq!(engine.threads, 1);
        assert_eq!(engine.variant, EngineVariant::Stockfish16Nnue40);
    }

    #[test]
    fn shipped_dev_config_is_valid() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../configs/dev.toml");
        let config = KibitzConfig::from_file(path).expect("load dev config");
        config.validate().expect("dev config validates");
        assert_eq!(config.engine.variant, EngineVariant::Stockfish16Nnue40);
        assert_eq!(config.engine.binary_path.as_deref(), Some("stockfish"));
    }
}
