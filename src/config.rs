//! Configuration parsing and validation.
//!
//! Configuration is loaded from a TOML file (default: `config/synth.toml`).
//! Only `[db]` is required; every other section falls back to defaults.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/synth.sqlite"
//!
//! [detection]
//! engine_timeout_ms = 5000
//! overall_timeout_ms = 30000
//! semantic_min_strength = 0.3
//!
//! [limits]
//! max_per_chunk = 50
//! max_per_engine = 10
//!
//! [tuner]
//! window_days = 30
//! step = 0.1
//!
//! [server]
//! bind = "127.0.0.1:7341"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use synthesis_core::engines::EngineThresholds;
use synthesis_core::weights::EngineConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub tuner: TunerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub user: UserConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Orchestrator timeouts and per-engine thresholds.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DetectionConfig {
    pub engine_timeout_ms: u64,
    pub overall_timeout_ms: u64,
    pub semantic_min_strength: f64,
    pub semantic_top_k: usize,
    pub thematic_min_overlap: f64,
    pub thematic_min_domain_difference: f64,
    pub thematic_min_importance: f64,
    pub structural_min_similarity: f64,
    pub contradiction_min_concept_similarity: f64,
    pub contradiction_min_polarity: f64,
    pub methodological_min_similarity: f64,
    pub temporal_min_similarity: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let t = EngineThresholds::default();
        Self {
            engine_timeout_ms: 5_000,
            overall_timeout_ms: 30_000,
            semantic_min_strength: t.semantic_min_strength,
            semantic_top_k: t.semantic_top_k,
            thematic_min_overlap: t.thematic_min_overlap,
            thematic_min_domain_difference: t.thematic_min_domain_difference,
            thematic_min_importance: t.thematic_min_importance,
            structural_min_similarity: t.structural_min_similarity,
            contradiction_min_concept_similarity: t.contradiction_min_concept_similarity,
            contradiction_min_polarity: t.contradiction_min_polarity,
            methodological_min_similarity: t.methodological_min_similarity,
            temporal_min_similarity: t.temporal_min_similarity,
        }
    }
}

impl DetectionConfig {
    pub fn thresholds(&self) -> EngineThresholds {
        EngineThresholds {
            semantic_min_strength: self.semantic_min_strength,
            semantic_top_k: self.semantic_top_k,
            thematic_min_overlap: self.thematic_min_overlap,
            thematic_min_domain_difference: self.thematic_min_domain_difference,
            thematic_min_importance: self.thematic_min_importance,
            structural_min_similarity: self.structural_min_similarity,
            contradiction_min_concept_similarity: self.contradiction_min_concept_similarity,
            contradiction_min_polarity: self.contradiction_min_polarity,
            methodological_min_similarity: self.methodological_min_similarity,
            temporal_min_similarity: self.temporal_min_similarity,
        }
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_millis(self.engine_timeout_ms)
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_millis(self.overall_timeout_ms)
    }

    fn unit_thresholds(&self) -> [(&'static str, f64); 9] {
        [
            ("semantic_min_strength", self.semantic_min_strength),
            ("thematic_min_overlap", self.thematic_min_overlap),
            ("thematic_min_domain_difference", self.thematic_min_domain_difference),
            ("thematic_min_importance", self.thematic_min_importance),
            ("structural_min_similarity", self.structural_min_similarity),
            (
                "contradiction_min_concept_similarity",
                self.contradiction_min_concept_similarity,
            ),
            ("contradiction_min_polarity", self.contradiction_min_polarity),
            ("methodological_min_similarity", self.methodological_min_similarity),
            ("temporal_min_similarity", self.temporal_min_similarity),
        ]
    }
}

/// Storage limits given to a user's EngineConfig when it is first created.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_per_chunk: usize,
    pub max_per_engine: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_per_chunk: 50,
            max_per_engine: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TunerConfig {
    pub window_days: i64,
    pub step: f64,
    pub star_boost_multiplier: f64,
    pub star_boost_hours: i64,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            step: 0.1,
            star_boost_multiplier: 2.0,
            star_boost_hours: 24,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct UserConfig {
    #[serde(default = "default_user_id")]
    pub default_id: String,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            default_id: default_user_id(),
        }
    }
}

fn default_user_id() -> String {
    "default".to_string()
}

impl Config {
    /// The EngineConfig a user starts with before any edits.
    pub fn initial_engine_config(&self, user_id: &str) -> EngineConfig {
        EngineConfig::with_limits(
            user_id,
            self.limits.max_per_chunk,
            self.limits.max_per_engine,
        )
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let detection = &config.detection;
    for (name, value) in detection.unit_thresholds() {
        if !(0.0..=1.0).contains(&value) {
            anyhow::bail!("detection.{} must be in [0.0, 1.0]", name);
        }
    }
    if detection.semantic_top_k == 0 {
        anyhow::bail!("detection.semantic_top_k must be >= 1");
    }
    if detection.engine_timeout_ms == 0 || detection.overall_timeout_ms == 0 {
        anyhow::bail!("detection timeouts must be > 0");
    }
    if detection.engine_timeout_ms > detection.overall_timeout_ms {
        anyhow::bail!(
            "detection.engine_timeout_ms ({}) must not exceed detection.overall_timeout_ms ({})",
            detection.engine_timeout_ms,
            detection.overall_timeout_ms
        );
    }

    if config.limits.max_per_chunk == 0 || config.limits.max_per_engine == 0 {
        anyhow::bail!("limits.max_per_chunk and limits.max_per_engine must be >= 1");
    }
    if config.limits.max_per_engine > config.limits.max_per_chunk {
        anyhow::bail!("limits.max_per_engine must not exceed limits.max_per_chunk");
    }

    let tuner = &config.tuner;
    if tuner.window_days < 1 {
        anyhow::bail!("tuner.window_days must be >= 1");
    }
    if !(tuner.step > 0.0 && tuner.step <= 0.9) {
        anyhow::bail!("tuner.step must be in (0.0, 0.9]");
    }
    if !(tuner.star_boost_multiplier >= 1.0) {
        anyhow::bail!("tuner.star_boost_multiplier must be >= 1.0");
    }
    if tuner.star_boost_hours < 1 {
        anyhow::bail!("tuner.star_boost_hours must be >= 1");
    }

    if config.user.default_id.trim().is_empty() {
        anyhow::bail!("user.default_id must not be empty");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> Result<Config> {
        let toml = format!("[db]\npath = \"/tmp/x.sqlite\"\n{}", extra);
        let config: Config = toml::from_str(&toml)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.detection.engine_timeout_ms, 5000);
        assert_eq!(config.detection.thresholds(), EngineThresholds::default());
        assert_eq!(config.limits.max_per_chunk, 50);
        assert_eq!(config.tuner.window_days, 30);
        assert_eq!(config.server.bind, "127.0.0.1:7341");
        assert_eq!(config.user.default_id, "default");
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = parse("[detection]\nsemantic_min_strength = 0.5\n").unwrap();
        assert_eq!(config.detection.semantic_min_strength, 0.5);
        assert_eq!(config.detection.structural_min_similarity, 0.6);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = parse("[detection]\nstructural_min_similarity = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("structural_min_similarity"));

        assert!(parse("[detection]\nengine_timeout_ms = 40000\n").is_err());
        assert!(parse("[limits]\nmax_per_engine = 60\n").is_err());
        assert!(parse("[tuner]\nstep = 0.0\n").is_err());
        assert!(parse("[tuner]\nstar_boost_multiplier = 0.5\n").is_err());
    }

    #[test]
    fn test_example_config_is_valid() {
        let config: Config =
            toml::from_str(include_str!("../config/synth.example.toml")).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.detection.thresholds(), EngineThresholds::default());
    }
}
