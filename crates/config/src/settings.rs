//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{BeamConfig, ConfigError, LanguageModelConfig, LatticeConfig, SearchConfig};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "LEXDECODE";

/// Decoder settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Pruning beams and caps
    #[serde(default)]
    pub beam: BeamConfig,

    /// Search structure
    #[serde(default)]
    pub search: SearchConfig,

    /// Language model scaling and filler penalties
    #[serde(default)]
    pub language_model: LanguageModelConfig,

    /// Second-pass lattice search
    #[serde(default)]
    pub lattice: LatticeConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,

    /// Emit per-frame debug events (very verbose)
    #[serde(default)]
    pub frame_diagnostics: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            frame_diagnostics: false,
        }
    }
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize to TOML (e.g. to seed `config/default.toml`)
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_beams()?;
        self.validate_language_model()?;
        self.validate_lattice()?;
        Ok(())
    }

    fn validate_beams(&self) -> Result<(), ConfigError> {
        let b = &self.beam;
        for (field, value) in [
            ("beam.beam", b.beam),
            ("beam.phone_beam", b.phone_beam),
            ("beam.word_beam", b.word_beam),
            ("beam.history_beam", b.history_beam),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("Must be in (0.0, 1.0], got {}", value),
                });
            }
        }

        if b.phone_beam < b.beam {
            tracing::warn!(
                "beam.phone_beam ({:e}) is wider than beam.beam ({:e}); \
                 phone transitions will be limited by the survival beam",
                b.phone_beam,
                b.beam
            );
        }

        if b.histogram_bin_width <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "beam.histogram_bin_width".to_string(),
                message: format!("Must be positive, got {}", b.histogram_bin_width),
            });
        }

        if b.max_words_per_frame == 0 || b.max_histories_per_frame == 0 {
            return Err(ConfigError::InvalidValue {
                field: "beam.max_words_per_frame".to_string(),
                message: "Per-frame caps must be at least 1".to_string(),
            });
        }

        if let Some(la) = self.search.phone_lookahead_beam {
            if !(la > 0.0 && la <= 1.0) {
                return Err(ConfigError::InvalidValue {
                    field: "search.phone_lookahead_beam".to_string(),
                    message: format!("Must be in (0.0, 1.0], got {}", la),
                });
            }
        }

        Ok(())
    }

    fn validate_language_model(&self) -> Result<(), ConfigError> {
        let lm = &self.language_model;
        if lm.language_weight <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "language_model.language_weight".to_string(),
                message: format!("Must be positive, got {}", lm.language_weight),
            });
        }
        for (field, value) in [
            ("language_model.word_insertion_penalty", lm.word_insertion_penalty),
            ("language_model.silence_probability", lm.silence_probability),
            ("language_model.filler_probability", lm.filler_probability),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("Must be in (0.0, 1.0], got {}", value),
                });
            }
        }
        Ok(())
    }

    fn validate_lattice(&self) -> Result<(), ConfigError> {
        if self.lattice.enabled && (self.lattice.max_edges == 0 || self.lattice.max_lm_ops == 0) {
            return Err(ConfigError::InvalidValue {
                field: "lattice.max_edges".to_string(),
                message: "Lattice limits must be at least 1 when the lattice pass is enabled"
                    .to_string(),
            });
        }
        Ok(())
    }
}

/// Load settings from `config/` and the environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (`LEXDECODE__SECTION__FIELD`)
/// 2. config/{env}.toml (if env specified)
/// 3. config/default.toml
/// 4. Built-in defaults
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// Load settings from an explicit configuration directory
pub fn load_settings_from(dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    if !dir.as_os_str().is_empty() && !dir.exists() {
        tracing::debug!(dir = %dir.display(), "Configuration directory missing, using defaults");
    }

    let mut builder = Config::builder();

    builder = builder.add_source(File::from(dir.join("default")).required(false));

    if let Some(env_name) = env {
        let path = dir.join(env_name);
        let explicit = path.with_extension("toml");
        if !explicit.exists() {
            return Err(ConfigError::FileNotFound(explicit.display().to_string()));
        }
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CrossWordPolicy, HistoryAddressing};
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.beam.max_words_per_frame, 20);
        assert_eq!(settings.search.cross_word_policy, CrossWordPolicy::Composite);
        assert_eq!(settings.search.history_addressing, HistoryAddressing::FullState);
        assert!(!settings.lattice.enabled);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_beam_validation() {
        let mut settings = Settings::default();
        settings.beam.beam = 0.0;
        assert!(settings.validate().is_err());

        settings.beam.beam = 1.0e-60;
        assert!(settings.validate().is_ok());

        settings.beam.histogram_bin_width = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_language_weight_validation() {
        let mut settings = Settings::default();
        settings.language_model.language_weight = -1.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("default.toml")).unwrap();
        writeln!(
            f,
            "[search]\ncross_word_policy = \"exact\"\ntree_copies = 3\n\n[beam]\nmax_words_per_frame = 5"
        )
        .unwrap();

        let settings = load_settings_from(dir.path(), None).unwrap();
        assert_eq!(settings.search.cross_word_policy, CrossWordPolicy::Exact);
        assert_eq!(settings.search.copies(), 3);
        assert_eq!(settings.beam.max_words_per_frame, 5);
        // Untouched fields keep their defaults
        assert_eq!(settings.beam.max_histories_per_frame, 100);
    }

    #[test]
    fn test_missing_environment_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_settings_from(dir.path(), Some("staging")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_toml_round_trip() {
        let text = Settings::default().to_toml().unwrap();
        let back: Settings = toml::from_str(&text).unwrap();
        assert_eq!(back.beam.max_active, Settings::default().beam.max_active);
    }
}
