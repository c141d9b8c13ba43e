//! Configuration management for the differentiation engine

use lazy_static::lazy_static;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use crate::error::{GradError, GradResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Default cap on outstanding forward frames per operator; `None` is unbounded
    pub max_pending: Option<usize>,
    pub verbose: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            max_pending: None,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccelerationConfig {
    pub enabled: bool,
    /// 0 lets the thread pool pick
    pub num_threads: usize,
}

impl Default for AccelerationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            num_threads: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub learning_rate: f32,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn tracing_level(&self) -> GradResult<tracing::Level> {
        self.level
            .parse::<tracing::Level>()
            .map_err(|_| GradError::ConfigurationError(format!("Unknown log level '{}'", self.level)))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub trace: TraceConfig,
    #[serde(default)]
    pub acceleration: AccelerationConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> GradResult<()> {
        self.logging.tracing_level()?;
        if !(self.training.learning_rate.is_finite() && self.training.learning_rate > 0.0) {
            return Err(GradError::ConfigurationError(format!(
                "learning_rate must be positive, got {}",
                self.training.learning_rate
            )));
        }
        if self.trace.max_pending == Some(0) {
            return Err(GradError::ConfigurationError(
                "max_pending of 0 would reject every forward call".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration manager backed by an optional JSON file
pub struct ConfigManager {
    config: Arc<RwLock<EngineConfig>>,
    config_file: Option<PathBuf>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            config: Arc::new(RwLock::new(EngineConfig::default())),
            config_file: None,
        }
    }

    pub fn with_config_file(mut self, path: PathBuf) -> Self {
        self.config_file = Some(path);
        self
    }

    pub fn load_from_file(&mut self, path: &Path) -> GradResult<()> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;

        *self.config.write() = config;
        self.config_file = Some(path.to_path_buf());

        tracing::info!("Configuration loaded from {:?}", path);
        Ok(())
    }

    pub fn save_to_file(&self, path: &Path) -> GradResult<()> {
        let content = serde_json::to_string_pretty(&*self.config.read())?;
        std::fs::write(path, content)?;

        tracing::info!("Configuration saved to {:?}", path);
        Ok(())
    }

    pub fn get_config(&self) -> EngineConfig {
        self.config.read().clone()
    }

    pub fn update_config<F>(&mut self, f: F) -> GradResult<()>
    where
        F: FnOnce(&mut EngineConfig),
    {
        let mut candidate = self.get_config();
        f(&mut candidate);
        candidate.validate()?;
        *self.config.write() = candidate;

        if let Some(ref path) = self.config_file {
            self.save_to_file(path)?;
        }

        Ok(())
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    static ref CONFIG_MANAGER: RwLock<ConfigManager> = RwLock::new(ConfigManager::new());
}

/// Get the global configuration
pub fn get_config() -> EngineConfig {
    CONFIG_MANAGER.read().get_config()
}

/// Update the global configuration
pub fn update_config<F>(f: F) -> GradResult<()>
where
    F: FnOnce(&mut EngineConfig),
{
    CONFIG_MANAGER.write().update_config(f)
}

/// Load the global configuration from a JSON file
pub fn load_config_from_file(path: &Path) -> GradResult<()> {
    CONFIG_MANAGER.write().load_from_file(path)
}

/// Closure-based configuration builder
pub struct ConfigBuilder {
    config: EngineConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn trace(mut self, f: impl FnOnce(&mut TraceConfig)) -> Self {
        f(&mut self.config.trace);
        self
    }

    pub fn acceleration(mut self, f: impl FnOnce(&mut AccelerationConfig)) -> Self {
        f(&mut self.config.acceleration);
        self
    }

    pub fn training(mut self, f: impl FnOnce(&mut TrainingConfig)) -> Self {
        f(&mut self.config.training);
        self
    }

    pub fn logging(mut self, f: impl FnOnce(&mut LoggingConfig)) -> Self {
        f(&mut self.config.logging);
        self
    }

    pub fn build(self) -> GradResult<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }

    pub fn apply(self) -> GradResult<()> {
        let config = self.build()?;
        update_config(|c| *c = config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
