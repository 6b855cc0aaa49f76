//! `penman.toml` loading.

use penman_core::PenmanResult;
use penman_orchestrator::{OrchestratorConfig, SweepTrigger};
use penman_pipeline::{GeneratorConfig, PipelineConfig, Pipelines};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
pub struct PenmanConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// SQLite file; defaults to `<data_dir>/penman.db`.
    #[serde(default)]
    pub database: Option<PathBuf>,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub generator: Option<GeneratorConfig>,
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,
    #[serde(default)]
    pub triggers: Vec<SweepTrigger>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for PenmanConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database: None,
            orchestrator: OrchestratorConfig::default(),
            generator: None,
            pipelines: Vec::new(),
            triggers: Vec::new(),
        }
    }
}

impl PenmanConfig {
    /// Read the config file. A missing file yields the defaults so that a
    /// fresh checkout can run `penman agent add` straight away.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {e}", path.display())
        })?;
        Self::parse(&raw)
            .map_err(|e| anyhow::anyhow!("Invalid config file '{}': {e}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.data_dir.join("penman.db"))
    }

    /// Built-in pipelines with the configured overrides applied.
    pub fn pipelines(&self) -> PenmanResult<Pipelines> {
        Pipelines::from_configs(self.pipelines.clone())
    }
}
