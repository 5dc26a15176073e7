//! Application configuration: defaults, then a JSON file, then flags.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use docbase_rag::RagConfig;
use serde::{Deserialize, Serialize};

/// Default data directory, relative to the working directory.
pub const DEFAULT_DATA_DIR: &str = ".docbase";

/// How chunks and questions are embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// The built-in feature-hashing model; works offline.
    Hashing {
        #[serde(default = "default_dimensions")]
        dimensions: usize,
    },
    /// An OpenAI-compatible `/embeddings` endpoint.
    Openai {
        base_url: String,
        model: String,
        dimensions: usize,
        /// Environment variable holding the API key, if the server needs one.
        #[serde(default)]
        api_key_env: Option<String>,
    },
}

fn default_dimensions() -> usize {
    docbase_rag::hashing::DEFAULT_DIMENSIONS
}

impl Default for EmbeddingBackend {
    fn default() -> Self {
        Self::Hashing { dimensions: default_dimensions() }
    }
}

impl EmbeddingBackend {
    /// The vector dimension the backend produces.
    pub fn dimensions(&self) -> usize {
        match self {
            Self::Hashing { dimensions } | Self::Openai { dimensions, .. } => *dimensions,
        }
    }
}

/// An OpenAI-compatible completion server used to generate answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageModelConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

/// Everything the CLI needs to open a knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding `documents.json` and `index.json`.
    pub data_dir: PathBuf,
    /// Retrieval parameters.
    pub rag: RagConfig,
    pub embedding: EmbeddingBackend,
    /// Without a language model every answer is extractive.
    pub llm: Option<LanguageModelConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            rag: RagConfig::default(),
            embedding: EmbeddingBackend::default(),
            llm: None,
        }
    }
}

/// Values given on the command line or through `DOCBASE_*` variables.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub data_dir: Option<PathBuf>,
    pub llm_url: Option<String>,
    pub llm_model: Option<String>,
    pub inference_timeout_ms: Option<u64>,
}

impl AppConfig {
    /// Read a JSON config file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Defaults, overlaid by `file` if given, overlaid by `overrides`.
    pub fn load(file: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply(overrides)?;
        config.rag.validate().context("invalid retrieval configuration")?;
        Ok(config)
    }

    fn apply(&mut self, overrides: Overrides) -> Result<()> {
        if let Some(dir) = overrides.data_dir {
            self.data_dir = dir;
        }
        if let Some(ms) = overrides.inference_timeout_ms {
            self.rag.inference_timeout = std::time::Duration::from_millis(ms);
        }
        match (overrides.llm_url, overrides.llm_model) {
            (None, None) => {}
            (Some(base_url), model) => {
                let model = model
                    .or_else(|| self.llm.as_ref().map(|l| l.model.clone()))
                    .unwrap_or_else(|| "default".to_string());
                let api_key_env = self.llm.as_ref().and_then(|l| l.api_key_env.clone());
                self.llm = Some(LanguageModelConfig { base_url, model, api_key_env });
            }
            (None, Some(model)) => match &mut self.llm {
                Some(llm) => llm.model = model,
                None => bail!("--llm-model requires --llm-url or an llm section in the config"),
            },
        }
        Ok(())
    }

    /// Path of the document store snapshot.
    pub fn documents_path(&self) -> PathBuf {
        self.data_dir.join("documents.json")
    }

    /// Path of the vector index snapshot.
    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join("index.json")
    }
}
