// Language configuration management for the Arbiter worker
use anyhow::{bail, Context, Result};
use arbiter_common::types::{Language, ResourceLimits};
use arbiter_harness::RenderedUnit;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Where the rendered unit is mounted inside the sandbox.
pub const CODE_MOUNT: &str = "/code";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageExecution {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: String,
    pub version: String,
    pub image: String,
    pub execution: LanguageExecution,
    pub queue_name: String,
    pub memory_limit_mb: u32,
    /// Ceiling for per-job memory overrides; defaults to `memory_limit_mb`.
    #[serde(default)]
    pub max_memory_limit_mb: Option<u32>,
    pub cpu_limit: f32,
    pub pids_limit: i64,
    /// Default per-test budget.
    pub time_limit_ms: u64,
    /// Interpreter boot and suite setup, granted once per run.
    pub startup_overhead_ms: u64,
    pub max_wall_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concurrency {
    pub max_parallel_jobs: usize,
}

impl Default for Concurrency {
    fn default() -> Self {
        Self { max_parallel_jobs: 4 }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageConfig>,
    #[serde(default)]
    concurrency: Concurrency,
}

/// Container parameters for one run, resolved from the language config and the
/// job's overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    pub image: String,
    pub command: Vec<String>,
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    pub pids_limit: i64,
    pub wall_time_limit_ms: u64,
}

impl LanguageConfig {
    pub fn plan(&self, unit: &RenderedUnit, limits: &ResourceLimits) -> ExecutionPlan {
        let per_test_ms = limits.time_limit_ms.unwrap_or(self.time_limit_ms).max(1);
        let tests = unit.test_count().max(1) as u64;
        let wall_time_limit_ms = self
            .startup_overhead_ms
            .saturating_add(per_test_ms.saturating_mul(tests))
            .min(self.max_wall_time_ms);

        let memory_ceiling = self.max_memory_limit_mb.unwrap_or(self.memory_limit_mb);
        let memory_mb = limits
            .memory_limit_mb
            .unwrap_or(self.memory_limit_mb)
            .clamp(16, memory_ceiling.max(16));

        let mut command = Vec::with_capacity(self.execution.args.len() + 2);
        command.push(self.execution.command.clone());
        command.extend(self.execution.args.iter().cloned());
        command.push(format!("{}/{}", CODE_MOUNT, unit.file_name));

        ExecutionPlan {
            image: self.image.clone(),
            command,
            memory_bytes: (memory_mb as i64) * 1024 * 1024,
            nano_cpus: (self.cpu_limit as f64 * 1_000_000_000.0) as i64,
            pids_limit: self.pids_limit,
            wall_time_limit_ms,
        }
    }
}

/// Language configuration manager
#[derive(Clone)]
pub struct LanguageConfigManager {
    configs: HashMap<Language, LanguageConfig>,
    concurrency: Concurrency,
}

impl LanguageConfigManager {
    /// Load language configurations from languages.json
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let languages_json: LanguagesJson =
            serde_json::from_str(content).context("Failed to parse languages.json")?;

        let mut configs = HashMap::new();
        for config in languages_json.languages {
            let language = match Language::from_str(&config.name) {
                Some(language) => language,
                None => bail!("Unknown language in config: {}", config.name),
            };
            if config.max_wall_time_ms == 0 {
                bail!("max_wall_time_ms must be positive for {}", config.name);
            }
            configs.insert(language, config);
        }

        if languages_json.concurrency.max_parallel_jobs == 0 {
            bail!("concurrency.max_parallel_jobs must be at least 1");
        }

        Ok(Self {
            configs,
            concurrency: languages_json.concurrency,
        })
    }

    /// Load from `LANGUAGES_CONFIG`, or config/languages.json
    pub fn load_default() -> Result<Self> {
        let path = std::env::var("LANGUAGES_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/languages.json"));
        Self::load(&path)
    }

    /// Get configuration for a specific language
    pub fn get_config(&self, language: &Language) -> Result<&LanguageConfig> {
        self.configs
            .get(language)
            .ok_or_else(|| anyhow::anyhow!("No configuration found for language: {}", language))
    }

    pub fn max_parallel_jobs(&self) -> usize {
        self.concurrency.max_parallel_jobs
    }

    /// List all configured languages
    pub fn list_languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self.configs.keys().copied().collect();
        languages.sort_by_key(|l| l.as_str());
        languages
    }
}
