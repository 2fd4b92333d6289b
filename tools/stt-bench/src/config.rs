use anyhow::{Context, Result};
use kyutai_stt_loadgen::{DiagnosticsConfig, EngineConfig};
use std::path::{Path, PathBuf};

pub const AUTH_TOKEN_ENV: &str = "STT_BENCH_AUTH_TOKEN";

fn default_audio_file() -> String {
    "19s.wav".to_string()
}

fn default_write_results() -> bool {
    true
}

fn default_results_dir() -> String {
    "./Results".to_string()
}

fn default_errors_dir() -> String {
    "./errors".to_string()
}

fn default_reports_dir() -> String {
    ".".to_string()
}

fn default_log_dir() -> String {
    "./logs".to_string()
}

fn default_instance_name() -> String {
    "stt-bench".to_string()
}

fn default_url() -> String {
    "ws://localhost:8001/ws".to_string()
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct BenchConfig {
    #[serde(default = "default_audio_file")]
    pub audio_file: String,
    /// Write per-session response/error records and reset them per run.
    #[serde(default = "default_write_results")]
    pub write_results: bool,
    #[serde(default = "default_results_dir")]
    pub results_dir: String,
    #[serde(default = "default_errors_dir")]
    pub errors_dir: String,
    /// Where the csv copy of each run is stored.
    #[serde(default = "default_reports_dir")]
    pub reports_dir: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_instance_name")]
    pub instance_name: String,
    #[serde(default = "default_url")]
    pub default_url: String,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            audio_file: default_audio_file(),
            write_results: default_write_results(),
            results_dir: default_results_dir(),
            errors_dir: default_errors_dir(),
            reports_dir: default_reports_dir(),
            log_dir: default_log_dir(),
            instance_name: default_instance_name(),
            default_url: default_url(),
            engine: EngineConfig::default(),
        }
    }
}

impl BenchConfig {
    pub fn load<P: AsRef<Path>>(p: P) -> Result<Self> {
        let p = p.as_ref();
        let raw = std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        Self::from_toml(&raw).with_context(|| format!("parsing {}", p.display()))
    }

    /// Defaults, or the file when one is given.
    pub fn load_or_default(p: Option<&Path>) -> Result<Self> {
        match p {
            Some(p) => Self::load(p),
            None => {
                let mut config = Self::default();
                config.fill_from_env();
                Ok(config)
            }
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        for field in [
            &mut config.audio_file,
            &mut config.results_dir,
            &mut config.errors_dir,
            &mut config.reports_dir,
            &mut config.log_dir,
            &mut config.instance_name,
            &mut config.default_url,
        ] {
            *field = replace_env_vars(field);
        }
        if let Some(token) = config.engine.auth_token.as_mut() {
            *token = replace_env_vars(token);
        }
        config.fill_from_env();
        config.engine.validate()?;
        Ok(config)
    }

    fn fill_from_env(&mut self) {
        if self.engine.auth_token.is_none() {
            self.engine.auth_token = std::env::var(AUTH_TOKEN_ENV).ok().filter(|t| !t.is_empty());
        }
    }

    pub fn diagnostics(&self) -> Option<DiagnosticsConfig> {
        self.write_results
            .then(|| DiagnosticsConfig::new(&self.results_dir, &self.errors_dir))
    }

    pub fn audio_path(&self) -> PathBuf {
        PathBuf::from(&self.audio_file)
    }
}

/// Expands `$NAME` references from the environment, unset variables become
/// empty.
pub fn replace_env_vars(input: &str) -> String {
    let re = match regex::Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)") {
        Ok(re) => re,
        Err(_) => return input.to_string(),
    };
    re.replace_all(input, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .to_string()
}
