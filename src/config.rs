//! Configuração do photoflow carregada a partir de `photoflow.toml`.
//!
//! A struct [`FlowConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `PHOTOFLOW_FAILURE_PROBABILITY` tem precedência sobre o arquivo.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Como o motor decide quanto tempo um item fica em PROCESSING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationPolicy {
    /// Sorteia a duração uma única vez, ao entrar em PROCESSING.
    #[default]
    Fixed,
    /// Sorteia uma nova duração a cada verificação da varredura.
    Resample,
}

/// Configuração de nível superior carregada de `photoflow.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Intervalo entre varreduras do motor, em milissegundos.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Tempo mínimo que um item passa em PROCESSING.
    #[serde(default = "default_min_processing_ms")]
    pub min_processing_ms: u64,

    /// Tempo adicional aleatório máximo (exclusivo) somado ao mínimo.
    #[serde(default = "default_max_extra_processing_ms")]
    pub max_extra_processing_ms: u64,

    /// Probabilidade de um processamento terminar em FAILED.
    #[serde(default)]
    pub failure_probability: f64,

    /// Tamanho máximo aceito por payload, em bytes.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: u64,

    /// Tamanho máximo somado de um lote de uploads, em bytes.
    #[serde(default = "default_max_batch_bytes")]
    pub max_batch_bytes: u64,

    #[serde(default)]
    pub duration_policy: DurationPolicy,

    /// Semente do gerador aleatório; ausente usa entropia do sistema.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Intervalo de polling da interface, em milissegundos.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Número máximo de eventos mantidos no log.
    #[serde(default = "default_event_log_capacity")]
    pub event_log_capacity: usize,

    /// Tempo máximo de espera para uma sessão assentar.
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
}

// Valor padrão para o intervalo de varredura: 3000ms.
fn default_sweep_interval_ms() -> u64 {
    3000
}

// Valor padrão para o tempo mínimo de processamento: 3000ms.
fn default_min_processing_ms() -> u64 {
    3000
}

// Valor padrão para o tempo extra aleatório: 5000ms.
fn default_max_extra_processing_ms() -> u64 {
    5000
}

// 10 MiB por item.
fn default_max_payload_bytes() -> u64 {
    10 * 1024 * 1024
}

// 500 MiB por lote.
fn default_max_batch_bytes() -> u64 {
    500 * 1024 * 1024
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_event_log_capacity() -> usize {
    500
}

fn default_session_timeout_ms() -> u64 {
    60_000
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval_ms(),
            min_processing_ms: default_min_processing_ms(),
            max_extra_processing_ms: default_max_extra_processing_ms(),
            failure_probability: 0.0,
            max_payload_bytes: default_max_payload_bytes(),
            max_batch_bytes: default_max_batch_bytes(),
            duration_policy: DurationPolicy::default(),
            seed: None,
            poll_interval_ms: default_poll_interval_ms(),
            event_log_capacity: default_event_log_capacity(),
            session_timeout_ms: default_session_timeout_ms(),
        }
    }
}

impl FlowConfig {
    /// Carrega a configuração de `photoflow.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        let path = Path::new("photoflow.toml");
        let config = if path.exists() {
            Self::read_file(path)?
        } else {
            Self::default()
        };
        config.with_env_overrides()
    }

    /// Carrega a configuração de um arquivo explícito, que precisa existir.
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::read_file(path)?.with_env_overrides()
    }

    fn read_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = toml::from_str::<FlowConfig>(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    // Variável de ambiente tem precedência sobre o arquivo de configuração.
    fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup("PHOTOFLOW_FAILURE_PROBABILITY")
            && !raw.trim().is_empty()
        {
            self.failure_probability = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid PHOTOFLOW_FAILURE_PROBABILITY: {raw}"))?;
        }
        Ok(self)
    }

    /// Rejeita combinações que o motor não consegue honrar.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.failure_probability) {
            bail!(
                "failure_probability must be within [0, 1], got {}",
                self.failure_probability
            );
        }
        if self.sweep_interval_ms == 0 {
            bail!("sweep_interval_ms must be greater than zero");
        }
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be greater than zero");
        }
        if self.max_payload_bytes == 0 {
            bail!("max_payload_bytes must be greater than zero");
        }
        // Durations are compared as chrono `TimeDelta`s, which hold i64 milliseconds.
        let longest = self
            .min_processing_ms
            .checked_add(self.max_extra_processing_ms)
            .filter(|&ms| ms <= i64::MAX as u64);
        if longest.is_none() {
            bail!(
                "min_processing_ms ({}) + max_extra_processing_ms ({}) is too large",
                self.min_processing_ms,
                self.max_extra_processing_ms
            );
        }
        if self.max_batch_bytes < self.max_payload_bytes {
            bail!(
                "max_batch_bytes ({}) must not be smaller than max_payload_bytes ({})",
                self.max_batch_bytes,
                self.max_payload_bytes
            );
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    /// Serializa a configuração efetiva em TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_values() {
        let config = FlowConfig::default();
        assert_eq!(config.sweep_interval_ms, 3000);
        assert_eq!(config.min_processing_ms, 3000);
        assert_eq!(config.max_extra_processing_ms, 5000);
        assert_eq!(config.failure_probability, 0.0);
        assert_eq!(config.max_payload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.max_batch_bytes, 500 * 1024 * 1024);
        assert_eq!(config.duration_policy, DurationPolicy::Fixed);
        assert!(config.seed.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            sweep_interval_ms = 500
            failure_probability = 0.25
            duration_policy = "resample"
        "#;
        let config: FlowConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.sweep_interval_ms, 500);
        assert_eq!(config.failure_probability, 0.25);
        assert_eq!(config.duration_policy, DurationPolicy::Resample);
        assert_eq!(config.min_processing_ms, 3000);
        assert_eq!(config.event_log_capacity, 500);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "min_processing_ms = 0\nseed = 42").unwrap();
        let config = FlowConfig::load_from(file.path()).unwrap();
        assert_eq!(config.min_processing_ms, 0);
        assert_eq!(config.seed, Some(42));
    }

    #[test]
    fn load_from_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FlowConfig::load_from(&dir.path().join("nope.toml")).is_err());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let config = FlowConfig {
            failure_probability: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = FlowConfig {
            sweep_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = FlowConfig {
            max_batch_bytes: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = FlowConfig {
            failure_probability: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_durations_past_i64_millis() {
        let config = FlowConfig {
            min_processing_ms: u64::MAX,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = FlowConfig {
            min_processing_ms: i64::MAX as u64,
            max_extra_processing_ms: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = FlowConfig {
            min_processing_ms: i64::MAX as u64 - 1,
            max_extra_processing_ms: 1,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_failure_probability_overrides_file() {
        let config = FlowConfig {
            failure_probability: 0.1,
            ..Default::default()
        };
        let env = |value: &'static str| {
            move |key: &str| (key == "PHOTOFLOW_FAILURE_PROBABILITY").then(|| value.to_string())
        };

        let overridden = config.clone().with_overrides_from(env(" 0.75 ")).unwrap();
        assert_eq!(overridden.failure_probability, 0.75);

        let blank = config.clone().with_overrides_from(env("  ")).unwrap();
        assert_eq!(blank.failure_probability, 0.1);

        let unset = config.clone().with_overrides_from(|_| None).unwrap();
        assert_eq!(unset.failure_probability, 0.1);

        assert!(config.with_overrides_from(env("often")).is_err());
    }

    #[test]
    fn toml_roundtrip_of_effective_config() {
        let config = FlowConfig {
            seed: Some(7),
            ..Default::default()
        };
        let rendered = config.to_toml().unwrap();
        let parsed: FlowConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
