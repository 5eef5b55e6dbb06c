//! Interface de linha de comando do photoflow baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (upload, demo, config)
//! e flags globais que sobrescrevem a configuração carregada.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::FlowConfig;

/// photoflow — simulador de fluxo de upload e processamento de fotos.
#[derive(Debug, Parser)]
#[command(name = "photoflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho para um arquivo de configuração TOML.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Intervalo entre varreduras do motor, em milissegundos.
    #[arg(long, global = true)]
    pub sweep_interval_ms: Option<u64>,

    /// Tempo mínimo de processamento, em milissegundos.
    #[arg(long, global = true)]
    pub min_processing_ms: Option<u64>,

    /// Tempo extra aleatório máximo, em milissegundos.
    #[arg(long, global = true)]
    pub max_extra_processing_ms: Option<u64>,

    /// Probabilidade de falha de cada processamento (0.0 a 1.0).
    #[arg(long, global = true)]
    pub failure_probability: Option<f64>,

    /// Semente do gerador aleatório, para execuções reproduzíveis.
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    /// Imprime o relatório final em JSON.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,

    /// Remove todos os itens depois do relatório.
    #[arg(long, global = true, default_value_t = false)]
    pub cleanup: bool,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Envia arquivos de imagem e acompanha o processamento até o fim.
    Upload {
        /// Arquivos a enviar.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Executa uma demonstração com payloads sintéticos.
    Demo {
        /// Quantidade de uploads sintéticos.
        #[arg(long, default_value_t = 5)]
        count: usize,

        /// Tamanho de cada payload, em bytes.
        #[arg(long, default_value_t = 1024)]
        size: usize,
    },

    /// Mostra a configuração efetiva em TOML.
    Config,
}

impl Cli {
    /// Aplica as flags globais por cima da configuração carregada.
    pub fn apply_overrides(&self, config: &mut FlowConfig) {
        if let Some(ms) = self.sweep_interval_ms {
            config.sweep_interval_ms = ms;
        }
        if let Some(ms) = self.min_processing_ms {
            config.min_processing_ms = ms;
        }
        if let Some(ms) = self.max_extra_processing_ms {
            config.max_extra_processing_ms = ms;
        }
        if let Some(p) = self.failure_probability {
            config.failure_probability = p;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_upload_subcommand() {
        let cli = Cli::parse_from(["photoflow", "upload", "a.jpg", "b.png"]);
        match cli.command {
            Command::Upload { files } => {
                assert_eq!(files, vec![PathBuf::from("a.jpg"), PathBuf::from("b.png")]);
            }
            _ => panic!("expected Upload command"),
        }
    }

    #[test]
    fn cli_upload_requires_files() {
        assert!(Cli::try_parse_from(["photoflow", "upload"]).is_err());
    }

    #[test]
    fn cli_parses_demo_defaults() {
        let cli = Cli::parse_from(["photoflow", "demo"]);
        match cli.command {
            Command::Demo { count, size } => {
                assert_eq!(count, 5);
                assert_eq!(size, 1024);
            }
            _ => panic!("expected Demo command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "photoflow",
            "--sweep-interval-ms",
            "100",
            "--failure-probability",
            "0.5",
            "--seed",
            "42",
            "--json",
            "--verbose",
            "demo",
        ]);
        assert!(cli.verbose);
        assert!(cli.json);
        assert!(!cli.cleanup);

        let mut config = FlowConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.sweep_interval_ms, 100);
        assert_eq!(config.failure_probability, 0.5);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.min_processing_ms, 3000);
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
