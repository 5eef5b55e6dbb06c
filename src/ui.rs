//! Interface de terminal do photoflow — spinner e saída colorida.
//!
//! Usa as crates `indicatif` para o spinner de progresso e `console` para
//! estilização com cores. O [`SessionProgress`] acompanha visualmente
//! uma sessão: contagem por estado no spinner e o log de eventos acima dele.

use anyhow::{Context, Result};
use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::events::{EventKind, ItemEvent};
use crate::session::SessionReport;
use crate::state_machine::{ItemState, content_type_for};
use crate::store::StateCounts;

/// Indicador visual de progresso para uma sessão no terminal.
///
/// Exibe um spinner com as contagens por estado e imprime cada evento
/// colorido: verde para DONE, vermelho para FAILED, amarelo para PROCESSING.
pub struct SessionProgress {
    // Spinner do indicatif; oculto quando a saída é JSON.
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
    cyan: Style,
    dim: Style,
}

impl SessionProgress {
    /// Inicia o spinner para `total` uploads.
    pub fn start(total: usize, visible: bool) -> Self {
        let pb = if visible {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("Uploading {total} file(s)..."));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            cyan: Style::new().cyan(),
            dim: Style::new().dim(),
        }
    }

    fn state_style(&self, state: ItemState) -> &Style {
        match state {
            ItemState::Uploaded => &self.cyan,
            ItemState::Processing => &self.yellow,
            ItemState::Done => &self.green,
            ItemState::Failed => &self.red,
        }
    }

    /// Atualiza o spinner e imprime os eventos novos acima dele.
    pub fn update(&self, counts: &StateCounts, fresh: &[ItemEvent]) {
        for event in fresh {
            let style = match &event.kind {
                EventKind::Uploaded { .. } => &self.cyan,
                EventKind::StateChanged { to, .. } => self.state_style(*to),
                EventKind::Deleted => &self.dim,
            };
            self.pb.println(format!("  {}", style.apply_to(event)));
        }
        self.pb.set_message(format_counts(counts));
    }

    /// Finaliza o spinner e exibe o resumo da sessão.
    pub fn complete(&self, report: &SessionReport) {
        self.pb.finish_and_clear();
        let summary = format!(
            "{} item(s) in {}ms over {} sweep(s): {}",
            report.items.len(),
            report.elapsed_ms,
            report.sweeps,
            format_counts(&report.counts)
        );
        if report.timed_out {
            println!("  {} Timed out: {summary}", self.yellow.apply_to("⏱"));
        } else if report.counts.failed > 0 {
            println!("  {} Finished with failures: {summary}", self.red.apply_to("✗"));
        } else {
            println!("  {} All items processed: {summary}", self.green.apply_to("✓"));
        }
        if report.skipped > 0 {
            println!(
                "  {} Skipped {} upload(s)",
                self.yellow.apply_to("!"),
                report.skipped
            );
        }
    }

    /// Imprime a tabela final de itens.
    pub fn print_items(&self, report: &SessionReport) {
        println!();
        for item in &report.items {
            println!(
                "  {:<36}  {:<10}  {:>10}  {:<10}  {}",
                item.id,
                self.state_style(item.state).apply_to(item.state),
                item.payload_size,
                content_type_for(&item.label),
                item.label
            );
        }
    }
}

/// Imprime o relatório completo em JSON.
pub fn print_json(report: &SessionReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("failed to serialize report")?;
    println!("{json}");
    Ok(())
}

/// "UPLOADED 1 · PROCESSING 2 · DONE 3 · FAILED 0"
pub fn format_counts(counts: &StateCounts) -> String {
    ItemState::ALL
        .iter()
        .map(|state| format!("{state} {}", counts.get(*state)))
        .collect::<Vec<_>>()
        .join(" · ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_are_formatted_in_lifecycle_order() {
        let counts = StateCounts {
            uploaded: 1,
            processing: 2,
            done: 3,
            failed: 0,
        };
        assert_eq!(
            format_counts(&counts),
            "UPLOADED 1 · PROCESSING 2 · DONE 3 · FAILED 0"
        );
    }

    #[test]
    fn json_report_prints() {
        let report = SessionReport {
            items: Vec::new(),
            skipped: 0,
            counts: StateCounts::default(),
            events: Vec::new(),
            sweeps: 2,
            elapsed_ms: 10,
            timed_out: false,
        };
        assert!(print_json(&report).is_ok());
    }
}
