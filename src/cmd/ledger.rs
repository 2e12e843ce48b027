//! `branchyard ledger`.

use anyhow::{Context, Result};
use std::path::Path;

use branchyard::config::Overrides;
use branchyard::ledger::LedgerStore;

use super::super::LedgerCommands;
use super::load_config;

pub fn cmd_ledger(
    project_dir: &Path,
    config_path: Option<&Path>,
    command: LedgerCommands,
) -> Result<()> {
    match command {
        LedgerCommands::Show { state_file, json } => {
            let config = load_config(
                project_dir,
                config_path,
                Overrides {
                    ledger_path: state_file,
                    ..Default::default()
                },
            )?;
            let store = LedgerStore::new(&config.ledger.path, config.ledger.base_port);
            let ledger = store.load()?;

            if json {
                let text = serde_json::to_string_pretty(&ledger)
                    .context("Failed to serialize ledger")?;
                println!("{}", text);
                return Ok(());
            }

            println!("Ledger: {}", store.path().display());
            println!("next_port = {}", ledger.next_port);
            let rows: Vec<_> = ledger.assignments().collect();
            if rows.is_empty() {
                println!("No ports allocated.");
                return Ok(());
            }
            let width = rows
                .iter()
                .map(|(pipeline, _, _)| pipeline.len())
                .max()
                .unwrap_or(0)
                .max("PIPELINE".len());
            println!("{:<width$}  {:>5}  BRANCH", "PIPELINE", "PORT", width = width);
            for (pipeline, branch, port) in rows {
                println!("{:<width$}  {:>5}  {}", pipeline, port, branch, width = width);
            }
        }
    }
    Ok(())
}
