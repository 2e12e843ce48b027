//! CLI command implementations.
//!
//! | Module      | Commands handled |
//! |-------------|------------------|
//! | `reconcile` | `Reconcile`      |
//! | `ledger`    | `Ledger`         |
//! | `proxy`     | `Proxy`          |
//! | `config`    | `Config`         |

pub mod config;
pub mod ledger;
pub mod proxy;
pub mod reconcile;

pub use config::cmd_config;
pub use ledger::cmd_ledger;
pub use proxy::cmd_proxy;
pub use reconcile::{ReconcileArgs, cmd_reconcile};

use anyhow::Result;
use std::path::Path;

use branchyard::config::{Overrides, YardConfig};

/// Resolve the effective configuration: file (explicit or in `project_dir`),
/// then command-line overrides. Validation warnings are logged, not fatal.
pub fn load_config(
    project_dir: &Path,
    explicit: Option<&Path>,
    overrides: Overrides,
) -> Result<YardConfig> {
    let mut config = YardConfig::load_or_default(explicit, project_dir)?;
    config.apply(overrides);
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }
    Ok(config)
}
