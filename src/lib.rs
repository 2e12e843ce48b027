pub mod bootstrap;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod ledger;
pub mod pipeline;
pub mod proxy;
pub mod readiness;
pub mod reconcile;
pub mod runtime;
pub mod script;
