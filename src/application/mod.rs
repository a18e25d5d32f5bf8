// Application layer - components that keep the cached snapshots and the
// object store consistent, plus the facade clients talk to.

pub mod accounts;
pub mod balance;
pub mod config;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod reconciler;
pub mod reporting;
pub mod service;

pub use accounts::*;
pub use balance::*;
pub use config::*;
pub use error::*;
pub use ledger::*;
pub use orchestrator::*;
pub use reconciler::*;
pub use reporting::*;
pub use service::*;
