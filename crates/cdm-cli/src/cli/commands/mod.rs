//! CLI command handlers, one file per command.

mod add;
mod delete;
mod fetch;
mod generate;
mod reconcile;
mod status;

pub use add::run_add;
pub use delete::run_delete;
pub use fetch::run_fetch;
#[cfg(test)]
pub(crate) use fetch::resync_pending;
pub use generate::{run_completions, run_man};
pub use reconcile::run_reconcile;
pub use status::run_status;
