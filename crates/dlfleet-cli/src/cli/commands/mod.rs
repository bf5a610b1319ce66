//! CLI command handlers. Each command is in its own file.

mod control;
mod pool;
mod run;
mod status;

pub use control::run_control;
pub use pool::run_pool;
pub use run::run_scheduler;
pub use status::run_status;
