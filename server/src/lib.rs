pub mod cron;
pub mod doc;
pub mod error;
pub mod observability;
pub mod state;
pub mod utils;
pub mod workflow;

pub use error::{AppError, AppResult};
pub use state::{AppState, build_scheduler, build_state};

#[cfg(test)]
pub(crate) mod test_support;
