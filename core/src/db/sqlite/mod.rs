pub mod access_repo;
pub mod connection;
pub mod cron_repo;
pub mod document_repo;
pub mod notification_center;
pub mod transaction;
pub mod workflow_repo;

mod util;
