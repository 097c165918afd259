pub mod actions;
pub mod cron;
pub mod engine;
pub mod queue;
pub mod store;

pub use queue::{JobQueue, LastFiredGuard};
pub use store::{LeadStore, WorkflowStore};
