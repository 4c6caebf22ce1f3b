// Settlement computation, upsert and the recurring report jobs
pub mod formula;
pub mod resolver;
pub mod scheduler;

pub use resolver::{NotifyStatus, SaveSettlement, SettlementResolver};
pub use scheduler::ReportScheduler;
