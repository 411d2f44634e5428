pub mod cycle;
pub mod dedup;
pub mod orchestrator;
pub mod page_task;
pub mod scheduler;

pub use dedup::StackDeduplicator;
pub use orchestrator::{CycleStart, ScanOrchestrator};
pub use page_task::ScanContext;
pub use scheduler::{ScanScheduler, ScanTrigger, SchedulerControl};
