mod job;
pub mod limits;
pub mod report;
pub mod scheduler;
mod state;

pub use limits::ConcurrencyLimits;
pub use report::{JobReport, RunReport};
pub use scheduler::{Scheduler, SchedulerConfig};
