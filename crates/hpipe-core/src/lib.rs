pub mod config;
pub mod definition;
pub mod error;
pub mod flow;
pub mod status;
pub mod traits;

pub use config::AppConfig;
pub use definition::FlowDefinition;
pub use error::{GraphError, HpipeError, Result};
pub use flow::{Flow, Job, JobRef, Props, Step, StepId, Stmt, Vars};
pub use status::Status;
pub use traits::StatusStore;
