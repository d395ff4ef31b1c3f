pub mod diff;
pub mod machine;
pub mod service;

pub use service::{ActionContext, WorkflowService};
