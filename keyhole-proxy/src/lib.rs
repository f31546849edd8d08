pub mod executor;
pub mod git;

pub use executor::Executor;
pub use git::{GitProxy, GitService};
