#[allow(clippy::module_inception)]
mod executor;
mod job_manager;
mod redirect;
mod variable;

pub use executor::Executor;
pub use variable::Variable;
