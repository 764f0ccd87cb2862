pub mod apply;
pub mod config;
pub mod status;
pub mod unlock;
pub mod validate;

pub use apply::run_apply;
pub use status::show_status;
pub use unlock::run_unlock;
pub use validate::run_validate;

/// How a command finished, for the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// A run or dry run stopped at a failure.
    Halted,
}
