//! Subprocess supervision for the CLI: command construction, child
//! environment assembly, and the per-session process lifecycle.

pub mod command;
pub mod environment;
pub mod process;

pub use process::{ProcessSupervisor, PromptRequest};
