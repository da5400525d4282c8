//! Child process execution and supervision.

mod command;
mod launch;
mod runner;
mod signal;
mod supervisor;

pub use command::CommandSpec;
pub use launch::{health_url, service_command, service_url};
pub use runner::{CommandOutput, CommandRunner, TokioCommandRunner};
pub use supervisor::{
    ManagedProcess, ProcessId, ProcessSupervisor, StartRequest, StopReport, Termination,
};
