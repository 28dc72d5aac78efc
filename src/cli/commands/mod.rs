//! Command implementation modules

pub mod generate;
pub mod verify;
pub mod worker;

pub use generate::{run_generate_command, GenerateParams};
pub use verify::run_verify_command;
pub use worker::run_worker_command;
