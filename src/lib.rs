pub mod cache;
pub mod cli;
pub mod config;
pub mod controller;
pub mod generator;
pub mod llm;
pub mod utils;

// Re-export commonly used types
pub use config::{Config, RunRequest};
pub use controller::{ControllerError, RunController, RunHandle};
pub use controller::events::ProgressEvent;
pub use generator::workflow::state::RunState;
