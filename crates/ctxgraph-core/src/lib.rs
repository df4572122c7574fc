//! Shared vocabulary of the CtxGraph context cache: error taxonomy, data
//! model, collaborator traits and configuration.

pub mod config_manager;
pub mod error;
pub mod logging;
pub mod traits;
pub mod types;

pub use config_manager::*;
pub use error::*;
pub use logging::init_tracing;
pub use traits::*;
pub use types::*;
