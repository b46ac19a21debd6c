pub mod config;
pub mod types;

pub use config::BuildplaneConfig;
pub use types::*;
