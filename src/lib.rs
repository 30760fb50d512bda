pub mod chunker;
pub mod config;
pub mod embed;
pub mod error;
pub mod fetch;
pub mod registry;
pub mod retry;
pub mod store;
pub mod sync;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
