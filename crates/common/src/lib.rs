pub mod config;
pub mod error;
pub mod ids;
pub mod types;

pub use error::{DevDocsError, Result};
pub use ids::*;
