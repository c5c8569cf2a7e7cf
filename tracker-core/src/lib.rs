pub mod config;
pub mod error;
pub mod error_utils;
pub mod media;
pub mod removal;
pub mod source;
pub mod text;
pub mod types;

pub use config::*;
pub use error::*;
pub use error_utils::*;
pub use removal::RemovalState;
pub use source::*;
pub use types::*;
