//! # ephemera-shared
//!
//! Data model and wire contract shared by the Ephemera store and server:
//! messages, channel addressing, and the JSON request/response shapes the
//! HTTP transport speaks.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::TypeError;
pub use types::*;
