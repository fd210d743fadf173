//! # ephemera-store
//!
//! Volatile message storage for the Ephemera relay.
//!
//! Holds one bounded buffer for the global channel and a lazily populated
//! map of bounded buffers for local channels. Nothing is persisted: a
//! process restart discards every channel.

pub mod buffer;
pub mod channels;

pub use buffer::ChannelBuffer;
pub use channels::ChannelStore;
