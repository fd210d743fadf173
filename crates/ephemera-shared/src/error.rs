use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("Unknown channel class: {0}")]
    UnknownChannelClass(String),

    #[error("channelId is required for local channels")]
    MissingChannelId,
}
