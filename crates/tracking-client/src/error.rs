use thiserror::Error;
use tracking_channel::ChannelError;
use tracking_wire::DecodeError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("connection is not running")]
    NotRunning,

    #[error("request rejected by daemon: {0}")]
    Rejected(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("reply of {size} bytes exceeds the {limit} byte limit")]
    ReplyTooLarge { size: usize, limit: usize },

    #[error("could not allocate {0} bytes")]
    Allocation(usize),

    #[error("lock poisoned: {0}")]
    Poisoned(&'static str),

    #[error("metrics error: {0}")]
    Metrics(String),

    #[error("worker thread error: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
