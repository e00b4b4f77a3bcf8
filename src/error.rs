use thiserror::Error;

use crate::config::ConfigError;
use crate::types::NodeId;

#[derive(Debug, Error)]
pub enum LcbError {
    // Physical layer errors
    #[error("invalid CAN frame: {0}")]
    InvalidFrame(&'static str),
    #[error("pipe {0} is closed")]
    PipeClosed(String),

    // Data link layer errors
    #[error("malformed gridconnect frame: {0}")]
    MalformedFrame(&'static str),

    // Network layer errors
    #[error("no route to destination node {0}")]
    UnknownDestination(NodeId),
    #[error("source node {0} has no local alias")]
    UnknownSource(NodeId),
    #[error("node {0} is not registered on this interface")]
    NodeNotRegistered(NodeId),
    #[error("interface has shut down")]
    InterfaceClosed,

    // Transport layer errors
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLong { len: usize, max: usize },

    // Generic errors
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, LcbError>;
