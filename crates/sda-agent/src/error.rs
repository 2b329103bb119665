use std::io;

use sda_jdwp::consts::error_code;
use sda_jdwp::{JdwpError, ObjectId, ReferenceTypeId};
use thiserror::Error;

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors reported back to the debugger as a reply error code.
///
/// None of these terminate the agent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("object id {0} denotes a non-existent or collected object")]
    InvalidObject(ObjectId),
    #[error("invalid thread: {0}")]
    InvalidThread(String),
    #[error("object id {0} does not denote a string")]
    InvalidString(ObjectId),
    #[error("invalid class id {0}")]
    InvalidClass(ReferenceTypeId),
    #[error("invalid frame")]
    InvalidFrame,
    #[error("invalid location")]
    InvalidLocation,
    #[error("invalid event kind {0}")]
    InvalidEventType(u8),
    #[error("thread is not suspended")]
    ThreadNotSuspended,
    #[error("absent information: {0}")]
    AbsentInformation(String),
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error("debuggee is no longer running")]
    VmDead,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProtocolError {
    pub fn error_code(&self) -> u16 {
        match self {
            ProtocolError::InvalidObject(_) => error_code::INVALID_OBJECT,
            ProtocolError::InvalidThread(_) => error_code::INVALID_THREAD,
            ProtocolError::InvalidString(_) => error_code::INVALID_STRING,
            ProtocolError::InvalidClass(_) => error_code::INVALID_CLASS,
            ProtocolError::InvalidFrame => error_code::INVALID_FRAMEID,
            ProtocolError::InvalidLocation => error_code::INVALID_LOCATION,
            ProtocolError::InvalidEventType(_) => error_code::INVALID_EVENT_TYPE,
            ProtocolError::ThreadNotSuspended => error_code::THREAD_NOT_SUSPENDED,
            ProtocolError::AbsentInformation(_) => error_code::ABSENT_INFORMATION,
            ProtocolError::NotImplemented(_) => error_code::NOT_IMPLEMENTED,
            ProtocolError::VmDead => error_code::VM_DEAD,
            ProtocolError::Internal(_) => error_code::INTERNAL,
        }
    }
}

impl From<JdwpError> for ProtocolError {
    fn from(err: JdwpError) -> Self {
        ProtocolError::Internal(err.to_string())
    }
}

impl From<AgentError> for ProtocolError {
    fn from(err: AgentError) -> Self {
        ProtocolError::Internal(err.to_string())
    }
}

/// Session-level failures.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to accept proxy connection: {0}")]
    Accept(#[source] io::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Wire(#[from] JdwpError),
    #[error("proxy connection closed")]
    ProxyClosed,
    #[error("proxy replied with error code {0}")]
    ProxyReply(u16),
    #[error(transparent)]
    Config(#[from] sda_config::ConfigError),
}
