//! JDWP wire vocabulary for the Squawk debug agent.
//!
//! The agent speaks two dialects over the same packet framing: standard JDWP
//! command sets towards the debugger, and a small vendor command set
//! (`SquawkVM`) used to exchange stepping and thread-state information with
//! the debug proxy.

use std::io;

use thiserror::Error;

pub mod codec;
pub mod consts;
pub mod packet;

pub use codec::{encode_command, encode_reply, JdwpReader, JdwpWriter, FLAG_REPLY, HEADER_LEN};
pub use packet::{accept_handshake, read_packet, Packet};

/// Object identifiers are 4-byte signed integers on this wire.
///
/// `0` is null, positive values are heap objects and negative values name
/// read-only image objects.
pub type ObjectId = i32;
pub type ThreadId = ObjectId;
pub type ReferenceTypeId = i32;
pub type MethodId = i32;

pub const ID_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub type_tag: u8,
    pub class_id: ReferenceTypeId,
    pub method_id: MethodId,
    pub index: u64,
}

impl Location {
    /// The all-zero location used for "no location" (e.g. an uncaught
    /// exception's catch site).
    pub const NULL: Location = Location {
        type_tag: consts::type_tag::CLASS,
        class_id: 0,
        method_id: 0,
        index: 0,
    };
}

#[derive(Debug, Error)]
pub enum JdwpError {
    #[error("JDWP protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("JDWP handshake failed")]
    HandshakeFailed,
}

pub type Result<T, E = JdwpError> = std::result::Result<T, E>;
