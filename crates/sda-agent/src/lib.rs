//! Debug agent embedded in a Squawk-style managed runtime.
//!
//! The agent sits between the runtime and a debug proxy. It hands out stable
//! identifiers for heap objects ([`identity::IdentityRegistry`]), keeps the set
//! of debugger event requests and turns runtime events into composite event
//! packets ([`event::EventCatalog`]), and owns the connection lifecycle and
//! suspend/resume bookkeeping ([`session::SessionController`]).

pub mod classes;
pub mod cli;
pub mod error;
pub mod event;
pub mod gateway;
pub mod identity;
pub mod proxy;
pub mod runtime;
pub mod session;
pub mod threads;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use error::{AgentError, ProtocolError, ProtocolResult};
pub use runtime::{DebugHook, Runtime};
pub use session::{SessionController, SessionState};
