//! ZeroToHire Session Engine
//!
//! Keeps a tutoring conversation, a per-problem code buffer and an
//! authenticated session consistent over a streaming connection with an
//! HTTP fallback.

pub mod assembler;
pub mod code_sync;
pub mod config;
pub mod connection;
pub mod conversation;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod session;
pub mod state;

pub use assembler::{Applied, StreamAssembler, DEFAULT_TURN_ERROR};
pub use code_sync::{CodeSource, CodeSync, Resolution};
pub use config::{Config, DEFAULT_TEMPLATE};
pub use connection::{ConnectionConfig, ConnectionEvent, ConnectionManager, ConnectionState};
pub use conversation::{Conversation, ConversationEntry, Role};
pub use error::{ConnectionError, ErrorKind, GatewayError, Result, ZthError};
pub use gateway::Gateway;
pub use protocol::{Filters, Problem, ProblemPage, ProblemQuery, ProblemSummary, StreamEvent, User};
pub use session::{Dispatch, ResetConfirmation, Session, CONNECTION_LOST};
pub use state::SessionState;
