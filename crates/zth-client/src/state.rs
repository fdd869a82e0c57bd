//! Observable session state.

use crate::connection::ConnectionState;
use crate::conversation::{Conversation, ConversationEntry};
use crate::protocol::{Problem, User};

/// Everything a front end needs to render the session.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// The conversation log.
    pub conversation: Conversation,
    /// The problem being worked on.
    pub current_problem: Option<Problem>,
    /// The live code buffer.
    pub code: String,
    /// A turn is waiting for its reply.
    pub loading: bool,
    /// Tutor fragments are arriving.
    pub streaming: bool,
    /// Dismissible failure message.
    pub error_banner: Option<String>,
    /// Whether credentials are held.
    pub authenticated: bool,
    /// The logged-in account, once known.
    pub user: Option<User>,
    /// State of the streaming connection.
    pub connection: ConnectionState,
}

impl SessionState {
    /// Id of the current problem, if it has one.
    #[must_use]
    pub fn current_problem_id(&self) -> Option<u64> {
        self.current_problem.as_ref().and_then(|p| p.id)
    }

    /// Ends the outstanding turn.
    pub fn finish_turn(&mut self) {
        self.loading = false;
        self.streaming = false;
    }

    /// Fails the outstanding turn with an error entry and a banner.
    pub fn fail_turn(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.finish_turn();
        self.conversation.push(ConversationEntry::error(message.clone()));
        self.error_banner = Some(message);
    }

    /// Replaces the current problem. Returns `true` if its identity changed.
    pub fn replace_problem(&mut self, problem: Option<Problem>) -> bool {
        let before = self.current_problem_id();
        let had_problem = self.current_problem.is_some();
        self.current_problem = problem;
        before != self.current_problem_id() || had_problem != self.current_problem.is_some()
    }
}
