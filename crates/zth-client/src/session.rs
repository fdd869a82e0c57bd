//! The session orchestrator.
//!
//! [`Session`] owns the conversation, the current problem, the code buffer
//! and the turn flags. Outgoing messages go over the streaming connection
//! when it is open and over `POST /chat` otherwise; the choice is made once
//! per message. Failures never escape as panics or stuck flags: each
//! operation folds its error into the state (error entry, banner, or logout)
//! and hands the classified error back to the caller.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zth_store::{CodeCache, TokenStore};

use crate::assembler::{Applied, StreamAssembler};
use crate::code_sync::CodeSync;
use crate::config::Config;
use crate::connection::{ConnectionConfig, ConnectionEvent, ConnectionManager, ConnectionState};
use crate::conversation::ConversationEntry;
use crate::error::{Result, ZthError};
use crate::gateway::Gateway;
use crate::protocol::{
    ChatRequest, ChatResponse, EvaluateRequest, Filters, Problem, ProblemPage, ProblemQuery,
    UpdateProfileRequest, User,
};
use crate::state::SessionState;

/// Entry added when the connection drops in the middle of a reply.
pub const CONNECTION_LOST: &str =
    "Connection lost before the tutor finished replying. Please try again.";

/// Which path carried an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Sent over the streaming connection; the reply arrives as events.
    Socket,
    /// Sent with `POST /chat`; the reply is already applied.
    Http,
}

/// Proof that the learner confirmed resetting a specific problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetConfirmation {
    problem_id: u64,
}

impl ResetConfirmation {
    /// The problem this confirmation is for.
    #[must_use]
    pub const fn problem_id(&self) -> u64 {
        self.problem_id
    }
}

/// A tutoring session.
#[derive(Debug)]
pub struct Session {
    gateway: Gateway,
    connection: Option<ConnectionManager>,
    events: Option<mpsc::UnboundedReceiver<ConnectionEvent>>,
    assembler: StreamAssembler,
    code: CodeSync,
    state: SessionState,
    pending_socket_turn: bool,
    closed: bool,
}

impl Session {
    /// Opens a session with the on-disk cache and credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the stores cannot be read or the HTTP client
    /// cannot be built.
    pub fn open(config: &Config) -> Result<Self> {
        let cache = CodeCache::open(config.cache_path(), config.cache_prefix.clone())?;
        let tokens = TokenStore::open(config.credentials_path())?;
        Self::with_stores(config, cache, tokens)
    }

    /// Opens a session with explicit stores.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_stores(config: &Config, cache: CodeCache, tokens: TokenStore) -> Result<Self> {
        let gateway = Gateway::from_config(config, tokens.clone())?;
        let (connection, events) = if config.streaming {
            let settings = ConnectionConfig::new(&config.ws_url, config.reconnect_delay());
            let (manager, events) = ConnectionManager::new(settings, tokens.clone());
            (Some(manager), Some(events))
        } else {
            (None, None)
        };

        let state = SessionState {
            authenticated: tokens.has_credentials(),
            ..SessionState::default()
        };
        info!(
            streaming = config.streaming,
            authenticated = state.authenticated,
            "Session opened"
        );

        Ok(Self {
            code: CodeSync::new(config, gateway.clone(), cache),
            gateway,
            connection,
            events,
            assembler: StreamAssembler::new(),
            state,
            pending_socket_turn: false,
            closed: false,
        })
    }

    /// Starts the streaming connection, if enabled.
    pub fn connect(&mut self) {
        if self.closed {
            return;
        }
        if let Some(connection) = self.connection.as_mut() {
            connection.connect();
        }
    }

    /// The observable state.
    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// A copy of the state with the connection status refreshed.
    #[must_use]
    pub fn snapshot(&self) -> SessionState {
        let mut state = self.state.clone();
        state.connection = self.connection_state();
        state
    }

    /// Current state of the streaming connection.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection
            .as_ref()
            .map_or(ConnectionState::Closed, ConnectionManager::state)
    }

    /// The request gateway.
    #[must_use]
    pub const fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// The code sync manager.
    #[must_use]
    pub const fn code_sync(&self) -> &CodeSync {
        &self.code
    }

    /// Waits for the next connection event.
    ///
    /// Never completes when streaming is disabled or after shutdown.
    pub async fn next_connection_event(&mut self) -> Option<ConnectionEvent> {
        match self.events.as_mut() {
            Some(events) if !self.closed => events.recv().await,
            _ => std::future::pending().await,
        }
    }

    // ========================================================================
    // Chat
    // ========================================================================

    /// Sends a chat message.
    ///
    /// # Errors
    ///
    /// Returns `ZthError::EmptyMessage` for blank input,
    /// `ZthError::TurnInProgress` while the previous reply is outstanding, or
    /// the HTTP failure when the fallback path is taken and fails.
    pub async fn send_message(&mut self, text: &str) -> Result<Dispatch> {
        self.ensure_open()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ZthError::EmptyMessage);
        }
        if self.turn_in_progress() {
            debug!("Message refused while a reply is outstanding");
            return Err(ZthError::TurnInProgress);
        }

        let request = ChatRequest::new(text, Some(self.code.buffer()));
        let payload = serde_json::to_string(&request)?;

        self.state.conversation.push(ConversationEntry::user(text));
        self.state.loading = true;
        self.state.error_banner = None;

        if let Some(connection) = self.connection.as_ref().filter(|c| c.is_ready()) {
            match connection.send(payload) {
                Ok(()) => {
                    self.pending_socket_turn = true;
                    debug!("Message sent over streaming connection");
                    return Ok(Dispatch::Socket);
                }
                Err(e) => debug!(error = %e, "Streaming send refused; using HTTP"),
            }
        }

        match self.gateway.chat(&request).await {
            Ok(response) => {
                self.state.finish_turn();
                self.apply_chat_response(response).await;
                Ok(Dispatch::Http)
            }
            Err(e) => {
                warn!(error = %e, "Chat request failed");
                self.state.fail_turn(e.to_string());
                Err(self.absorb(e.into()))
            }
        }
    }

    /// Returns `true` while a reply is still expected.
    #[must_use]
    pub const fn turn_in_progress(&self) -> bool {
        self.state.loading || self.pending_socket_turn
    }

    async fn apply_chat_response(&mut self, response: ChatResponse) {
        self.state
            .conversation
            .replace(response.conversation_history);
        let identity_changed = match response.current_problem {
            Some(problem) => self.state.replace_problem(Some(problem)),
            None => false,
        };
        if identity_changed || response.problem_changed {
            info!(problem_id = ?self.state.current_problem_id(), "Problem changed during chat");
            self.resolve_code().await;
        }
    }

    /// Applies an event from the streaming connection.
    pub async fn handle_connection_event(&mut self, event: ConnectionEvent) -> Option<Applied> {
        if self.closed {
            return None;
        }
        match event {
            ConnectionEvent::Opened => {
                self.state.connection = ConnectionState::Open;
                if self.state.conversation.seal_streaming() {
                    debug!("Sealed reply orphaned by a reconnect");
                }
                self.state.streaming = false;
                None
            }
            ConnectionEvent::Message(raw) => {
                let applied = self.assembler.apply_raw(&mut self.state, &raw);
                match applied {
                    Applied::Final { problem_changed } => {
                        self.pending_socket_turn = false;
                        if problem_changed {
                            self.resolve_code().await;
                        }
                    }
                    Applied::Error { .. } => self.pending_socket_turn = false,
                    Applied::Token { .. } | Applied::Dropped => {}
                }
                Some(applied)
            }
            ConnectionEvent::Closed => {
                self.state.connection = ConnectionState::Closed;
                if self.pending_socket_turn || self.state.streaming {
                    warn!("Connection lost during a reply");
                    self.pending_socket_turn = false;
                    self.state.fail_turn(CONNECTION_LOST);
                }
                None
            }
        }
    }

    // ========================================================================
    // Problems & Code
    // ========================================================================

    /// Loads the conversation and current problem from the backend.
    ///
    /// # Errors
    ///
    /// Returns the gateway error if the status request fails.
    pub async fn load_status(&mut self) -> Result<()> {
        self.ensure_open()?;
        match self.gateway.status().await {
            Ok(status) => {
                self.state
                    .conversation
                    .replace(status.conversation_history);
                self.state.current_problem = status.current_problem;
                self.resolve_code().await;
                Ok(())
            }
            Err(e) => Err(self.surface(e.into())),
        }
    }

    /// Makes a problem current.
    ///
    /// # Errors
    ///
    /// Returns the gateway error if the selection fails.
    pub async fn select_problem(&mut self, problem_id: u64) -> Result<()> {
        self.ensure_open()?;
        match self.gateway.select_problem(problem_id).await {
            Ok(response) => {
                self.state
                    .conversation
                    .replace(response.conversation_history);
                let problem = response.problem.map(|mut p| {
                    p.id.get_or_insert(problem_id);
                    p
                });
                self.state.current_problem = problem;
                info!(problem_id, "Problem selected");
                self.resolve_code().await;
                Ok(())
            }
            Err(e) => Err(self.surface(e.into())),
        }
    }

    async fn resolve_code(&mut self) {
        let resolution = self.code.resolve(self.state.current_problem.as_ref()).await;
        self.state.code = resolution.code;
    }

    /// Replaces the code buffer after an edit.
    pub fn edit_code(&mut self, code: impl Into<String>) {
        if self.closed {
            return;
        }
        self.code.on_edit(code);
        self.state.code = self.code.buffer().to_string();
    }

    /// Saves the buffer to the backend now. Returns `false` if there was
    /// nothing to save.
    ///
    /// # Errors
    ///
    /// Returns the gateway error; it is logged but does not set the banner.
    pub async fn save_code(&mut self) -> Result<bool> {
        self.ensure_open()?;
        match self.code.save_now().await {
            Ok(saved) => Ok(saved),
            Err(e) => {
                warn!(error = %e, "Saving code failed");
                Err(self.absorb(e.into()))
            }
        }
    }

    /// Asks the tutor to evaluate the current buffer.
    ///
    /// # Errors
    ///
    /// Returns `ZthError::EmptyCode` for a blank buffer or the gateway error.
    pub async fn evaluate_code(&mut self) -> Result<()> {
        self.ensure_open()?;
        let code = self.code.buffer().to_string();
        if code.trim().is_empty() {
            return Err(ZthError::EmptyCode);
        }

        self.state.loading = true;
        let request = EvaluateRequest {
            code,
            language: self.code_language(),
        };
        match self.gateway.evaluate_code(&request).await {
            Ok(response) => {
                self.state.finish_turn();
                self.state
                    .conversation
                    .replace(response.conversation_history);
                Ok(())
            }
            Err(e) => {
                self.state.fail_turn(e.to_string());
                Err(self.absorb(e.into()))
            }
        }
    }

    fn code_language(&self) -> String {
        self.code.language().to_string()
    }

    /// Marks the current problem solved or unsolved.
    ///
    /// # Errors
    ///
    /// Returns `ZthError::NoProblemSelected` or the gateway error.
    pub async fn set_completion(&mut self, completed: bool) -> Result<()> {
        self.ensure_open()?;
        let problem_id = self
            .state
            .current_problem_id()
            .ok_or(ZthError::NoProblemSelected)?;
        match self.gateway.set_completion(problem_id, completed).await {
            Ok(()) => {
                if let Some(problem) = self.state.current_problem.as_mut() {
                    problem.completed = completed;
                }
                Ok(())
            }
            Err(e) => Err(self.surface(e.into())),
        }
    }

    /// Starts over: clears the conversation and the current problem.
    ///
    /// # Errors
    ///
    /// Returns the gateway error if the backend refuses.
    pub async fn clear_session(&mut self) -> Result<()> {
        self.ensure_open()?;
        match self.gateway.clear_session().await {
            Ok(()) => {
                self.state.conversation.clear();
                self.state.current_problem = None;
                self.state.finish_turn();
                self.resolve_code().await;
                Ok(())
            }
            Err(e) => Err(self.surface(e.into())),
        }
    }

    /// Issues a confirmation for resetting the current problem.
    ///
    /// # Errors
    ///
    /// Returns `ZthError::NoProblemSelected` when no problem is current.
    pub fn request_reset(&self) -> Result<ResetConfirmation> {
        self.ensure_open()?;
        self.state
            .current_problem_id()
            .map(|problem_id| ResetConfirmation { problem_id })
            .ok_or(ZthError::NoProblemSelected)
    }

    /// Resets a confirmed problem.
    ///
    /// # Errors
    ///
    /// Returns `ZthError::StaleResetConfirmation` if the problem changed
    /// since confirmation, or the gateway error from the backend reset.
    pub async fn reset_problem(&mut self, confirmation: ResetConfirmation) -> Result<()> {
        self.ensure_open()?;
        let current = self.state.current_problem_id();
        if current != Some(confirmation.problem_id) {
            return Err(ZthError::stale_reset(confirmation.problem_id, current));
        }

        self.state.conversation.clear();
        self.state.finish_turn();
        if let Some(problem) = self.state.current_problem.as_mut() {
            problem.completed = false;
        }
        let result = self.code.reset(confirmation.problem_id).await;
        self.state.code = self.code.buffer().to_string();
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.surface(e.into())),
        }
    }

    /// Lists problems from the catalog.
    ///
    /// # Errors
    ///
    /// Returns the gateway error.
    pub async fn problems(&mut self, query: &ProblemQuery) -> Result<ProblemPage> {
        match self.gateway.problems(query).await {
            Ok(page) => Ok(page),
            Err(e) => Err(self.surface(e.into())),
        }
    }

    /// Fetches the catalog filters.
    ///
    /// # Errors
    ///
    /// Returns the gateway error.
    pub async fn filters(&mut self) -> Result<Filters> {
        match self.gateway.filters().await {
            Ok(filters) => Ok(filters),
            Err(e) => Err(self.surface(e.into())),
        }
    }

    // ========================================================================
    // Preferences
    // ========================================================================

    /// Reads a preference flag from the local cache.
    #[must_use]
    pub fn preference(&self, name: &str) -> Option<bool> {
        self.code.cache().flag(name)
    }

    /// Stores a preference flag locally and on the backend.
    ///
    /// # Errors
    ///
    /// Returns the gateway error; the local flag is kept either way.
    pub async fn set_preference(&mut self, name: &str, value: bool) -> Result<()> {
        if let Err(e) = self.code.cache_mut().set_flag(name, value) {
            warn!(name, error = %e, "Failed to store preference");
        }
        match self
            .gateway
            .update_setting(name, serde_json::Value::Bool(value))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(name, error = %e, "Failed to sync preference");
                Err(self.absorb(e.into()))
            }
        }
    }

    /// Copies boolean settings from the backend into the local cache.
    ///
    /// # Errors
    ///
    /// Returns the gateway error.
    pub async fn sync_preferences(&mut self) -> Result<usize> {
        let settings = match self.gateway.settings().await {
            Ok(response) => response.settings,
            Err(e) => return Err(self.absorb(e.into())),
        };
        let mut synced = 0;
        for (name, value) in settings {
            if let Some(flag) = value.as_bool() {
                if let Err(e) = self.code.cache_mut().set_flag(&name, flag) {
                    warn!(%name, error = %e, "Failed to store preference");
                    continue;
                }
                synced += 1;
            }
        }
        debug!(synced, "Preferences synced");
        Ok(synced)
    }

    // ========================================================================
    // Account
    // ========================================================================

    /// Logs in and stores the credentials.
    ///
    /// # Errors
    ///
    /// Returns the gateway error; wrong credentials are a `Status` error.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<User> {
        match self.gateway.login(username, password).await {
            Ok(user) => Ok(self.authenticated_as(user)),
            Err(e) => Err(self.surface(e.into())),
        }
    }

    /// Creates an account and logs in.
    ///
    /// # Errors
    ///
    /// Returns the gateway error.
    pub async fn register(&mut self, username: &str, email: &str, password: &str) -> Result<User> {
        match self.gateway.register(username, email, password).await {
            Ok(user) => Ok(self.authenticated_as(user)),
            Err(e) => Err(self.surface(e.into())),
        }
    }

    fn authenticated_as(&mut self, user: User) -> User {
        self.state.authenticated = true;
        self.state.user = Some(user.clone());
        self.state.error_banner = None;
        user
    }

    /// Forgets the credentials.
    pub fn logout(&mut self) {
        self.gateway.logout();
        self.state.authenticated = false;
        self.state.user = None;
    }

    /// Fetches the account profile.
    ///
    /// # Errors
    ///
    /// Returns the gateway error.
    pub async fn profile(&mut self) -> Result<User> {
        match self.gateway.profile().await {
            Ok(user) => {
                self.state.user = Some(user.clone());
                Ok(user)
            }
            Err(e) => Err(self.surface(e.into())),
        }
    }

    /// Updates the account's name or email.
    ///
    /// # Errors
    ///
    /// Returns the gateway error.
    pub async fn update_profile(
        &mut self,
        username: Option<String>,
        email: Option<String>,
    ) -> Result<User> {
        let request = UpdateProfileRequest { username, email };
        match self.gateway.update_profile(&request).await {
            Ok(user) => {
                self.state.user = Some(user.clone());
                Ok(user)
            }
            Err(e) => Err(self.surface(e.into())),
        }
    }

    /// Changes the account password.
    ///
    /// # Errors
    ///
    /// Returns the gateway error.
    pub async fn change_password(&mut self, current: &str, new: &str) -> Result<()> {
        match self.gateway.change_password(current, new).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.surface(e.into())),
        }
    }

    /// Deletes the account and logs out.
    ///
    /// # Errors
    ///
    /// Returns the gateway error.
    pub async fn delete_account(&mut self, password: &str) -> Result<()> {
        match self.gateway.delete_account(password).await {
            Ok(()) => {
                self.state.authenticated = false;
                self.state.user = None;
                Ok(())
            }
            Err(e) => Err(self.surface(e.into())),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Clears the error banner.
    pub fn dismiss_error(&mut self) {
        self.state.error_banner = None;
    }

    /// Stops the connection and background saving. Later events are ignored.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(connection) = self.connection.as_mut() {
            connection.dispose();
        }
        self.code.dispose();
        self.state.connection = ConnectionState::Closed;
        info!("Session shut down");
    }

    /// Returns `true` after [`shutdown`](Self::shutdown).
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(ZthError::SessionClosed);
        }
        Ok(())
    }

    /// Applies an auth failure to the state.
    fn absorb(&mut self, err: ZthError) -> ZthError {
        if err.is_auth_failure() {
            warn!("Credentials rejected; session is now logged out");
            self.state.authenticated = false;
            self.state.user = None;
            self.state.error_banner = Some(err.to_string());
        }
        err
    }

    /// Applies a request failure to the state and shows it in the banner.
    fn surface(&mut self, err: ZthError) -> ZthError {
        let err = self.absorb(err);
        if self.state.error_banner.is_none() {
            self.state.error_banner = Some(err.to_string());
        }
        err
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
