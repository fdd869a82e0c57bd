//! Wire types for the tutor backend.
//!
//! HTTP bodies use `snake_case` field names. The chat payload keeps the
//! backend's `codeContext` spelling.

use serde::{Deserialize, Deserializer, Serialize};

use crate::conversation::ConversationEntry;

// ============================================================================
// Domain Types
// ============================================================================

fn unknown_difficulty() -> String {
    "Unknown".to_string()
}

fn difficulty_or_unknown<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(unknown_difficulty))
}

/// A practice problem as held by the client.
///
/// Older backends omit `id`; such problems persist code under the global slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    /// Problem identity.
    #[serde(default)]
    pub id: Option<u64>,
    /// Display title.
    #[serde(default)]
    pub title: String,
    /// Difficulty label, `"Unknown"` when the backend has none.
    #[serde(
        default = "unknown_difficulty",
        deserialize_with = "difficulty_or_unknown"
    )]
    pub difficulty: String,
    /// Problem statement.
    #[serde(default)]
    pub description: String,
    /// Starter code.
    #[serde(default)]
    pub template_code: Option<String>,
    /// Whether the learner marked it solved.
    #[serde(default)]
    pub completed: bool,
    /// Topic tags.
    #[serde(default)]
    pub problem_types: Vec<String>,
}

impl Problem {
    /// Starter code, ignoring a blank template.
    #[must_use]
    pub fn template(&self) -> Option<&str> {
        self.template_code
            .as_deref()
            .filter(|code| !code.trim().is_empty())
    }
}

/// An account as returned by the auth endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Account id.
    #[serde(default)]
    pub id: Option<u64>,
    /// Login name.
    pub username: String,
    /// Contact address.
    #[serde(default)]
    pub email: Option<String>,
    /// Account creation time as sent by the backend.
    #[serde(default)]
    pub created_at: Option<String>,
}

// ============================================================================
// Chat & Status
// ============================================================================

/// Outgoing chat message, used by both the socket and `POST /chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The learner's message.
    pub message: String,
    /// Current code buffer, omitted when blank.
    #[serde(rename = "codeContext", default, skip_serializing_if = "Option::is_none")]
    pub code_context: Option<String>,
}

impl ChatRequest {
    /// Builds a request, dropping a blank code context.
    #[must_use]
    pub fn new(message: impl Into<String>, code: Option<&str>) -> Self {
        Self {
            message: message.into(),
            code_context: code
                .filter(|c| !c.trim().is_empty())
                .map(ToString::to_string),
        }
    }
}

/// Response of `GET /status`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusResponse {
    /// Full conversation log.
    #[serde(default)]
    pub conversation_history: Vec<ConversationEntry>,
    /// The problem currently loaded, if any.
    #[serde(default)]
    pub current_problem: Option<Problem>,
}

/// Response of `POST /chat`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatResponse {
    /// Full conversation log after the turn.
    #[serde(default)]
    pub conversation_history: Vec<ConversationEntry>,
    /// The problem after the turn.
    #[serde(default)]
    pub current_problem: Option<Problem>,
    /// Set when the turn switched problems.
    #[serde(default)]
    pub problem_changed: bool,
}

// ============================================================================
// Code Persistence
// ============================================================================

/// Response of `GET /code/load/:id`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoadCodeResponse {
    /// Saved code, absent when nothing was saved.
    #[serde(default)]
    pub code: Option<String>,
}

/// Body of `POST /code/save`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveCodeRequest {
    /// Problem the code belongs to.
    pub problem_id: u64,
    /// Buffer contents.
    pub code: String,
    /// Language tag.
    pub language: String,
}

/// Body of `POST /evaluate-code`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluateRequest {
    /// Code to evaluate.
    pub code: String,
    /// Language tag.
    pub language: String,
}

/// Response of `POST /evaluate-code`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EvaluateResponse {
    /// Conversation log including the tutor's evaluation.
    #[serde(default)]
    pub conversation_history: Vec<ConversationEntry>,
}

// ============================================================================
// Problem Actions & Catalog
// ============================================================================

/// Response of `POST /problems/:id`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectProblemResponse {
    /// Conversation log for the newly selected problem.
    #[serde(default)]
    pub conversation_history: Vec<ConversationEntry>,
    /// The selected problem.
    #[serde(default)]
    pub problem: Option<Problem>,
}

/// Body of `POST /problems/:id/completion`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CompletionRequest {
    /// New completion state.
    pub completed: bool,
}

/// Body of `POST /problem/reset`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResetRequest {
    /// Problem to reset.
    pub problem_id: u64,
}

/// Filters for `GET /problems`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemQuery {
    /// Free-text search over titles.
    pub search: Option<String>,
    /// Difficulty labels to include.
    pub difficulties: Vec<String>,
    /// Topic tags to include.
    pub problem_types: Vec<String>,
    /// 1-based page number.
    pub page: u32,
    /// Page size.
    pub per_page: u32,
}

impl Default for ProblemQuery {
    fn default() -> Self {
        Self {
            search: None,
            difficulties: Vec::new(),
            problem_types: Vec::new(),
            page: 1,
            per_page: 20,
        }
    }
}

impl ProblemQuery {
    /// Query-string pairs. Filter lists repeat their key.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(search) = self.search.as_deref().filter(|s| !s.trim().is_empty()) {
            pairs.push(("search", search.to_string()));
        }
        pairs.extend(self.difficulties.iter().map(|d| ("difficulty", d.clone())));
        pairs.extend(self.problem_types.iter().map(|t| ("type", t.clone())));
        pairs.push(("page", self.page.to_string()));
        pairs.push(("per_page", self.per_page.to_string()));
        pairs
    }
}

/// One row of the problem catalog.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProblemSummary {
    /// Problem identity.
    pub id: u64,
    /// Display title.
    #[serde(default)]
    pub title: String,
    /// Difficulty label.
    #[serde(
        default = "unknown_difficulty",
        deserialize_with = "difficulty_or_unknown"
    )]
    pub difficulty: String,
    /// Topic tags.
    #[serde(default)]
    pub problem_types: Vec<String>,
    /// Whether the learner marked it solved.
    #[serde(default)]
    pub completed: bool,
}

/// Response of `GET /problems`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProblemPage {
    /// Problems on this page.
    #[serde(default)]
    pub problems: Vec<ProblemSummary>,
    /// Total matching problems.
    #[serde(default)]
    pub total: u64,
    /// Page number.
    #[serde(default)]
    pub page: u32,
    /// Page size.
    #[serde(default)]
    pub per_page: u32,
    /// Whether another page follows.
    #[serde(default)]
    pub has_more: bool,
}

/// Response of `GET /filters`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Filters {
    /// Available difficulty labels.
    #[serde(default)]
    pub difficulties: Vec<String>,
    /// Available topic tags.
    #[serde(default)]
    pub problem_types: Vec<String>,
}

// ============================================================================
// Settings
// ============================================================================

/// Response of `GET /settings`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsResponse {
    /// Stored preferences by key.
    #[serde(default)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

/// Body of `POST /settings/:key`.
#[derive(Debug, Clone, Serialize)]
pub struct SettingRequest {
    /// New value.
    pub value: serde_json::Value,
}

// ============================================================================
// Authentication
// ============================================================================

/// Body of `POST /auth/login`.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    /// Login name.
    pub username: String,
    /// Password.
    pub password: String,
}

/// Body of `POST /auth/register`.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    /// Login name.
    pub username: String,
    /// Contact address.
    pub email: String,
    /// Password.
    pub password: String,
}

/// Response of login and registration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    /// The authenticated account.
    pub user: User,
    /// Bearer token for requests.
    pub access_token: String,
    /// Token used to obtain new access tokens.
    pub refresh_token: String,
}

/// Body of `POST /auth/refresh`.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest {
    /// The stored refresh token.
    pub refresh_token: String,
}

/// Response of `POST /auth/refresh`.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    /// Fresh access token.
    pub access_token: String,
}

/// Response of the profile endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileResponse {
    /// The account.
    pub user: User,
}

/// Body of `PUT /auth/profile`. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateProfileRequest {
    /// New login name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// New contact address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Body of `POST /auth/change-password`.
#[derive(Debug, Clone, Serialize)]
pub struct ChangePasswordRequest {
    /// Password in use now.
    pub current_password: String,
    /// Replacement password.
    pub new_password: String,
}

/// Body of `DELETE /auth/delete-account`.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteAccountRequest {
    /// Password confirming the deletion.
    pub password: String,
}

/// Error body returned by the backend on failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    pub(crate) fn into_message(self) -> Option<String> {
        self.error.or(self.message)
    }
}

// ============================================================================
// Streaming Events
// ============================================================================

/// Payload of a `final` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FinalPayload {
    /// Authoritative conversation log, when the server sends one.
    #[serde(default)]
    pub conversation_history: Option<Vec<ConversationEntry>>,
    /// The problem after the turn.
    #[serde(default)]
    pub current_problem: Option<Problem>,
    /// Set when the turn switched problems.
    #[serde(default)]
    pub problem_changed: bool,
}

/// Inbound events on the streaming connection, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// An incremental text fragment of the tutor's reply.
    Token {
        /// The fragment.
        token: String,
    },
    /// End of the turn.
    Final(FinalPayload),
    /// The turn failed.
    Error {
        /// Failure text.
        #[serde(default)]
        error: Option<String>,
    },
}

impl StreamEvent {
    /// Returns the event name as sent on the wire.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Token { .. } => "token",
            Self::Final(_) => "final",
            Self::Error { .. } => "error",
        }
    }
}
