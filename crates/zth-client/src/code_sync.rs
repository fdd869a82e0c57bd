//! Per-problem code buffer with local-first persistence.
//!
//! The buffer shown for a problem comes from the first source that has one:
//! the local cache, then the backend's saved copy, then the problem template.
//! Every edit is mirrored into the local cache at once. A background timer,
//! re-armed on each edit and problem change, pushes the buffer to the backend.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zth_store::CodeCache;

use crate::config::Config;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::protocol::{Problem, SaveCodeRequest};

/// Where a resolved buffer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeSource {
    /// The local cache.
    Cache,
    /// The backend's saved copy.
    Backend,
    /// The problem template or the default one.
    Template,
}

/// A resolved code buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Buffer contents.
    pub code: String,
    /// Source of the contents.
    pub source: CodeSource,
}

/// Keeps the code buffer in step with the cache and the backend.
#[derive(Debug)]
pub struct CodeSync {
    gateway: Gateway,
    cache: CodeCache,
    language: String,
    default_template: String,
    autosave_interval: Duration,
    problem_id: Option<u64>,
    buffer: String,
    pending: Option<SaveCodeRequest>,
    autosave: Option<JoinHandle<()>>,
    disposed: bool,
}

impl CodeSync {
    /// Creates a manager with an empty buffer and no problem.
    #[must_use]
    pub fn new(config: &Config, gateway: Gateway, cache: CodeCache) -> Self {
        Self {
            gateway,
            cache,
            language: config.language.clone(),
            default_template: config.default_template.clone(),
            autosave_interval: config.autosave_interval(),
            problem_id: None,
            buffer: String::new(),
            pending: None,
            autosave: None,
            disposed: false,
        }
    }

    /// The live buffer.
    #[must_use]
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Language tag sent with saved code.
    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Problem the buffer belongs to.
    #[must_use]
    pub const fn problem_id(&self) -> Option<u64> {
        self.problem_id
    }

    /// The local cache.
    #[must_use]
    pub const fn cache(&self) -> &CodeCache {
        &self.cache
    }

    /// Mutable access to the local cache, for preference flags.
    pub fn cache_mut(&mut self) -> &mut CodeCache {
        &mut self.cache
    }

    /// Returns `true` while a background save is scheduled.
    #[must_use]
    pub fn autosave_pending(&self) -> bool {
        self.autosave.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Makes `problem` current and resolves its buffer.
    ///
    /// Never fails: a backend error falls through to the template.
    pub async fn resolve(&mut self, problem: Option<&Problem>) -> Resolution {
        let problem_id = problem.and_then(|p| p.id);
        if problem_id != self.problem_id {
            self.flush_pending();
        }
        self.cancel_autosave();
        self.problem_id = problem_id;

        let key = self.cache.scoped_key(problem_id);
        let cached = self.cache.get(&key).map(ToString::to_string);
        let resolution = match cached {
            Some(code) => Resolution {
                code,
                source: CodeSource::Cache,
            },
            None => {
                let saved = self.fetch_saved(problem_id).await;
                let resolution = match saved {
                    Some(code) => Resolution {
                        code,
                        source: CodeSource::Backend,
                    },
                    None => Resolution {
                        code: problem
                            .and_then(Problem::template)
                            .unwrap_or(self.default_template.as_str())
                            .to_string(),
                        source: CodeSource::Template,
                    },
                };
                self.mirror(&key, &resolution.code);
                resolution
            }
        };

        debug!(?problem_id, source = ?resolution.source, "Code buffer resolved");
        self.buffer.clone_from(&resolution.code);
        self.arm_autosave();
        resolution
    }

    async fn fetch_saved(&self, problem_id: Option<u64>) -> Option<String> {
        let id = problem_id?;
        match self.gateway.load_code(id).await {
            Ok(code) => code,
            Err(e) => {
                warn!(problem_id = id, error = %e, "Failed to load saved code");
                None
            }
        }
    }

    /// Replaces the buffer after a user edit.
    pub fn on_edit(&mut self, code: impl Into<String>) {
        if self.disposed {
            return;
        }
        self.buffer = code.into();
        let key = self.cache.scoped_key(self.problem_id);
        let code = self.buffer.clone();
        self.mirror(&key, &code);
        self.arm_autosave();
    }

    /// Saves the buffer to the backend now.
    ///
    /// Returns `false` when there is nothing to save.
    ///
    /// # Errors
    ///
    /// Returns the gateway error if the save fails.
    pub async fn save_now(&mut self) -> Result<bool, GatewayError> {
        let Some(request) = self.save_request() else {
            debug!("Nothing to save");
            return Ok(false);
        };
        self.cancel_autosave();
        self.gateway.save_code(&request).await?;
        info!(problem_id = request.problem_id, "Code saved");
        Ok(true)
    }

    /// Discards local and remote progress for a problem.
    ///
    /// The local work happens first; a failing backend call is reported after.
    ///
    /// # Errors
    ///
    /// Returns the gateway error if the backend reset fails.
    pub async fn reset(&mut self, problem_id: u64) -> Result<(), GatewayError> {
        self.cancel_autosave();
        let key = self.cache.scoped_key(Some(problem_id));
        if let Err(e) = self.cache.remove(&key) {
            warn!(problem_id, error = %e, "Failed to remove cached code");
        }

        if self.problem_id == Some(problem_id) {
            self.buffer.clone_from(&self.default_template);
            let code = self.buffer.clone();
            self.mirror(&key, &code);
        }

        self.gateway.reset_problem(problem_id).await?;
        info!(problem_id, "Problem reset");
        Ok(())
    }

    /// Stops background saving for good.
    pub fn dispose(&mut self) {
        self.disposed = true;
        self.pending = None;
        self.cancel_autosave();
    }

    fn mirror(&mut self, key: &str, code: &str) {
        if let Err(e) = self.cache.set(key, code) {
            warn!(key, error = %e, "Failed to write code cache");
        }
    }

    fn save_request(&self) -> Option<SaveCodeRequest> {
        let problem_id = self.problem_id?;
        if self.buffer.trim().is_empty() {
            return None;
        }
        Some(SaveCodeRequest {
            problem_id,
            code: self.buffer.clone(),
            language: self.language.clone(),
        })
    }

    fn cancel_autosave(&mut self) {
        if let Some(task) = self.autosave.take() {
            task.abort();
        }
    }

    /// Restarts the autosave timer for the current buffer.
    fn arm_autosave(&mut self) {
        self.cancel_autosave();
        self.pending = None;
        if self.disposed {
            return;
        }
        let Some(request) = self.save_request() else {
            return;
        };

        self.pending = Some(request.clone());
        let gateway = self.gateway.clone();
        let interval = self.autosave_interval;
        self.autosave = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match gateway.save_code(&request).await {
                    Ok(()) => {
                        debug!(problem_id = request.problem_id, "Autosaved code");
                        break;
                    }
                    Err(e) if e.is_auth_failure() => {
                        warn!(problem_id = request.problem_id, error = %e, "Autosave stopped");
                        break;
                    }
                    Err(e) => {
                        warn!(problem_id = request.problem_id, error = %e, "Autosave failed; will retry");
                    }
                }
            }
        }));
    }

    /// Sends a save still waiting for the previous problem before switching.
    fn flush_pending(&mut self) {
        let Some(request) = self.pending.take() else {
            return;
        };
        if !self.autosave_pending() {
            return;
        }
        self.cancel_autosave();
        let gateway = self.gateway.clone();
        tokio::spawn(async move {
            if let Err(e) = gateway.save_code(&request).await {
                warn!(problem_id = request.problem_id, error = %e, "Failed to save code on problem switch");
            }
        });
    }
}

impl Drop for CodeSync {
    fn drop(&mut self) {
        self.cancel_autosave();
    }
}
