//! Integration tests for code buffer resolution, persistence and reset.

mod mock_backend;

use std::time::Duration;

use mock_backend::{hits, template_for, MockBackend};
use serde_json::json;
use zth_client::{Config, Role, Session, ZthError, DEFAULT_TEMPLATE};
use zth_store::{CodeCache, TokenStore};

fn session_with_cache(config: &Config, cache: CodeCache) -> Session {
    Session::with_stores(config, cache, TokenStore::in_memory()).expect("Failed to open session")
}

fn session_for(backend: &MockBackend) -> Session {
    session_with_cache(&backend.config(), CodeCache::in_memory("code"))
}

fn fast_autosave(backend: &MockBackend) -> Config {
    Config {
        autosave_interval_secs: 1,
        ..backend.config()
    }
}

// ============================================================================
// Resolution
// ============================================================================

#[tokio::test]
async fn test_cached_code_wins_without_backend_lookup() {
    let backend = mock_backend::spawn().await;
    backend
        .state
        .saved_code
        .lock()
        .unwrap()
        .insert(1, "older backend copy".to_string());
    let mut cache = CodeCache::in_memory("code");
    cache.set("code_1", "local work").expect("cache write failed");

    let mut session = session_with_cache(&backend.config(), cache);
    session.load_status().await.expect("status failed");

    assert_eq!(session.state().code, "local work");
    assert_eq!(hits(&backend.state.counters.code_load), 0);
}

#[tokio::test]
async fn test_empty_cached_code_is_a_hit() {
    let backend = mock_backend::spawn().await;
    let mut cache = CodeCache::in_memory("code");
    cache.set("code_1", "").expect("cache write failed");

    let mut session = session_with_cache(&backend.config(), cache);
    session.load_status().await.expect("status failed");

    assert_eq!(session.state().code, "");
    assert_eq!(hits(&backend.state.counters.code_load), 0);
}

#[tokio::test]
async fn test_backend_snapshot_is_cached() {
    let backend = mock_backend::spawn().await;
    backend
        .state
        .saved_code
        .lock()
        .unwrap()
        .insert(2, "saved two".to_string());

    let mut session = session_for(&backend);
    session.select_problem(2).await.expect("select failed");
    assert_eq!(session.state().code, "saved two");
    assert_eq!(hits(&backend.state.counters.code_load), 1);
    assert_eq!(
        session.code_sync().cache().get("code_2"),
        Some("saved two")
    );

    session.select_problem(1).await.expect("select failed");
    session.select_problem(2).await.expect("select failed");
    assert_eq!(session.state().code, "saved two");
    assert_eq!(hits(&backend.state.counters.code_load), 2);
}

#[tokio::test]
async fn test_template_fallback() {
    let backend = mock_backend::spawn().await;
    let mut session = session_for(&backend);

    session.select_problem(3).await.expect("select failed");

    let state = session.state();
    assert_eq!(state.current_problem_id(), Some(3));
    assert_eq!(state.code, template_for(3));
    assert_eq!(state.conversation.len(), 1);
    assert_eq!(state.conversation.entries()[0].role, Role::System);
    assert_eq!(hits(&backend.state.counters.code_load), 1);
}

#[tokio::test]
async fn test_edits_are_mirrored_per_problem() {
    let backend = mock_backend::spawn().await;
    let mut session = session_for(&backend);

    session.select_problem(1).await.expect("select failed");
    session.edit_code("one");
    session.select_problem(2).await.expect("select failed");
    session.edit_code("two");
    session.select_problem(1).await.expect("select failed");

    assert_eq!(session.state().code, "one");
    let cache = session.code_sync().cache();
    assert_eq!(cache.get("code_1"), Some("one"));
    assert_eq!(cache.get("code_2"), Some("two"));
}

#[tokio::test]
async fn test_cache_survives_restart() {
    let backend = mock_backend::spawn().await;
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = Config {
        data_dir: dir.path().to_string_lossy().into_owned(),
        ..backend.config()
    };

    {
        let mut session = Session::open(&config).expect("Failed to open session");
        session.load_status().await.expect("status failed");
        session.edit_code("persisted work");
        session.shutdown();
    }
    assert_eq!(hits(&backend.state.counters.code_load), 1);

    let mut session = Session::open(&config).expect("Failed to reopen session");
    session.load_status().await.expect("status failed");
    assert_eq!(session.state().code, "persisted work");
    assert_eq!(hits(&backend.state.counters.code_load), 1);
}

// ============================================================================
// Saving
// ============================================================================

#[tokio::test]
async fn test_autosave_sends_latest_buffer() {
    let backend = mock_backend::spawn().await;
    let mut session = session_with_cache(&fast_autosave(&backend), CodeCache::in_memory("code"));
    session.load_status().await.expect("status failed");

    session.edit_code("draft");
    session.edit_code("draft two");
    assert!(session.code_sync().autosave_pending());
    tokio::time::sleep(Duration::from_millis(1600)).await;

    assert_eq!(backend.state.saves(), vec![(1, "draft two".to_string())]);
    assert!(!session.code_sync().autosave_pending());
}

#[tokio::test]
async fn test_blank_buffer_is_not_autosaved() {
    let backend = mock_backend::spawn().await;
    let mut session = session_with_cache(&fast_autosave(&backend), CodeCache::in_memory("code"));
    session.load_status().await.expect("status failed");

    session.edit_code("   \n");
    assert!(!session.code_sync().autosave_pending());
    tokio::time::sleep(Duration::from_millis(1600)).await;

    assert!(backend.state.saves().is_empty());
    assert_eq!(session.code_sync().cache().get("code_1"), Some("   \n"));
}

#[tokio::test]
async fn test_problem_switch_does_not_leak_buffer() {
    let backend = mock_backend::spawn().await;
    let mut session = session_with_cache(&fast_autosave(&backend), CodeCache::in_memory("code"));
    session.load_status().await.expect("status failed");

    session.edit_code("work for one");
    session.select_problem(2).await.expect("select failed");
    tokio::time::sleep(Duration::from_millis(1600)).await;

    let saves = backend.state.saves();
    assert!(saves.contains(&(1, "work for one".to_string())));
    for (problem_id, code) in &saves {
        match problem_id {
            1 => assert_eq!(code, "work for one"),
            2 => assert_eq!(code, &template_for(2)),
            other => panic!("Unexpected save for problem {other}"),
        }
    }
    assert_eq!(session.state().code, template_for(2));
    assert_eq!(
        session.code_sync().cache().get("code_2").map(ToString::to_string),
        Some(template_for(2))
    );
}

#[tokio::test]
async fn test_shutdown_cancels_autosave() {
    let backend = mock_backend::spawn().await;
    let mut session = session_with_cache(&fast_autosave(&backend), CodeCache::in_memory("code"));
    session.load_status().await.expect("status failed");

    session.edit_code("unsaved");
    session.shutdown();
    tokio::time::sleep(Duration::from_millis(1600)).await;

    assert!(backend.state.saves().is_empty());
    assert!(matches!(
        session.save_code().await,
        Err(ZthError::SessionClosed)
    ));
}

#[tokio::test]
async fn test_manual_save() {
    let backend = mock_backend::spawn().await;
    let mut session = session_for(&backend);

    assert!(!session.save_code().await.expect("save failed"));

    session.load_status().await.expect("status failed");
    session.edit_code("by hand");
    assert!(session.save_code().await.expect("save failed"));
    assert!(!session.code_sync().autosave_pending());
    assert_eq!(backend.state.saves(), vec![(1, "by hand".to_string())]);
}

// ============================================================================
// Reset
// ============================================================================

#[tokio::test]
async fn test_reset_restores_default_template() {
    let backend = mock_backend::spawn().await;
    let mut session = session_for(&backend);
    session.load_status().await.expect("status failed");
    session.edit_code("abandoned attempt");
    session.save_code().await.expect("save failed");

    let confirmation = session.request_reset().expect("no problem selected");
    assert_eq!(confirmation.problem_id(), 1);
    session
        .reset_problem(confirmation)
        .await
        .expect("reset failed");

    let state = session.state();
    assert_eq!(state.code, DEFAULT_TEMPLATE);
    assert!(state.conversation.is_empty());
    assert_eq!(hits(&backend.state.counters.reset), 1);
    assert!(!backend.state.saved_code.lock().unwrap().contains_key(&1));

    session.select_problem(2).await.expect("select failed");
    session.select_problem(1).await.expect("select failed");
    assert_eq!(session.state().code, DEFAULT_TEMPLATE);
}

#[tokio::test]
async fn test_stale_reset_confirmation_is_rejected() {
    let backend = mock_backend::spawn().await;
    let mut session = session_for(&backend);
    session.load_status().await.expect("status failed");
    session.edit_code("keep me");

    let confirmation = session.request_reset().expect("no problem selected");
    session.select_problem(2).await.expect("select failed");

    let err = session
        .reset_problem(confirmation)
        .await
        .expect_err("reset should be rejected");
    assert!(matches!(err, ZthError::StaleResetConfirmation { .. }));
    assert_eq!(hits(&backend.state.counters.reset), 0);
    assert_eq!(session.code_sync().cache().get("code_1"), Some("keep me"));
}

#[tokio::test]
async fn test_reset_needs_a_problem() {
    let backend = mock_backend::spawn().await;
    let session = session_for(&backend);

    assert!(matches!(
        session.request_reset(),
        Err(ZthError::NoProblemSelected)
    ));
}

// ============================================================================
// Evaluation, Catalog & Preferences
// ============================================================================

#[tokio::test]
async fn test_evaluate_code() {
    let backend = mock_backend::spawn().await;
    let mut session = session_for(&backend);
    session.load_status().await.expect("status failed");

    session.edit_code("  ");
    assert!(matches!(
        session.evaluate_code().await,
        Err(ZthError::EmptyCode)
    ));

    session.edit_code("def solve():\n    return 42");
    session.evaluate_code().await.expect("evaluate failed");
    let state = session.state();
    assert!(!state.loading);
    assert_eq!(
        state.conversation.last().map(|e| e.content.as_str()),
        Some("Reviewed 2 lines")
    );
}

#[tokio::test]
async fn test_clear_session_drops_problem() {
    let backend = mock_backend::spawn().await;
    let mut session = session_for(&backend);
    session.load_status().await.expect("status failed");
    session.set_completion(true).await.expect("completion failed");
    assert!(session
        .state()
        .current_problem
        .as_ref()
        .is_some_and(|p| p.completed));

    session.clear_session().await.expect("clear failed");

    let state = session.state();
    assert!(state.conversation.is_empty());
    assert!(state.current_problem.is_none());
    assert_eq!(state.code, DEFAULT_TEMPLATE);
    assert!(session.code_sync().cache().contains("code_global"));
}

#[tokio::test]
async fn test_catalog_queries() {
    let backend = mock_backend::spawn().await;
    let mut session = session_for(&backend);

    let all = session
        .problems(&zth_client::ProblemQuery::default())
        .await
        .expect("list failed");
    assert_eq!(all.problems.len(), 3);

    let query = zth_client::ProblemQuery {
        search: Some("Problem 2".to_string()),
        ..zth_client::ProblemQuery::default()
    };
    let found = session.problems(&query).await.expect("list failed");
    assert_eq!(found.problems.len(), 1);
    assert_eq!(found.problems[0].id, 2);

    let filters = session.filters().await.expect("filters failed");
    assert_eq!(filters.difficulties, vec!["Easy", "Medium", "Hard"]);
}

#[tokio::test]
async fn test_preferences_sync_both_ways() {
    let backend = mock_backend::spawn().await;
    backend
        .state
        .settings
        .lock()
        .unwrap()
        .insert("hints".to_string(), json!(false));
    let mut session = session_for(&backend);

    session
        .set_preference("dark_mode", true)
        .await
        .expect("set failed");
    assert_eq!(session.preference("dark_mode"), Some(true));
    assert_eq!(
        backend.state.settings.lock().unwrap().get("dark_mode"),
        Some(&json!(true))
    );

    let synced = session.sync_preferences().await.expect("sync failed");
    assert_eq!(synced, 2);
    assert_eq!(session.preference("hints"), Some(false));
}

#[tokio::test]
async fn test_preference_key_with_reserved_characters() {
    let backend = mock_backend::spawn().await;
    let mut session = session_for(&backend);

    session
        .set_preference("editor/vim mode?", true)
        .await
        .expect("set failed");

    let settings = backend.state.settings.lock().unwrap().clone();
    assert_eq!(settings.len(), 1);
    assert_eq!(settings.get("editor/vim mode?"), Some(&json!(true)));
}
