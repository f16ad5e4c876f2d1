//! Integration tests for PluginManager
//!
//! Plugins are served by a `StaticRegistry`, so these tests exercise the
//! full load/unload path without building native libraries.

mod common;

use common::{publisher, security_manager, Behavior, Fixture};
use parking_lot::Mutex;
use plexus_engine::events::{Event, EventType};
use plexus_engine::manager::{LoadOptions, PluginStatus};
use plexus_engine::security::{SecurityLevel, SecurityPolicy, TrustLevel};
use sdk::errors::EngineError;
use sdk::{Capabilities, DependencyConstraint, PluginMetadata};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn record_events(fixture: &Fixture) -> Arc<Mutex<Vec<Event>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    fixture
        .events
        .subscribe(EventType::All, move |event| sink.lock().push(event.clone()));
    seen
}

#[test]
fn test_load_registers_single_running_instance() {
    let fixture = Fixture::new();
    let path = fixture.add_simple("echo");
    let manager = fixture.manager();

    let id = manager.load_plugin(&path, &LoadOptions::default()).unwrap();
    assert_eq!(id, "echo");
    assert!(manager.is_plugin_loaded("echo"));
    assert_eq!(manager.plugin_status("echo"), Some(PluginStatus::Running));

    let a = manager.get_plugin("echo").unwrap();
    let b = manager.get_plugin("echo").unwrap();
    assert!(a.same_instance(&b));

    manager.execute_command("echo", "increment", &Value::Null).unwrap();
    assert_eq!(a.with(|p| p.execute_command("get", &Value::Null)).unwrap(), json!(1));

    let info = manager.plugin_info("echo").unwrap();
    assert_eq!(info.version, "1.0.0");
    assert_eq!(info.file_path, path);
    assert_eq!(info.capabilities, vec!["service"]);
}

#[test]
fn test_second_load_of_same_id_fails() {
    let fixture = Fixture::new();
    let path = fixture.add_simple("echo");
    let manager = fixture.manager();

    manager.load_plugin(&path, &LoadOptions::default()).unwrap();
    let err = manager.load_plugin(&path, &LoadOptions::default()).unwrap_err();
    assert!(matches!(err, EngineError::AlreadyLoaded(id) if id == "echo"));
    assert_eq!(fixture.registry.opened_total(), 1);
}

#[test]
fn test_concurrent_loads_of_same_id_admit_exactly_one() {
    let fixture = Fixture::new();
    let behavior = Behavior::default();
    let path = fixture.add_plugin(PluginMetadata::new("racer", "1.0.0"), behavior.clone());
    let manager = fixture.manager();
    let options = LoadOptions::default();

    let results: Vec<Result<String, EngineError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| manager.load_plugin(&path, &options)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, EngineError::AlreadyLoaded(_))));
    assert_eq!(behavior.instances.load(Ordering::SeqCst), 1);
    assert_eq!(manager.loaded_plugins(), vec!["racer"]);
}

#[test]
fn test_concurrent_loads_of_distinct_plugins_all_succeed() {
    const N: usize = 12;
    let fixture = Fixture::new();
    let behavior = Behavior::default();
    let ids: Vec<String> = (0..N).map(|i| format!("worker{:02}", i)).collect();
    let paths: Vec<_> = ids
        .iter()
        .map(|id| fixture.add_plugin(PluginMetadata::new(id, "1.0.0"), behavior.clone()))
        .collect();
    let manager = fixture.manager();
    let options = LoadOptions::default();

    let results: Vec<Result<String, EngineError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = paths
            .iter()
            .map(|path| scope.spawn(|| manager.load_plugin(path, &options)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(results.iter().all(|r| r.is_ok()), "{:?}", results);
    assert_eq!(manager.loaded_plugins().len(), N);
    assert_eq!(behavior.instances.load(Ordering::SeqCst), N);
    let mut loaded = manager.loaded_plugins();
    loaded.sort();
    assert_eq!(loaded, ids);
    for id in &ids {
        assert_eq!(manager.plugin_status(id), Some(PluginStatus::Running));
    }
}

#[test]
fn test_missing_file_is_reported() {
    let fixture = Fixture::new();
    let manager = fixture.manager();
    let missing = fixture.dir.path().join(plexus_engine::platform::library_filename("ghost"));

    let err = manager.load_plugin(&missing, &LoadOptions::default()).unwrap_err();
    assert!(matches!(err, EngineError::FileNotFound(_)));
    assert!(manager.loaded_plugins().is_empty());
}

#[test]
fn test_scan_reports_valid_and_malformed_files() {
    let fixture = Fixture::new();
    for id in ["a", "b", "c", "d", "e"] {
        fixture.add_simple(id);
    }
    // Library files nobody provides an entry point for
    common::write_library(fixture.dir.path(), "broken1");
    common::write_library(fixture.dir.path(), "broken2");
    std::fs::write(fixture.dir.path().join("notes.txt"), "not a plugin").unwrap();

    let manager = fixture.manager();
    let report = manager
        .scan_directory(fixture.dir.path(), false, &LoadOptions::default())
        .unwrap();

    assert_eq!(report.loaded.len(), 5);
    assert_eq!(report.failed.len(), 2);
    assert_eq!(report.total(), 7);
    assert_eq!(manager.loaded_plugins(), vec!["a", "b", "c", "d", "e"]);
    assert_eq!(fixture.registry.open_modules(), 5);
}

#[test]
fn test_scan_of_missing_directory_fails() {
    let fixture = Fixture::new();
    let manager = fixture.manager();
    let err = manager
        .scan_directory(&fixture.dir.path().join("nope"), false, &LoadOptions::default())
        .unwrap_err();
    assert!(matches!(err, EngineError::FileNotFound(_)));
}

#[test]
fn test_scan_loads_dependencies_found_later() {
    let fixture = Fixture::new();
    // "alpha" sorts first but needs "zeta"
    fixture.add_dependent("alpha", "zeta", ">=1.0.0");
    fixture.add_simple("zeta");

    let manager = fixture.manager();
    let report = manager
        .scan_directory(fixture.dir.path(), false, &LoadOptions::default())
        .unwrap();

    assert!(report.failed.is_empty(), "{:?}", report.failed);
    assert_eq!(report.loaded, vec!["zeta", "alpha"]);
}

#[test]
fn test_missing_dependency_rejects_load_and_closes_module() {
    let fixture = Fixture::new();
    let path = fixture.add_dependent("client", "server", ">=1.0.0");
    let manager = fixture.manager();

    let err = manager.load_plugin(&path, &LoadOptions::default()).unwrap_err();
    assert!(matches!(err, EngineError::DependencyMissing(_)));
    assert!(!manager.is_plugin_loaded("client"));
    assert_eq!(fixture.registry.open_modules(), 0);

    // Skipping the check loads it anyway
    let options = LoadOptions {
        check_dependencies: false,
        ..LoadOptions::default()
    };
    manager.load_plugin(&path, &options).unwrap();
}

#[test]
fn test_incompatible_dependency_version_is_a_conflict() {
    let fixture = Fixture::new();
    let server = fixture.add_simple("server");
    let client = fixture.add_dependent("client", "server", ">=2.0.0");
    let manager = fixture.manager();

    manager.load_plugin(&server, &LoadOptions::default()).unwrap();
    let err = manager.load_plugin(&client, &LoadOptions::default()).unwrap_err();
    assert!(matches!(err, EngineError::DependencyConflict(_)));
}

#[test]
fn test_optional_dependency_is_not_required() {
    let fixture = Fixture::new();
    let metadata = PluginMetadata::new("client", "1.0.0").with_dependency(
        DependencyConstraint::new("extras").with_type(sdk::DependencyType::Optional),
    );
    let path = fixture.add_plugin(metadata, Behavior::default());
    let manager = fixture.manager();

    manager.load_plugin(&path, &LoadOptions::default()).unwrap();
}

#[test]
fn test_required_capabilities_are_enforced() {
    let fixture = Fixture::new();
    let path = fixture.add_plugin_with(
        PluginMetadata::new("viewer", "1.0.0"),
        Capabilities::UI,
        Behavior::default(),
    );
    let manager = fixture.manager();

    let options = LoadOptions {
        required_capabilities: Capabilities::NETWORK,
        ..LoadOptions::default()
    };
    let err = manager.load_plugin(&path, &options).unwrap_err();
    assert!(matches!(err, EngineError::InvalidPlugin(_)));

    manager.load_plugin(&path, &LoadOptions::default()).unwrap();
    assert_eq!(manager.plugins_with_capability(Capabilities::UI), vec!["viewer"]);
    assert!(manager.plugins_with_capability(Capabilities::NETWORK).is_empty());
}

#[test]
fn test_failed_initialization_registers_nothing() {
    let fixture = Fixture::new();
    let behavior = Behavior::default();
    behavior.fail_init.store(true, Ordering::SeqCst);
    let path = fixture.add_plugin(PluginMetadata::new("grumpy", "1.0.0"), behavior);
    let manager = fixture.manager();

    let err = manager.load_plugin(&path, &LoadOptions::default()).unwrap_err();
    assert!(matches!(err, EngineError::InitializationFailed(_)));
    assert!(manager.loaded_plugins().is_empty());
    assert_eq!(fixture.registry.open_modules(), 0);
}

#[test]
fn test_unload_is_idempotent() {
    let fixture = Fixture::new();
    let behavior = Behavior::default();
    let path = fixture.add_plugin(PluginMetadata::new("echo", "1.0.0"), behavior.clone());
    let manager = fixture.manager();

    manager.load_plugin(&path, &LoadOptions::default()).unwrap();
    manager.unload_plugin("echo", false).unwrap();
    assert_eq!(behavior.shutdowns.load(Ordering::SeqCst), 1);

    let err = manager.unload_plugin("echo", false).unwrap_err();
    assert!(matches!(err, EngineError::PluginNotFound(_)));
    assert_eq!(fixture.registry.open_modules(), 0);
}

#[test]
fn test_unload_refuses_while_dependents_are_loaded() {
    let fixture = Fixture::new();
    let server = fixture.add_simple("server");
    let client = fixture.add_dependent("client", "server", ">=1.0.0");
    let manager = fixture.manager();
    manager.load_plugin(&server, &LoadOptions::default()).unwrap();
    manager.load_plugin(&client, &LoadOptions::default()).unwrap();

    let err = manager.unload_plugin("server", false).unwrap_err();
    assert!(matches!(err, EngineError::DependencyConflict(_)));
    assert!(manager.is_plugin_loaded("server"));

    manager.unload_plugin("server", true).unwrap();
    assert!(!manager.is_plugin_loaded("server"));
    assert!(manager.is_plugin_loaded("client"));
}

#[test]
fn test_unload_all_removes_dependents_first() {
    let fixture = Fixture::new();
    let base = fixture.add_simple("base");
    let mid = fixture.add_dependent("mid", "base", ">=1.0.0");
    let top = fixture.add_dependent("top", "mid", ">=1.0.0");
    let manager = fixture.manager();
    for path in [&base, &mid, &top] {
        manager.load_plugin(path, &LoadOptions::default()).unwrap();
    }
    let events = record_events(&fixture);

    manager.unload_all();

    let order: Vec<String> = events
        .lock()
        .iter()
        .filter_map(|e| match e {
            Event::PluginUnloaded { plugin_id } => Some(plugin_id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(order, vec!["top", "mid", "base"]);
    assert_eq!(fixture.registry.open_modules(), 0);
}

#[test]
fn test_panicking_shutdown_still_unloads() {
    let fixture = Fixture::new();
    let behavior = Behavior::default();
    behavior.panic_on_shutdown.store(true, Ordering::SeqCst);
    let path = fixture.add_plugin(PluginMetadata::new("crashy", "1.0.0"), behavior);
    let manager = fixture.manager();
    manager.load_plugin(&path, &LoadOptions::default()).unwrap();
    let events = record_events(&fixture);

    manager.unload_plugin("crashy", false).unwrap();

    assert!(!manager.is_plugin_loaded("crashy"));
    let events = events.lock();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::PluginError { plugin_id, .. } if plugin_id == "crashy")));
    assert!(matches!(events.last(), Some(Event::PluginUnloaded { .. })));
}

#[test]
fn test_reload_preserves_state_when_asked() {
    let fixture = Fixture::new();
    let path = fixture.add_simple("counter");
    let manager = fixture.manager();
    manager.load_plugin(&path, &LoadOptions::default()).unwrap();
    let before = manager.get_plugin("counter").unwrap();
    let uuid = manager.plugin_info("counter").unwrap().uuid;

    for _ in 0..3 {
        manager.execute_command("counter", "increment", &Value::Null).unwrap();
    }

    manager.reload_plugin("counter", true).unwrap();
    let after = manager.get_plugin("counter").unwrap();
    assert!(!before.same_instance(&after));
    assert_eq!(manager.execute_command("counter", "get", &Value::Null).unwrap(), json!(3));

    let info = manager.plugin_info("counter").unwrap();
    assert_eq!(info.reload_count, 1);
    assert_ne!(info.uuid, uuid);

    manager.reload_plugin("counter", false).unwrap();
    assert_eq!(manager.execute_command("counter", "get", &Value::Null).unwrap(), json!(0));
    assert_eq!(manager.plugin_info("counter").unwrap().reload_count, 2);
}

#[test]
fn test_reload_of_unknown_plugin_fails() {
    let fixture = Fixture::new();
    let manager = fixture.manager();
    let err = manager.reload_plugin("nobody", true).unwrap_err();
    assert!(matches!(err, EngineError::PluginNotFound(_)));
}

#[test]
fn test_pause_and_resume() {
    let fixture = Fixture::new();
    let path = fixture.add_simple("worker");
    let manager = fixture.manager();
    manager.load_plugin(&path, &LoadOptions::default()).unwrap();
    let events = record_events(&fixture);

    manager.pause_plugin("worker").unwrap();
    assert_eq!(manager.plugin_status("worker"), Some(PluginStatus::Paused));

    let err = manager.pause_plugin("worker").unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
    let err = manager
        .execute_command("worker", "increment", &Value::Null)
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));

    manager.resume_plugin("worker").unwrap();
    assert_eq!(manager.plugin_status("worker"), Some(PluginStatus::Running));
    let err = manager.resume_plugin("worker").unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));

    let changes: Vec<(PluginStatus, PluginStatus)> = events
        .lock()
        .iter()
        .filter_map(|e| match e {
            Event::PluginStatusChanged { old, new, .. } => Some((*old, *new)),
            _ => None,
        })
        .collect();
    assert_eq!(
        changes,
        vec![
            (PluginStatus::Running, PluginStatus::Paused),
            (PluginStatus::Paused, PluginStatus::Running)
        ]
    );
}

#[test]
fn test_restart_runs_shutdown_then_initialize() {
    let fixture = Fixture::new();
    let behavior = Behavior::default();
    let path = fixture.add_plugin(PluginMetadata::new("svc", "1.0.0"), behavior.clone());
    let manager = fixture.manager();
    manager.load_plugin(&path, &LoadOptions::default()).unwrap();

    manager.restart_plugin("svc").unwrap();
    assert_eq!(manager.plugin_status("svc"), Some(PluginStatus::Running));
    assert_eq!(behavior.inits.load(Ordering::SeqCst), 2);
    assert_eq!(behavior.shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(behavior.instances.load(Ordering::SeqCst), 1);
}

#[test]
fn test_failed_restart_moves_plugin_to_error() {
    let fixture = Fixture::new();
    let behavior = Behavior::default();
    let path = fixture.add_plugin(PluginMetadata::new("svc", "1.0.0"), behavior.clone());
    let manager = fixture.manager();
    manager.load_plugin(&path, &LoadOptions::default()).unwrap();
    let events = record_events(&fixture);

    behavior.fail_init.store(true, Ordering::SeqCst);
    let err = manager.restart_plugin("svc").unwrap_err();
    assert!(matches!(err, EngineError::InitializationFailed(_)));

    assert_eq!(manager.plugin_status("svc"), Some(PluginStatus::Error));
    assert!(manager.get_plugin("svc").is_none());
    assert_eq!(manager.failed_plugins(), vec!["svc"]);
    assert!(events
        .lock()
        .iter()
        .any(|e| matches!(e, Event::PluginError { plugin_id, .. } if plugin_id == "svc")));

    // A record in Error can still be unloaded, closing its module
    manager.unload_plugin("svc", false).unwrap();
    assert_eq!(fixture.registry.open_modules(), 0);
}

#[test]
fn test_configure_and_unknown_command() {
    let fixture = Fixture::new();
    let path = fixture.add_simple("echo");
    let manager = fixture.manager();
    manager.load_plugin(&path, &LoadOptions::default()).unwrap();

    manager.configure_plugin("echo", &json!({ "verbose": true })).unwrap();
    let err = manager.execute_command("echo", "explode", &Value::Null).unwrap_err();
    assert!(matches!(err, EngineError::UnknownCommand(_)));
    let err = manager.execute_command("ghost", "get", &Value::Null).unwrap_err();
    assert!(matches!(err, EngineError::PluginNotFound(_)));
}

#[test]
fn test_dependency_graph_of_loaded_plugins() {
    let fixture = Fixture::new();
    let server = fixture.add_simple("server");
    let client = fixture.add_dependent("client", "server", ">=1.0.0");
    let manager = fixture.manager();
    manager.load_plugin(&server, &LoadOptions::default()).unwrap();
    manager.load_plugin(&client, &LoadOptions::default()).unwrap();

    let graph = manager.dependency_graph();
    assert_eq!(graph.dependencies_of("client"), vec!["server"]);
    assert_eq!(graph.installation_order().unwrap(), vec!["server", "client"]);
}

#[test]
fn test_load_and_unload_events() {
    let fixture = Fixture::new();
    let path = fixture.add_simple("echo");
    let manager = fixture.manager();
    let events = record_events(&fixture);

    manager.load_plugin(&path, &LoadOptions::default()).unwrap();
    manager.unload_plugin("echo", false).unwrap();

    let events = events.lock();
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], Event::PluginLoaded { plugin_id, .. } if plugin_id == "echo"));
    assert!(matches!(&events[1], Event::PluginUnloaded { plugin_id } if plugin_id == "echo"));
}

fn signed_options() -> LoadOptions {
    LoadOptions {
        validate_signature: true,
        ..LoadOptions::default()
    }
}

#[test]
fn test_unsigned_plugin_is_rejected_before_it_is_opened() {
    let fixture = Fixture::new();
    let behavior = Behavior::default();
    let path = fixture.add_plugin(PluginMetadata::new("rogue", "1.0.0"), behavior.clone());
    let (security, _) = security_manager(
        fixture.dir.path(),
        SecurityPolicy::default(),
        Some(Arc::clone(&fixture.events)),
    );
    let manager = fixture.secured_manager(security);
    let events = record_events(&fixture);

    let err = manager.load_plugin(&path, &signed_options()).unwrap_err();
    assert!(matches!(err, EngineError::SecurityViolation(_)));
    assert_eq!(fixture.registry.opened_total(), 0);
    assert_eq!(behavior.instances.load(Ordering::SeqCst), 0);
    assert!(events
        .lock()
        .iter()
        .any(|e| matches!(e, Event::SecurityViolation { .. })));
}

#[test]
fn test_signature_validation_without_security_manager_fails() {
    let fixture = Fixture::new();
    let path = fixture.add_simple("echo");
    let manager = fixture.manager();

    let err = manager.load_plugin(&path, &signed_options()).unwrap_err();
    assert!(matches!(err, EngineError::SecurityViolation(_)));
}

#[test]
fn test_trusted_signed_plugin_loads_at_standard_level() {
    let fixture = Fixture::new();
    let path = fixture.add_simple("signed");
    let (security, store) = security_manager(fixture.dir.path(), SecurityPolicy::default(), None);
    let (signer, cert) = publisher("Acme");
    store.add_certificate(&cert, TrustLevel::Trusted, "test publisher").unwrap();
    signer.sign_sidecar(&path).unwrap();

    let manager = fixture.secured_manager(Arc::clone(&security));
    manager.load_plugin(&path, &signed_options()).unwrap();

    assert_eq!(manager.security_level("signed"), Some(SecurityLevel::Standard));
    assert!(security.sandbox_profile("signed").is_some());

    manager.unload_plugin("signed", false).unwrap();
    assert!(security.sandbox_profile("signed").is_none());
}

#[test]
fn test_security_check_can_run_after_dependency_check() {
    let fixture = Fixture::new();
    let path = fixture.add_dependent("client", "server", ">=1.0.0");
    let (security, _) = security_manager(fixture.dir.path(), SecurityPolicy::default(), None);
    let manager = fixture.secured_manager(security);

    let err = manager.load_plugin(&path, &signed_options()).unwrap_err();
    assert!(matches!(err, EngineError::SecurityViolation(_)));

    let options = LoadOptions {
        security_first: false,
        ..signed_options()
    };
    let err = manager.load_plugin(&path, &options).unwrap_err();
    assert!(matches!(err, EngineError::DependencyMissing(_)));
}

#[test]
fn test_denied_permission_blocks_load_until_granted() {
    let fixture = Fixture::new();
    let metadata = PluginMetadata::new("shell", "1.0.0").with_permission("process");
    let path = fixture.add_plugin(metadata, Behavior::default());
    let policy = SecurityPolicy {
        allow_unsigned_plugins: true,
        ..SecurityPolicy::default()
    };
    let (security, _) = security_manager(fixture.dir.path(), policy, None);
    let manager = fixture.secured_manager(Arc::clone(&security));

    let err = manager.load_plugin(&path, &LoadOptions::default()).unwrap_err();
    assert!(matches!(err, EngineError::SecurityViolation(_)));

    security.grant_permission("shell", "process").unwrap();
    manager.load_plugin(&path, &LoadOptions::default()).unwrap();
    assert_eq!(manager.security_level("shell"), Some(SecurityLevel::Basic));
}

#[test]
fn test_hot_reload_picks_up_changed_library() {
    let fixture = Fixture::new();
    let path = fixture.add_simple("live");
    let manager = Arc::new(fixture.manager());
    manager.load_plugin(&path, &LoadOptions::default()).unwrap();

    manager
        .enable_hot_reload(&[fixture.dir.path().to_path_buf()], Duration::from_millis(50))
        .unwrap();
    assert!(manager.is_hot_reload_enabled());

    std::fs::write(&path, "rebuilt plugin body").unwrap();

    let reloads = || manager.plugin_info("live").map(|i| i.reload_count).unwrap_or(0);
    let deadline = Instant::now() + Duration::from_secs(10);
    while reloads() == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(reloads() >= 1);
    assert!(manager.is_plugin_loaded("live"));

    manager.disable_hot_reload();
    assert!(!manager.is_hot_reload_enabled());
}
