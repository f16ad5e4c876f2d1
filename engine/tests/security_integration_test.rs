//! Integration tests for signature verification, the trust store and policy

mod common;

use chrono::Duration;
use common::publisher;
use plexus_engine::config::SecurityConfig;
use plexus_engine::crypto::KeyPair;
use plexus_engine::events::{Event, EventBus, EventType};
use plexus_engine::platform;
use plexus_engine::security::{
    PluginCertificate, PluginSigner, RevocationList, SecurityLevel, SecurityManager,
    SecurityPolicy, SignatureVerifier, TrustLevel, TrustStore, VerificationStatus,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

struct Setup {
    dir: TempDir,
    store: Arc<TrustStore>,
    plugin: PathBuf,
}

fn setup() -> Setup {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(TrustStore::new(dir.path().join("trust.json"), None));
    let plugin = common::write_library(dir.path(), "sample");
    Setup { dir, store, plugin }
}

/// Root CA, an intermediate issued by it, and a signer issued by the intermediate
fn three_level_chain() -> (PluginCertificate, PluginCertificate, PluginSigner) {
    let root_keys = KeyPair::generate();
    let root = PluginCertificate::self_signed("Root CA", &root_keys, Duration::days(365));

    let mid_keys = KeyPair::generate();
    let mid = PluginCertificate::issue(
        "Intermediate CA",
        &mid_keys.public_key_hex(),
        &root,
        &root_keys,
        Duration::days(180),
    )
    .unwrap();

    let leaf_keys = KeyPair::generate();
    let leaf = PluginCertificate::issue(
        "Plugin Vendor",
        &leaf_keys.public_key_hex(),
        &mid,
        &mid_keys,
        Duration::days(90),
    )
    .unwrap();

    let signer = PluginSigner::new(leaf_keys, vec![leaf, mid.clone()]).unwrap();
    (root, mid, signer)
}

#[test]
fn test_trusted_root_validates_full_chain() {
    let s = setup();
    let (root, _, signer) = three_level_chain();
    s.store.add_certificate(&root, TrustLevel::Trusted, "root").unwrap();
    signer.sign_sidecar(&s.plugin).unwrap();

    let verifier = SignatureVerifier::new(Arc::clone(&s.store));
    let info = verifier.verify_plugin(&s.plugin);

    assert_eq!(info.status, VerificationStatus::Valid, "{:?}", info.errors);
    assert_eq!(info.chain.len(), 3);
    assert_eq!(info.signer.as_deref(), Some("Plugin Vendor"));
    assert_eq!(info.trust_level, Some(TrustLevel::Trusted));
}

#[test]
fn test_blocked_intermediate_overrides_trusted_root() {
    let s = setup();
    let (root, mid, signer) = three_level_chain();
    s.store.add_certificate(&root, TrustLevel::Trusted, "root").unwrap();
    s.store.block_certificate(&mid.fingerprint(), "compromised");
    signer.sign_sidecar(&s.plugin).unwrap();

    let info = SignatureVerifier::new(Arc::clone(&s.store)).verify_plugin(&s.plugin);
    assert_eq!(info.status, VerificationStatus::Invalid);
    assert_eq!(info.trust_level, Some(TrustLevel::Blocked));
}

#[test]
fn test_unknown_issuer_is_invalid() {
    let s = setup();
    let (_, _, signer) = three_level_chain();
    signer.sign_sidecar(&s.plugin).unwrap();

    // The chain ends at the intermediate, whose issuer is not in the store
    let info = SignatureVerifier::new(Arc::clone(&s.store)).verify_plugin(&s.plugin);
    assert_eq!(info.status, VerificationStatus::Invalid);
}

#[test]
fn test_unlisted_self_signed_publisher_is_untrusted() {
    let s = setup();
    let (signer, _) = publisher("Hobbyist");
    signer.sign_sidecar(&s.plugin).unwrap();

    let info = SignatureVerifier::new(Arc::clone(&s.store)).verify_plugin(&s.plugin);
    assert_eq!(info.status, VerificationStatus::Untrusted);
    assert_eq!(info.trust_level, Some(TrustLevel::Untrusted));
}

#[test]
fn test_conditional_trust_verifies_as_untrusted() {
    let s = setup();
    let (signer, cert) = publisher("Partner");
    s.store.add_certificate(&cert, TrustLevel::Conditional, "partner").unwrap();
    signer.sign_sidecar(&s.plugin).unwrap();

    let info = SignatureVerifier::new(Arc::clone(&s.store)).verify_plugin(&s.plugin);
    assert_eq!(info.status, VerificationStatus::Untrusted);
    assert_eq!(info.trust_level, Some(TrustLevel::Conditional));
}

#[test]
fn test_expired_certificate_downgrades_status() {
    let s = setup();
    let keys = KeyPair::generate();
    let cert = PluginCertificate::self_signed("Old Vendor", &keys, Duration::days(-1));
    s.store.add_certificate(&cert, TrustLevel::Trusted, "expired").unwrap();
    PluginSigner::new(keys, vec![cert]).unwrap().sign_sidecar(&s.plugin).unwrap();

    let info = SignatureVerifier::new(Arc::clone(&s.store)).verify_plugin(&s.plugin);
    assert_eq!(info.status, VerificationStatus::Expired);
    assert!(!info.is_valid());
}

#[test]
fn test_revoked_certificate_downgrades_status() {
    let s = setup();
    let (signer, cert) = publisher("Revoked Vendor");
    s.store.add_certificate(&cert, TrustLevel::Trusted, "revoked").unwrap();
    signer.sign_sidecar(&s.plugin).unwrap();

    let list = RevocationList::new();
    list.revoke_serial(&cert.serial);
    let verifier = SignatureVerifier::new(Arc::clone(&s.store)).with_revocation(Arc::new(list));

    let info = verifier.verify_plugin(&s.plugin);
    assert_eq!(info.status, VerificationStatus::Revoked);
}

#[test]
fn test_embedded_and_sidecar_signatures_agree() {
    let s = setup();
    let (signer, cert) = publisher("Vendor");
    s.store.add_certificate(&cert, TrustLevel::Trusted, "vendor").unwrap();

    let embedded = common::write_library(s.dir.path(), "embedded");
    signer.sign_sidecar(&s.plugin).unwrap();
    signer.sign_embedded(&embedded).unwrap();

    let verifier = SignatureVerifier::new(Arc::clone(&s.store));
    let sidecar_info = verifier.verify_plugin(&s.plugin);
    let embedded_info = verifier.verify_plugin(&embedded);

    assert_eq!(sidecar_info.status, VerificationStatus::Valid);
    assert_eq!(embedded_info.status, VerificationStatus::Valid);
    assert!(!sidecar_info.embedded);
    assert!(embedded_info.embedded);
    assert_eq!(sidecar_info.fingerprint, embedded_info.fingerprint);
}

#[test]
fn test_tampered_binary_is_invalid() {
    let s = setup();
    let (signer, cert) = publisher("Vendor");
    s.store.add_certificate(&cert, TrustLevel::Trusted, "vendor").unwrap();
    signer.sign_sidecar(&s.plugin).unwrap();

    std::fs::write(&s.plugin, "patched plugin body").unwrap();
    let info = SignatureVerifier::new(Arc::clone(&s.store)).verify_plugin(&s.plugin);
    assert_eq!(info.status, VerificationStatus::Invalid);
}

#[test]
fn test_trust_store_persists_across_reopen() {
    let s = setup();
    let (_, cert) = publisher("Vendor");
    let fingerprint = s.store.add_certificate(&cert, TrustLevel::Trusted, "vendor").unwrap();
    s.store.block_certificate("deadbeef", "never trust this");
    s.store.save().unwrap();

    let reopened = TrustStore::open(s.store.path(), None).unwrap();
    assert_eq!(reopened.len(), 2);
    assert_eq!(reopened.trust_level(&fingerprint), TrustLevel::Trusted);
    assert_eq!(reopened.trust_level("deadbeef"), TrustLevel::Blocked);

    reopened.unblock_certificate("deadbeef").unwrap();
    assert!(reopened.unblock_certificate(&fingerprint).is_err());
}

#[test]
fn test_trust_changes_are_published() {
    let events = Arc::new(EventBus::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    events.subscribe(EventType::TrustLevelChanged, move |event| {
        sink.lock().unwrap().push(event.clone())
    });

    let dir = TempDir::new().unwrap();
    let store = TrustStore::new(dir.path().join("trust.json"), Some(events));
    let (_, cert) = publisher("Vendor");
    let fingerprint = store.add_certificate(&cert, TrustLevel::Conditional, "").unwrap();
    store.set_trust_level(&fingerprint, TrustLevel::Trusted).unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(matches!(
        &seen[1],
        Event::TrustLevelChanged { old: TrustLevel::Conditional, new: TrustLevel::Trusted, .. }
    ));
}

#[test]
fn test_policy_file_overrides_only_present_keys() {
    let dir = TempDir::new().unwrap();
    let policy_file = dir.path().join("policy.json");
    std::fs::write(
        &policy_file,
        r#"{ "allowUnsignedPlugins": true, "maxMemoryUsage": 128 }"#,
    )
    .unwrap();

    let policy = SecurityPolicy::load_merged(&policy_file).unwrap();
    let defaults = SecurityPolicy::default();
    assert!(policy.allow_unsigned_plugins);
    assert_eq!(policy.max_memory_usage, 128);
    assert_eq!(policy.max_cpu_usage, defaults.max_cpu_usage);
    assert_eq!(policy.require_trusted_publisher, defaults.require_trusted_publisher);
    assert_eq!(policy.allow_registry_access, defaults.allow_registry_access);
}

#[test]
fn test_security_manager_from_config_applies_policy() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("policy.json"),
        r#"{ "allowUnsignedPlugins": true, "sandboxMode": true }"#,
    )
    .unwrap();
    let config = SecurityConfig {
        policy_file: dir.path().join("policy.json"),
        trust_store: dir.path().join("trust.json"),
        revocation_list: dir.path().join("revoked.json"),
        check_revocation: true,
        require_signatures: false,
    };
    let manager = SecurityManager::from_config(&config, None).unwrap();

    let unsigned = common::write_library(dir.path(), "unsigned");
    let info = manager.validate_plugin(&unsigned).unwrap();
    assert_eq!(info.status, VerificationStatus::NotSigned);
    assert_eq!(manager.level_for(&info), SecurityLevel::Basic);

    let (signer, cert) = publisher("Vendor");
    manager
        .trust_store()
        .add_certificate(&cert, TrustLevel::Trusted, "vendor")
        .unwrap();
    let signed = common::write_library(dir.path(), "signed");
    signer.sign_sidecar(&signed).unwrap();
    assert_eq!(manager.evaluate_security_level(&signed), SecurityLevel::Strict);
}

#[test]
fn test_untrusted_publisher_depends_on_policy() {
    let s = setup();
    let (signer, _) = publisher("Stranger");
    signer.sign_sidecar(&s.plugin).unwrap();

    let strict = SecurityManager::new(
        SecurityPolicy::default(),
        SignatureVerifier::new(Arc::clone(&s.store)),
        None,
    );
    assert!(strict.validate_plugin(&s.plugin).is_err());

    let relaxed = SecurityManager::new(
        SecurityPolicy {
            require_trusted_publisher: false,
            ..SecurityPolicy::default()
        },
        SignatureVerifier::new(Arc::clone(&s.store)),
        None,
    );
    assert!(relaxed.validate_plugin(&s.plugin).is_ok());
}

#[test]
fn test_permission_names_follow_policy_and_grants() {
    let s = setup();
    let manager = SecurityManager::new(
        SecurityPolicy::default(),
        SignatureVerifier::new(Arc::clone(&s.store)),
        None,
    );
    let requested = vec![
        "network".to_string(),
        "file_system".to_string(),
        "registry".to_string(),
        "teleport".to_string(),
    ];

    assert_eq!(
        manager.denied_permissions("p", &requested),
        vec!["registry".to_string(), "teleport".to_string()]
    );
    manager.grant_permission("p", "registry").unwrap();
    assert!(manager.grant_permission("p", "teleport").is_err());
    assert_eq!(manager.denied_permissions("p", &requested), vec!["teleport".to_string()]);
    assert!(!manager.check_permissions("p", &requested));
    assert!(manager.check_permissions("p", &requested[..3]));
}

#[test]
fn test_library_names_are_platform_specific() {
    let name = platform::library_filename("sample");
    assert!(name.ends_with(platform::library_extension()));
    assert_eq!(
        platform::plugin_id_from_path(std::path::Path::new(&name)).as_deref(),
        Some("sample")
    );
}
