//! Core infrastructure tests.

mod common;

use bytes::Bytes;
use common::create_config_file;
use tokio::runtime::Handle;
use xsite_cache::commands::context::LockingMode;
use xsite_cache::core::config::{Config, ConfigOverrides};
use xsite_cache::core::error::CacheError;
use xsite_cache::xsite::ConflictPolicyKind;

fn key(name: &str) -> Bytes {
    Bytes::copy_from_slice(name.as_bytes())
}

fn assert_rejected(content: &str, needle: &str) {
    let file = create_config_file(content);
    let result = Config::from_file(file.path());
    assert!(result.is_err(), "config should be rejected:\n{content}");
    let err_msg = format!("{:#}", result.unwrap_err());
    assert!(
        err_msg.contains(needle),
        "error should mention {needle}: {err_msg}"
    );
}

// ============================================================================
// Config tests
// ============================================================================

#[test]
fn parse_minimal_config() {
    let file = create_config_file("");
    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.node.address, "node-1");
    assert_eq!(config.clustering.mode, "local");
    assert_eq!(config.clustering.segments, 256);
    assert!(!config.xsite.enabled);
    assert!(!config.persistence.enabled);
    assert_eq!(config.retry.max_topology_retries, None);
    assert_eq!(config.telemetry.log_level, "info");
}

#[test]
fn parse_full_config() {
    let config_content = r#"
[node]
address = "n1"
site = "siteA"

[clustering]
mode = "distributed"
members = ["n1", "n2", "n3"]
num_owners = 2
segments = 64
hash_seed = 7

[xsite]
enabled = true
conflict_policy = "prefer-remote"

[transactions]
enabled = true
locking = "pessimistic"

[persistence]
enabled = true
preload = true

[retry]
max_topology_retries = 5

[telemetry]
log_level = "debug"
"#;

    let file = create_config_file(config_content);
    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.node.site, "siteA");
    assert!(config.clustering.is_distributed());
    assert_eq!(config.clustering.members.len(), 3);
    assert_eq!(config.clustering.hash_seed, 7);
    assert_eq!(config.xsite.conflict_policy, ConflictPolicyKind::PreferRemote);
    assert_eq!(config.transactions.locking, LockingMode::Pessimistic);
    assert!(config.persistence.preload);
    assert_eq!(config.retry.max_topology_retries, Some(5));
}

#[test]
fn sample_config_is_valid() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config/xsite-cache.toml");
    let config = Config::from_file(&path).unwrap();
    assert!(config.xsite.enabled);
}

#[test]
fn validate_invalid_cluster_mode() {
    assert_rejected(
        r#"
[clustering]
mode = "replicated"
"#,
        "clustering.mode",
    );
}

#[test]
fn validate_zero_owners() {
    assert_rejected(
        r#"
[clustering]
num_owners = 0
"#,
        "num_owners",
    );
}

#[test]
fn validate_zero_segments() {
    assert_rejected(
        r#"
[clustering]
segments = 0
"#,
        "segments",
    );
}

#[test]
fn validate_members_include_local_node() {
    assert_rejected(
        r#"
[node]
address = "n9"

[clustering]
mode = "distributed"
members = ["n1", "n2"]
"#,
        "members",
    );
}

#[test]
fn validate_local_mode_has_one_member() {
    assert_rejected(
        r#"
[node]
address = "n1"

[clustering]
members = ["n1", "n2"]
"#,
        "local",
    );
}

#[test]
fn validate_pessimistic_needs_transactions() {
    assert_rejected(
        r#"
[transactions]
locking = "pessimistic"
"#,
        "transactions",
    );
}

#[test]
fn validate_log_level() {
    assert_rejected(
        r#"
[telemetry]
log_level = "verbose"
"#,
        "log_level",
    );
}

#[test]
fn validate_site_required_for_xsite() {
    assert_rejected(
        r#"
[node]
site = " "

[xsite]
enabled = true
"#,
        "node.site",
    );
}

#[test]
fn unknown_conflict_policy_fails_to_parse() {
    let result = Config::from_toml(
        r#"
[xsite]
conflict_policy = "coin-flip"
"#,
    );
    assert!(result.is_err());
}

#[test]
fn config_overrides_apply() {
    let mut config = Config::from_toml(
        r#"
[node]
address = "n1"
site = "siteA"
"#,
    )
    .unwrap();

    let overrides = ConfigOverrides {
        log_level: Some("trace".to_string()),
        site: Some("siteB".to_string()),
        ..ConfigOverrides::default()
    };
    config.apply_overrides(&overrides);

    assert_eq!(config.telemetry.log_level, "trace");
    assert_eq!(config.node.site, "siteB");
    assert_eq!(config.node.address, "n1");
    assert!(config.validate().is_ok());
}

// ============================================================================
// Error tests
// ============================================================================

#[test]
fn outdated_topology_error_format() {
    let err = CacheError::outdated_topology(3, 5);
    assert_eq!(
        err.to_string(),
        "outdated topology: command topology 3, current topology 5"
    );
}

#[test]
fn topology_and_transport_errors_are_retriable() {
    assert!(CacheError::outdated_topology(1, 2).is_retriable());
    assert!(CacheError::not_primary("n1", 4).is_retriable());
    assert!(CacheError::transport("timeout").is_retriable());
    assert!(!CacheError::application("boom").is_retriable());
}

#[test]
fn contract_violations_are_fatal() {
    assert!(CacheError::missing_version(b"k").is_fatal());
    assert!(CacheError::illegal_state("twice").is_fatal());
    assert!(!CacheError::persistence("disk").is_fatal());
}

#[test]
fn classification_looks_through_suppression() {
    let err = CacheError::outdated_topology(1, 2).with_suppressed(CacheError::application("first"));
    assert!(err.is_outdated_topology());
    assert!(err.is_retriable());
    assert!(err.to_string().contains("1 suppressed"));
}

#[test]
fn missing_version_names_the_key() {
    let err = CacheError::missing_version(b"user:1");
    assert!(err.to_string().contains("user:1"));
}

// ============================================================================
// Node tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn local_node_serves_basic_operations() {
    let node = common::start_node(common::local_config(), Handle::current()).await;

    assert_eq!(node.get(key("k")).await.unwrap(), None);
    assert_eq!(node.put(key("k"), key("v1")).await.unwrap(), None);
    assert_eq!(node.put(key("k"), key("v2")).await.unwrap(), Some(key("v1")));
    assert_eq!(node.get(key("k")).await.unwrap(), Some(key("v2")));
    assert_eq!(node.remove(key("k")).await.unwrap(), Some(key("v2")));
    assert_eq!(node.get(key("k")).await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn local_node_bulk_operations() {
    let node = common::start_node(common::local_config(), Handle::current()).await;
    let stored = node
        .put_all(vec![(key("a"), key("1")), (key("b"), key("2"))])
        .await
        .unwrap();
    assert_eq!(stored, 2);

    let values = node.get_all(vec![key("b"), key("missing"), key("a")]).await.unwrap();
    assert_eq!(
        values,
        vec![
            (key("b"), Some(key("2"))),
            (key("missing"), None),
            (key("a"), Some(key("1"))),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn local_node_without_xsite_keeps_no_versions() {
    let node = common::start_node(common::local_config(), Handle::current()).await;
    node.put(key("k"), key("v")).await.unwrap();
    assert!(node.container().get(b"k").unwrap().irac.is_none());
    assert!(node.irac_queue().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_config_fails_node_start() {
    let mut config = common::local_config();
    config.clustering.num_owners = 0;
    let result = xsite_cache::node::CacheNode::builder(config, Handle::current())
        .build()
        .await;
    assert!(result.is_err());
}
