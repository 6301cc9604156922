use registry::{
    load_from_system_config, resolve_access_gate, resolve_datasync, BootstrapError, MeteringPointQuery,
    SystemConfigLoader, DEFAULT_LIMIT,
};

#[test]
fn bootstrap_defaults_to_sqlite_and_memory_bus() {
    let config = SystemConfigLoader::from_str(
        r#"
        [storage]
        sqlite_path = ":memory:"
        "#,
    )
    .expect("config");
    let bundle = load_from_system_config(&config).expect("bundle");
    assert!(bundle.bus.audit.list().is_empty());
    assert!(!bundle.bus.shared);
    assert_eq!(bundle.workers, 4);
    assert_eq!(bundle.default_limit, DEFAULT_LIMIT);
    let page = bundle.store.query(&MeteringPointQuery::new()).expect("query");
    assert_eq!(page.total, 0);
}

#[test]
fn memory_dsn_selects_in_memory_store() {
    let config = SystemConfigLoader::from_str(
        r#"
        [storage]
        dsn = "memory:"
        [query]
        default_limit = 500
        "#,
    )
    .expect("config");
    let bundle = load_from_system_config(&config).expect("bundle");
    assert_eq!(bundle.default_limit, DEFAULT_LIMIT);
    assert_eq!(bundle.store.query(&MeteringPointQuery::new()).expect("query").total, 0);
}

#[test]
fn access_gate_requires_secret() {
    let config = SystemConfigLoader::from_str("").expect("config");
    match resolve_access_gate(&config) {
        Err(BootstrapError::Missing(key)) => assert_eq!(key, "security.token_secret"),
        _ => panic!("expected missing secret"),
    }
    let config = SystemConfigLoader::from_str("[security]\ntoken_secret = \"s3cret\"\n").expect("config");
    assert!(resolve_access_gate(&config).is_ok());
}

#[test]
fn datasync_client_builds_from_config() {
    let config = SystemConfigLoader::from_str(
        r#"
        [datasync]
        base_url = "http://datasync.local/api"
        timeout_ms = 250
        "#,
    )
    .expect("config");
    assert!(resolve_datasync(&config).is_ok());
}
