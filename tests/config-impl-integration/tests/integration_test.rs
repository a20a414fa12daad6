//! 配置中心端到端测试
use config_abstractions::{ChangeSet, ConfigSource};
use config_impl::{
    ConfigStore, EnvSource, FileSource, InMemoryKvClient, KvOptions, KvSource, MemorySource,
    StoreOptions,
};
use infrastructure_common::ConfigError;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(10);

fn memory(json: &str) -> Arc<dyn ConfigSource> {
    Arc::new(MemorySource::with_json(json))
}

/// 通过监听器等待直到条件成立
async fn wait_until<F>(store: &ConfigStore, mut condition: F)
where
    F: FnMut(&ConfigStore) -> bool,
{
    let watcher = store.watch().unwrap();
    tokio::time::timeout(WAIT, async {
        while !condition(store) {
            watcher.next().await.unwrap();
        }
    })
    .await
    .expect("等待配置更新超时");
}

#[tokio::test]
async fn test_later_source_overrides_earlier() {
    let store = ConfigStore::default();
    store
        .load(vec![memory(r#"{"a": 1, "b": 2}"#), memory(r#"{"a": 9}"#)])
        .await
        .unwrap();

    assert_eq!(store.get(&["a"]).int(0), 9);
    assert_eq!(store.get(&["b"]).int(0), 2);
    assert_eq!(store.bytes(), br#"{"a":9,"b":2}"#);
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_missing_path_returns_default() {
    let store = ConfigStore::default();
    store.load(vec![memory(r#"{"a": 1}"#)]).await.unwrap();

    assert_eq!(store.get(&["nonexistent"]).string("fallback"), "fallback");
    assert_eq!(store.get(&["a", "deeper"]).int(42), 42);
    assert!(!store.get(&["nonexistent"]).exists());
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_load_missing_file_names_path() {
    let store = ConfigStore::default();
    let source: Arc<dyn ConfigSource> =
        Arc::new(FileSource::new().with_path("/i/do/not/exists.json"));

    let err = store.load(vec![source]).await.unwrap_err();
    assert!(matches!(err, ConfigError::SourceReadError { .. }));
    assert!(err.to_string().contains("/i/do/not/exists.json"));
    assert_eq!(store.source_count(), 0);
}

#[tokio::test]
async fn test_hundred_sources_loaded_one_by_one() {
    let store = ConfigStore::default();
    for i in 0..100 {
        store
            .load(vec![memory(&format!(r#"{{"key{i}": "val{i}"}}"#))])
            .await
            .unwrap();
    }

    assert_eq!(store.source_count(), 100);
    for i in 0..100 {
        assert_eq!(
            store.get(&[format!("key{i}").as_str()]).string(""),
            format!("val{i}")
        );
    }
    store.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_are_all_kept() {
    const N: usize = 50;
    let store = ConfigStore::default();
    let sources: Vec<Arc<MemorySource>> = (0..N)
        .map(|i| Arc::new(MemorySource::with_json(format!(r#"{{"key{i}": "initial"}}"#))))
        .collect();
    store
        .load(
            sources
                .iter()
                .map(|s| Arc::clone(s) as Arc<dyn ConfigSource>)
                .collect(),
        )
        .await
        .unwrap();

    let handles: Vec<_> = sources
        .iter()
        .enumerate()
        .map(|(i, source)| {
            let source = Arc::clone(source);
            tokio::spawn(async move {
                source.update_json(format!(r#"{{"key{i}": "updated{i}"}}"#));
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    wait_until(&store, |s| {
        (0..N).all(|i| s.get(&[format!("key{i}").as_str()]).string("") == format!("updated{i}"))
    })
    .await;

    let map = store.map();
    assert_eq!(map.len(), N);
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_watcher_versions_strictly_increase() {
    let store = ConfigStore::default();
    let source = Arc::new(MemorySource::with_json(r#"{"n": 0}"#));
    store.load(vec![source.clone()]).await.unwrap();
    let watcher = store.watch().unwrap();

    let updater = {
        let source = Arc::clone(&source);
        tokio::spawn(async move {
            for n in 1..=20 {
                source.update_json(format!(r#"{{"n": {n}}}"#));
                tokio::task::yield_now().await;
            }
        })
    };

    let mut last = store.version();
    let mut seen = Vec::new();
    tokio::time::timeout(WAIT, async {
        loop {
            let snapshot = watcher.next().await.unwrap();
            assert!(snapshot.version() > last, "版本号必须严格递增");
            last = snapshot.version();
            seen.push(snapshot.version());
            if snapshot.get(&["n"]).int(-1) == 20 {
                break;
            }
        }
    })
    .await
    .expect("等待最终版本超时");

    updater.await.unwrap();
    assert!(!seen.is_empty());
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_environment_overlays_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.json");
    std::fs::write(
        &path,
        r#"{"amqp": {"host": "rabbit.platform", "port": 80}, "handler": {"exchange": "springCloudBus"}}"#,
    )
    .unwrap();
    std::env::set_var("AMQP_HOST", "rabbit.testing.com");

    let store = ConfigStore::default();
    store
        .load(vec![
            Arc::new(FileSource::new().with_path(&path)),
            Arc::new(EnvSource::new().with_prefix("AMQP")),
        ])
        .await
        .unwrap();

    assert_eq!(store.get(&["amqp", "host"]).string(""), "rabbit.testing.com");
    assert_eq!(store.get(&["amqp", "port"]).int(0), 80);
    assert_eq!(
        store.get(&["handler", "exchange"]).string(""),
        "springCloudBus"
    );
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_full_environment_overlays_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.json");
    std::fs::write(
        &path,
        r#"{"amqp": {"host": "rabbit.platform", "port": 80}, "handler": {"exchange": "springCloudBus"}}"#,
    )
    .unwrap();
    std::env::set_var("AMQP_HOST", "rabbit.testing.com");

    let store = ConfigStore::default();
    store
        .load(vec![
            Arc::new(FileSource::new().with_path(&path)),
            Arc::new(EnvSource::new()),
        ])
        .await
        .unwrap();

    assert_eq!(store.get(&["amqp", "host"]).string(""), "rabbit.testing.com");
    assert_eq!(store.get(&["amqp", "port"]).int(0), 80);
    assert_eq!(
        store.get(&["handler", "exchange"]).string(""),
        "springCloudBus"
    );
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_file_change_is_published() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("live.yaml");
    std::fs::write(&path, "server:\n  port: 80\n").unwrap();

    let store = ConfigStore::default();
    let source = FileSource::new()
        .with_path(&path)
        .with_debounce_delay(Duration::from_millis(20));
    store.load(vec![Arc::new(source)]).await.unwrap();
    assert_eq!(store.get(&["server", "port"]).int(0), 80);

    std::fs::write(&path, "server:\n  port: 8080\n").unwrap();
    wait_until(&store, |s| s.get(&["server", "port"]).int(0) == 8080).await;
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_close_unblocks_pending_next() {
    let store = ConfigStore::default();
    store.load(vec![memory(r#"{"a": 1}"#)]).await.unwrap();
    let watcher = store.watch().unwrap();

    let pending = tokio::spawn(async move { watcher.next().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    store.close().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .expect("关闭后 next 未能及时返回")
        .unwrap();
    assert!(matches!(result, Err(ConfigError::Closed)));

    // 关闭后仍可读取最后发布的快照
    assert_eq!(store.get(&["a"]).int(0), 1);
}

#[tokio::test]
async fn test_kv_prefix_strip_and_watch() {
    let client = Arc::new(InMemoryKvClient::new());
    client.set("/hipaas/config/database/host", "\"db.internal\"");
    client.set("/hipaas/config/database/port", "5432");
    client.set("/unrelated/key", "\"ignored\"");

    let store = ConfigStore::default();
    let source = KvSource::new(client.clone(), KvOptions::new().with_strip_prefix());
    store.load(vec![Arc::new(source)]).await.unwrap();

    assert_eq!(store.get(&["database", "host"]).string(""), "db.internal");
    assert_eq!(store.get(&["database", "port"]).int(0), 5432);
    assert!(!store.get(&["unrelated"]).exists());

    client.set("/hipaas/config/database/port", "6432");
    wait_until(&store, |s| s.get(&["database", "port"]).int(0) == 6432).await;
    store.close().await.unwrap();
}

#[derive(Debug, Default, Deserialize, PartialEq)]
struct Database {
    host: String,
    port: u16,
}

#[derive(Debug, Deserialize)]
struct AppConfig {
    database: Database,
    #[serde(default)]
    features: Vec<String>,
}

#[tokio::test]
async fn test_sync_and_scan() -> anyhow::Result<()> {
    let source = Arc::new(MemorySource::new());
    let store = ConfigStore::new(StoreOptions::new());
    store.load(vec![source.clone()]).await?;

    source.update(ChangeSet::new(
        "database:\n  host: localhost\n  port: 5432\nfeatures: [a, b]\n",
        "yaml",
        "memory",
    ));
    store.sync().await?;

    let config: AppConfig = store.scan()?;
    assert_eq!(config.database.host, "localhost");
    assert_eq!(config.features, vec!["a", "b"]);

    let database: Database = store.get(&["database"]).scan()?;
    assert_eq!(database.port, 5432);
    let missing: Database = store.get(&["nothing"]).scan()?;
    assert_eq!(missing, Database::default());

    let err = store.get(&["features"]).scan::<Database>().unwrap_err();
    assert!(matches!(err, ConfigError::DecodeError { .. }));

    store.close().await?;
    Ok(())
}
