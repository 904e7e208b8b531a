mod common;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use common::{flaky_manager, manager_with, FlakyStore};
use workshop_cache::cache::{
    CacheConfig, CacheConfigPatch, ConfigStore, CacheManager, CacheSource, ClearScope, GetOptions, InProcessSources,
    ManagerSettings, PersistentTier, SetOptions, SourceRecord, TierOutcome,
};
use workshop_cache::storage::InProcessStore;

#[tokio::test]
async fn test_set_then_get_until_expiry() {
    let (manager, _) = flaky_manager(100);
    let shirt = json!({ "name": "Shirt" });

    manager
        .set_json("products:42", &shirt, SetOptions::default().ttl(Duration::from_millis(50)))
        .await
        .unwrap();

    let hit = manager
        .get("products:42", GetOptions::default())
        .await
        .unwrap()
        .expect("fresh entry should hit");
    assert_eq!(hit.source, CacheSource::Memory);
    assert_eq!(serde_json::from_slice::<serde_json::Value>(&hit.value).unwrap(), shirt);

    tokio::time::sleep(Duration::from_millis(80)).await;

    // No sweep has run; both tiers still hold the rows.
    assert!(manager.get("products:42", GetOptions::default()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_fifo_eviction_ignores_reads() {
    let (manager, _) = flaky_manager(2);

    manager.set("a", "1", SetOptions::default()).await.unwrap();
    manager.set("b", "2", SetOptions::default()).await.unwrap();
    // Reading `a` does not protect it: eviction is by insertion order.
    assert!(manager.get("a", GetOptions::memory_only()).await.unwrap().is_some());
    manager.set("c", "3", SetOptions::default()).await.unwrap();

    assert!(manager.get("a", GetOptions::memory_only()).await.unwrap().is_none());
    assert!(manager.get("b", GetOptions::memory_only()).await.unwrap().is_some());
    assert_eq!(manager.keys(), vec!["b".to_string(), "c".to_string()]);

    // The durable tier still serves the evicted key and promotes it.
    let hit = manager.get("a", GetOptions::default()).await.unwrap().unwrap();
    assert_eq!(hit.source, CacheSource::Durable);
    assert!(manager.contains("a"));
}

#[tokio::test]
async fn test_capacity_bound_holds() {
    let (manager, _) = flaky_manager(5);
    for i in 0..50 {
        manager
            .set(&format!("k{}", i), "v", SetOptions::default().memory_only())
            .await
            .unwrap();
        assert!(manager.memory().len() <= 5);
    }
    assert_eq!(manager.get_stats().await.memory.evictions, 45);
}

#[tokio::test]
async fn test_tag_invalidation_counts_each_key_once() {
    let (manager, store) = flaky_manager(100);
    let tagged = SetOptions::default().tags(["factories"]);

    manager.set("f:1", "v", tagged.clone()).await.unwrap();
    manager.set("f:2", "v", tagged).await.unwrap();
    manager.set("p:1", "v", SetOptions::default().tags(["products"])).await.unwrap();

    let outcome = manager.invalidate(&["factories".to_string()], &[]).await.unwrap();
    assert_eq!(outcome.count, 2);
    assert_eq!(outcome.durable, TierOutcome::Applied);

    assert!(manager.get("f:1", GetOptions::default()).await.unwrap().is_none());
    assert!(manager.get("f:2", GetOptions::default()).await.unwrap().is_none());
    assert!(store.inner().raw("f:1").is_none());
    assert!(manager.get("p:1", GetOptions::default()).await.unwrap().is_some());

    let again = manager.invalidate(&["factories".to_string()], &[]).await.unwrap();
    assert_eq!(again.count, 0);
}

#[tokio::test]
async fn test_invalidate_wins_over_in_flight_durable_read() {
    let (manager, store) = flaky_manager(100);
    let manager = Arc::new(manager);
    manager
        .set("f:1", "v", SetOptions::default().tags(["factories"]).durable_only())
        .await
        .unwrap();
    store.set_read_delay(Duration::from_millis(80));

    let reader = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.get("f:1", GetOptions::default()).await })
    };
    // Let the read fetch the row before invalidating.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let outcome = manager.invalidate(&["factories".to_string()], &[]).await.unwrap();
    assert_eq!(outcome.count, 1);

    // The overlapping read may still answer with what it fetched, but must not
    // leave the invalidated entry behind in memory.
    reader.await.unwrap().unwrap();
    store.set_read_delay(Duration::ZERO);
    assert!(!manager.contains("f:1"));
    assert!(manager.get("f:1", GetOptions::default()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_wins_over_in_flight_durable_read() {
    let (manager, store) = flaky_manager(100);
    let manager = Arc::new(manager);
    manager
        .set("o:1", "v", SetOptions::default().durable_only())
        .await
        .unwrap();
    store.set_read_delay(Duration::from_millis(80));

    let reader = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.get("o:1", GetOptions::default()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(manager.delete("o:1").await.unwrap().count, 1);

    reader.await.unwrap().unwrap();
    assert!(!manager.contains("o:1"));
}

#[tokio::test]
async fn test_invalidate_adds_tag_and_key_counts() {
    let (manager, _) = flaky_manager(100);
    manager
        .set("f:1", "v", SetOptions::default().tags(["factories"]))
        .await
        .unwrap();
    manager.set("o:1", "v", SetOptions::default()).await.unwrap();

    let outcome = manager
        .invalidate(
            &["factories".to_string()],
            &["o:1".to_string(), "missing".to_string()],
        )
        .await
        .unwrap();
    assert_eq!(outcome.count, 2);
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let (manager, _) = flaky_manager(100);
    manager.set("k", "v", SetOptions::default()).await.unwrap();

    assert!(manager.delete("k").await.unwrap().found());
    assert!(!manager.delete("k").await.unwrap().found());
}

#[tokio::test]
async fn test_delete_by_pattern_matches_keys_only() {
    let (manager, _) = flaky_manager(100);
    manager.set("products:1", "v", SetOptions::default()).await.unwrap();
    manager.set("products:2", "v", SetOptions::default().memory_only()).await.unwrap();
    manager
        .set("orders:1", "products", SetOptions::default().tags(["products"]))
        .await
        .unwrap();

    let outcome = manager.delete_by_pattern("^products:").await.unwrap();
    assert_eq!(outcome.count, 2);
    assert!(manager.contains("orders:1"));

    let err = manager.delete_by_pattern("([").await.unwrap_err();
    assert_eq!(err.code(), "INVALID_ARGUMENT");
}

#[tokio::test]
async fn test_durable_fallback_with_memory_disabled() {
    let (manager, _) = flaky_manager(100);
    manager.set("k", "durable value", SetOptions::default()).await.unwrap();

    let hit = manager.get("k", GetOptions::durable_only()).await.unwrap().unwrap();
    assert_eq!(hit.source, CacheSource::Durable);
    assert_eq!(&hit.value[..], b"durable value");
}

#[tokio::test]
async fn test_degrades_to_memory_when_durable_fails() {
    let (manager, store) = flaky_manager(100);
    store.set_failing(true);

    let ack = manager.set("k", "v", SetOptions::default()).await.unwrap();
    assert_eq!(ack.memory, TierOutcome::Applied);
    assert!(ack.durable.is_failed());

    let hit = manager.get("k", GetOptions::default()).await.unwrap().unwrap();
    assert_eq!(hit.source, CacheSource::Memory);
    // A miss under a broken durable tier is still a miss, not an error.
    assert!(manager.get("other", GetOptions::default()).await.unwrap().is_none());

    let outcome = manager.delete("k").await.unwrap();
    assert_eq!(outcome.count, 1);
    assert!(outcome.durable.is_failed());
}

#[tokio::test]
async fn test_no_viable_tier_is_an_error() {
    let (manager, store) = flaky_manager(100);
    store.set_failing(true);

    let err = manager
        .get("k", GetOptions::durable_only())
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let err = manager
        .set("k", "v", SetOptions::default().durable_only())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TIER_UNAVAILABLE");

    let none = GetOptions {
        use_memory: false,
        use_durable: false,
    };
    assert!(manager.get("k", none).await.is_err());
}

#[tokio::test]
async fn test_hanging_durable_tier_times_out() {
    let (manager, store) = flaky_manager(100);
    store.set_hanging(true);

    let started = std::time::Instant::now();
    let ack = manager.set("k", "v", SetOptions::default()).await.unwrap();
    assert!(ack.durable.is_failed());
    assert!(started.elapsed() < Duration::from_secs(2));

    let err = manager.get("missing", GetOptions::durable_only()).await.unwrap_err();
    assert_eq!(err.code(), "TIMEOUT");
}

#[tokio::test]
async fn test_clear_scopes() {
    let store = Arc::new(InProcessStore::new());
    let manager = manager_with(store.clone(), 100);
    for key in ["a", "b"] {
        manager.set(key, "v", SetOptions::default()).await.unwrap();
    }

    let memory = manager.clear(ClearScope::Memory).await.unwrap();
    assert_eq!(memory.count, 2);
    assert_eq!(memory.durable, TierOutcome::Skipped);
    assert_eq!(store.len(), 2);

    let all = manager.clear(ClearScope::All).await.unwrap();
    assert_eq!(all.count, 2);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_clear_durable_without_store_fails() {
    let manager = CacheManager::new(ManagerSettings::default(), None);
    let err = manager.clear(ClearScope::Durable).await.unwrap_err();
    assert_eq!(err.code(), "TIER_UNAVAILABLE");
    assert!(manager.clear(ClearScope::All).await.is_ok());
}

#[tokio::test]
async fn test_stats_snapshot() {
    let (manager, _) = flaky_manager(10);
    manager.set("products:1", "v", SetOptions::default()).await.unwrap();
    manager.get("products:1", GetOptions::default()).await.unwrap();
    manager.get("products:2", GetOptions::default()).await.unwrap();
    manager.shutdown().await;

    let stats = manager.get_stats().await;
    assert_eq!(stats.memory.size, 1);
    assert_eq!(stats.memory.max_size, 10);
    assert!((stats.memory.usage_pct - 10.0).abs() < 1e-9);
    assert!(stats.durable.available);
    assert_eq!(stats.durable.total, 1);
    assert_eq!(stats.durable.active, 1);
    assert_eq!(stats.durable.hits, 1);
    assert_eq!(stats.durable.misses, 1);
    assert!((stats.durable.hit_rate - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_tenant_config_controls_writes() {
    let (manager, _) = flaky_manager(10);
    let patch = CacheConfigPatch {
        default_ttl: Some(60_000),
        enable_durable_tier: Some(false),
        max_memory_entries: Some(3),
        ..Default::default()
    };
    let updated = manager.update_cache_config("org-1", &patch).await.unwrap();
    assert_eq!(updated.default_ttl, Duration::from_secs(60));
    assert_eq!(manager.memory().capacity(), 3);

    let ack = manager
        .set("k", "v", SetOptions::default().tenant("org-1"))
        .await
        .unwrap();
    assert_eq!(ack.ttl, Duration::from_secs(60));
    assert_eq!(ack.durable, TierOutcome::Skipped);

    let config = manager.get_cache_config(Some("org-1")).await;
    assert!(!config.enable_durable_tier);
    // Other tenants keep the defaults.
    assert!(manager.get_cache_config(Some("org-2")).await.enable_durable_tier);
}

#[tokio::test]
async fn test_failed_config_load_falls_back_without_retrying_each_call() {
    let store = Arc::new(FlakyStore::new());
    let configs = ConfigStore::new(store.clone(), CacheConfig::default(), Duration::from_millis(100));
    store.set_hanging(true);

    let started = tokio::time::Instant::now();
    assert_eq!(configs.get(Some("org-1")).await, CacheConfig::default());
    assert!(started.elapsed() >= Duration::from_millis(100));

    // The fallback is remembered, so the next reads do not wait on the tier again.
    let started = tokio::time::Instant::now();
    for _ in 0..5 {
        assert_eq!(configs.get(Some("org-1")).await, CacheConfig::default());
    }
    assert!(started.elapsed() < Duration::from_millis(100));
}

fn seeded_sources() -> Arc<InProcessSources> {
    let sources = InProcessSources::new();
    for (id, tenant, active) in [("1", "org-1", true), ("2", "org-1", false), ("3", "org-2", true)] {
        sources.insert(
            "products",
            SourceRecord {
                id: id.to_string(),
                tenant: Some(tenant.to_string()),
                active,
                value: json!({ "id": id }),
            },
        );
    }
    Arc::new(sources)
}

#[tokio::test]
async fn test_warmup_keys_and_namespaces() {
    let store = Arc::new(FlakyStore::new());
    let manager = manager_with(store.clone(), 100).with_sources(seeded_sources());

    manager.set("orders:9", "v", SetOptions::default().durable_only()).await.unwrap();
    assert!(!manager.contains("orders:9"));

    let warmed = manager
        .warmup(&["orders:9".to_string(), "nope".to_string()], &["products".to_string()])
        .await
        .unwrap();
    assert_eq!(warmed, 3);
    assert!(manager.contains("orders:9"));
    assert!(manager.contains("products:1"));
    assert!(manager.contains("products:3"));
    assert!(!manager.contains("products:2"));
    // Namespace warmup is memory only.
    assert!(store.inner().raw("products:1").is_none());
}

#[tokio::test]
async fn test_preload_writes_both_tiers_with_tenant_tags() {
    let store = Arc::new(FlakyStore::new());
    let manager = manager_with(store.clone(), 100).with_sources(seeded_sources());

    let preloaded = manager
        .preload("org-1", &["products".to_string(), "factories".to_string()])
        .await
        .unwrap();
    assert_eq!(preloaded, 1);

    let row = store.inner().raw("products:1").unwrap();
    assert!(row.has_tag("products"));
    assert!(row.has_tag("org-1"));
    assert_eq!(row.owner.as_deref(), Some("org-1"));
    assert!(manager.contains("products:1"));

    let removed = manager.invalidate(&["org-1".to_string()], &[]).await.unwrap();
    assert_eq!(removed.count, 1);
    assert!(store.inner().get("products:1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_preload_without_sources_is_configuration_error() {
    let (manager, _) = flaky_manager(10);
    let err = manager.preload("org-1", &["products".to_string()]).await.unwrap_err();
    assert_eq!(err.code(), "CONFIGURATION");
}

#[tokio::test]
async fn test_concurrent_writers_respect_capacity() {
    let (manager, _) = flaky_manager(16);
    let manager = Arc::new(manager);

    let writers = (0..8).map(|writer| {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            for i in 0..50 {
                let key = format!("w{}:{}", writer, i);
                manager.set(&key, "v", SetOptions::default()).await.unwrap();
                manager.get(&key, GetOptions::memory_only()).await.unwrap();
            }
        })
    });

    for result in futures::future::join_all(writers).await {
        tokio_test::assert_ok!(result);
    }
    assert_eq!(manager.memory().len(), 16);
}
