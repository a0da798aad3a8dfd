//! End-to-end behaviour of stale caches wired through a `CacheService`.

use futures::future::join_all;
use stale_cache::backend::InMemoryStore;
use stale_cache::factory::{from_fn, HeldValue};
use stale_cache::key::MAX_NAME_LEN;
use stale_cache::{
    CacheService, EntryState, Error, SchedulerConfig, SweepRunner, TransientStore, ValueFactory,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Factory yielding "v1", "v2", ... and counting calls.
fn versioned() -> (Arc<AtomicU32>, impl ValueFactory<String>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let factory = from_fn(move |_name: String| {
        let counter = counter.clone();
        async move { Ok(format!("v{}", counter.fetch_add(1, Ordering::SeqCst) + 1)) }
    });
    (calls, factory)
}

#[tokio::test]
async fn names_are_truncated_once() {
    let service = CacheService::new(InMemoryStore::new());
    let raw = format!("{}_overflowing_suffix", "n".repeat(MAX_NAME_LEN));
    let cache = service
        .builder::<String>(&raw)
        .build(HeldValue)
        .expect("Failed to build cache");

    assert_eq!(cache.name().as_str().chars().count(), MAX_NAME_LEN);
    assert!(service.registry().contains(&"n".repeat(MAX_NAME_LEN)));
}

#[tokio::test]
async fn write_with_reset_then_read_round_trips() {
    let service = CacheService::new(InMemoryStore::new());
    let cache = service
        .builder::<String>("notice")
        .with_timeout_seconds(60)
        .build(HeldValue)
        .expect("Failed to build cache");

    cache
        .write("maintenance at noon".to_string(), true)
        .await
        .expect("Failed to write");

    assert_eq!(
        cache.read(false).await.expect("Failed to read"),
        "maintenance at noon"
    );
}

#[tokio::test(start_paused = true)]
async fn expired_read_serves_previous_value_and_schedules_once() {
    let service = CacheService::new(InMemoryStore::new());
    let (calls, factory) = versioned();
    let cache = service
        .builder::<String>("popular_posts")
        .with_timeout_seconds(30)
        .build(factory)
        .expect("Failed to build cache");

    cache.read(false).await.expect("Failed to read");
    tokio::time::advance(Duration::from_secs(31)).await;

    assert_eq!(cache.read(false).await.expect("Failed to read"), "v1");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(service.scheduler().pending_count(), 1);
    assert_eq!(service.runner().queued_len(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_stale_reads_leave_one_pending_job() {
    let service = CacheService::new(InMemoryStore::new());
    let (calls, factory) = versioned();
    let cache = service
        .builder::<String>("popular_posts")
        .with_timeout_seconds(30)
        .build(factory)
        .expect("Failed to build cache");

    cache.read(false).await.expect("Failed to read");
    tokio::time::advance(Duration::from_secs(31)).await;

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.read(false).await })
        })
        .collect();

    for result in join_all(handles).await {
        let value = result.expect("Task panicked").expect("Failed to read");
        assert_eq!(value, "v1");
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(service.scheduler().pending_count(), 1);
    assert_eq!(service.runner().queued_len(), 1);
}

#[tokio::test(start_paused = true)]
async fn dispatch_stores_new_value_with_full_ttl_and_clears_pending() {
    let service = CacheService::new(InMemoryStore::new());
    let (_calls, factory) = versioned();
    let cache = service
        .builder::<String>("popular_posts")
        .with_timeout_seconds(30)
        .build(factory)
        .expect("Failed to build cache");

    cache.read(false).await.expect("Failed to read");
    tokio::time::advance(Duration::from_secs(31)).await;
    cache.read(false).await.expect("Failed to read");

    // The runner gives no latency bound between scheduling and dispatch.
    tokio::time::advance(Duration::from_secs(120)).await;
    assert_eq!(service.sweep().await, 1);

    let hit = service
        .store()
        .get("popular_posts")
        .await
        .expect("Failed to get")
        .expect("Entry missing");
    assert_eq!(hit.remaining_ttl, Duration::from_secs(30));
    assert!(!service.scheduler().is_pending("popular_posts"));
    assert_eq!(cache.state().await.expect("Failed to get state"), EntryState::Fresh);
    assert_eq!(cache.read(false).await.expect("Failed to read"), "v2");
}

#[tokio::test]
async fn invalidate_then_read_recomputes() {
    let service = CacheService::new(InMemoryStore::new());
    let (calls, factory) = versioned();
    let cache = service
        .builder::<String>("sidebar")
        .with_timeout_seconds(60)
        .build(factory)
        .expect("Failed to build cache");

    assert_eq!(cache.read(false).await.expect("Failed to read"), "v1");
    cache.invalidate().await.expect("Failed to invalidate");

    assert_eq!(cache.read(false).await.expect("Failed to read"), "v2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn zero_timeout_regenerates_through_the_runner() {
    let service = CacheService::new(InMemoryStore::new());
    let (_calls, factory) = versioned();
    let cache = service
        .builder::<String>("ticker")
        .with_timeout_seconds(0)
        .with_initial_value("v1".to_string())
        .build(factory)
        .expect("Failed to build cache");

    assert_eq!(cache.read(false).await.expect("Failed to read"), "v1");

    assert_eq!(cache.read(false).await.expect("Failed to read"), "v1");
    assert!(service.scheduler().is_pending("ticker"));

    service.sweep().await;

    assert_eq!(cache.read(false).await.expect("Failed to read"), "v2");
}

#[tokio::test(start_paused = true)]
async fn failed_regeneration_keeps_last_value_for_retry() {
    let service = CacheService::new(InMemoryStore::new());
    let healthy = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let flag = healthy.clone();
    let cache = service
        .builder::<String>("exchange_rates")
        .with_timeout_seconds(10)
        .build(from_fn(move |_name: String| {
            let flag = flag.clone();
            async move {
                if flag.load(Ordering::SeqCst) {
                    Ok("rates".to_string())
                } else {
                    Err(Error::FactoryError("upstream timeout".to_string()))
                }
            }
        }))
        .expect("Failed to build cache");

    cache.read(false).await.expect("Failed to read");
    healthy.store(false, Ordering::SeqCst);
    tokio::time::advance(Duration::from_secs(11)).await;

    cache.read(false).await.expect("Failed to read");
    service.sweep().await;

    // Pending is cleared and the old value survives, so the next stale read
    // serves it and schedules a retry.
    assert!(!service.scheduler().is_pending("exchange_rates"));
    assert_eq!(cache.read(false).await.expect("Failed to read"), "rates");
    assert!(service.scheduler().is_pending("exchange_rates"));

    healthy.store(true, Ordering::SeqCst);
    service.sweep().await;
    assert_eq!(cache.state().await.expect("Failed to get state"), EntryState::Fresh);
}

#[tokio::test]
async fn forced_fresh_read_surfaces_factory_errors() {
    let service = CacheService::new(InMemoryStore::new());
    let cache = service
        .builder::<String>("broken")
        .build(from_fn(|_name: String| async {
            Err::<String, _>(Error::FactoryError("no database".to_string()))
        }))
        .expect("Failed to build cache");

    let result = cache.read(true).await;
    assert_eq!(result, Err(Error::FactoryError("no database".to_string())));
}

#[tokio::test]
async fn prefix_purge_covers_both_row_conventions_only() {
    let service = CacheService::new(InMemoryStore::new());
    let store = service.store();

    store
        .set("post_list_1", vec![1], Duration::from_secs(60))
        .await
        .expect("Failed to set");
    store
        .set("post_list_2", vec![2], Duration::from_secs(60))
        .await
        .expect("Failed to set");
    store
        .set("page_list_1", vec![3], Duration::from_secs(60))
        .await
        .expect("Failed to set");
    store.insert_raw("post_list_settings", vec![4]);

    let removed = service.purge_prefix("post_list_").await.expect("Failed to purge");

    assert_eq!(removed, 4);
    assert!(!store.contains_row("_transient_post_list_1"));
    assert!(!store.contains_row("_transient_timeout_post_list_1"));
    assert!(!store.contains_row("_transient_timeout_post_list_2"));
    assert!(store.contains_row("_transient_page_list_1"));
    assert!(store.contains_row("_transient_timeout_page_list_1"));
    assert!(store.contains_row("post_list_settings"));
}

#[tokio::test]
async fn dropped_cache_jobs_are_discarded() {
    let service = CacheService::new(InMemoryStore::new());
    let (calls, factory) = versioned();
    let cache = service
        .builder::<String>("short_lived")
        .build(factory)
        .expect("Failed to build cache");

    cache.read(false).await.expect("Failed to read");
    cache.read(false).await.expect("Failed to read");
    assert!(service.scheduler().is_pending("short_lived"));

    drop(cache);
    service.sweep().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!service.scheduler().is_pending("short_lived"));
    assert!(!service.registry().contains("short_lived"));
}

#[tokio::test(start_paused = true)]
async fn reserved_names_cannot_alias_expiry_rows() {
    let service = CacheService::new(InMemoryStore::new());
    let (_calls, factory) = versioned();
    let foo = service
        .builder::<String>("foo")
        .with_timeout_seconds(10)
        .build(factory)
        .expect("Failed to build cache");

    let alias = service.builder::<String>("timeout_foo").build(HeldValue);
    assert!(matches!(alias, Err(Error::ConfigError(_))));

    foo.read(false).await.expect("Failed to read");
    tokio::time::advance(Duration::from_secs(20)).await;
    assert_eq!(foo.state().await.expect("Failed to get state"), EntryState::Expired);

    // Prefix purges only ever see expiry rows under the timeout convention.
    assert_eq!(service.purge_prefix("foo").await.expect("Failed to purge"), 2);
    assert_eq!(foo.state().await.expect("Failed to get state"), EntryState::Absent);
}

#[tokio::test(start_paused = true)]
async fn services_sharing_one_runner_regenerate_their_own_caches() {
    let runner = Arc::new(SweepRunner::new());
    let first =
        CacheService::with_runner(InMemoryStore::new(), runner.clone(), SchedulerConfig::default());
    let second =
        CacheService::with_runner(InMemoryStore::new(), runner.clone(), SchedulerConfig::default());

    let (first_calls, first_factory) = versioned();
    let (second_calls, second_factory) = versioned();
    let headlines = first
        .builder::<String>("headlines")
        .with_timeout_seconds(10)
        .build(first_factory)
        .expect("Failed to build cache");
    let weather = second
        .builder::<String>("weather")
        .with_timeout_seconds(10)
        .build(second_factory)
        .expect("Failed to build cache");

    headlines.read(false).await.expect("Failed to read");
    weather.read(false).await.expect("Failed to read");
    tokio::time::advance(Duration::from_secs(11)).await;
    headlines.read(false).await.expect("Failed to read");
    weather.read(false).await.expect("Failed to read");

    assert_eq!(runner.sweep().await, 2);

    assert_eq!(first_calls.load(Ordering::SeqCst), 2);
    assert_eq!(second_calls.load(Ordering::SeqCst), 2);
    assert!(!first.scheduler().is_pending("headlines"));
    assert!(!second.scheduler().is_pending("weather"));
    assert_eq!(headlines.read(false).await.expect("Failed to read"), "v2");
    assert_eq!(weather.read(false).await.expect("Failed to read"), "v2");
}
