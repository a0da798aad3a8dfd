//! Basic usage example of the stale cache.

use serde::{Deserialize, Serialize};
use stale_cache::{
    backend::InMemoryStore, error::Result, factory, CacheConfig, CacheService, QueryCache,
    RecordEvent, RecordQuery,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Example value: a front page headline list
#[derive(Clone, Serialize, Deserialize, Debug)]
struct Headline {
    id: u64,
    title: String,
}

/// Mock query that simulates an expensive database read
struct HeadlineQuery {
    edition: Arc<AtomicU32>,
}

impl HeadlineQuery {
    async fn load(&self) -> Result<Vec<Headline>> {
        let edition = self.edition.fetch_add(1, Ordering::SeqCst) + 1;
        println!("  [DB] Loading headlines (edition {})", edition);
        tokio::time::sleep(Duration::from_millis(50)).await;

        Ok(vec![
            Headline {
                id: 1,
                title: format!("Edition {}: Rust 2024 lands", edition),
            },
            Headline {
                id: 2,
                title: format!("Edition {}: Caches that never block", edition),
            },
        ])
    }
}

/// Mock per-post query for the derived cache
struct CommentCount;

impl RecordQuery<u32> for CommentCount {
    async fn fetch(&self, id: &str) -> Result<u32> {
        println!("  [DB] Counting comments for post {}", id);
        Ok(id.len() as u32 * 3)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .try_init()
        .ok();

    println!("\n=== Stale Cache - Basic Example ===\n");

    // 1. Wire the store, runner and registry
    println!("1. Initializing in-memory store and sweep runner...");
    let service = CacheService::new(InMemoryStore::new());
    let query = Arc::new(HeadlineQuery {
        edition: Arc::new(AtomicU32::new(0)),
    });

    let loader = query.clone();
    let headlines = service
        .builder::<Vec<Headline>>("front_page_headlines")
        .with_timeout_seconds(1)
        .build(factory::from_fn(move |_name: String| {
            let loader = loader.clone();
            async move { loader.load().await }
        }))?;
    println!("   ✓ Cache {} activated\n", headlines.name());

    // 2. First read - nothing stored, computed synchronously
    println!("2. First read:");
    let page = headlines.read(false).await?;
    println!("   ✓ {}\n", page[0].title);

    // 3. Second read - served from the store
    println!("3. Second read (entry is fresh):");
    let page = headlines.read(false).await?;
    println!("   ✓ {} [{}]\n", page[0].title, headlines.state().await?);

    // 4. Past the TTL - the old value is returned at once
    println!("4. Read after expiry:");
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let page = headlines.read(false).await?;
    println!(
        "   ✓ Served stale: {} [{}]\n",
        page[0].title,
        headlines.state().await?
    );

    // 5. The host tick runs the pending regeneration
    println!("5. Sweeping deferred jobs:");
    let ran = service.sweep().await;
    let page = headlines.read(false).await?;
    println!("   ✓ {} job(s) ran, now serving: {}\n", ran, page[0].title);

    // 6. Invalidate - the next read recomputes
    println!("6. Invalidate:");
    headlines.invalidate().await?;
    let page = headlines.read(false).await?;
    println!("   ✓ Recomputed: {}\n", page[0].title);

    // 7. Derived per-record cache bound to record events
    println!("7. Query cache bound to post events:");
    let comments: Arc<QueryCache<u32, InMemoryStore, CommentCount>> = QueryCache::new(
        &service,
        "comment_count_%s",
        "post",
        CacheConfig::new("").with_timeout_seconds(600),
        CommentCount,
    )?;
    let count = comments.get("hello-world", false).await?;
    println!("   ✓ hello-world has {} comments", count);

    service
        .publish(RecordEvent::saved("post", "hello-world"))
        .await?;
    println!("   ✓ Saved event recomputed the entry");

    service
        .publish(RecordEvent::deleted("post", "hello-world"))
        .await?;
    println!(
        "   ✓ Deleted event retired the entry ({} cache(s) tracked)\n",
        comments.tracked()
    );

    // 8. Administrative purge
    println!("8. Purging all stale cache rows:");
    let removed = service.purge_all().await?;
    println!("   ✓ Removed {} row(s)\n", removed);

    println!("=== Example Complete ===\n");

    Ok(())
}
