//! Instrumented cache access through `QueryLayer`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use airwave_cache::{CacheConfig, CachePolicy, LocalStore, TieredCache};
use airwave_monitor::QueryInstrumentation;
use airwave_server::{QueryLayer, ResourceKey};
use serde::{Deserialize, Serialize};

const ADS: ResourceKey = ResourceKey::new("ads");
const STREAMS: ResourceKey = ResourceKey::new("streams");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ad {
    id: u32,
    title: String,
}

fn layer() -> QueryLayer {
    QueryLayer::new(
        TieredCache::local_only(Arc::new(LocalStore::new(100))),
        Arc::new(QueryInstrumentation::new(Duration::from_millis(1000))),
        CacheConfig::default(),
    )
}

async fn active_ads(layer: &QueryLayer, calls: &AtomicUsize) -> Result<Vec<Ad>, String> {
    layer
        .fetch("ads.active", &ADS.all(), Duration::from_secs(60), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Ad {
                id: 1,
                title: "Spring sale".into(),
            }])
        })
        .await
}

#[tokio::test]
async fn fetch_measures_hits_and_misses() {
    let layer = layer();
    let calls = AtomicUsize::new(0);

    for _ in 0..3 {
        assert_eq!(active_ads(&layer, &calls).await.unwrap().len(), 1);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let stat = layer.instrumentation().stat("ads.active").unwrap();
    assert_eq!(stat.count, 3);
}

#[tokio::test]
async fn fetch_errors_are_timed_and_not_cached() {
    let layer = layer();
    let calls = AtomicUsize::new(0);
    let calls = &calls;

    for _ in 0..2 {
        let result: Result<Vec<Ad>, String> = layer
            .fetch("ads.active", &ADS.all(), Duration::from_secs(60), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("database offline".to_string())
            })
            .await;
        assert_eq!(result, Err("database offline".to_string()));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(layer.instrumentation().stat("ads.active").unwrap().count, 2);
    assert!(layer.cache().local().is_empty());
}

#[tokio::test(start_paused = true)]
async fn slow_fetch_is_flagged() {
    let layer = layer();

    let value: Result<u32, String> = layer
        .fetch("streams.current", &STREAMS.all(), CachePolicy::NoCache, || async {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            Ok(7)
        })
        .await;

    assert_eq!(value, Ok(7));
    let stat = layer.instrumentation().stat("streams.current").unwrap();
    assert_eq!(stat.slow_count, 1);
}

#[tokio::test]
async fn mutate_invalidates_keys_on_success() {
    let layer = layer();
    let calls = AtomicUsize::new(0);

    active_ads(&layer, &calls).await.unwrap();
    layer
        .cache()
        .set(&ADS.item(1), &"cached".to_string(), CachePolicy::Ttl(Duration::from_secs(60)))
        .await;
    layer
        .cache()
        .set(&STREAMS.all(), &"live".to_string(), CachePolicy::Ttl(Duration::from_secs(60)))
        .await;

    let every_ad = ADS.every();
    let updated: Result<u32, String> = layer
        .mutate("ads.update", &[every_ad.as_str()], || async { Ok(1) })
        .await;
    assert_eq!(updated, Ok(1));

    // Every ads key dropped, other entities kept
    assert!(layer.cache().local().get(&ADS.all()).is_none());
    assert!(layer.cache().local().get(&ADS.item(1)).is_none());
    assert!(layer.cache().local().get(&STREAMS.all()).is_some());

    // Next read recomputes
    active_ads(&layer, &calls).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    assert_eq!(layer.instrumentation().stat("ads.update").unwrap().count, 1);
}

#[tokio::test]
async fn mutate_single_key_and_clear_all() {
    let layer = layer();
    let ttl = CachePolicy::Ttl(Duration::from_secs(60));
    layer.cache().set(&ADS.item(1), &1u32, ttl).await;
    layer.cache().set(&ADS.item(2), &2u32, ttl).await;
    layer.cache().set(&STREAMS.all(), &3u32, ttl).await;

    let key = ADS.item(1);
    let _: Result<(), String> = layer.mutate("ads.delete", &[key.as_str()], || async { Ok(()) }).await;
    assert!(layer.cache().local().get(&ADS.item(1)).is_none());
    assert!(layer.cache().local().get(&ADS.item(2)).is_some());

    let _: Result<(), String> = layer.mutate("cache.reset", &["*"], || async { Ok(()) }).await;
    assert!(layer.cache().local().is_empty());
}

#[tokio::test]
async fn failed_mutation_keeps_cache() {
    let layer = layer();
    let calls = AtomicUsize::new(0);
    active_ads(&layer, &calls).await.unwrap();

    let all = ADS.all();
    let result: Result<(), String> = layer
        .mutate("ads.update", &[all.as_str()], || async {
            Err("constraint violation".to_string())
        })
        .await;

    assert_eq!(result, Err("constraint violation".to_string()));
    assert!(layer.cache().local().get(&ADS.all()).is_some());
    assert_eq!(layer.instrumentation().stat("ads.update").unwrap().count, 1);
}
