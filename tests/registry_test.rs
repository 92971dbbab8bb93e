//! Device registry integration tests
//!
//! Refresh coalescing, listener ordering and exclusive view isolation,
//! checked against an instrumented fake provider that delays its answers.

use crabcapture::testing::FakeProvider;
use crabcapture::types::DeviceEvent;
use crabcapture::{CapabilitySnapshot, DeviceRegistry, EnumerationError, Facing, Resolution};
use futures::future::join_all;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn camera(id: &str) -> CapabilitySnapshot {
    CapabilitySnapshot::new(
        id,
        Facing::External,
        vec![Resolution::new(1920, 1080)],
        vec![(Resolution::new(1280, 720), 30)],
        vec![],
    )
}

#[tokio::test]
async fn test_concurrent_refreshes_coalesce() {
    let provider = Arc::new(FakeProvider::with_devices(vec![camera("a")]));
    let registry = DeviceRegistry::new(provider.clone()).await;
    assert_eq!(provider.enumerate_calls(), 1);

    provider.set_enumerate_delay(Duration::from_millis(30));
    let results = join_all((0..5).map(|_| registry.refresh())).await;

    assert!(results.iter().all(|r| r.is_ok()));
    // initial refresh, the one the first caller runs, and a single follow-up
    // shared by everyone queued behind it
    assert_eq!(provider.enumerate_calls(), 3);
    assert!(provider.max_active_queries() <= 1);
}

#[tokio::test]
async fn test_followers_share_failed_outcome() {
    let provider = Arc::new(FakeProvider::with_devices(vec![camera("a")]));
    let registry = DeviceRegistry::new(provider.clone()).await;

    provider.set_enumerate_delay(Duration::from_millis(20));
    provider.fail_enumeration(Some(EnumerationError::EnumerateFailed(
        "backend offline".to_string(),
    )));
    let results = join_all((0..3).map(|_| registry.refresh())).await;

    assert!(results
        .iter()
        .all(|r| matches!(r, Err(EnumerationError::EnumerateFailed(_)))));
    assert_eq!(registry.snapshots().unwrap().generation, 1);
}

#[tokio::test]
async fn test_listeners_see_increasing_generations() {
    let provider = Arc::new(FakeProvider::with_devices(vec![camera("a")]));
    let registry = DeviceRegistry::new(provider.clone()).await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    registry.on_device_change(move |set| sink.lock().unwrap().push(set.generation));

    provider.set_query_delay(Duration::from_millis(5));
    for round in 0..4 {
        provider.add_device(camera(&format!("cam{}", round)));
        join_all((0..3).map(|_| registry.refresh())).await;
    }

    let seen = seen.lock().unwrap().clone();
    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "{:?}", seen);
}

#[tokio::test]
async fn test_hot_plug_diff() {
    let provider = Arc::new(FakeProvider::with_devices(vec![camera("a"), camera("b")]));
    let registry = DeviceRegistry::new(provider.clone()).await;

    provider.remove_device("a");
    provider.add_device(camera("c"));
    registry.refresh().await.unwrap();

    let set = registry.snapshots().unwrap();
    assert_eq!(set.generation, 2);
    assert_eq!(set.device_ids(), vec!["b".to_string(), "c".to_string()]);
    assert_eq!(
        set.changes,
        vec![
            DeviceEvent::Disconnected("a".to_string()),
            DeviceEvent::Connected("c".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_exclusive_view_drains_pending_refresh() {
    let provider = Arc::new(FakeProvider::with_devices(vec![camera("a")]));
    let registry = DeviceRegistry::new(provider.clone()).await;

    provider.add_device(camera("b"));
    provider.set_enumerate_delay(Duration::from_millis(20));
    registry.notify_device_change();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let view = registry.lock_exclusive().await.unwrap();
    assert!(view.get("b").is_some());
    assert_eq!(view.devices().len(), 2);
}

#[tokio::test]
async fn test_exclusive_view_blocks_refreshes() {
    let provider = Arc::new(FakeProvider::with_devices(vec![camera("a"), camera("b")]));
    let registry = DeviceRegistry::new(provider.clone()).await;
    provider.set_query_delay(Duration::from_millis(3));

    let refresher = {
        let registry = registry.clone();
        let provider = provider.clone();
        tokio::spawn(async move {
            for i in 0..20 {
                if i % 2 == 0 {
                    provider.add_device(camera(&format!("hot{}", i)));
                } else {
                    provider.remove_device(&format!("hot{}", i - 1));
                }
                registry.notify_device_change();
                let _ = registry.refresh().await;
            }
        })
    };

    let views = (0..8).map(|_| {
        let registry = registry.clone();
        let provider = provider.clone();
        async move {
            let view = registry.lock_exclusive().await.unwrap();
            let generation = view.generation();
            let ids: Vec<String> = view.snapshots().device_ids();
            for _ in 0..5 {
                tokio::time::sleep(Duration::from_millis(2)).await;
                assert_eq!(provider.active_queries(), 0);
                assert_eq!(registry.snapshots().unwrap().generation, generation);
                assert_eq!(view.snapshots().device_ids(), ids);
            }
        }
    });
    join_all(views).await;
    refresher.await.unwrap();

    assert!(registry.snapshots().unwrap().generation > 1);
}

#[tokio::test]
async fn test_with_exclusive_view_reads_consistent_set() {
    let provider = Arc::new(FakeProvider::with_devices(vec![camera("a"), camera("b")]));
    let registry = DeviceRegistry::new(provider).await;

    let ids = registry
        .with_exclusive_view(|view| {
            view.devices()
                .iter()
                .map(|d| d.device_id.clone())
                .collect::<Vec<_>>()
        })
        .await
        .unwrap();
    assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
}
