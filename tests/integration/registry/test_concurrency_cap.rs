//! Exercises the `MAX_RUNNING_WORKERS` cap under genuine concurrent load: six
//! `start()` calls racing across real OS threads should admit exactly four.

use rtsp_gateway::error::ErrorCode;

use crate::common::test_registry;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn starting_more_than_the_cap_concurrently_admits_exactly_four() {
    let (registry, _dir) = test_registry();

    let ids: Vec<String> = (0..6)
        .map(|i| {
            registry
                .create(&format!("Cam {i}"), &format!("rtsp://10.0.0.{i}/s"), vec![])
                .unwrap()
                .id
        })
        .collect();

    let mut tasks = Vec::new();
    for id in ids.clone() {
        let registry = registry.clone();
        tasks.push(tokio::task::spawn_blocking(move || registry.start(&id)));
    }

    let results: Vec<_> = futures_util::future::join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();

    let accepted = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.code() == ErrorCode::ConcurrencyLimit))
        .count();

    assert_eq!(accepted, 4);
    assert_eq!(rejected, 2);

    for id in &ids {
        let _ = registry.stop(id);
    }
}
