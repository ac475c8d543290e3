mod support;

use std::collections::HashSet;

use metrics_util::debugging::DebuggingRecorder;
use murmur::application::repos::TimelineCache;
use murmur::application::timeline::TimelineConfig;
use murmur::cache::{CacheConfig, TimelineStore};
use murmur::infra::telemetry;
use tokio_util::sync::CancellationToken;

use support::{Harness, RecordingPublisher};

#[tokio::test]
async fn engine_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    telemetry::describe_metrics();

    let cancel = CancellationToken::new();
    let h = Harness::with(TimelineConfig::default(), RecordingPublisher::failing(1));
    let a = h.graph.add_user("A");
    let b = h.graph.add_user("B");
    let c = h.graph.add_user("C");
    h.graph.follow(&a, &[b.clone(), c.clone()]);
    h.store.fail_writes_for(&c);

    // Publish fails once under the strict policy, then succeeds.
    h.service
        .create_post(&a, "first", &cancel)
        .await
        .expect_err("strict publish failure");
    h.service
        .create_post(&a, "second", &cancel)
        .await
        .expect("post created");

    // Miss, refill, then hit.
    h.service.get_timeline(&b, &cancel).await.expect("miss");
    h.service.get_timeline(&b, &cancel).await.expect("hit");

    // A failed best-effort path.
    h.graph
        .fail_followers
        .store(true, std::sync::atomic::Ordering::SeqCst);
    h.service
        .create_post(&a, "third", &cancel)
        .await
        .expect("post created without followers");

    // Capacity eviction.
    let small = TimelineStore::new(CacheConfig {
        max_users: 1,
        ..CacheConfig::default()
    });
    let timeline = h.store.timeline_of(&b);
    small.set(&b, timeline.clone()).await.expect("set b");
    small.set(&a, timeline).await.expect("set a");

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "murmur_posts_created_total",
        "murmur_fanout_writes_total",
        "murmur_fanout_ms",
        "murmur_timeline_reads_total",
        "murmur_timeline_cache_hit_total",
        "murmur_timeline_cache_miss_total",
        "murmur_timeline_cache_evict_total",
        "murmur_publish_failures_total",
        "murmur_degraded_total",
    ];
    for name in expected {
        assert!(names.contains(name), "missing metric `{name}` in {names:?}");
    }
}
