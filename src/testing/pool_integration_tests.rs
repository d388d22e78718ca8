//! End-to-end tests over the built-in storage backends.

#[cfg(test)]
mod tests {
    use crate::config::{NodeConfig, PoolConfig, ReadMode, StorageConfig};
    use crate::error::{Error, Operation};
    use crate::health::{NodeEvent, NodeEventListener};
    use crate::pool::{CacheClientPool, CallOptions};
    use crate::storage::{CacheStorage, FileStorage};
    use crate::testing::{init_tracing, FlakyStorage, LoopbackConnector, TestPool};
    use crate::types::{ItemMetadata, NodeState, PoolStatus};
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    const ENDPOINT: &str = "loopback://cache-1";

    async fn mixed_pool(dir: &std::path::Path) -> (CacheClientPool, Arc<LoopbackConnector>) {
        let connector = Arc::new(LoopbackConnector::new());
        let config = PoolConfig::new()
            .with_node(NodeConfig::new("memory", StorageConfig::memory(1024 * 1024)))
            .with_node(NodeConfig::new("disk", StorageConfig::file(dir)))
            .with_node(NodeConfig::new("remote1", StorageConfig::remote(ENDPOINT)))
            .with_force_network(true);
        let pool = CacheClientPool::builder(config)
            .with_connector(connector.clone())
            .build()
            .await
            .unwrap();
        (pool, connector)
    }

    #[tokio::test]
    async fn test_mixed_backends_replicate() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let (pool, connector) = mixed_pool(dir.path()).await;

        let outcome = pool
            .set("user:1", "alice", ItemMetadata::new().with_tag("users"))
            .await
            .unwrap();
        assert!(outcome.is_complete());
        assert_eq!(outcome.succeeded.len(), 3);

        let item = pool.get("user:1").await.unwrap().unwrap();
        assert_eq!(item.value, Bytes::from("alice"));
        assert_eq!(item.metadata.tags, vec!["users".to_string()]);
        assert!(pool.exist_key("user:1").await.unwrap());

        let server = connector.server(ENDPOINT);
        assert_eq!(server.peek("user:1").await, Some(Bytes::from("alice")));

        pool.set("user:2", "bob", ItemMetadata::new()).await.unwrap();
        assert_eq!(
            pool.get_keys().await.unwrap(),
            vec!["user:1".to_string(), "user:2".to_string()]
        );

        assert!(pool.remove("user:1").await.unwrap());
        assert!(!pool.remove("user:1").await.unwrap());
        assert!(!pool.exist_key("user:1").await.unwrap());
        assert_eq!(pool.get("user:1").await.unwrap(), None);

        pool.dispose().await;

        // The file replica outlives the pool.
        let disk = FileStorage::open(dir.path()).await.unwrap();
        let item = disk.get("user:2").await.unwrap().unwrap();
        assert_eq!(item.value, Bytes::from("bob"));
    }

    #[tokio::test]
    async fn test_remote_outage_blocks_replicated_writes() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, connector) = mixed_pool(dir.path()).await;
        let server = connector.server(ENDPOINT);

        pool.sweep_now().await.unwrap().unwrap();
        assert!(pool.is_ready());

        server.set_failing(true);
        let report = pool.sweep_now().await.unwrap().unwrap();
        assert_eq!(report.probed, 1);
        assert_eq!(report.dead, 1);
        assert!(!pool.is_ready());

        let result = pool.set("k", "v", ItemMetadata::new()).await;
        assert!(matches!(result, Err(Error::NoNetworkReplica { ref succeeded }) if succeeded.len() == 2));

        // Reads are still served by the local replicas.
        assert_eq!(pool.get("k").await.unwrap().unwrap().value, Bytes::from("v"));

        server.set_failing(false);
        pool.sweep_now().await.unwrap().unwrap();
        assert!(pool.is_ready());
        assert!(pool.set("k", "v2", ItemMetadata::new()).await.unwrap().is_complete());
        assert_eq!(server.peek("k").await, Some(Bytes::from("v2")));

        pool.dispose().await;
    }

    #[tokio::test]
    async fn test_missing_connector_fails_build() {
        let config = PoolConfig::new()
            .with_node(NodeConfig::new("remote1", StorageConfig::remote(ENDPOINT)));
        let result = CacheClientPool::new(config).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_pool_builds_over_unreachable_remote() {
        let connector = Arc::new(LoopbackConnector::new());
        connector.set_refusing(ENDPOINT, true);
        let config = PoolConfig::new()
            .with_node(NodeConfig::new("local", StorageConfig::memory(1024 * 1024)))
            .with_node(NodeConfig::new("remote1", StorageConfig::remote(ENDPOINT)))
            .with_force_network(true);
        let pool = CacheClientPool::builder(config)
            .with_connector(connector.clone())
            .build()
            .await
            .unwrap();

        let report = pool.sweep_now().await.unwrap().unwrap();
        assert_eq!(report.dead, 1);
        assert_eq!(pool.node("remote1").unwrap().state, NodeState::Dead);
        assert!(!pool.is_ready());
        assert!(matches!(
            pool.set("k", "v", ItemMetadata::new()).await,
            Err(Error::NoNetworkReplica { .. })
        ));

        connector.set_refusing(ENDPOINT, false);
        pool.sweep_now().await.unwrap().unwrap();
        assert_eq!(pool.node("remote1").unwrap().state, NodeState::Alive);
        assert!(pool.is_ready());

        assert!(pool.set("k", "v2", ItemMetadata::new()).await.unwrap().is_complete());
        assert_eq!(
            connector.server(ENDPOINT).peek("k").await,
            Some(Bytes::from("v2"))
        );

        pool.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_timeout() {
        let harness = TestPool::builder()
            .node(
                "slow",
                crate::types::NodeMode::ReadWrite,
                FlakyStorage::local().with_latency(Duration::from_secs(10)),
            )
            .configure(|c| {
                c.with_node_timeout(Duration::from_secs(30))
                    .with_operation_timeout(Duration::from_millis(100))
            })
            .build()
            .await
            .unwrap();
        let pool = &harness.pool;

        assert!(matches!(pool.get("k").await, Err(Error::Timeout)));

        // A per-call deadline overrides the pool default.
        let options = CallOptions::new().with_timeout(Duration::from_secs(20));
        assert_eq!(pool.get_with("k", &options).await.unwrap(), None);

        let snap = pool.metrics().snapshot();
        assert_eq!(snap.requests_failed, 1);
        assert_eq!(snap.requests_ok, 1);

        pool.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_timeout_counts_as_node_failure() {
        let harness = TestPool::builder()
            .local("fast")
            .node(
                "slow",
                crate::types::NodeMode::ReadWrite,
                FlakyStorage::local().with_latency(Duration::from_secs(10)),
            )
            .configure(|c| c.with_node_timeout(Duration::from_millis(100)))
            .build()
            .await
            .unwrap();

        let result = harness.pool.set("k", "v", ItemMetadata::new()).await;
        match result {
            Err(Error::PartialWriteFailure { succeeded, failed }) => {
                assert_eq!(succeeded, vec!["fast".to_string()]);
                assert_eq!(failed, vec!["slow".to_string()]);
            }
            other => panic!("expected PartialWriteFailure, got {:?}", other),
        }
        assert_eq!(harness.pool.metrics().node_errors.get(["slow", "timeout"]), 1);

        harness.pool.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation() {
        let harness = TestPool::builder()
            .node(
                "slow",
                crate::types::NodeMode::ReadWrite,
                FlakyStorage::local().with_latency(Duration::from_secs(1)),
            )
            .build()
            .await
            .unwrap();
        let pool = harness.pool.clone();

        let token = CancellationToken::new();
        token.cancel();
        let options = CallOptions::new().with_cancellation(token);
        assert!(matches!(pool.exist_key_with("k", &options).await, Err(Error::Cancelled)));

        let token = CancellationToken::new();
        let options = CallOptions::new().with_cancellation(token.clone());
        let call = tokio::spawn({
            let pool = pool.clone();
            async move { pool.set_with("k", "v", ItemMetadata::new(), &options).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        assert!(matches!(call.await.unwrap(), Err(Error::Cancelled)));

        pool.dispose().await;
    }

    #[tokio::test]
    async fn test_dispose_is_final_and_idempotent() {
        let harness = TestPool::builder().local("a").network("b").build().await.unwrap();
        let pool = harness.pool.clone();
        pool.set("k", "v", ItemMetadata::new()).await.unwrap();

        pool.dispose().await;
        assert!(pool.is_disposed());
        assert!(!pool.is_ready());

        assert!(matches!(pool.get("k").await, Err(Error::Disposed)));
        assert!(matches!(
            pool.set("k", "v", ItemMetadata::new()).await,
            Err(Error::Disposed)
        ));
        assert!(matches!(pool.sweep_now().await, Err(Error::Disposed)));

        // Storages were closed.
        let a = harness.storage("a").unwrap();
        assert!(a.inner().get("k").await.is_err());

        pool.dispose().await;
        assert!(pool.is_disposed());
    }

    #[tokio::test]
    async fn test_status_and_metrics() {
        let harness = TestPool::builder()
            .local("local")
            .network("remote1")
            .build()
            .await
            .unwrap();
        let pool = &harness.pool;

        pool.sweep_now().await.unwrap().unwrap();
        let status = pool.status();
        assert!(status.ready);
        assert!(status.sweeps_completed >= 1);
        assert_eq!(status.alive_count(), 2);
        assert_eq!(status.nodes[0].name, "local");
        assert!(!status.nodes[0].is_network);
        assert!(status.nodes[1].is_network);

        let json = serde_json::to_string(&status).unwrap();
        let parsed: PoolStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, status);

        pool.set("k", "v", ItemMetadata::new()).await.unwrap();
        pool.get("k").await.unwrap();
        pool.get("missing").await.unwrap();

        let snap = pool.metrics().snapshot();
        assert_eq!(snap.requests_ok, 3);
        assert_eq!(snap.get_hits, 1);
        assert_eq!(snap.get_misses, 1);
        assert!((snap.hit_rate() - 0.5).abs() < f64::EPSILON);
        assert!(snap.pings_total >= 1);
        assert_eq!(snap.nodes_alive, 2);

        let text = pool.metrics().to_prometheus();
        assert!(text.contains("cachepool_requests_total{operation=\"set\",outcome=\"ok\"} 1"));
        assert!(text.contains("cachepool_get_hits_total 1"));

        pool.dispose().await;
    }

    #[tokio::test]
    async fn test_disabled_node_is_skipped() {
        let harness = TestPool::builder()
            .local("a")
            .local("b")
            .configure(|c| c.with_read_mode(ReadMode::Broadcast))
            .build()
            .await
            .unwrap();
        let pool = &harness.pool;

        pool.set_node_enabled("b", false).unwrap();
        let outcome = pool.set("k", "v", ItemMetadata::new()).await.unwrap();
        assert_eq!(outcome.succeeded, vec!["a".to_string()]);
        assert_eq!(harness.storage("b").unwrap().writes(), 0);

        pool.set_node_enabled("b", true).unwrap();
        assert!(pool.node("b").unwrap().enabled);
        assert!(pool.exist_key("k").await.unwrap());
        assert_eq!(harness.storage("b").unwrap().reads(), 1);

        pool.dispose().await;
    }

    #[tokio::test]
    async fn test_all_replicas_failing_is_reported() {
        let harness = TestPool::builder().local("a").local("b").build().await.unwrap();
        harness.storage("a").unwrap().set_failing(true);
        harness.storage("b").unwrap().set_failing(true);

        match harness.pool.get("k").await {
            Err(Error::AllNodesFailed {
                operation: Operation::Get,
                failures,
            }) => assert_eq!(failures.len(), 2),
            other => panic!("expected AllNodesFailed, got {:?}", other),
        }
        assert!(matches!(
            harness.pool.remove("k").await,
            Err(Error::AllNodesFailed { .. })
        ));

        harness.storage("b").unwrap().set_failing(false);
        assert!(matches!(
            harness.pool.remove("k").await,
            Err(Error::PartialWriteFailure { .. })
        ));

        harness.pool.dispose().await;
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<NodeEvent>>,
    }

    impl NodeEventListener for Recorder {
        fn on_event(&self, event: &NodeEvent) {
            self.events.lock().push(event.clone());
        }
    }

    #[tokio::test]
    async fn test_listener_sees_every_transition() {
        let recorder = Arc::new(Recorder::default());
        let remote = Arc::new(FlakyStorage::network());
        let config = PoolConfig::new()
            .with_node(NodeConfig::new("remote1", StorageConfig::Provided));
        let pool = CacheClientPool::builder(config)
            .with_storage("remote1", remote.clone())
            .with_listener(recorder.clone())
            .build()
            .await
            .unwrap();

        pool.sweep_now().await.unwrap().unwrap();
        remote.set_failing(true);
        pool.sweep_now().await.unwrap().unwrap();
        remote.set_failing(false);
        pool.sweep_now().await.unwrap().unwrap();

        let events = recorder.events.lock().clone();
        let transitions: Vec<(NodeState, NodeState)> = events
            .iter()
            .map(|NodeEvent::StateChanged { from, to, .. }| (*from, *to))
            .collect();
        assert_eq!(
            transitions,
            vec![
                (NodeState::Unknown, NodeState::Alive),
                (NodeState::Alive, NodeState::Dead),
                (NodeState::Dead, NodeState::Alive),
            ]
        );
        assert_eq!(pool.metrics().snapshot().pings_failed, 1);

        pool.dispose().await;
    }
}
