    use super::*;
    use crate::handler::handler_fn;
    use crate::item::ItemStatus;
    use crate::store::SqliteQueueStore;
    use queuewatch_config::StoreConfig;
    use serde_json::{Value, json};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config() -> ConsumerConfig {
        ConsumerConfig {
            idle_backoff_ms: 10,
            ..Default::default()
        }
    }

    fn ok_work() -> Arc<dyn TaskHandler> {
        Arc::new(handler_fn(|_| async { Ok::<_, QueueError>(()) }))
    }

    fn failing_work() -> Arc<dyn TaskHandler> {
        Arc::new(handler_fn(|_| async {
            Err::<(), _>(QueueError::ExecutionFailed("boom".to_string()))
        }))
    }

    async fn memory_store() -> Arc<dyn QueueStore> {
        Arc::new(SqliteQueueStore::in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_step_idle_on_empty_queue() {
        let consumer = Consumer::new("c1", memory_store().await, ok_work(), config());
        assert_eq!(consumer.step().await.unwrap(), ConsumerStep::Idle);
        assert_eq!(consumer.stats(), ConsumerStats::default());
    }

    #[tokio::test]
    async fn test_run_stops_after_max_items() {
        let store = memory_store().await;
        for n in 0..3 {
            store.enqueue(json!({ "n": n })).await.unwrap();
        }
        let consumer = Consumer::new(
            "c1",
            store.clone(),
            ok_work(),
            ConsumerConfig {
                max_items: Some(2),
                ..config()
            },
        );

        assert_eq!(consumer.run().await.unwrap(), 2);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn test_work_receives_payload() {
        let store = memory_store().await;
        let id = store.enqueue(json!({"task": "t", "data": {"x": 1}})).await.unwrap();
        let seen: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let work = handler_fn(move |payload| {
            let seen = seen_clone.clone();
            async move {
                seen.lock().unwrap().push(payload);
                Ok::<_, QueueError>(())
            }
        });

        let consumer = Consumer::new("c1", store.clone(), Arc::new(work), config());
        assert_eq!(consumer.step().await.unwrap(), ConsumerStep::Completed(id.clone()));
        assert_eq!(seen.lock().unwrap()[0], json!({"task": "t", "data": {"x": 1}}));

        let item = store.get(&id).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Processed);
        assert_eq!(item.claimant.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_failed_work_is_requeued_and_retried() {
        let store = memory_store().await;
        let id = store.enqueue(json!({})).await.unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let work = handler_fn(move |_| {
            let calls = calls_clone.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(QueueError::ExecutionFailed("first try".to_string()))
                } else {
                    Ok(())
                }
            }
        });
        let consumer = Consumer::new(
            "c1",
            store.clone(),
            Arc::new(work),
            ConsumerConfig {
                max_items: Some(1),
                ..config()
            },
        );

        assert_eq!(consumer.run().await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            consumer.stats(),
            ConsumerStats {
                completed: 1,
                requeued: 1,
                failed: 0,
            }
        );
        assert_eq!(store.get(&id).await.unwrap().unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn test_panicking_work_is_requeued() {
        let store = memory_store().await;
        let id = store.enqueue(json!({})).await.unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let work = handler_fn(move |_| {
            let calls = calls_clone.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("work bug");
                }
                Ok::<_, QueueError>(())
            }
        });
        let handle = Consumer::new(
            "c1",
            store.clone(),
            Arc::new(work),
            ConsumerConfig {
                max_items: Some(1),
                ..config()
            },
        )
        .spawn();

        assert_eq!(handle.join().await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let item = store.get(&id).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Processed);
        assert_eq!(item.attempts, 2);
    }

    #[tokio::test]
    async fn test_max_deliveries_dead_letters() {
        let store = memory_store().await;
        let id = store.enqueue(json!({})).await.unwrap();
        let consumer = Consumer::new(
            "c1",
            store.clone(),
            failing_work(),
            ConsumerConfig {
                max_deliveries: Some(2),
                ..config()
            },
        );

        assert_eq!(consumer.step().await.unwrap(), ConsumerStep::Requeued(id.clone()));
        assert_eq!(consumer.step().await.unwrap(), ConsumerStep::DeadLettered(id.clone()));
        assert_eq!(consumer.step().await.unwrap(), ConsumerStep::Idle);

        let item = store.get(&id).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Failed);
        assert!(item.last_error.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_acknowledged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.db");
        let store: Arc<dyn QueueStore> =
            Arc::new(SqliteQueueStore::open(&StoreConfig::at(&path)).await.unwrap());
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute("INSERT INTO queue (id, data) VALUES ('bad', 'not json')", [])
            .unwrap();

        let consumer = Consumer::new("c1", store.clone(), failing_work(), config());
        assert_eq!(
            consumer.step().await.unwrap(),
            ConsumerStep::Completed(ItemId::new("bad"))
        );
        assert_eq!(
            store.get(&ItemId::new("bad")).await.unwrap().unwrap().status,
            ItemStatus::Processed
        );
    }

    #[tokio::test]
    async fn test_spawned_consumer_stops_on_request() {
        let handle = Consumer::new("c1", memory_store().await, ok_work(), config()).spawn();
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.stop();
        assert_eq!(handle.join().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consumers_process_each_item_once() {
        let store = memory_store().await;
        for n in 0..20 {
            store.enqueue(json!({ "n": n })).await.unwrap();
        }

        let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
        let stop = CancellationToken::new();
        let mut handles = Vec::new();
        for c in 0..3 {
            let seen = seen.clone();
            let work = handler_fn(move |payload| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(payload["n"].as_u64().unwrap_or(u64::MAX));
                    Ok::<_, QueueError>(())
                }
            });
            let consumer = Consumer::new(format!("c{}", c), store.clone(), Arc::new(work), config())
                .with_stop_token(stop.clone());
            handles.push(consumer.spawn());
        }

        tokio::time::timeout(Duration::from_secs(10), async {
            while store.stats().await.unwrap().processed < 20 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        stop.cancel();

        let mut total = 0;
        for handle in handles {
            total += handle.join().await.unwrap();
        }
        assert_eq!(total, 20);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 20);
        assert_eq!(seen.iter().collect::<HashSet<_>>().len(), 20);
    }
