//! Dispatch adapter tests: config validation, queues, broker, and
//! correlation id propagation from producer to handler.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use etl_dispatch::*;
    use etl_protocol::{
        CorrelationId, Envelope, HandlerError, MessageStatus, PipelineResult, PipelineStatus,
        context,
    };
    use serde_json::{Value, json};

    type Ready<T> = std::future::Ready<Result<T, HandlerError>>;

    /// Task that reports the correlation id it observed while running.
    fn echo_id_task(name: &'static str) -> FnTask<impl Fn(Value) -> Ready<Value>> {
        task_fn(name, |payload| {
            let id = context::current().map(|id| id.to_string());
            std::future::ready(Ok(json!({ "seen_id": id, "payload": payload })))
        })
    }

    async fn finished(queue: &TaskQueue, job_id: &str) -> PipelineResult {
        for _ in 0..400 {
            if let Some(result) = queue.result(job_id).filter(PipelineResult::is_finished) {
                return result;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {job_id} never finished");
    }

    async fn next_message(rx: &mut tokio::sync::broadcast::Receiver<Arc<str>>) -> Envelope<Value> {
        let raw = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no message within 2s")
            .unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    /// Panics when the payload asks it to, otherwise answers `"fine"`.
    fn volatile_task(name: &'static str) -> FnTask<impl Fn(Value) -> Ready<Value>> {
        task_fn(name, |payload: Value| {
            if payload["explode"] == json!(true) {
                panic!("kaboom");
            }
            std::future::ready(Ok(json!("fine")))
        })
    }

    fn fast_retry(attempts: u32) -> BackendConfig {
        BackendConfig::in_memory("test")
            .failure_policy(FailurePolicy::Retry { max_attempts: attempts })
            .retry_delay(Duration::from_millis(1))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Configuration
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn disabled_backend_reports_not_enabled() {
        let config = BackendConfig::new(false, "q");
        assert_eq!(config.validate().unwrap_err(), "not enabled");
    }

    #[test]
    fn missing_url_names_the_setting() {
        let config = BackendConfig::in_memory("q").endpoint("CELERY_BROKER_URL", None);
        assert_eq!(config.validate().unwrap_err(), "CELERY_BROKER_URL is not set");

        let blank = BackendConfig::in_memory("q").endpoint("REDIS_URL", Some("  ".into()));
        assert_eq!(blank.validate().unwrap_err(), "REDIS_URL is not set");
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let config = BackendConfig::in_memory("q")
            .endpoint("REDIS_URL", Some("redis://localhost:6379".into()));
        let reason = config.validate().unwrap_err();
        assert!(reason.contains("unsupported scheme 'redis'"), "{reason}");
    }

    #[test]
    fn memory_urls_validate() {
        let config = BackendConfig::in_memory("q")
            .endpoint("CELERY_BROKER_URL", Some("memory://broker".into()))
            .endpoint("CELERY_BACKEND_URL", Some("memory://results".into()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn failure_policy_parsing() {
        assert_eq!("report".parse::<FailurePolicy>().unwrap(), FailurePolicy::Report);
        assert_eq!(
            "RETRY".parse::<FailurePolicy>().unwrap(),
            FailurePolicy::Retry { max_attempts: 3 }
        );
        assert_eq!(
            "retry:5".parse::<FailurePolicy>().unwrap(),
            FailurePolicy::Retry { max_attempts: 5 }
        );
        assert!("retry:x".parse::<FailurePolicy>().is_err());
        assert!("ignore".parse::<FailurePolicy>().is_err());
        assert_eq!(FailurePolicy::Retry { max_attempts: 0 }.max_attempts(), 1);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Factory
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn disabled_backends_refuse_sends() {
        let dispatchers = Dispatchers::none();
        assert!(dispatchers.enabled().is_empty());

        let err = dispatchers
            .send_payload(Backend::TaskQueue, "ping", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Disabled { backend: Backend::TaskQueue, .. }));
        assert!(err.is_unavailable());
        assert_eq!(dispatchers.disabled_reason(Backend::Broker), Some("not enabled"));
    }

    #[test]
    fn misconfigured_backend_is_left_out() {
        let mut config = DispatchConfig::in_memory();
        config.broker = config
            .broker
            .endpoint("KAFKA_BOOTSTRAP_SERVERS", Some("kafka://localhost:9092".into()));

        let dispatchers = Dispatchers::from_config(&config);
        assert_eq!(dispatchers.enabled(), vec![Backend::TaskQueue, Backend::AsyncQueue]);
        assert!(dispatchers.broker().is_err());
    }

    #[tokio::test]
    async fn factory_routes_to_the_requested_backend() {
        let dispatchers = Dispatchers::from_config(&DispatchConfig::in_memory());
        dispatchers.task_queue().unwrap().register(echo_id_task("ping"));
        dispatchers.start();

        let ack = context::scope(CorrelationId::from("routed"), async {
            dispatchers.send_payload(Backend::TaskQueue, "ping", json!({})).await
        })
        .await
        .unwrap();

        assert_eq!(ack.backend, Backend::TaskQueue);
        assert_eq!(ack.correlation_id.as_str(), "routed");
        let result = finished(dispatchers.task_queue().unwrap(), &ack.message_id).await;
        assert_eq!(result.status, PipelineStatus::Success);
        dispatchers.shutdown();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Task queue
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn task_handler_runs_under_producer_id() {
        let queue = TaskQueue::new(BackendConfig::in_memory("celery"));
        queue.register(echo_id_task("ping"));

        let ack = context::scope(CorrelationId::from("X"), async {
            queue.delay("ping", json!({"n": 1})).await
        })
        .await
        .unwrap();
        assert_eq!(ack.correlation_id.as_str(), "X");
        assert!(queue.result(&ack.message_id).unwrap().is_pending());

        queue.start();
        let result = finished(&queue, &ack.message_id).await;
        assert_eq!(result.status, PipelineStatus::Success);
        assert_eq!(result.correlation_id.as_str(), "X");
        assert_eq!(result.data.unwrap(), json!({"seen_id": "X", "payload": {"n": 1}}));
        queue.shutdown();
    }

    #[tokio::test]
    async fn task_outside_any_context_gets_a_fresh_id() {
        let queue = TaskQueue::new(BackendConfig::in_memory("celery"));
        queue.register(echo_id_task("ping"));
        queue.start();

        let ack = queue.delay("ping", json!(null)).await.unwrap();
        let result = finished(&queue, &ack.message_id).await;
        assert_eq!(ack.correlation_id.as_str().len(), 36);
        assert_eq!(result.data.unwrap()["seen_id"], json!(ack.correlation_id.as_str()));
        queue.shutdown();
    }

    #[tokio::test]
    async fn failing_task_records_error_result() {
        let queue = TaskQueue::new(BackendConfig::in_memory("celery"));
        queue.register(task_fn("explode", |_| async { Err(HandlerError::failed("boom")) }));
        queue.start();

        let ack = queue.delay("explode", json!({})).await.unwrap();
        let result = finished(&queue, &ack.message_id).await;
        assert_eq!(result.status, PipelineStatus::Error);
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(result.correlation_id, ack.correlation_id);
        queue.shutdown();
    }

    #[tokio::test]
    async fn unknown_task_records_not_found() {
        let queue = TaskQueue::new(BackendConfig::in_memory("celery"));
        queue.start();

        let ack = queue.delay("ghost", json!({})).await.unwrap();
        let result = finished(&queue, &ack.message_id).await;
        assert_eq!(result.status, PipelineStatus::Error);
        assert!(result.error.unwrap().contains("ghost"));
        queue.shutdown();
    }

    #[tokio::test]
    async fn retry_policy_reruns_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let queue = TaskQueue::new(fast_retry(3));
        let counter = Arc::clone(&calls);
        queue.register(task_fn("flaky", move |_| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt < 3 {
                    Err(HandlerError::failed("not yet"))
                } else {
                    Ok(json!(attempt))
                }
            }
        }));
        queue.start();

        let ack = queue.delay("flaky", json!({})).await.unwrap();
        let result = finished(&queue, &ack.message_id).await;
        assert_eq!(result.status, PipelineStatus::Success);
        assert_eq!(result.data, Some(json!(3)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        queue.shutdown();
    }

    #[tokio::test]
    async fn retry_gives_up_on_invalid_payload() {
        let calls = Arc::new(AtomicU32::new(0));
        let queue = TaskQueue::new(fast_retry(5));
        let counter = Arc::clone(&calls);
        queue.register(task_fn("strict", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(HandlerError::invalid_payload("missing field")) }
        }));
        queue.start();

        let ack = queue.delay("strict", json!({})).await.unwrap();
        let result = finished(&queue, &ack.message_id).await;
        assert_eq!(result.status, PipelineStatus::Error);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        queue.shutdown();
    }

    #[tokio::test]
    async fn panicking_task_records_error_and_worker_survives() {
        let queue = TaskQueue::new(BackendConfig::in_memory("celery"));
        queue.register(volatile_task("volatile"));
        queue.start();

        let boom = queue.delay("volatile", json!({"explode": true})).await.unwrap();
        let result = finished(&queue, &boom.message_id).await;
        assert_eq!(result.status, PipelineStatus::Error);
        assert!(result.error.unwrap().contains("kaboom"));

        // Same single worker picks up the next job.
        let ok = queue.delay("volatile", json!({})).await.unwrap();
        let result = finished(&queue, &ok.message_id).await;
        assert_eq!(result.status, PipelineStatus::Success);
        assert_eq!(result.data, Some(json!("fine")));
        queue.shutdown();
    }

    #[tokio::test]
    async fn retry_keeps_result_pending_between_attempts() {
        let entered = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let calls = Arc::new(AtomicU32::new(0));
        let queue = TaskQueue::new(fast_retry(2));
        let (counter, on_entry, gate) = (Arc::clone(&calls), Arc::clone(&entered), Arc::clone(&release));
        queue.register(task_fn("slow-second", move |_| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let (on_entry, gate) = (Arc::clone(&on_entry), Arc::clone(&gate));
            async move {
                if attempt == 1 {
                    return Err(HandlerError::failed("first attempt"));
                }
                on_entry.notify_one();
                gate.notified().await;
                Ok(json!(attempt))
            }
        }));
        queue.start();

        let ack = queue.delay("slow-second", json!({})).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), entered.notified())
            .await
            .expect("second attempt never started");
        assert!(queue.result(&ack.message_id).unwrap().is_pending());

        release.notify_one();
        let result = finished(&queue, &ack.message_id).await;
        assert_eq!(result.status, PipelineStatus::Success);
        assert_eq!(result.data, Some(json!(2)));
        queue.shutdown();
    }

    #[tokio::test]
    async fn oldest_results_are_evicted_past_capacity() {
        let queue = TaskQueue::new(BackendConfig::in_memory("celery").result_capacity(2));
        queue.register(echo_id_task("ping"));
        queue.start();

        let first = queue.delay("ping", json!(1)).await.unwrap();
        let second = queue.delay("ping", json!(2)).await.unwrap();
        let third = queue.delay("ping", json!(3)).await.unwrap();

        finished(&queue, &second.message_id).await;
        finished(&queue, &third.message_id).await;
        assert!(queue.result(&first.message_id).is_none());
        assert_eq!(queue.result_count(), 2);
        queue.shutdown();
    }

    #[tokio::test]
    async fn send_after_shutdown_is_unavailable() {
        let queue = TaskQueue::new(BackendConfig::in_memory("celery"));
        queue.start();
        queue.shutdown();
        let err = queue.delay("ping", json!({})).await.unwrap_err();
        assert!(matches!(err, DispatchError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn on_receive_uses_carried_id() {
        let queue = TaskQueue::new(BackendConfig::in_memory("celery"));
        queue.register(echo_id_task("ping"));

        let raw = r#"{"correlation_id":"wire-7","data":{"k":1}}"#;
        let value = queue.on_receive("ping", raw).await.unwrap();
        assert_eq!(value["seen_id"], "wire-7");
    }

    #[tokio::test]
    async fn on_receive_mints_when_message_has_no_id() {
        let queue = TaskQueue::new(BackendConfig::in_memory("celery"));
        queue.register(echo_id_task("ping"));

        let value = queue.on_receive("ping", r#"{"data":null}"#).await.unwrap();
        assert_eq!(value["seen_id"].as_str().unwrap().len(), 36);
    }

    #[tokio::test]
    async fn on_receive_rejects_malformed_body() {
        let queue = TaskQueue::new(BackendConfig::in_memory("celery"));
        queue.register(echo_id_task("ping"));

        let err = queue.on_receive("ping", "not json").await.unwrap_err();
        assert!(matches!(err, HandlerError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn context_is_clear_after_handler_returns() {
        let queue = TaskQueue::new(BackendConfig::in_memory("celery"));
        queue.register(echo_id_task("ping"));

        queue
            .on_receive("ping", r#"{"correlation_id":"scoped","data":null}"#)
            .await
            .unwrap();
        assert_eq!(context::current(), None);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Async queue
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn apply_returns_handler_value() {
        let queue = AsyncQueue::new(BackendConfig::in_memory("default"));
        queue.register(echo_id_task("ping"));
        queue.start();

        let value = context::scope(CorrelationId::from("job-1"), async {
            queue.apply("ping", json!({"n": 2})).await
        })
        .await
        .unwrap();
        assert_eq!(value["seen_id"], "job-1");
        assert_eq!(value["payload"], json!({"n": 2}));
        assert_eq!(queue.pending_count(), 0);
        queue.shutdown();
    }

    #[tokio::test]
    async fn job_handle_exposes_ack() {
        let queue = AsyncQueue::new(BackendConfig::in_memory("default"));
        queue.register(echo_id_task("ping"));
        queue.start();

        let handle = context::scope(CorrelationId::from("h"), async {
            queue.enqueue("ping", json!({})).await
        })
        .await
        .unwrap();
        assert_eq!(handle.correlation_id().as_str(), "h");
        assert_eq!(handle.ack().backend, Backend::AsyncQueue);
        assert!(!handle.job_id().is_empty());
        handle.wait().await.unwrap();
        queue.shutdown();
    }

    #[tokio::test]
    async fn failing_job_surfaces_to_the_waiter() {
        let queue = AsyncQueue::new(BackendConfig::in_memory("default"));
        queue.register(task_fn("explode", |_| async { Err(HandlerError::failed("kaput")) }));
        queue.start();

        let err = queue.apply("explode", json!({})).await.unwrap_err();
        match err {
            DispatchError::JobFailed { source, .. } => {
                assert_eq!(source, HandlerError::failed("kaput"))
            }
            other => panic!("unexpected error: {other}"),
        }
        queue.shutdown();
    }

    #[tokio::test]
    async fn panicking_job_fails_the_waiter_and_worker_survives() {
        let queue = AsyncQueue::new(BackendConfig::in_memory("default"));
        queue.register(volatile_task("volatile"));
        queue.start();

        let err = tokio::time::timeout(
            Duration::from_secs(2),
            queue.apply("volatile", json!({"explode": true})),
        )
        .await
        .expect("waiter hung after a panic")
        .unwrap_err();
        match err {
            DispatchError::JobFailed { source, .. } => {
                assert!(source.to_string().contains("kaboom"))
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(queue.pending_count(), 0);

        let value = tokio::time::timeout(Duration::from_secs(2), queue.apply("volatile", json!({})))
            .await
            .expect("worker stopped after a panic")
            .unwrap();
        assert_eq!(value, json!("fine"));
        queue.shutdown();
    }

    #[tokio::test]
    async fn cancelled_enqueue_withdraws_its_waiter() {
        let mut config = BackendConfig::in_memory("default");
        config.capacity = 1;
        let queue = AsyncQueue::new(config);
        queue.register(echo_id_task("ping"));

        // Not started: the first job fills the channel, the second blocks.
        let _held = queue.enqueue("ping", json!(1)).await.unwrap();
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), queue.enqueue("ping", json!(2))).await;
        assert!(blocked.is_err());
        assert_eq!(queue.pending_count(), 1);
        queue.shutdown();
    }

    #[tokio::test]
    async fn waiters_see_dropped_result_on_shutdown() {
        let queue = AsyncQueue::new(BackendConfig::in_memory("default"));
        queue.register(echo_id_task("ping"));

        // Never started: the job stays queued until shutdown drops it.
        let handle = queue.enqueue("ping", json!({})).await.unwrap();
        queue.shutdown();
        assert!(matches!(
            handle.wait().await.unwrap_err(),
            DispatchError::ResultDropped { .. }
        ));
    }

    #[tokio::test]
    async fn fire_and_forget_send_still_runs() {
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let queue = AsyncQueue::new(BackendConfig::in_memory("default"));
        let slot = Arc::clone(&seen);
        queue.register(task_fn("record", move |_| {
            *slot.lock() = context::current();
            async { Ok(Value::Null) }
        }));
        queue.start();

        context::scope(CorrelationId::from("ff"), async {
            queue.send_payload("record", json!({})).await.unwrap();
        })
        .await;

        for _ in 0..400 {
            if seen.lock().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(seen.lock().as_ref().unwrap().as_str(), "ff");
        queue.shutdown();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Broker
    // ─────────────────────────────────────────────────────────────────────

    fn pong_handler() -> FnTopic<impl Fn(Envelope<Value>) -> Ready<Option<Envelope<Value>>>> {
        topic_fn(|message: Envelope<Value>| {
            std::future::ready(Ok(Some(
                message.reply(json!({"message": "pong"}), MessageStatus::Completed),
            )))
        })
    }

    #[tokio::test]
    async fn reply_carries_request_id() {
        let broker = Broker::new(BackendConfig::in_memory("kafka"));
        broker.subscribe(Subscription::new("in-topic").reply_to("out-topic"), pong_handler());
        let mut replies = broker.listen("out-topic");

        context::scope(CorrelationId::from("abc"), async {
            broker.publish("in-topic", json!({"message": "ping"})).await
        })
        .await
        .unwrap();

        let reply = next_message(&mut replies).await;
        assert_eq!(reply.correlation_id.as_str(), "abc");
        assert_eq!(reply.status, Some(MessageStatus::Completed));
        assert_eq!(reply.data, Some(json!({"message": "pong"})));
        broker.shutdown();
    }

    #[tokio::test]
    async fn handler_error_publishes_failed_reply() {
        let broker = Broker::new(BackendConfig::in_memory("kafka"));
        broker.subscribe(
            Subscription::new("in-topic").reply_to("out-topic"),
            topic_fn(|_| async { Err(HandlerError::failed("cannot pong")) }),
        );
        let mut replies = broker.listen("out-topic");

        context::scope(CorrelationId::from("err-1"), async {
            broker.publish("in-topic", json!({})).await
        })
        .await
        .unwrap();

        let reply = next_message(&mut replies).await;
        assert_eq!(reply.correlation_id.as_str(), "err-1");
        assert_eq!(reply.status, Some(MessageStatus::Failed));
        assert_eq!(reply.data.unwrap()["error"], "cannot pong");
        broker.shutdown();
    }

    #[tokio::test]
    async fn panicking_subscriber_replies_failed_and_keeps_consuming() {
        let broker = Broker::new(BackendConfig::in_memory("kafka"));
        broker.subscribe(
            Subscription::new("in-topic").reply_to("out-topic"),
            topic_fn(|message: Envelope<Value>| {
                if message.data == Some(json!("explode")) {
                    panic!("subscriber blew up");
                }
                std::future::ready(Ok(Some(message.reply(json!("ok"), MessageStatus::Completed))))
            }),
        );
        let mut replies = broker.listen("out-topic");

        broker.publish("in-topic", json!("explode")).await.unwrap();
        let failed = next_message(&mut replies).await;
        assert_eq!(failed.status, Some(MessageStatus::Failed));
        assert!(failed.data.unwrap()["error"].as_str().unwrap().contains("subscriber blew up"));

        broker.publish("in-topic", json!("again")).await.unwrap();
        let reply = next_message(&mut replies).await;
        assert_eq!(reply.status, Some(MessageStatus::Completed));
        broker.shutdown();
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_accepted() {
        let broker = Broker::new(BackendConfig::in_memory("kafka"));
        let first = broker.publish("nobody-home", json!(1)).await.unwrap();
        let second = broker.publish("nobody-home", json!(2)).await.unwrap();
        assert_eq!(first.backend, Backend::Broker);
        assert_ne!(first.message_id, second.message_id);
    }

    #[tokio::test]
    async fn every_subscriber_receives_the_message() {
        let broker = Broker::new(BackendConfig::in_memory("kafka"));
        broker.subscribe(Subscription::new("fanout").reply_to("replies"), pong_handler());
        broker.subscribe(Subscription::new("fanout").reply_to("replies"), pong_handler());
        assert_eq!(broker.subscriber_count("fanout"), 2);
        let mut replies = broker.listen("replies");

        broker.publish("fanout", json!({})).await.unwrap();
        let a = next_message(&mut replies).await;
        let b = next_message(&mut replies).await;
        assert_eq!(a.correlation_id, b.correlation_id);
        broker.shutdown();
    }

    #[tokio::test]
    async fn broker_on_receive_collects_replies() {
        let broker = Broker::new(BackendConfig::in_memory("kafka"));
        broker.subscribe(Subscription::new("in-topic"), pong_handler());

        let value = broker
            .on_receive("in-topic", r#"{"correlation_id":"direct","data":{}}"#)
            .await
            .unwrap();
        assert_eq!(value, json!([{"message": "pong"}]));

        let err = broker.on_receive("unsubscribed", "{}").await.unwrap_err();
        assert!(matches!(err, HandlerError::NotFound(_)));
        broker.shutdown();
    }

    #[tokio::test]
    async fn publish_after_shutdown_is_unavailable() {
        let broker = Broker::new(BackendConfig::in_memory("kafka"));
        broker.shutdown();
        assert!(broker.publish("t", json!({})).await.unwrap_err().is_unavailable());
    }
}
