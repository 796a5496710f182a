pub mod fixtures;

#[cfg(test)]
mod memory {
    use super::fixtures::*;
    use payflow_events::*;

    #[tokio::test]
    async fn test_subscriber_receives_events_in_emit_order() {
        let bus = MemoryEventBus::new();
        let mut stream = bus.subscribe();

        bus.emit(event(PaymentEventKind::Created, "p1", "u1")).await.unwrap();
        bus.emit(event(PaymentEventKind::Completed, "p1", "u1")).await.unwrap();

        let first = recv(&mut stream).await;
        let second = recv(&mut stream).await;
        assert_eq!(first.kind(), PaymentEventKind::Created);
        assert_eq!(second.kind(), PaymentEventKind::Completed);
        assert_eq!(first.payment_id(), Some("p1"));
        assert_eq!(second.user_id(), Some("u1"));
        assert_silent(&mut stream).await;
    }

    #[tokio::test]
    async fn test_user_filter_isolates_other_users() {
        let bus = MemoryEventBus::new();
        let mut u1 = bus.subscribe_by_user_id("u1");
        let mut everyone = bus.subscribe();

        bus.emit(event(PaymentEventKind::Created, "p2", "u2")).await.unwrap();

        assert_eq!(recv(&mut everyone).await.user_id(), Some("u2"));
        assert_silent(&mut u1).await;
    }

    #[tokio::test]
    async fn test_events_without_user_never_reach_user_streams() {
        let bus = MemoryEventBus::new();
        let mut u1 = bus.subscribe_by_user_id("u1");

        bus.emit(PaymentEvent::new(PaymentEventKind::Failed, serde_json::json!({"id": "p3"})))
            .await
            .unwrap();
        bus.emit(event(PaymentEventKind::Failed, "p4", "u1")).await.unwrap();

        assert_eq!(recv(&mut u1).await.payment_id(), Some("p4"));
    }

    #[tokio::test]
    async fn test_combined_filters() {
        let bus = MemoryEventBus::new();
        let filter =
            EventFilter::user("u1").and(EventFilter::kind(PaymentEventKind::StatusChange));
        let mut stream = bus.subscribe_filtered(Some(filter));

        bus.emit(event(PaymentEventKind::Created, "p1", "u1")).await.unwrap();
        bus.emit(event(PaymentEventKind::StatusChange, "p1", "u2")).await.unwrap();
        bus.emit(event(PaymentEventKind::StatusChange, "p1", "u1")).await.unwrap();

        let received = recv(&mut stream).await;
        assert_eq!(received.kind(), PaymentEventKind::StatusChange);
        assert_eq!(received.user_id(), Some("u1"));
        assert_silent(&mut stream).await;
    }

    #[tokio::test]
    async fn test_late_subscriber_only_sees_later_events() {
        let bus = MemoryEventBus::new();
        bus.emit(event(PaymentEventKind::Created, "early", "u1")).await.unwrap();

        let mut stream = bus.subscribe();
        bus.emit(event(PaymentEventKind::Created, "late", "u1")).await.unwrap();

        assert_eq!(recv(&mut stream).await.payment_id(), Some("late"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_emitters_share_one_global_order() {
        const TASKS: usize = 4;
        const PER_TASK: usize = 50;

        let bus = MemoryEventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        let emitters: Vec<_> = (0..TASKS)
            .map(|task| {
                let bus = bus.clone();
                tokio::spawn(async move {
                    for i in 0..PER_TASK {
                        let id = format!("t{task}-{i}");
                        bus.emit(event(PaymentEventKind::StatusChange, &id, "u1")).await.unwrap();
                    }
                })
            })
            .collect();
        for emitter in emitters {
            emitter.await.unwrap();
        }

        let mut seen_first = Vec::new();
        let mut seen_second = Vec::new();
        for _ in 0..TASKS * PER_TASK {
            seen_first.push(recv(&mut first).await.payment_id().map(str::to_owned));
            seen_second.push(recv(&mut second).await.payment_id().map(str::to_owned));
        }
        assert_eq!(seen_first, seen_second);

        // Per-emitter order survives the interleaving.
        for task in 0..TASKS {
            let prefix = format!("t{task}-");
            let own: Vec<_> = seen_first
                .iter()
                .flatten()
                .filter(|id| id.starts_with(&prefix))
                .map(|id| id[prefix.len()..].parse::<usize>().unwrap())
                .collect();
            assert_eq!(own, (0..PER_TASK).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_close_ends_streams_without_error() {
        let bus = MemoryEventBus::new();
        let mut idle = bus.subscribe();
        let mut busy = bus.subscribe_by_user_id("u1");

        bus.emit(event(PaymentEventKind::Created, "p1", "u1")).await.unwrap();
        bus.close().await.unwrap();

        // Buffered events are still delivered before the end.
        assert!(next_within(&mut idle).await.unwrap().is_ok());
        assert!(next_within(&mut idle).await.is_none());
        assert!(next_within(&mut busy).await.unwrap().is_ok());
        assert!(next_within(&mut busy).await.is_none());
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus.is_closed());
    }

    #[tokio::test]
    async fn test_close_wakes_parked_consumer() {
        let bus = MemoryEventBus::new();
        let mut stream = bus.subscribe();

        let consumer = tokio::spawn(async move { stream.next().await.is_none() });
        tokio::task::yield_now().await;
        bus.close().await.unwrap();

        assert!(tokio::time::timeout(ROUND_TRIP, consumer).await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn test_cancel_unregisters_once() {
        let bus = MemoryEventBus::new();
        let mut stream = bus.subscribe();
        let _other = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        stream.cancel();
        stream.cancel();
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(stream.state(), BridgeState::Closed);

        bus.emit(event(PaymentEventKind::Created, "p1", "u1")).await.unwrap();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_adapter_collects_until_close() {
        use futures_util::StreamExt;

        let bus = MemoryEventBus::new();
        let stream = bus.subscribe();

        for id in ["a", "b", "c"] {
            bus.emit(event(PaymentEventKind::Created, id, "u1")).await.unwrap();
        }
        bus.close().await.unwrap();

        let ids: Vec<_> = stream
            .map(|item| item.unwrap().payment_id().map(str::to_owned))
            .collect()
            .await;
        assert_eq!(ids, ["a", "b", "c"].map(|id| Some(id.to_owned())));
    }
}

#[cfg(test)]
mod shared {
    use super::fixtures::*;
    use payflow_events::*;

    #[tokio::test]
    async fn test_emit_round_trips_through_the_broker() {
        let broker = LoopbackBroker::new();
        let bus = shared_bus(&broker).await;
        let mut stream = bus.subscribe();

        bus.emit(event(PaymentEventKind::Created, "p1", "u1")).await.unwrap();
        bus.emit(event(PaymentEventKind::Completed, "p1", "u1")).await.unwrap();

        assert_eq!(recv(&mut stream).await.kind(), PaymentEventKind::Created);
        assert_eq!(recv(&mut stream).await.kind(), PaymentEventKind::Completed);
    }

    #[tokio::test]
    async fn test_instances_on_one_channel_see_each_other() {
        let broker = LoopbackBroker::new();
        let a = shared_bus(&broker).await;
        let b = shared_bus(&broker).await;
        let mut on_b = b.subscribe_by_user_id("u1");

        a.emit(event(PaymentEventKind::Created, "p2", "u2")).await.unwrap();
        a.emit(event(PaymentEventKind::Created, "p1", "u1")).await.unwrap();

        assert_eq!(recv(&mut on_b).await.payment_id(), Some("p1"));
        assert_silent(&mut on_b).await;
    }

    #[tokio::test]
    async fn test_malformed_messages_are_dropped() {
        let broker = LoopbackBroker::new();
        let bus = shared_bus(&broker).await;
        let mut stream = bus.subscribe();

        broker.publish(CHANNEL, "{not json".to_owned()).await.unwrap();
        broker
            .publish(CHANNEL, r#"{"type":"refunded","payment":{},"timestamp":"2024-05-01T10:00:00Z"}"#.to_owned())
            .await
            .unwrap();
        bus.emit(event(PaymentEventKind::Failed, "p9", "u1")).await.unwrap();

        let received = recv(&mut stream).await;
        assert_eq!(received.payment_id(), Some("p9"));
        assert!(!bus.is_closed());
        assert_silent(&mut stream).await;
    }

    #[tokio::test]
    async fn test_foreign_timestamps_are_kept_from_the_wire() {
        let broker = LoopbackBroker::new();
        let bus = shared_bus(&broker).await;
        let mut stream = bus.subscribe();

        broker
            .publish(
                CHANNEL,
                r#"{"type":"created","payment":{"id":"p1"},"timestamp":"2024-05-01T10:00:00.250Z","userId":"u1"}"#
                    .to_owned(),
            )
            .await
            .unwrap();

        let received = recv(&mut stream).await;
        assert_eq!(received.timestamp().to_rfc3339(), "2024-05-01T10:00:00.250+00:00");
    }

    #[tokio::test]
    async fn test_lost_subscription_fails_streams_once() {
        let broker = LoopbackBroker::new();
        let bus = shared_bus(&broker).await;
        let mut stream = bus.subscribe();

        broker.disconnect();

        let err = next_within(&mut stream).await.unwrap().unwrap_err();
        assert!(matches!(err, EventBusError::Upstream { .. }));
        assert!(next_within(&mut stream).await.is_none());

        let err = bus.emit(event(PaymentEventKind::Created, "p1", "u1")).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rejects_emit() {
        let broker = LoopbackBroker::new();
        let bus = shared_bus(&broker).await;
        let mut stream = bus.subscribe();

        bus.close().await.unwrap();
        bus.close().await.unwrap();

        assert!(next_within(&mut stream).await.is_none());
        let err = bus.emit(event(PaymentEventKind::Created, "p1", "u1")).await.unwrap_err();
        assert!(matches!(err, EventBusError::Closed { .. }));
    }
}

#[cfg(test)]
mod hybrid {
    use super::fixtures::*;
    use payflow_events::*;

    #[tokio::test]
    async fn test_emit_is_visible_on_own_subscription() {
        let broker = LoopbackBroker::new();
        let bus = hybrid_bus(&broker, 16).await;
        let mut stream = bus.subscribe();

        bus.emit(event(PaymentEventKind::Created, "p1", "u1")).await.unwrap();

        assert_eq!(recv(&mut stream).await.payment_id(), Some("p1"));
    }

    #[tokio::test]
    async fn test_events_travel_through_the_broker() {
        let broker = LoopbackBroker::new();
        let bus = hybrid_bus(&broker, 16).await;
        let mut raw = broker.subscribe(CHANNEL).await.unwrap();
        let mut local = bus.subscribe();

        bus.emit(event(PaymentEventKind::Created, "p1", "u1")).await.unwrap();

        let wire = tokio::time::timeout(ROUND_TRIP, futures_util::StreamExt::next(&mut raw))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(wire.contains(r#""type":"created""#));
        assert_eq!(recv(&mut local).await.payment_id(), Some("p1"));
    }

    #[tokio::test]
    async fn test_receives_events_from_other_instances() {
        let broker = LoopbackBroker::new();
        let hybrid = hybrid_bus(&broker, 16).await;
        let other = shared_bus(&broker).await;
        let mut u1 = hybrid.subscribe_by_user_id("u1");

        other.emit(event(PaymentEventKind::Completed, "p5", "u1")).await.unwrap();

        assert_eq!(recv(&mut u1).await.kind(), PaymentEventKind::Completed);
    }

    #[tokio::test]
    async fn test_slow_local_subscriber_drops_oldest() {
        let broker = LoopbackBroker::new();
        let bus = hybrid_bus(&broker, 2).await;
        let mut slow = bus.subscribe();
        let mut fast = bus.subscribe();

        for i in 0..5 {
            bus.emit(event(PaymentEventKind::StatusChange, &format!("p{i}"), "u1")).await.unwrap();
            // Keep the fast subscriber within its bound.
            recv(&mut fast).await;
        }

        assert_eq!(slow.pending(), 2);
        assert_eq!(slow.dropped(), 3);
        assert_eq!(recv(&mut slow).await.payment_id(), Some("p3"));
        assert_eq!(recv(&mut slow).await.payment_id(), Some("p4"));
    }

    #[tokio::test]
    async fn test_broker_loss_fails_local_streams() {
        let broker = LoopbackBroker::new();
        let bus = hybrid_bus(&broker, 16).await;
        let mut stream = bus.subscribe();

        broker.disconnect();

        let err = next_within(&mut stream).await.unwrap().unwrap_err();
        assert!(matches!(err, EventBusError::Upstream { .. }));
        assert_eq!(err.to_string().matches("Upstream terminated").count(), 1, "{err}");
        assert!(next_within(&mut stream).await.is_none());
    }

    #[tokio::test]
    async fn test_emit_after_broker_loss_reports_transport_failure() {
        let broker = LoopbackBroker::new();
        let bus = hybrid_bus(&broker, 16).await;
        let mut stream = bus.subscribe();

        broker.disconnect();
        assert!(next_within(&mut stream).await.unwrap().is_err());

        assert!(!bus.is_closed());
        let err = bus.emit(event(PaymentEventKind::Created, "p1", "u1")).await.unwrap_err();
        assert!(err.is_transport(), "{err}");
    }

    #[tokio::test]
    async fn test_concurrent_close_tears_down_once() {
        let broker = LoopbackBroker::new();
        let bus = hybrid_bus(&broker, 16).await;
        let mut stream = bus.subscribe();

        let (first, second) = tokio::join!(bus.close(), bus.close());
        first.unwrap();
        second.unwrap();

        assert!(next_within(&mut stream).await.is_none());
        assert!(bus.shared().is_closed());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_close_tears_down_both_legs() {
        let broker = LoopbackBroker::new();
        let bus = hybrid_bus(&broker, 16).await;
        let mut stream = bus.subscribe();

        bus.close().await.unwrap();
        bus.close().await.unwrap();

        assert!(next_within(&mut stream).await.is_none());
        assert!(bus.is_closed());
        assert!(bus.shared().is_closed());
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus.emit(event(PaymentEventKind::Created, "p1", "u1")).await.is_err());
    }
}

#[cfg(test)]
mod factory {
    use super::fixtures::*;
    use payflow_events::*;

    #[tokio::test]
    async fn test_builds_each_kind_over_a_broker() {
        for kind in [BusKind::Memory, BusKind::SharedBroker, BusKind::Hybrid] {
            let broker = LoopbackBroker::new();
            let bus = PaymentBus::with_broker(&BusConfig::new(kind), broker).await.unwrap();
            assert_eq!(bus.kind(), kind);

            let mut stream = bus.subscribe_by_user_id("u1");
            bus.emit(event(PaymentEventKind::Created, "p1", "u1")).await.unwrap();
            assert_eq!(recv(&mut stream).await.payment_id(), Some("p1"), "{kind}");

            bus.close().await.unwrap();
            assert!(next_within(&mut stream).await.is_none(), "{kind}");
        }
    }

    #[tokio::test]
    async fn test_rejects_invalid_configuration() {
        let config = BusConfig { local_capacity: 0, ..BusConfig::new(BusKind::Hybrid) };
        let err = PaymentBus::with_broker(&config, LoopbackBroker::new()).await.unwrap_err();
        assert!(matches!(err, EventBusError::InvalidConfiguration { .. }));
    }
}
