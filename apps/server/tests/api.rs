pub mod fixtures;

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use axum::http::StatusCode;
    use payflow_events::{EventBus, LoopbackBroker};
    use serde_json::json;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_reports_bus() {
        let (app, _state) = memory_app();

        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["cache-control"], "no-store, no-cache, must-revalidate");

        let body: serde_json::Value = serde_json::from_slice(&read_body(response).await).unwrap();
        assert_eq!(body["status"], "up");
        assert_eq!(body["bus"], "memory");
        assert_eq!(body["subscribers"], 0);
    }

    #[tokio::test]
    async fn test_emitted_event_reaches_user_stream() {
        let (app, state) = memory_app();

        let response = app.clone().oneshot(get("/payments/users/u1/events")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");
        assert_eq!(state.bus().subscriber_count(), 1);
        let mut body = response.into_body();

        let other = json!({"type": "created", "payment": {"id": "p2"}, "userId": "u2"});
        let mine = json!({"type": "statusChange", "payment": {"id": "p1", "status": "confirming"}, "userId": "u1"});
        for payload in [other, mine] {
            let response = app.clone().oneshot(post_json("/payments/events", &payload)).await.unwrap();
            assert_eq!(response.status(), StatusCode::ACCEPTED);
        }

        let chunk = next_chunk(&mut body).await;
        assert!(chunk.contains("event: statusChange"), "{chunk}");
        let data = chunk
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .expect("data line");
        let view: serde_json::Value = serde_json::from_str(data).unwrap();
        assert_eq!(view["type"], "statusChange");
        assert_eq!(view["payment"]["id"], "p1");
        assert!(view["timestamp"].is_string());
        assert!(view.get("userId").is_none());

        drop(body);
        assert_eq!(state.bus().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_all_events_stream_ends_on_close() {
        let (app, state) = memory_app();

        let response = app.clone().oneshot(get("/payments/events")).await.unwrap();
        let mut body = response.into_body();

        let payload = json!({"type": "completed", "payment": {"id": "p9"}});
        app.clone().oneshot(post_json("/payments/events", &payload)).await.unwrap();
        assert!(next_chunk(&mut body).await.contains("event: completed"));

        state.bus().close().await.unwrap();
        let end = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            http_body_util::BodyExt::frame(&mut body),
        )
        .await
        .unwrap();
        assert!(end.is_none(), "stream should end after close");
    }

    #[tokio::test]
    async fn test_emit_after_close_is_unavailable() {
        let (app, state) = memory_app();
        state.bus().close().await.unwrap();

        let payload = json!({"type": "failed", "payment": {"id": "p1"}});
        let response = app.oneshot(post_json("/payments/events", &payload)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body: serde_json::Value = serde_json::from_slice(&read_body(response).await).unwrap();
        assert!(body["error"].as_str().unwrap().contains("closed"));
    }

    #[tokio::test]
    async fn test_rejects_unknown_event_type() {
        let (app, _state) = memory_app();

        let payload = json!({"type": "refunded", "payment": {"id": "p1"}});
        let response = app.oneshot(post_json("/payments/events", &payload)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_hybrid_bus_round_trips_over_http() {
        let broker = LoopbackBroker::new();
        let (app, state) = hybrid_app(&broker).await;

        let response = app.clone().oneshot(get("/payments/events")).await.unwrap();
        let mut body = response.into_body();

        let payload = json!({"type": "created", "payment": {"id": "p1"}, "userId": "u1"});
        let response = app.clone().oneshot(post_json("/payments/events", &payload)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(next_chunk(&mut body).await.contains(r#""id":"p1""#));

        broker.disconnect();
        let response = app.oneshot(post_json("/payments/events", &payload)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.bus().close().await.unwrap();
    }
}
