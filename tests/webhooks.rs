//! Integration tests for webhook notifications.
//!
//! These tests verify:
//! 1. Token lifecycle events are correctly constructed
//! 2. Delivery headers (delivery id, event type, HMAC signature) are set
//! 3. Retry behavior on server errors
//! 4. Fire-and-forget dispatch to multiple endpoints
//!
//! The retry test sleeps through the 1s + 5s + 25s back-off schedule, so the
//! suite takes about half a minute.

mod event_tests {
    use rankpilot::notification::webhook::WebhookEvent;
    use uuid::Uuid;

    #[test]
    fn test_token_generated_event_has_correct_fields() {
        let pid = Uuid::new_v4();
        let event = WebhookEvent::token_generated("rp_bm_abc123", pid, 10);

        assert_eq!(event.event_type, "token_generated");
        assert_eq!(event.token, "rp_bm_abc123");
        assert_eq!(event.project_id, pid.to_string());
        assert_eq!(event.details["max_usage"], 10);
        assert!(!event.timestamp.is_empty());
    }

    #[test]
    fn test_token_exhausted_event_has_correct_fields() {
        let pid = Uuid::new_v4();
        let event = WebhookEvent::token_exhausted("rp_bm_spent", pid, 100);

        assert_eq!(event.event_type, "token_exhausted");
        assert_eq!(event.token, "rp_bm_spent");
        assert_eq!(event.details["max_usage"], 100);
    }

    #[test]
    fn test_webhook_event_json_structure() {
        let event = WebhookEvent::token_generated("rp_bm_t", Uuid::new_v4(), 5);
        let json = serde_json::to_value(&event).unwrap();

        assert!(json.get("event_type").is_some());
        assert!(json.get("timestamp").is_some());
        assert!(json.get("token").is_some());
        assert!(json.get("project_id").is_some());
        assert!(json.get("details").is_some());

        // Timestamp is RFC3339
        let timestamp = json["timestamp"].as_str().unwrap();
        assert!(
            chrono::DateTime::parse_from_rfc3339(timestamp).is_ok(),
            "timestamp should be valid RFC3339: {}",
            timestamp
        );
    }
}

mod notifier_tests {
    use rankpilot::notification::webhook::{WebhookEvent, WebhookNotifier};
    use uuid::Uuid;

    #[test]
    fn test_notifier_creation() {
        let _unsigned = WebhookNotifier::new(None);
        let _signed = WebhookNotifier::new(Some("whsec_test".into()));
        let _default = WebhookNotifier::default();
    }

    #[tokio::test]
    async fn test_dispatch_with_empty_urls_is_noop() {
        let notifier = WebhookNotifier::new(None);
        let event = WebhookEvent::token_generated("rp_bm_t", Uuid::new_v4(), 10);
        notifier.dispatch(&[], event).await;
    }

    /// Dispatch to an unreachable URL must not panic (fire-and-forget).
    #[tokio::test]
    async fn test_dispatch_to_invalid_url_handles_gracefully() {
        let notifier = WebhookNotifier::new(None);
        let event = WebhookEvent::token_exhausted("rp_bm_t", Uuid::new_v4(), 1);

        notifier
            .dispatch(&["http://localhost:1/nonexistent".to_string()], event)
            .await;

        // Give the spawned task time to complete
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }

    // ── Wiremock Integration: verifies actual HTTP delivery ───

    #[tokio::test]
    async fn test_webhook_delivers_correct_payload_to_endpoint() {
        use wiremock::matchers::{body_partial_json, header_exists, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/webhook"))
            .and(header_exists("x-rankpilot-delivery-id"))
            .and(header_exists("x-rankpilot-timestamp"))
            .and(body_partial_json(serde_json::json!({
                "event_type": "token_generated",
                "token": "rp_bm_wire",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let notifier = WebhookNotifier::new(None);
        let event = WebhookEvent::token_generated("rp_bm_wire", Uuid::new_v4(), 10);

        let url = format!("{}/webhook", mock_server.uri());
        notifier.send(&url, &event).await.unwrap();
    }

    #[tokio::test]
    async fn test_signed_delivery_includes_signature_header() {
        use wiremock::matchers::{header_exists, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/signed"))
            .and(header_exists("x-rankpilot-signature"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let notifier = WebhookNotifier::new(Some("whsec_secret".into()));
        let event = WebhookEvent::token_exhausted("rp_bm_sig", Uuid::new_v4(), 10);

        let url = format!("{}/signed", mock_server.uri());
        notifier.send(&url, &event).await.unwrap();
    }

    #[tokio::test]
    async fn test_unsigned_delivery_omits_signature_header() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/unsigned"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let notifier = WebhookNotifier::new(None);
        let event = WebhookEvent::token_generated("rp_bm_nosig", Uuid::new_v4(), 10);

        let url = format!("{}/unsigned", mock_server.uri());
        notifier.send(&url, &event).await.unwrap();

        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].headers.get("x-rankpilot-signature").is_none());
    }

    #[tokio::test]
    async fn test_dispatch_to_multiple_urls() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server1 = MockServer::start().await;
        let server2 = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/hook1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server1)
            .await;

        Mock::given(method("POST"))
            .and(path("/hook2"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server2)
            .await;

        let notifier = WebhookNotifier::new(None);
        let event = WebhookEvent::token_generated("rp_bm_multi", Uuid::new_v4(), 10);

        let urls = vec![
            format!("{}/hook1", server1.uri()),
            format!("{}/hook2", server2.uri()),
        ];

        notifier.dispatch(&urls, event).await;

        // Give spawned tasks time to complete
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    }

    #[tokio::test]
    async fn test_webhook_retries_on_server_error() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/fail"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            // Original request plus 3 retries = 4 requests
            .expect(4)
            .mount(&mock_server)
            .await;

        let notifier = WebhookNotifier::new(None);
        let event = WebhookEvent::token_exhausted("rp_bm_fail", Uuid::new_v4(), 1);

        let url = format!("{}/fail", mock_server.uri());
        let result = notifier.send(&url, &event).await;
        assert!(result.is_err(), "send should fail after exhausting retries");
    }
}
