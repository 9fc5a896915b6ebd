//! Tests for the gateway orchestrator.

use super::*;
use crate::error::SessionError;
use crate::message::GatewayMessage;
use crate::providers::{InMemoryTransport, TransportOperation};
use std::time::Duration;

fn config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.polling.subscriber_min_delay_ms = 1000;
    config.polling.subscriber_max_delay_ms = 1000;
    config.polling.reply_interval_ms = 1000;
    config
}

fn gateway_with(config: GatewayConfig) -> (Arc<InMemoryTransport>, Gateway) {
    let transport = Arc::new(InMemoryTransport::new());
    let gateway = Gateway::new(transport.clone(), config).unwrap();
    (transport, gateway)
}

fn gateway() -> (Arc<InMemoryTransport>, Gateway) {
    gateway_with(config())
}

mod quantities {
    use super::*;

    #[test]
    fn test_normalize_quantity() {
        assert_eq!(normalize_quantity(3), 3);
        assert_eq!(normalize_quantity(-4), 4);
        assert_eq!(normalize_quantity(0), 1);
        assert_eq!(normalize_quantity(i64::MIN), u32::MAX);
    }
}

mod construction {
    use super::*;

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = config();
        config.limits.registry_capacity = 0;

        let result = Gateway::new(Arc::new(InMemoryTransport::new()), config);
        assert!(matches!(result, Err(GatewayError::Configuration(_))));
    }
}

mod validation {
    use super::*;

    #[tokio::test]
    async fn test_quantity_above_maximum_is_rejected() {
        let (transport, gateway) = gateway();

        let result = gateway
            .put("app-1", "Q1", "hello", i64::MAX, &HashMap::new())
            .await;
        assert!(matches!(
            result,
            Err(GatewayError::Validation(ValidationError::OutOfRange { .. }))
        ));

        let result = gateway.publish("app-1", "prices", "tick", i64::MIN).await;
        assert!(matches!(
            result,
            Err(GatewayError::Validation(ValidationError::OutOfRange { .. }))
        ));

        let result = gateway.request("app-1", "REQ", "ping", 1001, None).await;
        assert!(matches!(
            result,
            Err(GatewayError::Validation(ValidationError::OutOfRange { .. }))
        ));
        assert_eq!(transport.operation_count(TransportOperation::Connect), 0);
    }

    #[tokio::test]
    async fn test_quantity_at_maximum_is_accepted() {
        let mut config = config();
        config.limits.max_quantity = 4;
        let (transport, gateway) = gateway_with(config);

        let ids = gateway
            .put("app-1", "Q1", "hello", -4, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(ids.len(), 4);
        assert_eq!(transport.queue_depth("Q1"), 4);

        assert!(gateway
            .put("app-1", "Q1", "hello", 5, &HashMap::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_blank_app_id_is_rejected() {
        let (_transport, gateway) = gateway();

        let result = gateway.put("  ", "Q1", "hello", 1, &HashMap::new()).await;
        assert!(matches!(
            result,
            Err(GatewayError::Validation(ValidationError::Required { .. }))
        ));
    }

    #[tokio::test]
    async fn test_invalid_queue_name_is_rejected() {
        let (transport, gateway) = gateway();

        let result = gateway.get("app-1", "BAD QUEUE", 1, None).await;
        assert!(matches!(result, Err(GatewayError::Validation(_))));
        assert_eq!(transport.operation_count(TransportOperation::Connect), 0);
    }

    #[tokio::test]
    async fn test_invalid_topic_is_rejected() {
        let (_transport, gateway) = gateway();

        let result = gateway.subscribe("app-1", "prices/#").await;
        assert!(matches!(result, Err(GatewayError::Validation(_))));
    }
}

mod point_to_point {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get() {
        let (transport, gateway) = gateway();

        let ids = gateway
            .put("app-1", "Q1", "hello", -3, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(ids.len(), 3);
        // The producer is closed after the put
        assert_eq!(transport.open_connection_count(), 0);

        let messages = gateway.get("app-1", "Q1", 3, None).await.unwrap();
        assert_eq!(messages.len(), 3);
        assert!(messages
            .iter()
            .all(|m| GatewayMessage::from_envelope(m).unwrap().message == "hello"));
        assert_eq!(gateway.registered(FacadeKind::Consumer).await, 1);
    }

    #[tokio::test]
    async fn test_get_with_property_filter() {
        let (_transport, gateway) = gateway();
        for currency in ["USD", "EUR"] {
            let properties = HashMap::from([("currency".to_string(), currency.to_string())]);
            gateway
                .put("app-1", "PRICES", currency, 1, &properties)
                .await
                .unwrap();
        }

        let messages = gateway
            .get(
                "app-1",
                "PRICES",
                10,
                Some(MessageFilter::property("currency", "EUR")),
            )
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
    }
}

mod publish_subscribe {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_then_refresh() {
        let (transport, gateway) = gateway();

        let first = gateway.subscribe("app-1", "prices").await.unwrap();
        assert_eq!(first, SubscribeOutcome::Subscribed);

        let second = gateway.subscribe("app-1", "prices").await.unwrap();
        assert_eq!(second, SubscribeOutcome::Refreshed);

        assert_eq!(gateway.registered(FacadeKind::Subscriber).await, 1);
        assert_eq!(transport.subscription_count("dev//prices"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_subscribe_leaves_no_subscriber() {
        let (transport, gateway) = gateway();
        transport.inject_fault(
            TransportOperation::Subscribe,
            crate::error::TransportError::new(crate::error::ReasonCode::NotAuthorized, "denied"),
        );

        assert!(gateway.subscribe("app-1", "prices").await.is_err());
        assert_eq!(gateway.registered(FacadeKind::Subscriber).await, 0);

        // The next read subscribes afresh instead of reporting an empty stash
        let latest = gateway.latest_message("app-1", "prices").await.unwrap();
        assert_eq!(latest, LatestMessage::Subscribed);
        assert_eq!(transport.subscription_count("dev//prices"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_unknown_app_is_not_found() {
        let (_transport, gateway) = gateway();

        let result = gateway.unsubscribe("nobody").await;
        assert!(matches!(
            result,
            Err(GatewayError::NotFound {
                kind: FacadeKind::Subscriber,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_removes_subscription() {
        let (transport, gateway) = gateway();
        gateway.subscribe("app-1", "prices").await.unwrap();

        gateway.unsubscribe("app-1").await.unwrap();

        assert_eq!(gateway.registered(FacadeKind::Subscriber).await, 0);
        assert_eq!(transport.subscription_count("dev//prices"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latest_message_subscribes_then_delivers() {
        let (_transport, gateway) = gateway();

        let first = gateway.latest_message("app-1", "prices").await.unwrap();
        assert_eq!(first, LatestMessage::Subscribed);

        let empty = gateway.latest_message("app-1", "prices").await.unwrap();
        assert_eq!(empty, LatestMessage::Empty);

        let report = gateway.publish("app-2", "prices", "tick", 1).await.unwrap();
        assert_eq!(report.without_subscribers, 0);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        match gateway.latest_message("app-1", "prices").await.unwrap() {
            LatestMessage::Message(message) => {
                assert_eq!(GatewayMessage::from_envelope(&message).unwrap().message, "tick");
            }
            other => panic!("expected a message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let (_transport, gateway) = gateway();

        let report = gateway.publish("app-1", "prices", "tick", 0).await.unwrap();
        assert_eq!(report.published, 1);
        assert_eq!(report.without_subscribers, 1);
    }
}

mod load_shedding {
    use super::*;

    #[tokio::test]
    async fn test_full_registry_sheds_new_applications() {
        let mut config = config();
        config.limits.registry_capacity = 1;
        let (_transport, gateway) = gateway_with(config);

        gateway.publish("app-1", "prices", "tick", 1).await.unwrap();
        let result = gateway.publish("app-2", "prices", "tick", 1).await;

        let error = result.unwrap_err();
        assert!(matches!(
            error,
            GatewayError::RegistryFull {
                kind: FacadeKind::Publisher,
                capacity: 1
            }
        ));
        assert!(error.is_transient());

        // The registered application keeps working
        gateway.publish("app-1", "prices", "tick", 1).await.unwrap();
    }
}

mod request_response {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_round_trip() {
        let (_transport, gateway) = gateway();

        let descriptor = gateway
            .request("client", "REQ", "ping", 1, None)
            .await
            .unwrap();
        let request = gateway
            .next_request("server", "REQ", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.reply_to.as_deref(), Some(descriptor.name.as_str()));

        gateway
            .respond("server", &descriptor.name, "pong")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let reply = gateway
            .reply_for("client", &descriptor.name)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(GatewayMessage::from_envelope(&reply).unwrap().message, "pong");
    }

    #[tokio::test]
    async fn test_reply_for_unknown_app_is_not_found() {
        let (_transport, gateway) = gateway();

        let result = gateway.reply_for("client", "APP.REPLIES.X").await;
        assert!(matches!(
            result,
            Err(GatewayError::NotFound {
                kind: FacadeKind::Requestor,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_respond_without_responder_is_not_found() {
        let (_transport, gateway) = gateway();

        let result = gateway.respond("server", "APP.REPLIES.X", "pong").await;
        assert!(matches!(
            result,
            Err(GatewayError::NotFound {
                kind: FacadeKind::Responder,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_next_request_replies() {
        let (_transport, gateway) = gateway();
        let descriptor = gateway
            .request("client", "REQ", "ping", 1, Some("alpha"))
            .await
            .unwrap();

        let outcome = gateway
            .process_next_request("server", "REQ", Some("alpha"), |request| {
                GatewayMessage::from_envelope(request)
                    .map(|document| document.message.to_uppercase())
                    .ok_or("not a gateway message")
            })
            .await
            .unwrap();
        assert!(matches!(outcome, ProcessOutcome::Replied(_)));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let reply = gateway
            .reply_for("client", &descriptor.name)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(GatewayMessage::from_envelope(&reply).unwrap().message, "PING");
    }
}

mod shutdown {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_everything() {
        let (transport, gateway) = gateway();
        gateway.subscribe("app-1", "prices").await.unwrap();
        gateway.publish("app-2", "prices", "tick", 1).await.unwrap();
        gateway.request("app-3", "REQ", "ping", 1, None).await.unwrap();
        gateway.next_request("app-4", "REQ", None).await.unwrap();

        gateway.shutdown().await;

        assert_eq!(transport.open_connection_count(), 0);
        assert_eq!(transport.open_object_count(), 0);
        for kind in [
            FacadeKind::Subscriber,
            FacadeKind::Publisher,
            FacadeKind::Consumer,
            FacadeKind::Requestor,
            FacadeKind::Responder,
        ] {
            assert_eq!(gateway.registered(kind).await, 0);
        }
    }

    #[tokio::test]
    async fn test_connect_failure_surfaces_as_session_error() {
        let (transport, gateway) = gateway();
        transport.inject_fault(
            TransportOperation::Connect,
            crate::error::TransportError::new(crate::error::ReasonCode::NotAuthorized, "denied"),
        );

        let result = gateway.get("app-1", "Q1", 1, None).await;
        assert!(matches!(
            result,
            Err(GatewayError::Session(SessionError::ConnectFailed { .. }))
        ));
    }
}
