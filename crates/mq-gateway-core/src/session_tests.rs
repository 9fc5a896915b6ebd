//! Tests for transport sessions.

use super::*;
use crate::error::ReasonCode;
use crate::providers::{InMemoryTransport, TransportOperation};
use crate::transport::MockQueueTransport;

fn memory_session() -> (Arc<InMemoryTransport>, TransportSession) {
    let transport = Arc::new(InMemoryTransport::new());
    let session = TransportSession::new(transport.clone(), Arc::new(GatewayConfig::default()));
    (transport, session)
}

fn mock_session(mock: MockQueueTransport) -> TransportSession {
    TransportSession::new(Arc::new(mock), Arc::new(GatewayConfig::default()))
}

// ============================================================================
// Connect and Open
// ============================================================================

mod connect_and_open {
    use super::*;

    /// Verify that connecting twice reuses the first connection.
    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let (transport, session) = memory_session();

        session.connect().await.unwrap();
        session.connect().await.unwrap();

        assert_eq!(transport.operation_count(TransportOperation::Connect), 1);
        assert!(session.is_healthy().await);
    }

    /// Verify that open never reconnects implicitly.
    #[tokio::test]
    async fn test_open_requires_connection() {
        let (transport, session) = memory_session();

        let err = session.open(OpenKind::Put, "Q1").await.unwrap_err();
        assert!(matches!(err, SessionError::NotConnected));
        assert_eq!(transport.operation_count(TransportOperation::Connect), 0);
    }

    /// Verify that a connect failure marks the session unhealthy and a retry recovers.
    #[tokio::test]
    async fn test_connect_failure_marks_unhealthy() {
        let (transport, session) = memory_session();
        transport.inject_fault(
            TransportOperation::Connect,
            TransportError::new(ReasonCode::Other(2538), "host not available"),
        );

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, SessionError::ConnectFailed { .. }));
        assert!(!session.is_healthy().await);
        assert!(!session.is_ready().await);

        session.ensure_open(OpenKind::Put, "Q1").await.unwrap();
        assert!(session.is_ready().await);
    }

    /// Verify that an open failure releases the connection.
    #[tokio::test]
    async fn test_open_failure_releases_connection() {
        let (transport, session) = memory_session();
        transport.inject_fault(
            TransportOperation::Open,
            TransportError::new(ReasonCode::UnknownObjectName, "NO.SUCH.QUEUE"),
        );

        session.connect().await.unwrap();
        let err = session.open(OpenKind::Get, "NO.SUCH.QUEUE").await.unwrap_err();

        assert_eq!(err.reason(), Some(ReasonCode::UnknownObjectName));
        assert!(!session.is_healthy().await);
        assert_eq!(transport.open_connection_count(), 0);
    }

    /// Verify that ensure_open reuses a handle bound to the same target.
    #[tokio::test]
    async fn test_ensure_open_reuses_binding() {
        let (transport, session) = memory_session();

        session.ensure_open(OpenKind::Put, "Q1").await.unwrap();
        session.ensure_open(OpenKind::Put, "Q1").await.unwrap();
        assert_eq!(transport.operation_count(TransportOperation::Open), 1);

        session.ensure_open(OpenKind::Put, "Q2").await.unwrap();
        assert_eq!(transport.operation_count(TransportOperation::Open), 2);
        assert_eq!(transport.operation_count(TransportOperation::Close), 1);
        assert_eq!(session.bound_target().await.as_deref(), Some("Q2"));
    }

    /// Verify that publish targets carry the configured topic prefix.
    #[tokio::test]
    async fn test_publish_opens_prefixed_topic() {
        let (transport, session) = memory_session();
        let name = session.ensure_open(OpenKind::Publish, "prices").await.unwrap();
        assert_eq!(name, "dev//prices");
        assert_eq!(session.bound_target().await.as_deref(), Some("prices"));
        assert_eq!(transport.open_object_count(), 1);
    }

    /// Verify that concurrent callers on one session share one connect-open sequence.
    #[tokio::test]
    async fn test_concurrent_ensure_open_serializes() {
        let (transport, session) = memory_session();
        let session = Arc::new(session);

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let session = session.clone();
                tokio::spawn(async move { session.ensure_open(OpenKind::Put, "Q1").await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(transport.operation_count(TransportOperation::Connect), 1);
        assert_eq!(transport.operation_count(TransportOperation::Open), 1);
    }
}

// ============================================================================
// Messaging
// ============================================================================

mod messaging {
    use super::*;

    #[tokio::test]
    async fn test_get_returns_fewer_when_queue_runs_dry() {
        let (_transport, session) = memory_session();
        session.ensure_open(OpenKind::Put, "Q1").await.unwrap();
        session.put(&OutboundMessage::text("a"), false).await.unwrap();
        session.put(&OutboundMessage::text("b"), false).await.unwrap();

        session.ensure_open(OpenKind::Get, "Q1").await.unwrap();
        let messages = session.get(5, &GetOptions::default()).await.unwrap();
        assert_eq!(messages.len(), 2);

        let none = session.get(5, &GetOptions::default()).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_put_without_open_handle() {
        let (_transport, session) = memory_session();
        session.connect().await.unwrap();
        let err = session
            .put(&OutboundMessage::text("a"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotOpen { .. }));
    }

    /// Verify that a broken connection marks the session unhealthy and the
    /// next ensure_open reconnects.
    #[tokio::test]
    async fn test_broken_connection_recovers_on_next_open() {
        let (transport, session) = memory_session();
        session.ensure_open(OpenKind::Get, "Q1").await.unwrap();

        transport.break_connections();
        let err = session.get(1, &GetOptions::default()).await.unwrap_err();
        assert_eq!(err.reason(), Some(ReasonCode::ConnectionBroken));
        assert!(!session.is_healthy().await);

        session.ensure_open(OpenKind::Get, "Q1").await.unwrap();
        assert!(session.is_ready().await);
        assert_eq!(transport.operation_count(TransportOperation::Connect), 2);
        assert_eq!(transport.open_connection_count(), 1);
    }

    /// Verify that put_to joins the unit of work of an earlier syncpoint get.
    #[tokio::test]
    async fn test_put_to_joins_unit_of_work() {
        let (transport, session) = memory_session();
        session.ensure_open(OpenKind::Put, "REQUESTS").await.unwrap();
        session.put(&OutboundMessage::text("req"), false).await.unwrap();

        session.ensure_open(OpenKind::Get, "REQUESTS").await.unwrap();
        let received = session
            .get(1, &GetOptions::default().with_syncpoint())
            .await
            .unwrap();
        assert_eq!(received.len(), 1);
        session
            .put_to("REPLIES", &OutboundMessage::text("reply"), true)
            .await
            .unwrap();

        session.rollback().await.unwrap();
        assert_eq!(transport.queue_depth("REPLIES"), 0);
        assert_eq!(transport.queue_depth("REQUESTS"), 1);

        session
            .get(1, &GetOptions::default().with_syncpoint())
            .await
            .unwrap();
        session
            .put_to("REPLIES", &OutboundMessage::text("reply"), true)
            .await
            .unwrap();
        session.commit().await.unwrap();
        assert_eq!(transport.queue_depth("REPLIES"), 1);
        assert_eq!(transport.queue_depth("REQUESTS"), 0);
    }

    #[tokio::test]
    async fn test_dynamic_put_creates_distinct_reply_queues() {
        let (transport, session) = memory_session();

        let first = session.ensure_open(OpenKind::DynamicPut, "REQUESTS").await.unwrap();
        let second = session.ensure_open(OpenKind::DynamicPut, "REQUESTS").await.unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with("APP.REPLIES."));
        assert_eq!(session.dynamic_queue_names().await.len(), 2);

        session.close_dynamic(&first).await;
        assert!(!transport.queue_exists(&first));
        assert_eq!(session.dynamic_queue_names().await, vec![second.clone()]);

        let err = session
            .get_from_dynamic(&first, 1, &GetOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotOpen { .. }));
        assert!(session
            .get_from_dynamic(&second, 1, &GetOptions::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_receives_publications() {
        let factory = SessionFactory::new(
            Arc::new(InMemoryTransport::new()),
            Arc::new(GatewayConfig::default()),
        );
        let session = factory.create_session();
        session.subscribe("prices").await.unwrap();

        let publisher = factory.create_session();
        publisher.ensure_open(OpenKind::Publish, "prices").await.unwrap();
        publisher.put(&OutboundMessage::text("42"), false).await.unwrap();

        let received = session.get(1, &GetOptions::default()).await.unwrap();
        assert_eq!(received[0].body_text(), Some("42"));
    }
}

// ============================================================================
// Cleanup
// ============================================================================

mod cleanup {
    use super::*;

    /// Verify that cleanup on a session with nothing open succeeds.
    #[tokio::test]
    async fn test_cleanup_without_handles_is_noop() {
        let (transport, session) = memory_session();
        session.cleanup().await.unwrap();
        session.cleanup().await.unwrap();

        assert_eq!(transport.operation_count(TransportOperation::Close), 0);
        assert_eq!(transport.operation_count(TransportOperation::Disconnect), 0);
    }

    #[tokio::test]
    async fn test_cleanup_releases_everything() {
        let (transport, session) = memory_session();
        session.ensure_open(OpenKind::DynamicPut, "REQUESTS").await.unwrap();
        assert!(session.is_ready().await);

        session.cleanup().await.unwrap();
        assert!(!session.is_ready().await);
        assert_eq!(transport.open_connection_count(), 0);
        assert_eq!(transport.open_object_count(), 0);
        assert!(session.bound_target().await.is_none());
    }

    /// Verify that a failing close does not stop the disconnect.
    #[tokio::test]
    async fn test_cleanup_attempts_every_step() {
        let mut mock = MockQueueTransport::new();
        mock.expect_connect()
            .times(1)
            .returning(|_| Ok(ConnectionHandle::new(1)));
        mock.expect_open()
            .times(1)
            .returning(|_, _| Ok(ObjectHandle::new(2, 1, "Q1")));
        mock.expect_close().times(1).returning(|_| {
            Err(TransportError::new(
                ReasonCode::ObjectHandleInvalid,
                "already closed",
            ))
        });
        mock.expect_disconnect()
            .times(1)
            .returning(|_| Err(TransportError::new(ReasonCode::ConnectionBroken, "gone")));

        let session = mock_session(mock);
        session.ensure_open(OpenKind::Put, "Q1").await.unwrap();

        assert!(session.cleanup().await.is_ok());
        assert!(!session.is_ready().await);
    }

    /// Verify that a put failing with a connection-invalidating reason marks the session unhealthy.
    #[tokio::test]
    async fn test_put_failure_marks_unhealthy() {
        let mut mock = MockQueueTransport::new();
        mock.expect_connect()
            .returning(|_| Ok(ConnectionHandle::new(1)));
        mock.expect_open()
            .returning(|_, _| Ok(ObjectHandle::new(2, 1, "Q1")));
        mock.expect_put()
            .times(1)
            .returning(|_, _, _| Err(TransportError::new(ReasonCode::ConnectionBroken, "reset")));

        let session = mock_session(mock);
        session.ensure_open(OpenKind::Put, "Q1").await.unwrap();

        let err = session
            .put(&OutboundMessage::text("x"), false)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), Some(ReasonCode::ConnectionBroken));
        assert!(!session.is_healthy().await);
        assert!(!session.is_ready().await);
    }
}
