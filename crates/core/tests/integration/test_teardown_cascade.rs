//! Integration tests for teardown cascades and races with in-flight operations

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use roomcast_core::engine::TransportHints;
use roomcast_core::{
    ErrorKind, MediaKind, Notification, SessionConfig, SessionStats, TransportDirection,
};

#[tokio::test]
async fn test_disconnect_notifies_consumers_and_resume_is_not_found() {
    let fx = fixture();
    let a = join(&fx);
    let mut b = join(&fx);
    let (_, p1) = publish(&fx, &a, MediaKind::Video).await;

    connected_transport(&fx, &b, TransportDirection::Subscribe).await;
    let caps = fx.session.capabilities().clone();
    let consumption = fx
        .session
        .create_consumption(b.id, None, p1, caps)
        .await
        .unwrap();

    assert!(fx.session.unregister(a.id).await);

    let notifications = b.drain();
    assert_eq!(
        notifications,
        vec![Notification::ProducerClosed {
            production_id: p1,
            consumption_id: consumption.consumption_id,
        }]
    );

    // Deregistered before the notification went out
    assert!(fx.session.production(&p1).is_none());
    assert_eq!(fx.session.consumption_state(&consumption.consumption_id).await, None);

    let err = fx
        .session
        .resume(b.id, consumption.consumption_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFoundError);

    // B keeps its subscribe transport
    assert_eq!(
        fx.session.stats(),
        SessionStats {
            participants: 1,
            transports: 1,
            productions: 0,
            consumptions: 0,
        }
    );
    assert_eq!(fx.engine.consumer_count(), 0);
    assert_eq!(fx.engine.producer_count(), 0);
}

#[tokio::test]
async fn test_unregister_twice_is_idempotent() {
    let fx = fixture();
    let a = join(&fx);
    publish(&fx, &a, MediaKind::Audio).await;
    connected_transport(&fx, &a, TransportDirection::Subscribe).await;
    assert_eq!(fx.engine.ports_in_use(), 2);

    assert!(fx.session.unregister(a.id).await);
    assert!(!fx.session.unregister(a.id).await);

    assert_eq!(fx.session.stats(), SessionStats::default());
    assert_eq!(fx.engine.ports_in_use(), 0);
    assert_eq!(fx.engine.transport_count(), 0);
    assert!(fx.session.participant_for_connection(&a.connection).is_none());
}

#[tokio::test]
async fn test_concurrent_unregister_runs_teardown_once() {
    let fx = fixture();
    let a = join(&fx);
    publish(&fx, &a, MediaKind::Video).await;

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let session = Arc::clone(&fx.session);
            let id = a.id;
            tokio::spawn(async move { session.unregister(id).await })
        })
        .collect();

    let mut performed = 0;
    for h in handles {
        if h.await.unwrap() {
            performed += 1;
        }
    }
    assert_eq!(performed, 1);
    assert_eq!(fx.session.stats(), SessionStats::default());
}

#[tokio::test]
async fn test_end_production_notifies_every_consumer() {
    let fx = fixture();
    let a = join(&fx);
    let mut b = join(&fx);
    let mut c = join(&fx);
    let (_, p1) = publish(&fx, &a, MediaKind::Video).await;
    let caps = fx.session.capabilities().clone();

    let mut consumption_ids = Vec::new();
    for peer in [&b, &c] {
        connected_transport(&fx, peer, TransportDirection::Subscribe).await;
        let descriptor = fx
            .session
            .create_consumption(peer.id, None, p1, caps.clone())
            .await
            .unwrap();
        consumption_ids.push(descriptor.consumption_id);
    }

    let err = fx.session.end_production(b.id, p1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionError);

    fx.session.end_production(a.id, p1).await.unwrap();
    assert_eq!(
        b.drain(),
        vec![Notification::ProducerClosed {
            production_id: p1,
            consumption_id: consumption_ids[0],
        }]
    );
    assert_eq!(
        c.drain(),
        vec![Notification::ProducerClosed {
            production_id: p1,
            consumption_id: consumption_ids[1],
        }]
    );
    assert!(fx.session.participant(&b.id).unwrap().consumption_ids().is_empty());

    let err = fx.session.end_production(a.id, p1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFoundError);
}

#[tokio::test]
async fn test_closing_subscribe_transport_drops_its_consumptions_silently() {
    let fx = fixture();
    let a = join(&fx);
    let mut b = join(&fx);
    let (_, p1) = publish(&fx, &a, MediaKind::Audio).await;

    let recv = connected_transport(&fx, &b, TransportDirection::Subscribe).await;
    let caps = fx.session.capabilities().clone();
    fx.session
        .create_consumption(b.id, Some(recv), p1, caps)
        .await
        .unwrap();

    fx.session.close_transport(b.id, recv).await.unwrap();

    assert!(b.drain().is_empty());
    assert_eq!(fx.session.stats().consumptions, 0);
    assert!(fx.session.production(&p1).is_some());

    let err = fx.session.close_transport(b.id, recv).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFoundError);
}

#[tokio::test]
async fn test_consumer_leaving_keeps_production_alive() {
    let fx = fixture();
    let mut a = join(&fx);
    let b = join(&fx);
    let (_, p1) = publish(&fx, &a, MediaKind::Video).await;

    connected_transport(&fx, &b, TransportDirection::Subscribe).await;
    let caps = fx.session.capabilities().clone();
    fx.session
        .create_consumption(b.id, None, p1, caps)
        .await
        .unwrap();

    fx.session.unregister(b.id).await;

    assert!(a.drain().is_empty());
    assert!(fx.session.production(&p1).is_some());
    assert_eq!(fx.session.stats().consumptions, 0);
}

#[tokio::test]
async fn test_unregister_during_connect_waits_then_releases() {
    let mut config = SessionConfig::default();
    config.webrtc_transport.handshake_latency_ms = 50;
    let fx = fixture_with(config);
    let a = join(&fx);

    let transport = fx
        .session
        .create_transport(a.id, TransportDirection::Publish, TransportHints::default())
        .await
        .unwrap()
        .transport_id;

    let connect = {
        let session = Arc::clone(&fx.session);
        let id = a.id;
        tokio::spawn(async move { session.connect_transport(id, transport, client_dtls()).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;

    // The in-flight connect completes on its own; teardown follows
    fx.session.unregister(a.id).await;
    assert!(connect.await.unwrap().is_ok());

    assert_eq!(fx.session.transport_state(&transport).await, None);
    assert_eq!(fx.engine.ports_in_use(), 0);
}

#[tokio::test]
async fn test_consume_racing_end_production_never_dangles() {
    let fx = fixture();
    let a = join(&fx);
    let b = join(&fx);
    connected_transport(&fx, &b, TransportDirection::Subscribe).await;
    let caps = fx.session.capabilities().clone();

    for _ in 0..20 {
        let (_, production) = publish(&fx, &a, MediaKind::Audio).await;

        let consume = {
            let session = Arc::clone(&fx.session);
            let caps = caps.clone();
            let id = b.id;
            tokio::spawn(async move { session.create_consumption(id, None, production, caps).await })
        };
        let end = {
            let session = Arc::clone(&fx.session);
            let id = a.id;
            tokio::spawn(async move { session.end_production(id, production).await })
        };

        let consumed = consume.await.unwrap();
        end.await.unwrap().unwrap();

        if let Err(e) = consumed {
            assert_eq!(e.kind(), ErrorKind::IncompatibleOrPreconditionError);
        }
        assert_eq!(fx.session.stats().consumptions, 0);
        assert_eq!(fx.engine.consumer_count(), 0);
    }
}

#[tokio::test]
async fn test_dead_engine_fails_operations_gracefully() {
    let fx = fixture();
    let a = join(&fx);
    let (_, p1) = publish(&fx, &a, MediaKind::Video).await;

    fx.engine.kill("worker exited");

    let err = fx
        .session
        .create_transport(a.id, TransportDirection::Subscribe, TransportHints::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EngineAllocationError);

    // Teardown still runs to completion without the engine
    assert!(fx.session.unregister(a.id).await);
    assert!(fx.session.production(&p1).is_none());
    assert_eq!(fx.session.stats(), SessionStats::default());
}
