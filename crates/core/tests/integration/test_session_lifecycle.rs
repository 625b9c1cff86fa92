//! Integration tests for the transport → produce → consume → resume lifecycle

mod common;

use std::sync::Arc;

use common::*;
use roomcast_core::capabilities::RtpCodecCapability;
use roomcast_core::engine::{ConsumerType, DtlsParameters, DtlsRole, TransportHints};
use roomcast_core::session::{outbox, ConsumptionState, TransportState};
use roomcast_core::{
    CapabilitySet, ConnectionId, Error, ErrorKind, MediaKind, Notification, SessionConfig,
    TransportDirection,
};

#[tokio::test]
async fn test_register_twice_on_same_connection_fails() {
    let fx = fixture();
    let connection = ConnectionId::new();
    let (tx, _rx) = outbox(8);
    fx.session.register(connection, tx.clone()).unwrap();

    let err = fx.session.register(connection, tx).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RegistrationError);
    assert_eq!(fx.session.stats().participants, 1);
}

#[tokio::test]
async fn test_transport_state_progression() {
    let fx = fixture();
    let a = join(&fx);

    let descriptor = fx
        .session
        .create_transport(a.id, TransportDirection::Publish, TransportHints::default())
        .await
        .unwrap();
    assert!(!descriptor.ice_candidates.is_empty());
    assert_eq!(descriptor.dtls_parameters.fingerprints[0].algorithm, "sha-256");
    assert_eq!(
        fx.session.transport_state(&descriptor.transport_id).await,
        Some(TransportState::New)
    );

    fx.session
        .connect_transport(a.id, descriptor.transport_id, client_dtls())
        .await
        .unwrap();
    assert_eq!(
        fx.session.transport_state(&descriptor.transport_id).await,
        Some(TransportState::Connected)
    );
}

#[tokio::test]
async fn test_produce_before_connect_is_precondition_error() {
    let fx = fixture();
    let a = join(&fx);

    let descriptor = fx
        .session
        .create_transport(a.id, TransportDirection::Publish, TransportHints::default())
        .await
        .unwrap();

    let err = fx
        .session
        .create_production(a.id, descriptor.transport_id, MediaKind::Video, vp8_params())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionError);
    assert_eq!(fx.session.stats().productions, 0);
    assert_eq!(fx.engine.producer_count(), 0);
}

#[tokio::test]
async fn test_produce_requires_owned_publish_transport() {
    let fx = fixture();
    let a = join(&fx);
    let b = join(&fx);

    let subscribe = connected_transport(&fx, &a, TransportDirection::Subscribe).await;
    let err = fx
        .session
        .create_production(a.id, subscribe, MediaKind::Audio, opus_params())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Precondition(_)));

    let publish = connected_transport(&fx, &a, TransportDirection::Publish).await;
    let err = fx
        .session
        .create_production(b.id, publish, MediaKind::Audio, opus_params())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Precondition(_)));
}

#[tokio::test]
async fn test_produce_rejects_kind_mismatch() {
    let fx = fixture();
    let a = join(&fx);
    let publish = connected_transport(&fx, &a, TransportDirection::Publish).await;

    let err = fx
        .session
        .create_production(a.id, publish, MediaKind::Video, opus_params())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionError);
    assert!(fx.session.productions().is_empty());
}

#[tokio::test]
async fn test_double_connect_is_invalid_state() {
    let fx = fixture();
    let a = join(&fx);
    let transport = connected_transport(&fx, &a, TransportDirection::Publish).await;

    let err = fx
        .session
        .connect_transport(a.id, transport, client_dtls())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateError);
    assert_eq!(
        fx.session.transport_state(&transport).await,
        Some(TransportState::Connected)
    );
}

#[tokio::test]
async fn test_concurrent_connects_serialize() {
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

    let first = {
        let session = Arc::clone(&fx.session);
        let id = a.id;
        tokio::spawn(async move { session.connect_transport(id, transport, client_dtls()).await })
    };
    let second = {
        let session = Arc::clone(&fx.session);
        let id = a.id;
        tokio::spawn(async move { session.connect_transport(id, transport, client_dtls()).await })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(Error::InvalidState(_)))));
}

#[tokio::test]
async fn test_produce_waits_for_pending_connect() {
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
    tokio::task::yield_now().await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    // Blocks on the lifecycle lock until the handshake resolves
    let produced = fx
        .session
        .create_production(a.id, transport, MediaKind::Video, vp8_params())
        .await;
    connect.await.unwrap().unwrap();
    assert!(produced.is_ok());
}

#[tokio::test]
async fn test_failed_handshake_tears_transport_down() {
    let fx = fixture();
    let a = join(&fx);

    let transport = fx
        .session
        .create_transport(a.id, TransportDirection::Publish, TransportHints::default())
        .await
        .unwrap()
        .transport_id;
    assert_eq!(fx.engine.ports_in_use(), 1);

    let bad = DtlsParameters {
        role: DtlsRole::Client,
        fingerprints: vec![],
    };
    let err = fx
        .session
        .connect_transport(a.id, transport, bad)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EngineAllocationError);

    assert_eq!(fx.session.transport_state(&transport).await, None);
    assert_eq!(fx.engine.ports_in_use(), 0);
    assert!(fx.session.participant(&a.id).unwrap().transport_ids().is_empty());
}

#[tokio::test]
async fn test_port_exhaustion_is_engine_allocation_error() {
    let mut config = SessionConfig::default();
    config.worker.rtc_min_port = 42000;
    config.worker.rtc_max_port = 42000;
    let fx = fixture_with(config);
    let a = join(&fx);

    fx.session
        .create_transport(a.id, TransportDirection::Publish, TransportHints::default())
        .await
        .unwrap();
    let err = fx
        .session
        .create_transport(a.id, TransportDirection::Subscribe, TransportHints::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EngineAllocationError);
    assert!(err.is_retryable());
    assert_eq!(fx.session.stats().transports, 1);
}

#[tokio::test]
async fn test_late_joiner_scenario() {
    let fx = fixture();
    let a = join(&fx);
    let (_, p1) = publish(&fx, &a, MediaKind::Video).await;

    // B joins after the production exists and discovers it from the snapshot
    let b = join(&fx);
    let known = fx.session.productions();
    assert_eq!(known.len(), 1);
    assert_eq!(known[0].production_id, p1);
    assert_eq!(known[0].participant_id, a.id);
    assert!(matches!(
        known[0].announcement(),
        Notification::NewProducer { production_id, .. } if production_id == p1
    ));

    let recv = connected_transport(&fx, &b, TransportDirection::Subscribe).await;
    let caps = fx.session.capabilities().clone();
    let consumption = fx
        .session
        .create_consumption(b.id, Some(recv), p1, caps)
        .await
        .unwrap();
    assert_eq!(consumption.kind, MediaKind::Video);
    assert!(consumption.paused);
    assert_eq!(consumption.consumer_type, ConsumerType::Simple);
    assert_eq!(
        fx.session.consumption_state(&consumption.consumption_id).await,
        Some(ConsumptionState::Paused)
    );

    fx.session
        .resume(b.id, consumption.consumption_id)
        .await
        .unwrap();
    assert_eq!(
        fx.session.consumption_state(&consumption.consumption_id).await,
        Some(ConsumptionState::Active)
    );

    // Resuming an active consumption is a no-op
    fx.session
        .resume(b.id, consumption.consumption_id)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_audio_consumption_starts_active() {
    let fx = fixture();
    let a = join(&fx);
    let b = join(&fx);
    let (_, p1) = publish(&fx, &a, MediaKind::Audio).await;

    connected_transport(&fx, &b, TransportDirection::Subscribe).await;
    let caps = fx.session.capabilities().clone();
    let consumption = fx
        .session
        .create_consumption(b.id, None, p1, caps)
        .await
        .unwrap();
    assert_eq!(consumption.kind, MediaKind::Audio);
    assert!(!consumption.paused);
    assert_eq!(
        fx.session.consumption_state(&consumption.consumption_id).await,
        Some(ConsumptionState::Active)
    );
}

#[tokio::test]
async fn test_disjoint_capabilities_create_nothing() {
    let fx = fixture();
    let a = join(&fx);
    let b = join(&fx);
    let (_, p1) = publish(&fx, &a, MediaKind::Video).await;
    let recv = connected_transport(&fx, &b, TransportDirection::Subscribe).await;

    let opus_only = CapabilitySet {
        codecs: vec![RtpCodecCapability::audio("audio/opus", 48000, 2)],
        header_extensions: vec![],
    };
    let err = fx
        .session
        .create_consumption(b.id, Some(recv), p1, opus_only)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IncompatibleOrPreconditionError);
    assert_eq!(fx.session.stats().consumptions, 0);
    assert_eq!(fx.engine.consumer_count(), 0);

    // The submitted capabilities are still recorded on the participant
    let recorded = fx.session.participant(&b.id).unwrap().rtp_capabilities();
    assert_eq!(recorded.unwrap().codecs.len(), 1);
}

#[tokio::test]
async fn test_codec_unsupported_by_relay_is_not_consumable() {
    let fx = fixture();
    let a = join(&fx);
    let b = join(&fx);
    let send = connected_transport(&fx, &a, TransportDirection::Publish).await;
    let p1 = fx
        .session
        .create_production(a.id, send, MediaKind::Video, vp8_vp9_params())
        .await
        .unwrap()
        .production_id;
    let recv = connected_transport(&fx, &b, TransportDirection::Subscribe).await;

    let vp9_only = CapabilitySet {
        codecs: vec![RtpCodecCapability::video("video/VP9", 90000)],
        header_extensions: vec![],
    };
    let err = fx
        .session
        .create_consumption(b.id, Some(recv), p1, vp9_only)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IncompatibleOrPreconditionError);
    assert_eq!(fx.session.stats().consumptions, 0);

    // The relay-supported codec is still consumable
    let vp8_only = CapabilitySet {
        codecs: vec![RtpCodecCapability::video("video/VP8", 90000)],
        header_extensions: vec![],
    };
    let descriptor = fx
        .session
        .create_consumption(b.id, Some(recv), p1, vp8_only)
        .await
        .unwrap();
    assert_eq!(descriptor.rtp_parameters.codecs.len(), 1);
    assert_eq!(descriptor.rtp_parameters.codecs[0].mime_type, "video/VP8");
}

#[tokio::test]
async fn test_consume_preconditions() {
    let fx = fixture();
    let a = join(&fx);
    let b = join(&fx);
    let (_, p1) = publish(&fx, &a, MediaKind::Video).await;
    let caps = fx.session.capabilities().clone();

    // No subscribe transport at all
    let err = fx
        .session
        .create_consumption(b.id, None, p1, caps.clone())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IncompatibleOrPreconditionError);

    // Subscribe transport not yet connected
    let pending = fx
        .session
        .create_transport(b.id, TransportDirection::Subscribe, TransportHints::default())
        .await
        .unwrap()
        .transport_id;
    let err = fx
        .session
        .create_consumption(b.id, Some(pending), p1, caps.clone())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IncompatibleOrPreconditionError);

    // Unknown production
    fx.session
        .connect_transport(b.id, pending, client_dtls())
        .await
        .unwrap();
    let err = fx
        .session
        .create_consumption(
            b.id,
            Some(pending),
            roomcast_core::ProductionId::from_raw(9999),
            caps,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IncompatibleOrPreconditionError);
}

#[tokio::test]
async fn test_simulcast_consumption_gets_preferred_layers() {
    let fx = fixture();
    let a = join(&fx);
    let b = join(&fx);

    let publish = connected_transport(&fx, &a, TransportDirection::Publish).await;
    let p1 = fx
        .session
        .create_production(a.id, publish, MediaKind::Video, vp8_simulcast_params())
        .await
        .unwrap()
        .production_id;

    connected_transport(&fx, &b, TransportDirection::Subscribe).await;
    let caps = fx.session.capabilities().clone();
    let consumption = fx
        .session
        .create_consumption(b.id, None, p1, caps)
        .await
        .unwrap();
    assert_eq!(consumption.consumer_type, ConsumerType::Simulcast);
    assert_eq!(consumption.rtp_parameters.encodings.len(), 1);
}

#[tokio::test]
async fn test_resume_foreign_consumption_rejected() {
    let fx = fixture();
    let a = join(&fx);
    let b = join(&fx);
    let (_, p1) = publish(&fx, &a, MediaKind::Video).await;
    connected_transport(&fx, &b, TransportDirection::Subscribe).await;
    let caps = fx.session.capabilities().clone();
    let consumption = fx
        .session
        .create_consumption(b.id, None, p1, caps)
        .await
        .unwrap();

    let err = fx
        .session
        .resume(a.id, consumption.consumption_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionError);
    assert_eq!(
        fx.session.consumption_state(&consumption.consumption_id).await,
        Some(ConsumptionState::Paused)
    );
}

#[tokio::test]
async fn test_production_ids_are_monotonic_across_participants() {
    let fx = fixture();
    let a = join(&fx);
    let b = join(&fx);

    let (_, first) = publish(&fx, &a, MediaKind::Audio).await;
    let (_, second) = publish(&fx, &b, MediaKind::Video).await;
    fx.session.end_production(a.id, first).await.unwrap();
    let (_, third) = publish(&fx, &a, MediaKind::Audio).await;

    assert!(first < second && second < third);
}

#[tokio::test]
async fn test_notify_all_except_skips_sender() {
    let fx = fixture();
    let mut a = join(&fx);
    let mut b = join(&fx);
    let mut c = join(&fx);
    let (_, p1) = publish(&fx, &a, MediaKind::Video).await;

    let announcement = fx.session.production(&p1).unwrap().announcement();
    let delivered = fx.session.notify_all_except(&a.id, &announcement);
    assert_eq!(delivered, 2);

    assert!(a.drain().is_empty());
    assert_eq!(b.drain(), vec![announcement.clone()]);
    assert_eq!(c.drain(), vec![announcement]);
}

#[tokio::test]
async fn test_full_outbox_does_not_block_others() {
    let fx = fixture();
    let a = join(&fx);
    let mut b = join(&fx);

    let connection = ConnectionId::new();
    let (tx, _slow_rx) = outbox(1);
    fx.session.register(connection, tx).unwrap();

    let (_, p1) = publish(&fx, &a, MediaKind::Video).await;
    let announcement = fx.session.production(&p1).unwrap().announcement();

    // First fills the slow outbox, second overflows it
    assert_eq!(fx.session.notify_all_except(&a.id, &announcement), 2);
    assert_eq!(fx.session.notify_all_except(&a.id, &announcement), 1);
    assert_eq!(b.drain().len(), 2);
    assert!(fx.session.production(&p1).is_some());
}
