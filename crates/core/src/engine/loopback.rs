//! In-process media engine
//!
//! Performs no packet forwarding. It hands out ports, ICE credentials and DTLS
//! fingerprints, checks the client's DTLS completion and keeps just enough
//! bookkeeping to answer the seam's questions the way a real relay would.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{
    ConsumerType, DtlsFingerprint, DtlsParameters, DtlsRole, EngineConsumer, EngineResult,
    EngineTransport, HandshakeOutcome, IceCandidate, IceParameters, MediaEngine,
    TransportDirection, TransportOptions,
};
use crate::capabilities::{
    can_consume, consumer_parameters, CapabilityNegotiator, CapabilitySet, MediaKind,
    RtcpParameters, RtpEncodingParameters, RtpParameters,
};
use crate::config::SessionConfig;
use crate::error::EngineError;
use crate::ids::EngineHandle;

/// Digest algorithms accepted in client fingerprints, with digest length in bytes
const FINGERPRINT_ALGORITHMS: &[(&str, usize)] = &[
    ("sha-1", 20),
    ("sha-224", 28),
    ("sha-256", 32),
    ("sha-384", 48),
    ("sha-512", 64),
];

/// Inclusive range of RTC ports with the ones currently handed out
#[derive(Debug)]
struct PortPool {
    min: u16,
    max: u16,
    in_use: BTreeSet<u16>,
}

impl PortPool {
    fn allocate(&mut self) -> Option<u16> {
        let port = (self.min..=self.max).find(|p| !self.in_use.contains(p))?;
        self.in_use.insert(port);
        Some(port)
    }

    fn release(&mut self, port: u16) {
        self.in_use.remove(&port);
    }
}

#[derive(Debug)]
struct LoopbackTransport {
    direction: TransportDirection,
    port: u16,
    connected: bool,
    max_incoming_bitrate: Option<u32>,
}

#[derive(Debug)]
struct LoopbackProducer {
    transport: EngineHandle,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
}

#[derive(Debug)]
struct LoopbackConsumer {
    transport: EngineHandle,
    producer: EngineHandle,
    paused: bool,
    preferred_layers: Option<(u8, u8)>,
}

/// Reference engine used by the server binary and the test suites
pub struct LoopbackEngine {
    capabilities: CapabilitySet,
    ports: Mutex<PortPool>,
    transports: DashMap<EngineHandle, LoopbackTransport>,
    producers: DashMap<EngineHandle, LoopbackProducer>,
    consumers: DashMap<EngineHandle, LoopbackConsumer>,
    handshake_latency: Duration,
    death: watch::Sender<Option<String>>,
}

impl LoopbackEngine {
    /// Create an engine from validated configuration
    pub fn new(config: &SessionConfig, negotiator: &CapabilityNegotiator) -> Self {
        let (death, _) = watch::channel(None);

        info!(
            rtc_min_port = config.worker.rtc_min_port,
            rtc_max_port = config.worker.rtc_max_port,
            log_level = %config.worker.log_level,
            "Loopback media engine started"
        );

        Self {
            capabilities: negotiator.capabilities().clone(),
            ports: Mutex::new(PortPool {
                min: config.worker.rtc_min_port,
                max: config.worker.rtc_max_port,
                in_use: BTreeSet::new(),
            }),
            transports: DashMap::new(),
            producers: DashMap::new(),
            consumers: DashMap::new(),
            handshake_latency: Duration::from_millis(config.webrtc_transport.handshake_latency_ms),
            death,
        }
    }

    /// Mark the engine unusable; every later call fails with `Unavailable`
    pub fn kill(&self, reason: &str) {
        warn!(reason, "Loopback media engine killed");
        self.death.send_replace(Some(reason.to_string()));
    }

    pub fn is_alive(&self) -> bool {
        self.death.borrow().is_none()
    }

    pub fn transport_count(&self) -> usize {
        self.transports.len()
    }

    pub fn producer_count(&self) -> usize {
        self.producers.len()
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    pub fn ports_in_use(&self) -> usize {
        self.ports.lock().in_use.len()
    }

    /// Whether the consumer is currently paused (None if unknown)
    pub fn consumer_paused(&self, consumer: EngineHandle) -> Option<bool> {
        self.consumers.get(&consumer).map(|c| c.paused)
    }

    /// Layers requested for a simulcast consumer
    pub fn consumer_preferred_layers(&self, consumer: EngineHandle) -> Option<(u8, u8)> {
        self.consumers.get(&consumer).and_then(|c| c.preferred_layers)
    }

    /// Bitrate cap applied to a transport
    pub fn transport_max_incoming_bitrate(&self, transport: EngineHandle) -> Option<u32> {
        self.transports
            .get(&transport)
            .and_then(|t| t.max_incoming_bitrate)
    }

    fn ensure_alive(&self) -> EngineResult<()> {
        match self.death.borrow().as_ref() {
            Some(reason) => Err(EngineError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn ice_candidates(&self, port: u16, options: &TransportOptions) -> EngineResult<Vec<IceCandidate>> {
        let udp = options.enable_udp && !options.hints.force_tcp;
        let tcp = options.enable_tcp;
        if !udp && !tcp {
            return Err(EngineError::Rejected(
                "no protocol left to offer candidates on".to_string(),
            ));
        }

        let (udp_pref, tcp_pref) = if options.prefer_udp { (2, 1) } else { (1, 2) };
        let mut candidates = Vec::new();

        for (i, listen) in options.listen_ips.iter().enumerate() {
            let ip = listen.announced_ip.clone().unwrap_or_else(|| listen.ip.clone());
            // Host candidate priority: type preference 126, then local preference
            let local_pref = 65535u32.saturating_sub(i as u32);
            if udp {
                candidates.push(IceCandidate {
                    foundation: format!("udpcandidate{}", i),
                    priority: (126 << 24) | (local_pref << 8) | udp_pref,
                    ip: ip.clone(),
                    protocol: "udp".to_string(),
                    port,
                    candidate_type: "host".to_string(),
                    tcp_type: None,
                });
            }
            if tcp {
                candidates.push(IceCandidate {
                    foundation: format!("tcpcandidate{}", i),
                    priority: (126 << 24) | (local_pref << 8) | tcp_pref,
                    ip,
                    protocol: "tcp".to_string(),
                    port,
                    candidate_type: "host".to_string(),
                    tcp_type: Some("passive".to_string()),
                });
            }
        }

        Ok(candidates)
    }
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// SHA-256 fingerprint of fresh random key material, colon-separated hex
fn generate_fingerprint() -> DtlsFingerprint {
    let mut material = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut material);
    let digest = Sha256::digest(material);
    let value = digest
        .iter()
        .map(|b| hex::encode_upper([*b]))
        .collect::<Vec<_>>()
        .join(":");

    DtlsFingerprint {
        algorithm: "sha-256".to_string(),
        value,
    }
}

/// Check a client's DTLS completion; returns the reason it is unusable
fn check_client_dtls(dtls: &DtlsParameters) -> Option<String> {
    if dtls.fingerprints.is_empty() {
        return Some("no DTLS fingerprints".to_string());
    }

    for fp in &dtls.fingerprints {
        let algorithm = fp.algorithm.to_ascii_lowercase();
        let Some((_, digest_len)) = FINGERPRINT_ALGORITHMS
            .iter()
            .find(|(name, _)| *name == algorithm)
        else {
            return Some(format!("unsupported fingerprint algorithm {}", fp.algorithm));
        };

        let bytes: Vec<&str> = fp.value.split(':').collect();
        let well_formed = bytes.len() == *digest_len
            && bytes
                .iter()
                .all(|b| b.len() == 2 && hex::decode(b).is_ok());
        if !well_formed {
            return Some(format!("malformed {} fingerprint", fp.algorithm));
        }
    }

    None
}

#[async_trait]
impl MediaEngine for LoopbackEngine {
    fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    async fn create_transport(
        &self,
        direction: TransportDirection,
        options: &TransportOptions,
    ) -> EngineResult<EngineTransport> {
        self.ensure_alive()?;

        let port = self
            .ports
            .lock()
            .allocate()
            .ok_or_else(|| EngineError::Allocation("no free RTC port".to_string()))?;

        let ice_candidates = match self.ice_candidates(port, options) {
            Ok(c) => c,
            Err(e) => {
                self.ports.lock().release(port);
                return Err(e);
            }
        };

        let handle = EngineHandle::new();
        self.transports.insert(
            handle,
            LoopbackTransport {
                direction,
                port,
                connected: false,
                max_incoming_bitrate: None,
            },
        );

        debug!(%handle, %direction, port, "Allocated loopback transport");

        Ok(EngineTransport {
            handle,
            ice_parameters: IceParameters {
                username_fragment: random_token(16),
                password: random_token(32),
                ice_lite: true,
            },
            ice_candidates,
            dtls_parameters: DtlsParameters {
                role: DtlsRole::Auto,
                fingerprints: vec![generate_fingerprint()],
            },
        })
    }

    async fn set_max_incoming_bitrate(&self, transport: EngineHandle, bitrate: u32) -> EngineResult<()> {
        self.ensure_alive()?;
        let mut entry = self
            .transports
            .get_mut(&transport)
            .ok_or_else(|| EngineError::UnknownHandle(transport.to_string()))?;
        entry.max_incoming_bitrate = Some(bitrate);
        Ok(())
    }

    async fn connect_transport(
        &self,
        transport: EngineHandle,
        dtls: &DtlsParameters,
    ) -> EngineResult<HandshakeOutcome> {
        self.ensure_alive()?;
        if !self.transports.contains_key(&transport) {
            return Err(EngineError::UnknownHandle(transport.to_string()));
        }

        if !self.handshake_latency.is_zero() {
            tokio::time::sleep(self.handshake_latency).await;
            self.ensure_alive()?;
        }

        if let Some(reason) = check_client_dtls(dtls) {
            debug!(%transport, %reason, "DTLS handshake failed");
            return Ok(HandshakeOutcome::Failed(reason));
        }

        // Transport may have been closed while the handshake was in flight
        let mut entry = self
            .transports
            .get_mut(&transport)
            .ok_or_else(|| EngineError::UnknownHandle(transport.to_string()))?;
        if entry.connected {
            return Err(EngineError::Rejected("transport already connected".to_string()));
        }
        entry.connected = true;
        Ok(HandshakeOutcome::Connected)
    }

    async fn close_transport(&self, transport: EngineHandle) -> EngineResult<()> {
        let (_, removed) = self
            .transports
            .remove(&transport)
            .ok_or_else(|| EngineError::UnknownHandle(transport.to_string()))?;
        self.ports.lock().release(removed.port);

        // Engine-side cascade, like a real relay closing a transport
        self.producers.retain(|_, p| p.transport != transport);
        let producers = &self.producers;
        self.consumers
            .retain(|_, c| c.transport != transport && producers.contains_key(&c.producer));
        Ok(())
    }

    async fn produce(
        &self,
        transport: EngineHandle,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
    ) -> EngineResult<EngineHandle> {
        self.ensure_alive()?;
        {
            let entry = self
                .transports
                .get(&transport)
                .ok_or_else(|| EngineError::UnknownHandle(transport.to_string()))?;
            if !entry.connected || entry.direction != TransportDirection::Publish {
                return Err(EngineError::Rejected(
                    "produce requires a connected publish transport".to_string(),
                ));
            }
        }

        let handle = EngineHandle::new();
        self.producers.insert(
            handle,
            LoopbackProducer {
                transport,
                kind,
                rtp_parameters: rtp_parameters.clone(),
            },
        );
        Ok(handle)
    }

    async fn close_producer(&self, producer: EngineHandle) -> EngineResult<()> {
        self.producers
            .remove(&producer)
            .ok_or_else(|| EngineError::UnknownHandle(producer.to_string()))?;
        self.consumers.retain(|_, c| c.producer != producer);
        Ok(())
    }

    fn can_consume(&self, producer: EngineHandle, capabilities: &CapabilitySet) -> bool {
        self.producers
            .get(&producer)
            .map(|p| can_consume(&p.rtp_parameters, capabilities))
            .unwrap_or(false)
    }

    async fn consume(
        &self,
        transport: EngineHandle,
        producer: EngineHandle,
        capabilities: &CapabilitySet,
        paused: bool,
    ) -> EngineResult<EngineConsumer> {
        self.ensure_alive()?;
        {
            let entry = self
                .transports
                .get(&transport)
                .ok_or_else(|| EngineError::UnknownHandle(transport.to_string()))?;
            if !entry.connected || entry.direction != TransportDirection::Subscribe {
                return Err(EngineError::Rejected(
                    "consume requires a connected subscribe transport".to_string(),
                ));
            }
        }

        let (mut rtp_parameters, layers, kind) = {
            let source = self
                .producers
                .get(&producer)
                .ok_or_else(|| EngineError::UnknownHandle(producer.to_string()))?;
            let params = consumer_parameters(&source.rtp_parameters, capabilities)
                .ok_or_else(|| EngineError::Rejected("no common codec".to_string()))?;
            (params, source.rtp_parameters.encodings.len(), source.kind)
        };

        let consumer_type = if layers > 1 {
            ConsumerType::Simulcast
        } else {
            ConsumerType::Simple
        };

        // Consumers always see a single outgoing stream
        let scalability_mode = match consumer_type {
            ConsumerType::Simulcast => Some(format!("L{}T3", layers)),
            ConsumerType::Simple => rtp_parameters
                .encodings
                .first()
                .and_then(|e| e.scalability_mode.clone()),
        };
        rtp_parameters.encodings = vec![RtpEncodingParameters {
            ssrc: Some(rand::thread_rng().gen()),
            scalability_mode,
            ..Default::default()
        }];
        rtp_parameters.rtcp = Some(RtcpParameters {
            cname: Some(random_token(16)),
            reduced_size: true,
        });

        let handle = EngineHandle::new();
        self.consumers.insert(
            handle,
            LoopbackConsumer {
                transport,
                producer,
                paused,
                preferred_layers: None,
            },
        );

        debug!(%handle, %producer, %kind, ?consumer_type, "Created loopback consumer");

        Ok(EngineConsumer {
            handle,
            rtp_parameters,
            consumer_type,
            producer_paused: false,
        })
    }

    async fn set_preferred_layers(
        &self,
        consumer: EngineHandle,
        spatial_layer: u8,
        temporal_layer: u8,
    ) -> EngineResult<()> {
        self.ensure_alive()?;
        let mut entry = self
            .consumers
            .get_mut(&consumer)
            .ok_or_else(|| EngineError::UnknownHandle(consumer.to_string()))?;
        entry.preferred_layers = Some((spatial_layer, temporal_layer));
        Ok(())
    }

    async fn resume_consumer(&self, consumer: EngineHandle) -> EngineResult<()> {
        self.ensure_alive()?;
        let mut entry = self
            .consumers
            .get_mut(&consumer)
            .ok_or_else(|| EngineError::UnknownHandle(consumer.to_string()))?;
        entry.paused = false;
        Ok(())
    }

    async fn close_consumer(&self, consumer: EngineHandle) -> EngineResult<()> {
        self.consumers
            .remove(&consumer)
            .map(|_| ())
            .ok_or_else(|| EngineError::UnknownHandle(consumer.to_string()))
    }

    async fn closed(&self) -> String {
        let mut rx = self.death.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(reason) = current {
                return reason;
            }
            if rx.changed().await.is_err() {
                return "media engine dropped".to_string();
            }
        }
    }

    fn name(&self) -> &str {
        "loopback"
    }
}
