//! Thin adapter over the WebRTC engine's peer connection.
//!
//! Turns the engine's state callbacks into cancellation-token signals the
//! session's select loops can race, and keeps the candidate strings and byte
//! counters the API snapshot reports.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use webrtc::api::API;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::StatsReportType;

pub(crate) struct PeerConnection {
    pc: Arc<RTCPeerConnection>,
    connected: CancellationToken,
    disconnected: CancellationToken,
    local_candidate: Arc<Mutex<String>>,
    remote_candidate: Arc<Mutex<String>>,
}

impl PeerConnection {
    pub async fn new(
        api: &API,
        ice_servers: Vec<RTCIceServer>,
    ) -> Result<Arc<Self>, webrtc::Error> {
        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await?,
        );

        let this = Arc::new(Self {
            pc: Arc::clone(&pc),
            connected: CancellationToken::new(),
            disconnected: CancellationToken::new(),
            local_candidate: Arc::new(Mutex::new(String::new())),
            remote_candidate: Arc::new(Mutex::new(String::new())),
        });

        let local_candidate = Arc::clone(&this.local_candidate);
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(candidate) = &candidate {
                if let Ok(init) = candidate.to_json() {
                    tracing::debug!(candidate = %init.candidate, "gathered local candidate");
                    let mut slot = local_candidate.lock();
                    if slot.is_empty() {
                        *slot = init.candidate;
                    }
                }
            }
            Box::pin(async {})
        }));

        let connected = this.connected.clone();
        let disconnected = this.disconnected.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            tracing::debug!(?state, "peer connection state changed");
            match state {
                RTCPeerConnectionState::Connected => connected.cancel(),
                RTCPeerConnectionState::Disconnected
                | RTCPeerConnectionState::Failed
                | RTCPeerConnectionState::Closed => disconnected.cancel(),
                _ => {}
            }
            Box::pin(async {})
        }));

        Ok(this)
    }

    pub fn inner(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }

    /// Cancelled once the connection reaches `Connected`.
    pub fn connected(&self) -> CancellationToken {
        self.connected.clone()
    }

    /// Cancelled once the connection disconnects, fails, or closes.
    pub fn disconnected(&self) -> CancellationToken {
        self.disconnected.clone()
    }

    /// Resolves when ICE gathering for the local description is complete.
    pub async fn wait_gathering_complete(&self) {
        let mut done = self.pc.gathering_complete_promise().await;
        let _ = done.recv().await;
    }

    pub async fn add_ice_candidate(
        &self,
        candidate: RTCIceCandidateInit,
    ) -> Result<(), webrtc::Error> {
        {
            let mut slot = self.remote_candidate.lock();
            if slot.is_empty() {
                slot.clone_from(&candidate.candidate);
            }
        }
        self.pc.add_ice_candidate(candidate).await
    }

    pub async fn write_rtcp(
        &self,
        packets: &[Box<dyn webrtc::rtcp::packet::Packet + Send + Sync>],
    ) -> Result<usize, webrtc::Error> {
        self.pc.write_rtcp(packets).await
    }

    pub async fn close(&self) {
        if let Err(err) = self.pc.close().await {
            tracing::debug!(error = %err, "peer connection close failed");
        }
    }

    pub fn local_candidate(&self) -> String {
        self.local_candidate.lock().clone()
    }

    pub fn remote_candidate(&self) -> String {
        self.remote_candidate.lock().clone()
    }

    /// Bytes received/sent over the nominated candidate pair.
    pub async fn byte_counters(&self) -> (u64, u64) {
        let stats = self.pc.get_stats().await;
        let mut received: u64 = 0;
        let mut sent: u64 = 0;
        for (_, report) in stats.reports {
            if let StatsReportType::CandidatePair(pair) = report {
                if pair.nominated {
                    received += pair.bytes_received;
                    sent += pair.bytes_sent;
                }
            }
        }
        (received, sent)
    }
}
