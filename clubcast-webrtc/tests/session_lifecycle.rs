//! End-to-end session lifecycle tests over a real loopback peer connection.

use clubcast_core::media::MediaKind;
use clubcast_core::storage::MemoryStorage;
use clubcast_core::test_helpers::{h264_video, opus_audio, StaticPathManager};
use clubcast_webrtc::{NewSessionRequest, WebRtcConfig, WebRtcManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

struct TestHarness {
    manager: Arc<WebRtcManager>,
    path_manager: Arc<StaticPathManager>,
    storage: Arc<MemoryStorage>,
    _streams_dir: tempfile::TempDir,
}

fn harness() -> TestHarness {
    let storage = Arc::new(MemoryStorage::new());
    let path_manager = Arc::new(StaticPathManager::new());
    let streams_dir = tempfile::tempdir().unwrap();

    let mut config = WebRtcConfig::default();
    config.streams_dir = streams_dir.path().to_path_buf();

    let manager = WebRtcManager::new(
        config,
        Arc::clone(&path_manager) as Arc<dyn clubcast_core::path::PathManager>,
        Arc::clone(&storage) as Arc<dyn clubcast_core::storage::ObjectStorage>,
    )
    .unwrap();

    TestHarness {
        manager,
        path_manager,
        storage,
        _streams_dir: streams_dir,
    }
}

fn watch_connection_state(pc: &RTCPeerConnection) -> mpsc::Receiver<RTCPeerConnectionState> {
    let (tx, rx) = mpsc::channel(16);
    pc.on_peer_connection_state_change(Box::new(move |state| {
        let _ = tx.try_send(state);
        Box::pin(async {})
    }));
    rx
}

async fn wait_for_state(
    rx: &mut mpsc::Receiver<RTCPeerConnectionState>,
    wanted: RTCPeerConnectionState,
) {
    timeout(Duration::from_secs(15), async {
        while let Some(state) = rx.recv().await {
            if state == wanted {
                return;
            }
        }
        panic!("state channel closed before reaching {wanted:?}");
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {wanted:?}"));
}

async fn wait_until(mut probe: impl FnMut() -> bool, what: &str) {
    timeout(Duration::from_secs(10), async {
        loop {
            if probe() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting until {what}"));
}

/// Full SDP of the client after local gathering completed.
async fn local_offer(pc: &RTCPeerConnection) -> String {
    let offer = pc.create_offer(None).await.unwrap();
    pc.set_local_description(offer).await.unwrap();
    let mut gathered = pc.gathering_complete_promise().await;
    let _ = gathered.recv().await;
    pc.local_description().await.unwrap().sdp
}

fn request(room_id: Uuid, publish: bool, offer: String) -> NewSessionRequest {
    NewSessionRequest {
        remote_addr: "127.0.0.1:41000".to_string(),
        path_name: "mystream".to_string(),
        query: String::new(),
        user: String::new(),
        pass: String::new(),
        offer: offer.into_bytes(),
        publish,
        room_id: room_id.to_string(),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_data_channel_only_publish_records_metadata() {
    let h = harness();
    let room_id = Uuid::new_v4();
    h.manager.create_room(room_id, "FC Barça Club ", "friday-night");
    h.manager.record_room(room_id).await.unwrap();

    // Plain client: one data channel, no media.
    let api = APIBuilder::new().build();
    let pc = api
        .new_peer_connection(RTCConfiguration::default())
        .await
        .unwrap();

    let candidates: Arc<parking_lot::Mutex<Vec<RTCIceCandidateInit>>> =
        Arc::new(parking_lot::Mutex::new(Vec::new()));
    {
        let candidates = Arc::clone(&candidates);
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(candidate) = candidate {
                if let Ok(init) = candidate.to_json() {
                    candidates.lock().push(init);
                }
            }
            Box::pin(async {})
        }));
    }

    let mut states = watch_connection_state(&pc);

    let dc = pc.create_data_channel("metadata", None).await.unwrap();
    let (open_tx, mut open_rx) = mpsc::channel(1);
    dc.on_open(Box::new(move || {
        let _ = open_tx.try_send(());
        Box::pin(async {})
    }));

    let offer = local_offer(&pc).await;
    let answer = h
        .manager
        .new_session(request(room_id, true, offer))
        .await
        .expect("publish session must answer");

    let desc =
        RTCSessionDescription::answer(String::from_utf8(answer.answer.clone()).unwrap()).unwrap();
    pc.set_remote_description(desc).await.unwrap();

    // The answer was already emitted; trickled candidates must still apply.
    let trickled = candidates.lock().clone();
    if !trickled.is_empty() {
        h.manager
            .add_candidates(answer.secret, trickled)
            .await
            .expect("candidate apply must succeed");
    }

    wait_for_state(&mut states, RTCPeerConnectionState::Connected).await;

    timeout(Duration::from_secs(10), open_rx.recv())
        .await
        .expect("data channel must open")
        .unwrap();

    dc.send_text(r#"{"k":"v"}"#).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    dc.close().await.unwrap();

    // The metadata file is uploaded under slug(club)/event on close.
    let storage = Arc::clone(&h.storage);
    wait_until(
        || !storage.keys("fc-barça-club").is_empty(),
        "metadata upload lands in the bucket",
    )
    .await;

    let keys = h.storage.keys("fc-barça-club");
    assert_eq!(keys.len(), 1);
    assert!(keys[0].starts_with("friday-night/"));
    assert!(keys[0].ends_with("-metadata.txt"));

    let contents = h.storage.object("fc-barça-club", &keys[0]).unwrap();
    assert_eq!(contents, b"{\"k\":\"v\"}\n");

    // Peer disconnect tears the session down and deregisters it.
    pc.close().await.unwrap();
    let manager = Arc::clone(&h.manager);
    wait_until(|| manager.session_count() == 0, "session deregistered").await;

    // Follow-up candidates against the dead session are refused.
    assert!(h
        .manager
        .add_candidates(answer.secret, vec![])
        .await
        .is_err());

    h.manager.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_read_session_delivers_rtp() {
    let h = harness();
    let room_id = Uuid::new_v4();

    let stream = h
        .path_manager
        .publish("mystream", vec![h264_video(), opus_audio()]);

    // Client wanting both tracks.
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs().unwrap();
    let api = APIBuilder::new().with_media_engine(media_engine).build();
    let pc = api
        .new_peer_connection(RTCConfiguration::default())
        .await
        .unwrap();

    for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
        pc.add_transceiver_from_kind(
            kind,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            }),
        )
        .await
        .unwrap();
    }

    let mut states = watch_connection_state(&pc);

    let (track_tx, mut track_rx) = mpsc::channel(4);
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let _ = track_tx.try_send(track.kind());
        Box::pin(async {})
    }));

    let offer = local_offer(&pc).await;
    let answer = h
        .manager
        .new_session(request(room_id, false, offer))
        .await
        .expect("read session must answer");

    let desc =
        RTCSessionDescription::answer(String::from_utf8(answer.answer).unwrap()).unwrap();
    pc.set_remote_description(desc).await.unwrap();

    wait_for_state(&mut states, RTCPeerConnectionState::Connected).await;

    // The session shows up established in the API snapshot.
    let manager = Arc::clone(&h.manager);
    wait_until(|| manager.session_count() == 1, "session registered").await;
    wait_until(
        || stream.reader_count() > 0,
        "outgoing tracks subscribed to the stream",
    )
    .await;

    let items = h.manager.api_sessions().await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].path, "mystream");
    assert!(items[0].peer_connection_established);

    // Push RTP into the stream until the client sees a track.
    let feeder_stream = Arc::clone(&stream);
    let feeder = tokio::spawn(async move {
        for seq in 0..500u16 {
            let mut packet = clubcast_core::test_helpers::rtp_packet(seq);
            packet.payload = bytes::Bytes::from_static(&[0x65, 0x00, 0x01, 0x02]);
            feeder_stream.write_rtp(MediaKind::Video, Arc::new(packet));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    });

    let kind = timeout(Duration::from_secs(10), track_rx.recv())
        .await
        .expect("client must receive a track")
        .unwrap();
    assert_eq!(kind, RTPCodecType::Video);
    feeder.abort();

    pc.close().await.unwrap();
    let manager = Arc::clone(&h.manager);
    wait_until(|| manager.session_count() == 0, "session deregistered").await;

    h.manager.close().await;
}
