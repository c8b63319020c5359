//! End-to-end loopback tests: two flows on 127.0.0.1 negotiating via
//! offer/answer, establishing ICE + DTLS-SRTP and exchanging audio.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serial_test::serial;
use tokio::time::sleep;

use mediaflow_media_core::{
    CloseReason, Error, MediaFlow, MediaFlowConfig, MediaFlowHandlers, MediaStats, MediaType,
    STAT_INIT,
};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn local_config() -> MediaFlowConfig {
    init_logging();
    let mut config = MediaFlowConfig::new("127.0.0.1".parse().unwrap());
    config.ice_timeout = Duration::from_secs(5);
    config.dtls_timeout = Duration::from_secs(5);
    config
}

async fn allocate(handlers: MediaFlowHandlers) -> MediaFlow {
    MediaFlow::allocate(local_config(), handlers)
        .await
        .expect("allocate flow")
}

fn host_addr(flow: &MediaFlow) -> SocketAddr {
    format!("127.0.0.1:{}", flow.local_port()).parse().unwrap()
}

async fn add_host_candidate(flow: &MediaFlow) {
    flow.add_local_host_candidate("lo", host_addr(flow))
        .await
        .expect("host candidate");
    // Let the candidate event reach the negotiator
    sleep(Duration::from_millis(100)).await;
}

async fn wait_until<F>(mut predicate: F, attempts: u32) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..attempts {
        if predicate() {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

async fn wait_ready(flow: &MediaFlow) -> bool {
    for _ in 0..100 {
        if flow.is_ready().await {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Offer/answer + ICE + DTLS between two local flows
async fn establish(a: &MediaFlow, b: &MediaFlow) {
    add_host_candidate(a).await;
    add_host_candidate(b).await;
    a.start_gather().await.unwrap();
    b.start_gather().await.unwrap();
    sleep(Duration::from_millis(100)).await;

    let offer = a.generate_offer().unwrap();
    let answer = b.offer_answer(&offer).await.unwrap();
    a.handle_answer(&answer).await.unwrap();

    a.start_ice().await.unwrap();
    b.start_ice().await.unwrap();

    assert!(wait_ready(a).await, "offerer never became ready");
    assert!(wait_ready(b).await, "answerer never became ready");
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn test_end_to_end_audio() {
    let received: Arc<Mutex<Vec<i16>>> = Arc::new(Mutex::new(Vec::new()));

    let a = allocate(MediaFlowHandlers::default()).await;
    let b = allocate(MediaFlowHandlers::default()).await;
    {
        let received = Arc::clone(&received);
        b.set_audio_handler(Box::new(move |samples| {
            received.lock().unwrap().extend_from_slice(samples);
        }));
    }

    establish(&a, &b).await;

    a.start_media().await.unwrap();
    b.start_media().await.unwrap();
    assert!(a.is_started());

    // 20 ms of a 440 Hz sine at 48 kHz
    let samples: Vec<i16> = (0..960)
        .map(|i| {
            let t = i as f32 / 48_000.0;
            ((t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 8_000.0) as i16
        })
        .collect();
    a.send_audio(&samples).await.unwrap();

    let received_clone = Arc::clone(&received);
    assert!(
        wait_until(move || received_clone.lock().unwrap().len() == 960, 100).await,
        "sample count mismatch: got {}",
        received.lock().unwrap().len()
    );
    assert_eq!(received.lock().unwrap().as_slice(), samples.as_slice());

    // Both sides learned each other's audio SSRC
    assert_eq!(
        a.remote_ssrc(MediaType::Audio),
        Some(b.local_ssrc(MediaType::Audio))
    );
    assert_eq!(
        b.remote_ssrc(MediaType::Audio),
        Some(a.local_ssrc(MediaType::Audio))
    );

    // Establishment stats were measured
    let stats: MediaStats = a.stats();
    assert!(stats.nat_estab_ms >= 0);
    assert!(stats.dtls_estab_ms >= 0);
    assert!(stats.dtls_pkt_sent > 0);
    assert!(stats.dtls_pkt_recv > 0);
    assert_eq!(stats.turn_alloc_ms, STAT_INIT);
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn test_hold_suspends_outbound_audio() {
    let received: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));

    let a = allocate(MediaFlowHandlers::default()).await;
    let b = allocate(MediaFlowHandlers::default()).await;
    {
        let received = Arc::clone(&received);
        b.set_audio_handler(Box::new(move |samples| {
            *received.lock().unwrap() += samples.len();
        }));
    }

    establish(&a, &b).await;
    a.start_media().await.unwrap();
    b.start_media().await.unwrap();

    let frame = vec![0i16; 960];
    a.hold_media(true);
    a.send_audio(&frame).await.unwrap();
    sleep(Duration::from_millis(200)).await;
    assert_eq!(*received.lock().unwrap(), 0, "audio leaked during hold");

    a.hold_media(false);
    a.send_audio(&frame).await.unwrap();
    let received_clone = Arc::clone(&received);
    assert!(wait_until(move || *received_clone.lock().unwrap() == 960, 100).await);
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn test_fingerprint_mismatch_closes_with_authentication() {
    let closed: Arc<Mutex<Option<CloseReason>>> = Arc::new(Mutex::new(None));

    let a = allocate(MediaFlowHandlers::default()).await;
    let b = {
        let closed = Arc::clone(&closed);
        allocate(MediaFlowHandlers {
            close: Some(Box::new(move |reason| {
                *closed.lock().unwrap() = Some(reason);
            })),
            ..Default::default()
        })
        .await
    };

    add_host_candidate(&a).await;
    add_host_candidate(&b).await;

    let offer = a.generate_offer().unwrap();

    // Corrupt the advertised fingerprint: the certificate the peer
    // actually presents can no longer match.
    let fp_line_start = offer.find("a=fingerprint:sha-256 ").unwrap();
    let digest_start = fp_line_start + "a=fingerprint:sha-256 ".len();
    let mut tampered = offer.clone();
    let replacement = if &offer[digest_start..digest_start + 2] == "AA" {
        "BB"
    } else {
        "AA"
    };
    tampered.replace_range(digest_start..digest_start + 2, replacement);

    let answer = b.offer_answer(&tampered).await.unwrap();
    a.handle_answer(&answer).await.unwrap();

    a.start_ice().await.unwrap();
    b.start_ice().await.unwrap();

    let closed_clone = Arc::clone(&closed);
    assert!(
        wait_until(move || closed_clone.lock().unwrap().is_some(), 200).await,
        "flow never closed on fingerprint mismatch"
    );
    assert_eq!(*closed.lock().unwrap(), Some(CloseReason::Authentication));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_trickled_candidates_reach_callback() {
    let candidates: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let flow = {
        let candidates = Arc::clone(&candidates);
        allocate(MediaFlowHandlers {
            local_candidate: Some(Box::new(move |candidate| {
                candidates.lock().unwrap().push(candidate.to_sdp_value());
            })),
            ..Default::default()
        })
        .await
    };

    let base = host_addr(&flow);
    flow.add_local_host_candidate("lo", base).await.unwrap();
    flow.start_gather().await.unwrap();

    sleep(Duration::from_millis(100)).await;
    let second = SocketAddr::new("127.0.0.1".parse().unwrap(), base.port().wrapping_add(1));
    flow.add_local_host_candidate("lo2", second).await.unwrap();

    let candidates_clone = Arc::clone(&candidates);
    assert!(wait_until(move || candidates_clone.lock().unwrap().len() == 2, 50).await);
    let seen = candidates.lock().unwrap();
    assert!(seen[0].contains("typ host"));
    assert!(seen[1].contains(&second.port().to_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_media_requires_establishment() {
    let flow = allocate(MediaFlowHandlers::default()).await;

    match flow.start_media().await {
        Err(Error::NotReady(_)) => {}
        other => panic!("expected NotReady, got {other:?}"),
    }
    match flow.send_audio(&[0i16; 960]).await {
        Err(Error::NotReady(_)) => {}
        other => panic!("expected NotReady, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_media_is_idempotent() {
    let flow = allocate(MediaFlowHandlers::default()).await;
    assert!(!flow.is_started());
    flow.stop_media();
    flow.stop_media();
    assert!(!flow.is_started());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_answer_before_offer_is_invalid_argument() {
    let flow = allocate(MediaFlowHandlers::default()).await;
    match flow.handle_answer("v=0\r\n").await {
        Err(Error::InvalidArgument(_)) => {}
        other => panic!("expected InvalidArgument, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stats_start_at_init_sentinels() {
    let flow = allocate(MediaFlowHandlers::default()).await;
    let stats = flow.stats();
    assert_eq!(stats.turn_alloc_ms, STAT_INIT);
    assert_eq!(stats.nat_estab_ms, STAT_INIT);
    assert_eq!(stats.dtls_estab_ms, STAT_INIT);
}
