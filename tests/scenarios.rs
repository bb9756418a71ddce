//! End-to-end scenarios driven through a real `Builder`-constructed
//! `Orchestrator` against the fake spatial index and HTTP sink in
//! `common`.

mod common;

use std::collections::HashSet;
use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use geofence_engine::engine::errors::ErrorKind;
use geofence_engine::engine::geo::DistanceAlgorithm;
use geofence_engine::engine::governor::{GovernorConfig, RequestGovernor};
use geofence_engine::engine::index::{ClientPool, Command, PoolConfig};
use geofence_engine::engine::model::{
    Coordinate, GeofenceEvent, GeofenceEventType, LocationInput, WebhookDraft, ZoneDraft, ZoneType,
};
use geofence_engine::{Builder, Settings};

fn rect(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Vec<Coordinate> {
    vec![
        Coordinate::new(min_lat, min_lon),
        Coordinate::new(min_lat, max_lon),
        Coordinate::new(max_lat, max_lon),
        Coordinate::new(max_lat, min_lon),
    ]
}

fn location_at(user_id: &str, coordinate: Coordinate) -> LocationInput {
    LocationInput {
        user_id: user_id.to_string(),
        coordinate,
        timestamp: None,
        accuracy: None,
        battery: None,
        speed: None,
        bearing: None,
        device_id: None,
        network_type: None,
        app_version: None,
    }
}

fn zone_draft(name: &str, zone_type: ZoneType, coordinates: Vec<Coordinate>) -> ZoneDraft {
    ZoneDraft {
        name: name.to_string(),
        zone_type,
        description: None,
        coordinates,
        risk_level: None,
        alert_message: None,
        emergency_contacts: vec![],
        created_by: Some("ops".to_string()),
    }
}

async fn test_settings() -> Settings {
    let addr = common::spawn_fake_index().await;
    let mut settings = Settings::default();
    settings.primary_addr = addr;
    settings.connection_ready_wait = Duration::from_secs(5);
    settings
}

#[tokio::test]
async fn zone_containment_enter_then_inside_then_exit() {
    let settings = test_settings().await;
    let orchestrator = Builder::new(settings).build().await.expect("engine starts");

    let zone = orchestrator
        .create_zone(zone_draft(
            "Old City",
            ZoneType::Safe,
            vec![
                Coordinate::new(28.6139, 77.2090),
                Coordinate::new(28.6139, 77.2100),
                Coordinate::new(28.6149, 77.2100),
                Coordinate::new(28.6149, 77.2090),
            ],
        ))
        .await
        .expect("zone creation succeeds");

    let inside = Coordinate::new(28.6144, 77.2095);

    let events = orchestrator
        .update_location(location_at("U1", inside))
        .await
        .expect("location accepted");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, GeofenceEventType::Enter);
    assert_eq!(events[0].zone_id, zone.id);

    let events = orchestrator
        .update_location(location_at("U1", inside))
        .await
        .expect("location accepted");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, GeofenceEventType::Inside);

    // Let the location-flush scheduler push the buffered point through to
    // the index before a WITHIN query can see it.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    let found = orchestrator.find_users_in_zone(zone.id).await.expect("within query succeeds");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].user_id, "U1");

    let outside = Coordinate::new(0.0, 0.0);
    let events = orchestrator
        .update_location(location_at("U1", outside))
        .await
        .expect("location accepted");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, GeofenceEventType::Exit);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn self_intersecting_polygon_rejected() {
    let settings = test_settings().await;
    let orchestrator = Builder::new(settings).build().await.expect("engine starts");

    let bowtie = vec![
        Coordinate::new(0.0, 0.0),
        Coordinate::new(0.0, 1.0),
        Coordinate::new(1.0, 0.0),
        Coordinate::new(1.0, 1.0),
    ];
    let err = orchestrator
        .create_zone(zone_draft("Bowtie", ZoneType::Caution, bowtie))
        .await
        .expect_err("self-intersecting ring is rejected");
    assert_eq!(err.kind, ErrorKind::Validation);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn overlapping_zone_rejected() {
    let settings = test_settings().await;
    let orchestrator = Builder::new(settings).build().await.expect("engine starts");

    orchestrator
        .create_zone(zone_draft("Zone A", ZoneType::Safe, rect(28.60, 77.20, 28.62, 77.22)))
        .await
        .expect("first zone created");

    let err = orchestrator
        .create_zone(zone_draft(
            "Zone B",
            ZoneType::Restricted,
            rect(28.61, 77.21, 28.63, 77.23),
        ))
        .await
        .expect_err("overlapping ring is rejected");
    assert_eq!(err.kind, ErrorKind::ZoneOverlap);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn webhook_signature_matches_hmac_sha256() {
    let settings = test_settings().await;
    let (sink_addr, received) = common::spawn_http_sink().await;
    let orchestrator = Builder::new(settings).build().await.expect("engine starts");

    orchestrator
        .create_zone(zone_draft(
            "Signature Zone",
            ZoneType::Safe,
            rect(28.60, 77.20, 28.62, 77.22),
        ))
        .await
        .expect("zone created");

    let mut event_types = HashSet::new();
    event_types.insert(GeofenceEventType::Enter);
    event_types.insert(GeofenceEventType::Inside);

    let webhook = orchestrator
        .register_webhook(WebhookDraft {
            name: "ops-alert".to_string(),
            url: format!("http://{sink_addr}/hook"),
            secret: Some("s3cr3t".to_string()),
            zone_ids: HashSet::new(),
            zone_types: HashSet::new(),
            event_types,
            retry_config: None,
            headers: vec![],
        })
        .await
        .expect("webhook registers");

    orchestrator
        .update_location(location_at("tourist-sig", Coordinate::new(28.61, 77.21)))
        .await
        .expect("location accepted");

    let mut delivered = None;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let guard = received.lock();
        if let Some(req) = guard.iter().find(|r| r.method == "POST") {
            delivered = Some(req.body.clone());
            break;
        }
    }
    let body = delivered.expect("webhook delivered within the wait budget");

    // The signature travels inside the envelope body now, not a header,
    // and covers the bare `event` sub-object rather than the envelope.
    let envelope: serde_json::Value = serde_json::from_slice(&body).expect("envelope is valid JSON");
    let signature = envelope
        .get("signature")
        .and_then(|s| s.as_str())
        .map(str::to_string);
    let event: GeofenceEvent =
        serde_json::from_value(envelope.get("event").cloned().expect("envelope carries an event"))
            .expect("event sub-object deserializes");

    let mut mac = Hmac::<Sha256>::new_from_slice(b"s3cr3t").expect("hmac key accepted");
    mac.update(&serde_json::to_vec(&event).expect("event re-serializes"));
    let expected = hex::encode(mac.finalize().into_bytes());
    assert_eq!(signature, Some(expected));

    assert!(envelope.get("zone").is_some(), "envelope carries a zone field");
    assert!(envelope.get("user").is_some(), "envelope carries a user field");
    assert!(envelope.get("timestamp").is_some(), "envelope carries a timestamp field");

    let stats = orchestrator
        .get_webhook_statistics(webhook.id)
        .expect("stats recorded for a registered webhook");
    assert_eq!(stats.total_delivered, 1);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn calculate_distance_matches_haversine_sanity_value() {
    let settings = test_settings().await;
    let orchestrator = Builder::new(settings).build().await.expect("engine starts");

    let a = Coordinate::new(28.6139, 77.2090);
    let b = Coordinate::new(28.6149, 77.2100);
    let d = orchestrator.calculate_distance(a, b, DistanceAlgorithm::Haversine);
    assert!((d - 148.0).abs() < 1.0, "distance was {d}");

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn rate_limiter_throttles_concurrent_reads_to_configured_ceiling() {
    let addr = common::spawn_fake_index().await;
    let pool = std::sync::Arc::new(ClientPool::new(addr, vec![], PoolConfig::default()));
    pool.connect_all().await.expect("fake index accepts connections");

    let mut governor_config = GovernorConfig::default();
    governor_config.max_requests_per_second = 10;
    governor_config.overflow_threshold = 1000;
    let (obs_tx, _obs_rx) = geofence_engine::engine::observation::channel();
    let governor = std::sync::Arc::new(RequestGovernor::new(pool, governor_config, obs_tx));

    let start = std::time::Instant::now();
    let mut handles = Vec::new();
    for _ in 0..100 {
        let governor = governor.clone();
        handles.push(tokio::spawn(async move { governor.execute_read(Command::Ping, 0).await }));
    }
    for handle in handles {
        handle.await.expect("task does not panic").expect("read succeeds");
    }
    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_secs(9),
        "100 reads at 10/s completed in {elapsed:?}, expected at least 9s"
    );
}
