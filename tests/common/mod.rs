//! A stand-in spatial index for integration tests: just enough of the
//! wire protocol (§6) to answer `SET`/`DEL`/`GET WITHFIELDS`/`WITHIN`/
//! `NEARBY` against an in-memory per-collection point store. Also a
//! minimal raw-HTTP sink used to capture webhook deliveries.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Clone, Default)]
struct Record {
    lat: f64,
    lon: f64,
    fields: HashMap<String, String>,
}

type Store = Arc<Mutex<HashMap<String, HashMap<String, Record>>>>;

/// Binds to an ephemeral port and serves the fake index until the test
/// process exits; the listener task is intentionally left detached.
pub async fn spawn_fake_index() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake index");
    let addr = listener.local_addr().expect("local addr");
    let store: Store = Arc::new(Mutex::new(HashMap::new()));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => continue,
            };
            let store = store.clone();
            tokio::spawn(serve_connection(socket, store));
        }
    });

    addr
}

async fn serve_connection(socket: TcpStream, store: Store) {
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let reply = handle_line(&store, &line);
        if writer.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

fn handle_line(store: &Store, line: &str) -> String {
    let tokens: Vec<&str> = line.trim_end().split(' ').filter(|t| !t.is_empty()).collect();
    match tokens.first().copied() {
        Some("PING") => "OK\n".to_string(),
        Some("SET") => handle_set(store, &tokens),
        Some("DEL") => handle_del(store, &tokens),
        Some("GET") => handle_get(store, &tokens),
        Some("WITHIN") => handle_within(store, &tokens),
        Some("NEARBY") => handle_nearby(store, &tokens),
        _ => "OK\n".to_string(),
    }
}

fn handle_set(store: &Store, tokens: &[&str]) -> String {
    if tokens.len() < 3 {
        return "ERR malformed SET\n".to_string();
    }
    let collection = tokens[1].to_string();
    let id = tokens[2].to_string();
    let mut fields = HashMap::new();
    let mut lat = None;
    let mut lon = None;
    let mut idx = 3;
    while idx < tokens.len() {
        match tokens[idx] {
            "FIELD" if idx + 2 < tokens.len() => {
                fields.insert(tokens[idx + 1].to_string(), tokens[idx + 2].to_string());
                idx += 3;
            }
            "EX" if idx + 1 < tokens.len() => idx += 2,
            "POINT" if idx + 2 < tokens.len() => {
                lat = tokens[idx + 1].parse::<f64>().ok();
                lon = tokens[idx + 2].parse::<f64>().ok();
                idx += 3;
            }
            "OBJECT" => idx = tokens.len(),
            _ => idx += 1,
        }
    }

    let mut guard = store.lock();
    let collection = guard.entry(collection).or_default();
    match (lat, lon) {
        (Some(lat), Some(lon)) => {
            collection.insert(id, Record { lat, lon, fields });
        }
        _ => {
            collection.entry(id).or_insert(Record { lat: 0.0, lon: 0.0, fields });
        }
    }
    "OK\n".to_string()
}

fn handle_del(store: &Store, tokens: &[&str]) -> String {
    if tokens.len() < 3 {
        return "ERR malformed DEL\n".to_string();
    }
    if let Some(collection) = store.lock().get_mut(tokens[1]) {
        collection.remove(tokens[2]);
    }
    "OK\n".to_string()
}

fn opt_num(fields: &HashMap<String, String>, key: &str) -> String {
    fields.get(key).cloned().unwrap_or_else(|| "null".to_string())
}

fn handle_get(store: &Store, tokens: &[&str]) -> String {
    if tokens.len() < 3 {
        return "ERR malformed GET\n".to_string();
    }
    let record = store.lock().get(tokens[1]).and_then(|c| c.get(tokens[2]).cloned());
    match record {
        Some(r) => format!(
            "{{\"user_id\":\"{}\",\"coordinate\":{{\"lat\":{},\"lon\":{}}},\"timestamp\":\"{}\",\"accuracy\":{},\"battery\":{},\"speed\":{},\"bearing\":{},\"device_id\":null,\"network_type\":null,\"app_version\":null}}\n",
            tokens[2],
            r.lat,
            r.lon,
            r.fields.get("timestamp").cloned().unwrap_or_else(|| "1970-01-01T00:00:00Z".to_string()),
            opt_num(&r.fields, "accuracy"),
            opt_num(&r.fields, "battery"),
            opt_num(&r.fields, "speed"),
            opt_num(&r.fields, "bearing"),
        ),
        None => "ERR not found\n".to_string(),
    }
}

fn bbox_from_polygon_tokens(coords: &[&str]) -> (f64, f64, f64, f64) {
    let mut min_lat = f64::INFINITY;
    let mut max_lat = f64::NEG_INFINITY;
    let mut min_lon = f64::INFINITY;
    let mut max_lon = f64::NEG_INFINITY;
    let mut i = 0;
    while i + 1 < coords.len() {
        let lon: f64 = coords[i].parse().unwrap_or(0.0);
        let lat: f64 = coords[i + 1].parse().unwrap_or(0.0);
        min_lat = min_lat.min(lat);
        max_lat = max_lat.max(lat);
        min_lon = min_lon.min(lon);
        max_lon = max_lon.max(lon);
        i += 2;
    }
    (min_lat, min_lon, max_lat, max_lon)
}

fn handle_within(store: &Store, tokens: &[&str]) -> String {
    if tokens.len() < 2 {
        return "ERR malformed WITHIN\n".to_string();
    }
    let collection = tokens[1];
    let mut idx = 2;
    if tokens.get(idx) == Some(&"LIMIT") {
        idx += 2;
    }
    let Some(shape) = tokens.get(idx) else {
        return "ERR malformed WITHIN\n".to_string();
    };
    let (min_lat, min_lon, max_lat, max_lon) = match *shape {
        "BOUNDS" if idx + 4 < tokens.len() => (
            tokens[idx + 1].parse().unwrap_or(0.0),
            tokens[idx + 2].parse().unwrap_or(0.0),
            tokens[idx + 3].parse().unwrap_or(0.0),
            tokens[idx + 4].parse().unwrap_or(0.0),
        ),
        "POLYGON" => bbox_from_polygon_tokens(&tokens[idx + 1..]),
        _ => return "ERR unknown WITHIN shape\n".to_string(),
    };

    let guard = store.lock();
    let Some(points) = guard.get(collection) else {
        return "\n".to_string();
    };
    let hits: Vec<String> = points
        .iter()
        .filter(|(_, r)| r.lat >= min_lat && r.lat <= max_lat && r.lon >= min_lon && r.lon <= max_lon)
        .map(|(id, r)| format!("{},{},{}", id, r.lat, r.lon))
        .collect();
    format!("{}\n", hits.join(";"))
}

fn rough_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_378_137.0;
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

fn handle_nearby(store: &Store, tokens: &[&str]) -> String {
    if tokens.len() < 2 {
        return "ERR malformed NEARBY\n".to_string();
    }
    let collection = tokens[1];
    let mut idx = 2;
    if tokens.get(idx) == Some(&"LIMIT") {
        idx += 2;
    }
    if tokens.get(idx) != Some(&"POINT") || idx + 3 >= tokens.len() {
        return "ERR malformed NEARBY\n".to_string();
    }
    let lat: f64 = tokens[idx + 1].parse().unwrap_or(0.0);
    let lon: f64 = tokens[idx + 2].parse().unwrap_or(0.0);
    let radius: f64 = tokens[idx + 3].parse().unwrap_or(0.0);

    let guard = store.lock();
    let Some(points) = guard.get(collection) else {
        return "\n".to_string();
    };
    let hits: Vec<String> = points
        .iter()
        .filter(|(_, r)| rough_distance_m(lat, lon, r.lat, r.lon) <= radius)
        .map(|(id, r)| format!("{},{},{}", id, r.lat, r.lon))
        .collect();
    format!("{}\n", hits.join(";"))
}

/// One request captured by [`spawn_http_sink`].
pub struct ReceivedRequest {
    pub method: String,
    pub body: Vec<u8>,
    pub signature: Option<String>,
}

/// A bare-bones HTTP/1.1 sink: accepts any method, reads the body per
/// `Content-Length`, records it, and replies `200 OK`. Used as the target
/// for webhook preflight (`HEAD`) and delivery (`POST`) requests.
pub async fn spawn_http_sink() -> (SocketAddr, Arc<Mutex<Vec<ReceivedRequest>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind http sink");
    let addr = listener.local_addr().expect("local addr");
    let received = Arc::new(Mutex::new(Vec::new()));
    let received_for_task = received.clone();

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => continue,
            };
            let received = received_for_task.clone();
            tokio::spawn(async move {
                let _ = handle_http_connection(socket, received).await;
            });
        }
    });

    (addr, received)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn handle_http_connection(
    mut socket: TcpStream,
    received: Arc<Mutex<Vec<ReceivedRequest>>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            break pos;
        }
        if buf.len() > 64 * 1024 {
            return Ok(());
        }
    };

    let header_text = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let method = request_line.split(' ').next().unwrap_or("").to_string();

    let mut content_length = 0usize;
    let mut signature = None;
    for line in lines {
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim().to_string();
            if key == "content-length" {
                content_length = value.parse().unwrap_or(0);
            } else if key == "x-geofence-signature" {
                signature = Some(value);
            }
        }
    }

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    received.lock().push(ReceivedRequest { method, body, signature });

    socket
        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
        .await?;
    Ok(())
}
