//! Admin REST surface plus metrics, on one plain HTTP/1.1 listener.
//!
//! Deliberately dependency-free: requests are parsed off the socket by
//! hand, the same way the metrics endpoint works. Sponsor mutations run
//! synchronously against the store (which bakes images and fires the
//! reload hook before returning), so a 200 means clients already received
//! sponsors-reloaded with working URLs.
//!
//! Routes:
//!   GET    /health
//!   GET    /metrics                      Prometheus text
//!   GET    /metrics/json
//!   GET    /sponsor-textures/{file}      baked PNGs
//!   GET    /api/{moon|billboard}-sponsors[?full=1]
//!   GET    /api/{moon|billboard}-sponsors/{index}[?full=1]
//!   PUT    /api/{moon|billboard}-sponsors/{index}
//!   DELETE /api/{moon|billboard}-sponsors/{index}
//!   (cluster-sponsors mirrors the same shape keyed by cluster id)

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::game::state::ClusterId;
use crate::metrics::Metrics;
use crate::sponsor::store::{SlotKind, Sponsor, SponsorError, SponsorStore};

/// Pattern uploads are base64 PNGs; anything bigger than this is abuse
const MAX_BODY: usize = 4 * 1024 * 1024;

pub struct HttpResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl HttpResponse {
    fn json(status: u16, value: serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: serde_json::to_vec(&value).unwrap_or_default(),
        }
    }

    fn ok_json(value: serde_json::Value) -> Self {
        Self::json(200, value)
    }

    fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.as_bytes().to_vec(),
        }
    }

    fn not_found() -> Self {
        Self::json(404, serde_json::json!({ "error": "not found" }))
    }
}

fn status_line(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        400 => "400 Bad Request",
        404 => "404 Not Found",
        405 => "405 Method Not Allowed",
        413 => "413 Payload Too Large",
        _ => "500 Internal Server Error",
    }
}

/// Dispatch one parsed request
pub fn route(
    method: &str,
    path: &str,
    query: &str,
    body: &[u8],
    store: &SponsorStore,
    metrics: &Metrics,
    textures_dir: &Path,
) -> HttpResponse {
    let full = query
        .split('&')
        .any(|pair| pair == "full=1" || pair == "full=true");

    match (method, path) {
        ("GET", "/health") | ("GET", "/") => HttpResponse::text(200, "OK"),
        ("GET", "/metrics") => HttpResponse {
            status: 200,
            content_type: "text/plain; version=0.0.4",
            body: metrics.to_prometheus().into_bytes(),
        },
        ("GET", "/metrics/json") | ("GET", "/json") => HttpResponse {
            status: 200,
            content_type: "application/json",
            body: metrics.to_json().into_bytes(),
        },
        ("GET", _) if path.starts_with("/sponsor-textures/") => {
            serve_texture(textures_dir, &path["/sponsor-textures/".len()..])
        }
        _ => {
            if let Some(rest) = path.strip_prefix("/api/moon-sponsors") {
                slot_routes(method, rest, full, body, store, SlotKind::Moon)
            } else if let Some(rest) = path.strip_prefix("/api/billboard-sponsors") {
                slot_routes(method, rest, full, body, store, SlotKind::Billboard)
            } else if let Some(rest) = path.strip_prefix("/api/cluster-sponsors") {
                cluster_routes(method, rest, full, body, store)
            } else {
                HttpResponse::not_found()
            }
        }
    }
}

fn serve_texture(textures_dir: &Path, file: &str) -> HttpResponse {
    // Only flat png names out of the bake directory
    if file.contains('/') || file.contains("..") || !file.ends_with(".png") {
        return HttpResponse::not_found();
    }
    match std::fs::read(textures_dir.join(file)) {
        Ok(bytes) => HttpResponse {
            status: 200,
            content_type: "image/png",
            body: bytes,
        },
        Err(_) => HttpResponse::not_found(),
    }
}

fn slot_routes(
    method: &str,
    rest: &str,
    full: bool,
    body: &[u8],
    store: &SponsorStore,
    kind: SlotKind,
) -> HttpResponse {
    if rest.is_empty() {
        return match method {
            "GET" => HttpResponse::ok_json(
                serde_json::to_value(store.get_all(kind, full)).unwrap_or_default(),
            ),
            _ => HttpResponse::text(405, "method not allowed"),
        };
    }
    let Some(index) = rest.strip_prefix('/').and_then(|s| s.parse::<usize>().ok()) else {
        return HttpResponse::not_found();
    };

    match method {
        "GET" => match store.get(kind, index, full) {
            Ok(sponsor) => {
                HttpResponse::ok_json(serde_json::to_value(sponsor).unwrap_or_default())
            }
            Err(e) => sponsor_error(e),
        },
        "PUT" => match serde_json::from_slice::<Sponsor>(body) {
            Ok(sponsor) => match store.assign(kind, index, sponsor) {
                Ok(()) => HttpResponse::ok_json(serde_json::json!({ "ok": true })),
                Err(e) => sponsor_error(e),
            },
            Err(e) => HttpResponse::json(
                400,
                serde_json::json!({ "errors": [format!("invalid sponsor payload: {}", e)] }),
            ),
        },
        "DELETE" => match store.clear(kind, index) {
            Ok(()) => HttpResponse::ok_json(serde_json::json!({ "ok": true })),
            Err(e) => sponsor_error(e),
        },
        _ => HttpResponse::text(405, "method not allowed"),
    }
}

fn cluster_routes(
    method: &str,
    rest: &str,
    full: bool,
    body: &[u8],
    store: &SponsorStore,
) -> HttpResponse {
    if rest.is_empty() {
        return match method {
            "GET" => HttpResponse::ok_json(
                serde_json::to_value(store.cluster_all(full)).unwrap_or_default(),
            ),
            _ => HttpResponse::text(405, "method not allowed"),
        };
    }
    let Some(cluster) = rest
        .strip_prefix('/')
        .and_then(|s| s.parse::<ClusterId>().ok())
    else {
        return HttpResponse::not_found();
    };

    match method {
        "GET" => match store.cluster_get(cluster, full) {
            Ok(sponsor) => {
                HttpResponse::ok_json(serde_json::to_value(sponsor).unwrap_or_default())
            }
            Err(e) => sponsor_error(e),
        },
        "PUT" => match serde_json::from_slice::<Sponsor>(body) {
            Ok(sponsor) => match store.cluster_assign(cluster, sponsor) {
                Ok(()) => HttpResponse::ok_json(serde_json::json!({ "ok": true })),
                Err(e) => sponsor_error(e),
            },
            Err(e) => HttpResponse::json(
                400,
                serde_json::json!({ "errors": [format!("invalid sponsor payload: {}", e)] }),
            ),
        },
        "DELETE" => match store.cluster_clear(cluster) {
            Ok(()) => HttpResponse::ok_json(serde_json::json!({ "ok": true })),
            Err(e) => sponsor_error(e),
        },
        _ => HttpResponse::text(405, "method not allowed"),
    }
}

fn sponsor_error(e: SponsorError) -> HttpResponse {
    match e {
        SponsorError::Invalid(errors) => {
            HttpResponse::json(400, serde_json::json!({ "errors": errors }))
        }
        SponsorError::SlotOutOfRange(i) => HttpResponse::json(
            400,
            serde_json::json!({ "errors": [format!("slot index {} out of range", i)] }),
        ),
        SponsorError::EmptySlot(_) | SponsorError::EmptyCluster(_) => HttpResponse::not_found(),
        other => {
            warn!("sponsor route failed: {}", other);
            HttpResponse::json(500, serde_json::json!({ "error": "internal error" }))
        }
    }
}

/// Run the admin/metrics HTTP server until the process exits
pub async fn start_admin_server(
    store: Arc<SponsorStore>,
    metrics: Arc<Metrics>,
    textures_dir: PathBuf,
    bind: std::net::SocketAddr,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!("admin server listening on http://{}", bind);

    loop {
        let (socket, peer) = listener.accept().await?;
        let store = store.clone();
        let metrics = metrics.clone();
        let textures_dir = textures_dir.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_socket(socket, &store, &metrics, &textures_dir).await {
                debug!("admin request from {} failed: {}", peer, e);
            }
        });
    }
}

async fn handle_socket(
    mut socket: tokio::net::TcpStream,
    store: &SponsorStore,
    metrics: &Metrics,
    textures_dir: &Path,
) -> anyhow::Result<()> {
    let mut raw = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];

    // Read until the end of headers
    let header_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        raw.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_end(&raw) {
            break pos;
        }
        if raw.len() > 64 * 1024 {
            anyhow::bail!("headers too large");
        }
    };

    let header_text = String::from_utf8_lossy(&raw[..header_end]).into_owned();
    let mut lines = header_text.lines();
    let request_line = lines.next().unwrap_or_default().to_string();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let target = parts.next().unwrap_or("").to_string();
    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (target.clone(), String::new()),
    };

    let content_length: usize = lines
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse().ok())
        .unwrap_or(0);

    if content_length > MAX_BODY {
        let response = HttpResponse::text(413, "body too large");
        return write_response(&mut socket, response).await;
    }

    // Read the remainder of the body
    let mut body = raw[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    let response = route(&method, &path, &query, &body, store, metrics, textures_dir);
    write_response(&mut socket, response).await
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n")
}

async fn write_response(
    socket: &mut tokio::net::TcpStream,
    response: HttpResponse,
) -> anyhow::Result<()> {
    let header = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status_line(response.status),
        response.content_type,
        response.body.len()
    );
    socket.write_all(header.as_bytes()).await?;
    socket.write_all(&response.body).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup(tag: &str) -> (SponsorStore, Metrics, PathBuf) {
        static N: AtomicUsize = AtomicUsize::new(0);
        let base = std::env::temp_dir().join(format!(
            "adlands-admin-{}-{}-{}",
            tag,
            std::process::id(),
            N.fetch_add(1, Ordering::Relaxed)
        ));
        let _ = std::fs::remove_dir_all(&base);
        std::fs::create_dir_all(&base).unwrap();
        let textures = base.join("textures");
        let store =
            SponsorStore::load_or_default(base.join("sponsors.json"), textures.clone()).unwrap();
        store.set_reload_hook(Box::new(|_| {}));
        (store, Metrics::new(), textures)
    }

    fn sponsor_json(id: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "id": id,
            "name": format!("{} Corp", id),
            "linkUrl": "https://example.com"
        }))
        .unwrap()
    }

    fn get(store: &SponsorStore, metrics: &Metrics, dir: &Path, path: &str, query: &str) -> HttpResponse {
        route("GET", path, query, &[], store, metrics, dir)
    }

    #[test]
    fn test_health_and_metrics() {
        let (store, metrics, dir) = setup("health");
        assert_eq!(get(&store, &metrics, &dir, "/health", "").status, 200);
        let prom = get(&store, &metrics, &dir, "/metrics", "");
        assert_eq!(prom.status, 200);
        assert!(String::from_utf8_lossy(&prom.body).contains("adlands_players_human"));
        let json = get(&store, &metrics, &dir, "/metrics/json", "");
        assert!(serde_json::from_slice::<serde_json::Value>(&json.body).is_ok());
    }

    #[test]
    fn test_put_get_delete_lifecycle() {
        let (store, metrics, dir) = setup("lifecycle");

        let put = route(
            "PUT",
            "/api/billboard-sponsors/3",
            "",
            &sponsor_json("acme"),
            &store,
            &metrics,
            &dir,
        );
        assert_eq!(put.status, 200);

        let got = get(&store, &metrics, &dir, "/api/billboard-sponsors/3", "");
        assert_eq!(got.status, 200);
        let value: serde_json::Value = serde_json::from_slice(&got.body).unwrap();
        assert_eq!(value["id"], "acme");

        let del = route(
            "DELETE",
            "/api/billboard-sponsors/3",
            "",
            &[],
            &store,
            &metrics,
            &dir,
        );
        assert_eq!(del.status, 200);

        // Deleting an already-empty slot is 404
        let del_again = route(
            "DELETE",
            "/api/billboard-sponsors/3",
            "",
            &[],
            &store,
            &metrics,
            &dir,
        );
        assert_eq!(del_again.status, 404);
    }

    #[test]
    fn test_put_out_of_range_is_400_with_errors() {
        let (store, metrics, dir) = setup("range");
        let put = route(
            "PUT",
            "/api/moon-sponsors/3",
            "",
            &sponsor_json("acme"),
            &store,
            &metrics,
            &dir,
        );
        assert_eq!(put.status, 400);
        let value: serde_json::Value = serde_json::from_slice(&put.body).unwrap();
        assert!(value["errors"].as_array().is_some_and(|e| !e.is_empty()));
    }

    #[test]
    fn test_list_strips_base64_unless_full() {
        let (store, metrics, dir) = setup("strip");
        let mut body: serde_json::Value =
            serde_json::from_slice(&sponsor_json("patterned")).unwrap();
        body["patternImage"] =
            serde_json::Value::String(crate::sponsor::pixel::tests::test_pattern_base64(16, 16));
        route(
            "PUT",
            "/api/billboard-sponsors/0",
            "",
            &serde_json::to_vec(&body).unwrap(),
            &store,
            &metrics,
            &dir,
        );

        let list = get(&store, &metrics, &dir, "/api/billboard-sponsors", "");
        let text = String::from_utf8_lossy(&list.body).into_owned();
        assert!(!text.contains("patternImage"));
        assert!(text.contains("patternUrl"));

        let full = get(&store, &metrics, &dir, "/api/billboard-sponsors", "full=1");
        assert!(String::from_utf8_lossy(&full.body).contains("patternImage"));
    }

    #[test]
    fn test_texture_serving_and_traversal_guard() {
        let (store, metrics, dir) = setup("textures");
        let mut body: serde_json::Value = serde_json::from_slice(&sponsor_json("tex")).unwrap();
        body["patternImage"] =
            serde_json::Value::String(crate::sponsor::pixel::tests::test_pattern_base64(16, 16));
        route(
            "PUT",
            "/api/moon-sponsors/0",
            "",
            &serde_json::to_vec(&body).unwrap(),
            &store,
            &metrics,
            &dir,
        );

        let png = get(&store, &metrics, &dir, "/sponsor-textures/moon0.png", "");
        assert_eq!(png.status, 200);
        assert_eq!(png.content_type, "image/png");

        let evil = get(&store, &metrics, &dir, "/sponsor-textures/../sponsors.json", "");
        assert_eq!(evil.status, 404);
    }

    #[test]
    fn test_cluster_routes_mirror_slot_shape() {
        let (store, metrics, dir) = setup("cluster");
        let put = route(
            "PUT",
            "/api/cluster-sponsors/12",
            "",
            &sponsor_json("tenant"),
            &store,
            &metrics,
            &dir,
        );
        assert_eq!(put.status, 200);
        let got = get(&store, &metrics, &dir, "/api/cluster-sponsors/12", "");
        assert_eq!(got.status, 200);
        let del = route("DELETE", "/api/cluster-sponsors/12", "", &[], &store, &metrics, &dir);
        assert_eq!(del.status, 200);
        let del_again =
            route("DELETE", "/api/cluster-sponsors/12", "", &[], &store, &metrics, &dir);
        assert_eq!(del_again.status, 404);
    }

    #[test]
    fn test_unknown_route_404() {
        let (store, metrics, dir) = setup("unknown");
        assert_eq!(get(&store, &metrics, &dir, "/api/nope", "").status, 404);
    }
}
