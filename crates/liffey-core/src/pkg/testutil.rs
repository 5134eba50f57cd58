//! In-process HTTP fixture server and tarball builders shared by tests.
//!
//! The server is an axum app with dynamically registered routes, so tests
//! can stand in for the npm registry and tarball hosts without network
//! access. It records every request it sees and tracks how many it is
//! handling at once, which lets tests observe semaphore bounds and
//! cancellation from the outside.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha512};
use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
struct Route {
    status: u16,
    body: Vec<u8>,
    delay: Duration,
}

#[derive(Default)]
struct ServerState {
    routes: Mutex<HashMap<String, Route>>,
    hits: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// A mock registry/tarball server bound to a random local port, serving
/// registered routes and recording every request it sees.
pub struct FixtureServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
}

impl FixtureServer {
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let state = Arc::new(ServerState::default());
        let app = Router::new()
            .fallback(serve_request)
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn route(&self, path: &str, status: u16, body: Vec<u8>) {
        self.route_with_delay(path, status, body, Duration::ZERO);
    }

    pub fn route_with_delay(&self, path: &str, status: u16, body: Vec<u8>, delay: Duration) {
        self.state.routes.lock().unwrap().insert(
            path.to_string(),
            Route {
                status,
                body,
                delay,
            },
        );
    }

    pub fn json_route(&self, path: &str, value: &serde_json::Value) {
        self.route(path, 200, serde_json::to_vec(value).unwrap());
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn hits(&self) -> Vec<String> {
        self.state.hits.lock().unwrap().clone()
    }

    pub fn hit_count(&self, path: &str) -> usize {
        self.state
            .hits
            .lock()
            .unwrap()
            .iter()
            .filter(|p| *p == path)
            .count()
    }

    pub fn total_hits(&self) -> usize {
        self.state.hits.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Fallback handler: look the path up in the registered routes.
async fn serve_request(State(state): State<Arc<ServerState>>, request: Request) -> Response {
    let path = request.uri().path().to_string();
    state.hits.lock().unwrap().push(path.clone());

    let current = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(current, Ordering::SeqCst);

    let route = state.routes.lock().unwrap().get(&path).cloned();
    let response = match route {
        Some(route) => {
            if !route.delay.is_zero() {
                tokio::time::sleep(route.delay).await;
            }
            let status =
                StatusCode::from_u16(route.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Body::from(route.body)).into_response()
        }
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    };

    state.in_flight.fetch_sub(1, Ordering::SeqCst);
    response
}

/// Build a gzipped tarball from `(path, contents)` pairs.
pub fn gzipped_tarball(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut tar_bytes = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut tar_bytes);
        for (path, contents) in entries {
            let data = contents.as_bytes();
            let mut header = tar::Header::new_gnu();
            header.set_path(path).unwrap();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, data).unwrap();
        }
        builder.finish().unwrap();
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    encoder.finish().unwrap()
}

/// The `sha512-...` integrity tag for a byte payload.
pub fn integrity_for(data: &[u8]) -> String {
    let mut hasher = Sha512::new();
    hasher.update(data);
    format!("sha512-{}", BASE64.encode(hasher.finalize()))
}
