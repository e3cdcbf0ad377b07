//! # Serveur proxy de flux
//!
//! Chaque route sert `/stream/{token}.{ext}` : le renderer y lit des octets
//! relayés depuis la source amont, re-découpés et éventuellement bridés.
//! Plusieurs routes peuvent vivre en même temps pour qu'une ancienne route se
//! vide pendant que la suivante démarre.

use crate::error::ProxyError;
use crate::route::{ConversionPolicy, ProxyRoute, RouteId, RouteTable, UpstreamInfo};
use crate::settings::ProxySettings;
use crate::throttle::Throttle;
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{
    ACCEPT_RANGES, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use castutils::{format_ip, guess_local_ip, local_ip_towards};
use futures::StreamExt;
use futures::stream::BoxStream;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// Noms en minuscules : HeaderName les exige, HTTP les compare sans casse
const TRANSFER_MODE_HEADER: &str = "transfermode.dlna.org";
const CONTENT_FEATURES_HEADER: &str = "contentfeatures.dlna.org";

/// Ce que l'appelant reçoit à la création d'une route
#[derive(Debug, Clone)]
pub struct RouteInfo {
    pub id: RouteId,
    /// URL complète à donner au renderer
    pub url: String,
    pub token: String,
}

struct ProxyState {
    settings: ProxySettings,
    routes: RouteTable,
    client: reqwest::Client,
}

impl ProxyState {
    fn lookup(&self, file: &str) -> Option<Arc<ProxyRoute>> {
        let token = file.split('.').next().unwrap_or(file);
        self.routes.by_token(token).filter(|route| !route.is_cancelled())
    }

    /// Ouvre une requête amont, bornée par le délai de connexion.
    async fn fetch(
        &self,
        url: &str,
        range: Option<&HeaderValue>,
    ) -> Result<reqwest::Response, ProxyError> {
        let mut request = self.client.get(url);
        if let Some(range) = range {
            request = request.header(RANGE, range.clone());
        }

        let timeout = self.settings.upstream_connect_timeout;
        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| ProxyError::Timeout {
                url: url.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })?
            .map_err(|e| ProxyError::UpstreamUnreachable {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ProxyError::UpstreamStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }
}

/// Serveur HTTP local servant les routes de cast
pub struct StreamProxyServer {
    state: Arc<ProxyState>,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl StreamProxyServer {
    /// Ouvre le port d'écoute et lance le serveur en tâche de fond.
    pub async fn start(settings: ProxySettings) -> Result<Self, ProxyError> {
        let addr = format!("{}:{}", settings.bind_address, settings.http_port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ProxyError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ProxyError::Bind { addr, source })?;

        let client = reqwest::Client::builder()
            .connect_timeout(settings.upstream_connect_timeout)
            .no_proxy()
            .build()
            .map_err(ProxyError::HttpClient)?;

        let state = Arc::new(ProxyState {
            settings,
            routes: RouteTable::default(),
            client,
        });

        let app = Router::new()
            .route("/health", get(health))
            .route("/stream/{file}", get(serve_route).head(head_route))
            .with_state(state.clone());

        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        let join_handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "Stream proxy server stopped with an error");
            }
        });

        info!(addr = %local_addr, "Stream proxy listening");

        Ok(Self {
            state,
            local_addr,
            shutdown,
            join_handle: Mutex::new(Some(join_handle)),
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.state.settings
    }

    /// Nombre de routes vivantes
    pub fn route_count(&self) -> usize {
        self.state.routes.len()
    }

    /// Hôte à mettre dans les URLs : celui configuré, sinon l'adresse locale
    /// par laquelle on joint le renderer.
    fn advertised_host(&self, renderer_host: Option<&str>) -> String {
        let configured = self.state.settings.advertised_host.trim();
        if !configured.is_empty() {
            return configured.to_string();
        }
        renderer_host
            .and_then(|host| local_ip_towards(host, 80).ok())
            .map(|ip| format_ip(&ip))
            .unwrap_or_else(guess_local_ip)
    }

    /// Crée une route vers `source_url`.
    ///
    /// La source est sondée avant de rendre l'URL : une source injoignable
    /// dans le délai de connexion fait échouer la création. La réponse de la
    /// sonde est gardée pour la première lecture du renderer.
    pub async fn create_route(
        &self,
        source_url: &str,
        policy: ConversionPolicy,
        renderer_host: Option<&str>,
    ) -> Result<RouteInfo, ProxyError> {
        if self.shutdown.is_cancelled() {
            return Err(ProxyError::Closed);
        }

        let probe = self.state.fetch(source_url, None).await.inspect_err(|e| {
            warn!(source = source_url, error = %e, "Upstream probe failed");
        })?;

        let upstream = UpstreamInfo {
            content_type: probe
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            supports_ranges: probe
                .headers()
                .get(ACCEPT_RANGES)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_ascii_lowercase().contains("bytes"))
                .unwrap_or(false),
        };

        let route = Arc::new(ProxyRoute::new(
            source_url.to_string(),
            policy,
            upstream,
            Some(probe),
        ));
        let url = format!(
            "http://{}:{}{}",
            self.advertised_host(renderer_host),
            self.local_port(),
            route.path()
        );
        let info = RouteInfo {
            id: route.id(),
            url,
            token: route.token().to_string(),
        };

        info!(
            route = %info.id,
            source = source_url,
            url = %info.url,
            ranges = route.supports_ranges(),
            "Stream route created"
        );
        self.state.routes.insert(route);
        Ok(info)
    }

    /// Détruit une route. Idempotent : retourne `false` si elle n'existait plus.
    ///
    /// Les transferts en cours ont `drain_grace` pour se terminer.
    pub fn destroy_route(&self, id: RouteId) -> bool {
        match self.state.routes.remove(id) {
            Some(route) => {
                route.cancel.cancel();
                info!(
                    route = %id,
                    bytes = route.bytes_served(),
                    "Stream route destroyed"
                );
                true
            }
            None => false,
        }
    }

    pub fn route(&self, id: RouteId) -> Option<Arc<ProxyRoute>> {
        self.state.routes.by_id(id)
    }

    /// Attend que la route ait servi ses premiers octets à un renderer.
    pub async fn wait_first_transfer(&self, id: RouteId, timeout: Duration) -> bool {
        match self.route(id) {
            Some(route) => route.wait_first_transfer(timeout).await,
            None => false,
        }
    }

    /// Vrai si la source de la route a signalé sa fin
    pub fn upstream_ended(&self, id: RouteId) -> bool {
        self.route(id).map(|r| r.upstream_ended()).unwrap_or(false)
    }

    /// Arrête le serveur : toutes les routes sont détruites et le serveur
    /// attend la fin des transferts (au plus `drain_grace`).
    pub async fn shutdown(&self) {
        for route in self.state.routes.drain() {
            route.cancel.cancel();
        }
        self.shutdown.cancel();

        let handle = self
            .join_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
            info!(addr = %self.local_addr, "Stream proxy stopped");
        }
    }
}

impl Drop for StreamProxyServer {
    fn drop(&mut self) {
        for route in self.state.routes.drain() {
            route.cancel.cancel();
        }
        self.shutdown.cancel();
    }
}

async fn health() -> &'static str {
    "OK"
}

/// En-têtes communs à GET et HEAD
fn route_headers(route: &ProxyRoute) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let content_type = HeaderValue::from_str(&route.content_type())
        .unwrap_or_else(|_| HeaderValue::from_static("video/MP2T"));
    headers.insert(CONTENT_TYPE, content_type);
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if route.supports_ranges() {
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    }
    if let Some(features) = route.content_features() {
        headers.insert(TRANSFER_MODE_HEADER, HeaderValue::from_static("Streaming"));
        if let Ok(value) = HeaderValue::from_str(&features) {
            headers.insert(CONTENT_FEATURES_HEADER, value);
        }
    }
    headers
}

async fn head_route(
    State(state): State<Arc<ProxyState>>,
    Path(file): Path<String>,
) -> Response {
    match state.lookup(&file) {
        Some(route) => (StatusCode::OK, route_headers(&route)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn serve_route(
    State(state): State<Arc<ProxyState>>,
    Path(file): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(route) = state.lookup(&file) else {
        debug!(file = %file, "Request for unknown stream route");
        return StatusCode::NOT_FOUND.into_response();
    };

    // Range ignoré si la source ne sait pas y répondre : flux complet en 200
    let range = headers.get(RANGE).filter(|_| route.supports_ranges());

    // Une seule connexion amont par route : celle ouverte à la création sert
    // toute lecture depuis l'octet 0 et elle est fermée avant une requête
    // partielle.
    let primed = route.take_primed();
    let reuse_primed = range.is_none_or(is_range_from_start);
    let upstream = match primed {
        Some(response) if reuse_primed => response,
        primed => {
            if primed.is_some() {
                debug!(route = %route.id(), "Releasing creation connection before ranged fetch");
            }
            drop(primed);
            match state.fetch(&route.source_url, range).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(route = %route.id(), error = %e, "Upstream fetch failed");
                    return (StatusCode::BAD_GATEWAY, e.to_string()).into_response();
                }
            }
        }
    };

    debug!(
        route = %route.id(),
        range = range.and_then(|r| r.to_str().ok()).unwrap_or("-"),
        upstream_status = upstream.status().as_u16(),
        "Renderer connected to stream route"
    );

    let mut response_headers = route_headers(&route);
    let mut status = StatusCode::OK;
    if upstream.status() == StatusCode::PARTIAL_CONTENT {
        status = StatusCode::PARTIAL_CONTENT;
        if let Some(content_range) = upstream.headers().get(CONTENT_RANGE) {
            response_headers.insert(CONTENT_RANGE, content_range.clone());
        }
    }
    // Pas de longueur annoncée pour un flux live DLNA
    if route.content_features().is_none() || status == StatusCode::PARTIAL_CONTENT {
        if let Some(length) = upstream.headers().get(CONTENT_LENGTH) {
            response_headers.insert(CONTENT_LENGTH, length.clone());
        }
    }

    let body = relay_body(route, upstream, &state.settings);
    (status, response_headers, body).into_response()
}

/// `bytes=0-` : le flux complet convient
fn is_range_from_start(range: &HeaderValue) -> bool {
    range
        .to_str()
        .map(|r| {
            let compact: String = r.chars().filter(|c| !c.is_whitespace()).collect();
            compact.eq_ignore_ascii_case("bytes=0-")
        })
        .unwrap_or(false)
}

/// État du relais amont vers le renderer
struct Relay {
    route: Arc<ProxyRoute>,
    upstream: BoxStream<'static, reqwest::Result<Bytes>>,
    pending: Bytes,
    chunk_size: usize,
    throttle: Option<Throttle>,
    /// Se résout `drain_grace` après la destruction de la route
    shutdown: Pin<Box<dyn Future<Output = ()> + Send>>,
    done: bool,
}

impl Relay {
    async fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        if self.done {
            return None;
        }

        while self.pending.is_empty() {
            let next = tokio::select! {
                _ = &mut self.shutdown => {
                    debug!(route = %self.route.id(), "Route drained, closing response");
                    self.done = true;
                    return None;
                }
                next = self.upstream.next() => next,
            };

            match next {
                Some(Ok(bytes)) => self.pending = bytes,
                Some(Err(e)) => {
                    warn!(route = %self.route.id(), error = %e, "Upstream dropped mid-stream");
                    self.done = true;
                    return Some(Err(io::Error::other(e)));
                }
                None => {
                    debug!(route = %self.route.id(), "Upstream reached end of stream");
                    self.route.mark_upstream_ended();
                    self.done = true;
                    return None;
                }
            }
        }

        let len = self.pending.len().min(self.chunk_size);
        let chunk = self.pending.split_to(len);

        if let Some(throttle) = self.throttle.as_mut() {
            tokio::select! {
                _ = &mut self.shutdown => {
                    self.done = true;
                    return None;
                }
                _ = throttle.pace(len) => {}
            }
        }

        self.route.record_transfer(len);
        Some(Ok(chunk))
    }
}

fn relay_body(route: Arc<ProxyRoute>, upstream: reqwest::Response, settings: &ProxySettings) -> Body {
    let cancel = route.cancel.clone();
    let grace = settings.drain_grace;
    let relay = Relay {
        route,
        upstream: upstream.bytes_stream().boxed(),
        pending: Bytes::new(),
        chunk_size: settings.effective_chunk_size().max(1),
        throttle: Throttle::new(settings.bandwidth_limit_kbps),
        shutdown: Box::pin(async move {
            cancel.cancelled().await;
            tokio::time::sleep(grace).await;
        }),
        done: false,
    };

    let stream = futures::stream::unfold(relay, |mut relay| async move {
        relay.next_chunk().await.map(|item| (item, relay))
    });
    Body::from_stream(stream)
}
