//! Routes du proxy : une route associe un jeton non devinable à une source amont.

use castupnp::didl::content_features_for;
use castutils::url_extension;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identifiant d'une route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteId(Uuid);

impl RouteId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RouteId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transformation appliquée au flux avant de le servir
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConversionPolicy {
    /// Octets et type MIME amont relayés tels quels
    PassThrough,
    /// Flux live présenté à un renderer DLNA : type MIME déduit de
    /// l'extension, en-têtes `transferMode.dlna.org` / `contentFeatures.dlna.org`,
    /// pas de `Content-Length`
    #[default]
    DlnaLive,
}

/// Type MIME d'après l'extension de l'URL (défaut `video/MP2T`)
pub fn content_type_for_extension(ext: &str) -> &'static str {
    match ext {
        "m3u8" => "application/x-mpegURL",
        "mp4" => "video/mp4",
        "mkv" => "video/x-matroska",
        _ => "video/MP2T",
    }
}

/// Extension annoncée dans l'URL de la route
pub(crate) fn route_extension(source_url: &str) -> String {
    match url_extension(source_url).as_deref() {
        Some(ext @ ("ts" | "m3u8" | "mp4" | "mkv")) => ext.to_string(),
        _ => "ts".to_string(),
    }
}

/// Jeton aléatoire de 128 bits en hexadécimal
pub(crate) fn random_token() -> String {
    format!("{:032x}", rand::random::<u128>())
}

/// Ce qu'on a appris de la source lors de la sonde de création
#[derive(Debug, Clone, Default)]
pub(crate) struct UpstreamInfo {
    pub content_type: Option<String>,
    pub supports_ranges: bool,
}

/// Une route vivante du proxy
pub struct ProxyRoute {
    pub(crate) id: RouteId,
    pub(crate) token: String,
    pub(crate) source_url: String,
    pub(crate) policy: ConversionPolicy,
    pub(crate) extension: String,
    pub(crate) upstream: UpstreamInfo,
    /// Réponse de la sonde, réutilisée par la première lecture depuis l'octet 0
    pub(crate) primed: Mutex<Option<reqwest::Response>>,
    pub(crate) cancel: CancellationToken,
    first_transfer: watch::Sender<bool>,
    upstream_ended: AtomicBool,
    bytes_served: AtomicU64,
}

impl ProxyRoute {
    pub(crate) fn new(
        source_url: String,
        policy: ConversionPolicy,
        upstream: UpstreamInfo,
        primed: Option<reqwest::Response>,
    ) -> Self {
        let (first_transfer, _) = watch::channel(false);
        Self {
            id: RouteId::new(),
            token: random_token(),
            extension: route_extension(&source_url),
            source_url,
            policy,
            upstream,
            primed: Mutex::new(primed),
            cancel: CancellationToken::new(),
            first_transfer,
            upstream_ended: AtomicBool::new(false),
            bytes_served: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> RouteId {
        self.id
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// Chemin servi : `/stream/{token}.{ext}`
    pub fn path(&self) -> String {
        format!("/stream/{}.{}", self.token, self.extension)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn supports_ranges(&self) -> bool {
        self.upstream.supports_ranges
    }

    /// Type MIME servi au renderer
    pub fn content_type(&self) -> String {
        match self.policy {
            ConversionPolicy::PassThrough => self
                .upstream
                .content_type
                .clone()
                .unwrap_or_else(|| content_type_for_extension(&self.extension).to_string()),
            ConversionPolicy::DlnaLive => content_type_for_extension(&self.extension).to_string(),
        }
    }

    /// Valeur `contentFeatures.dlna.org` pour la politique DLNA
    pub fn content_features(&self) -> Option<String> {
        match self.policy {
            ConversionPolicy::PassThrough => None,
            ConversionPolicy::DlnaLive => Some(content_features_for(&self.path())),
        }
    }

    pub(crate) fn take_primed(&self) -> Option<reqwest::Response> {
        match self.primed.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    pub(crate) fn record_transfer(&self, len: usize) {
        self.bytes_served.fetch_add(len as u64, Ordering::Relaxed);
        self.first_transfer.send_if_modified(|sent| {
            if *sent {
                false
            } else {
                *sent = true;
                true
            }
        });
    }

    pub(crate) fn mark_upstream_ended(&self) {
        self.upstream_ended.store(true, Ordering::Release);
    }

    /// Vrai une fois qu'au moins un morceau a été transmis à un renderer
    pub fn has_transferred(&self) -> bool {
        *self.first_transfer.borrow()
    }

    /// Vrai si un relais de cette route a atteint la fin du flux amont
    pub fn upstream_ended(&self) -> bool {
        self.upstream_ended.load(Ordering::Acquire)
    }

    pub fn bytes_served(&self) -> u64 {
        self.bytes_served.load(Ordering::Relaxed)
    }

    /// Attend le premier transfert d'octets, au plus `timeout`.
    ///
    /// Retourne `false` si le délai expire ou si la route est détruite avant.
    pub async fn wait_first_transfer(&self, timeout: Duration) -> bool {
        let mut rx = self.first_transfer.subscribe();
        let wait = async {
            tokio::select! {
                res = rx.wait_for(|sent| *sent) => res.is_ok(),
                _ = self.cancel.cancelled() => false,
            }
        };
        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }
}

/// Table des routes vivantes, indexée par jeton et par identifiant
#[derive(Default)]
pub(crate) struct RouteTable {
    by_token: RwLock<HashMap<String, std::sync::Arc<ProxyRoute>>>,
    tokens: RwLock<HashMap<RouteId, String>>,
}

impl RouteTable {
    pub fn insert(&self, route: std::sync::Arc<ProxyRoute>) {
        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        let mut by_token = self.by_token.write().unwrap_or_else(|e| e.into_inner());
        tokens.insert(route.id, route.token.clone());
        by_token.insert(route.token.clone(), route);
    }

    pub fn by_token(&self, token: &str) -> Option<std::sync::Arc<ProxyRoute>> {
        let by_token = self.by_token.read().unwrap_or_else(|e| e.into_inner());
        by_token.get(token).cloned()
    }

    pub fn by_id(&self, id: RouteId) -> Option<std::sync::Arc<ProxyRoute>> {
        let token = {
            let tokens = self.tokens.read().unwrap_or_else(|e| e.into_inner());
            tokens.get(&id).cloned()?
        };
        self.by_token(&token)
    }

    pub fn remove(&self, id: RouteId) -> Option<std::sync::Arc<ProxyRoute>> {
        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        let mut by_token = self.by_token.write().unwrap_or_else(|e| e.into_inner());
        let token = tokens.remove(&id)?;
        by_token.remove(&token)
    }

    pub fn drain(&self) -> Vec<std::sync::Arc<ProxyRoute>> {
        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        let mut by_token = self.by_token.write().unwrap_or_else(|e| e.into_inner());
        tokens.clear();
        by_token.drain().map(|(_, route)| route).collect()
    }

    pub fn len(&self) -> usize {
        self.by_token.read().map(|m| m.len()).unwrap_or(0)
    }
}
