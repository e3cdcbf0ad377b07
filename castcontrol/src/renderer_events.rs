//! Abonnements GENA aux services AVTransport et RenderingControl.
//!
//! Un serveur axum reçoit les NOTIFY sur `/renderer-events/<clé>` ; chaque
//! abonnement a sa tâche qui valide le SID, remet les notifications dans
//! l'ordre du `SEQ`, les traduit et renouvelle l'abonnement à l'échéance
//! annoncée par le renderer (moins une marge).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::routing::any;
use castupnp::gena::{
    NT_UPNP_EVENT, NTS_PROPCHANGE, parse_notify_body, parse_seq, parse_timeout, timeout_header,
};
use castutils::{format_ip, local_ip_towards, parse_host_port};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::errors::CastError;
use crate::events::{
    DEFAULT_REORDER_WINDOW, EventSource, EventSubscription, NotifyTranslator, SequenceGate,
};
use crate::model::{DiscoveredDevice, RemoteEvent, ServiceEndpoint};
use crate::settings::EventSettings;

const CALLBACK_PREFIX: &str = "/renderer-events";

/// NOTIFY reçu, avant validation du SID
#[derive(Debug)]
struct IncomingNotify {
    sid: Option<String>,
    seq: Option<u32>,
    body: Bytes,
}

impl IncomingNotify {
    fn validate_sid(&self, expected: &str) -> bool {
        self.sid
            .as_deref()
            .is_some_and(|received| received.trim().eq_ignore_ascii_case(expected))
    }
}

type CallbackTable = Arc<RwLock<HashMap<String, mpsc::UnboundedSender<IncomingNotify>>>>;

/// Requêtes GENA et table des callbacks, partagées avec les tâches
#[derive(Clone)]
struct GenaClient {
    client: reqwest::Client,
    settings: EventSettings,
    callbacks: CallbackTable,
}

/// Écoute des NOTIFY et gestion des abonnements GENA
pub struct GenaEventListener {
    gena: GenaClient,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
}

impl GenaEventListener {
    /// Démarre le serveur de callback sur un port éphémère.
    pub async fn start(settings: EventSettings) -> Result<Arc<Self>, CastError> {
        let listener = tokio::net::TcpListener::bind("0.0.0.0:0")
            .await
            .map_err(|e| CastError::protocol(format!("cannot bind event listener: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| CastError::protocol(format!("event listener address: {e}")))?;

        let client = reqwest::Client::builder()
            .no_proxy()
            .connect_timeout(settings.http_timeout)
            .build()
            .map_err(|e| CastError::protocol(format!("cannot build HTTP client: {e}")))?;

        let callbacks: CallbackTable = Arc::new(RwLock::new(HashMap::new()));
        let app = Router::new()
            .route(&format!("{CALLBACK_PREFIX}/{{key}}"), any(notify_handler))
            .with_state(callbacks.clone());

        let shutdown = CancellationToken::new();
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(server_shutdown.cancelled_owned())
                .await
            {
                warn!(error = %e, "Event listener stopped");
            }
        });

        info!(port = local_addr.port(), "Renderer event listener bound");
        Ok(Arc::new(Self {
            gena: GenaClient {
                client,
                settings,
                callbacks,
            },
            local_addr,
            shutdown,
        }))
    }

    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Nombre d'abonnements vivants
    pub fn active_subscriptions(&self) -> usize {
        self.gena
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn callback_url(&self, event_url: &str, key: &str) -> Result<String, CastError> {
        let (host, port) = parse_host_port(event_url)
            .ok_or_else(|| CastError::protocol(format!("invalid eventSubURL {event_url}")))?;
        let local_ip = local_ip_towards(&host, port).map_err(|e| {
            CastError::device_unreachable(format!("no local route towards {host}: {e}"))
        })?;
        Ok(format!(
            "http://{}:{}{}/{}",
            format_ip(&local_ip),
            self.local_addr.port(),
            CALLBACK_PREFIX,
            key
        ))
    }

    /// Abonne un service et lance sa tâche de suivi.
    async fn subscribe_service(
        &self,
        device: &DiscoveredDevice,
        endpoint: &ServiceEndpoint,
        events: mpsc::UnboundedSender<RemoteEvent>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, CastError> {
        let event_url = endpoint.event_sub_url.clone().ok_or_else(|| {
            CastError::protocol(format!("{} has no eventSubURL", endpoint.service_type))
        })?;

        let key = uuid::Uuid::new_v4().simple().to_string();
        let incoming = self.gena.register(&key);
        let callback = match self.callback_url(&event_url, &key) {
            Ok(callback) => callback,
            Err(e) => {
                self.gena.unregister(&key);
                return Err(e);
            }
        };

        let grant = match self.gena.send_subscribe(&event_url, &callback).await {
            Ok(grant) => grant,
            Err(e) => {
                self.gena.unregister(&key);
                return Err(e);
            }
        };

        info!(
            device = %device.id,
            service = endpoint.service_type.as_str(),
            sid = grant.sid.as_str(),
            timeout_secs = grant.timeout.as_secs(),
            "Subscribed to renderer events"
        );

        let task = SubscriptionTask {
            gena: self.gena.clone(),
            device_id: device.id.clone(),
            service_type: endpoint.service_type.clone(),
            event_url,
            key,
            sid: grant.sid,
            expires_at: Instant::now() + grant.timeout,
            granted: grant.timeout,
            incoming,
            events,
            cancel,
        };
        Ok(tokio::spawn(task.run()))
    }
}

impl GenaClient {
    fn register(&self, key: &str) -> mpsc::UnboundedReceiver<IncomingNotify> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), tx);
        rx
    }

    fn unregister(&self, key: &str) {
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    async fn send_subscribe(&self, event_url: &str, callback: &str) -> Result<Grant, CastError> {
        let method = gena_method(b"SUBSCRIBE")?;
        let response = self
            .client
            .request(method, event_url)
            .header("CALLBACK", format!("<{callback}>"))
            .header("NT", NT_UPNP_EVENT)
            .header("TIMEOUT", timeout_header(self.settings.subscription_timeout))
            .timeout(self.settings.http_timeout)
            .send()
            .await
            .map_err(|e| gena_http_error("SUBSCRIBE", event_url, e))?;

        if !response.status().is_success() {
            return Err(CastError::ActionRejected {
                action: "SUBSCRIBE".to_string(),
                code: u32::from(response.status().as_u16()),
                description: format!("SUBSCRIBE {event_url} returned HTTP {}", response.status()),
            });
        }

        let sid = header(response.headers(), "SID")
            .filter(|sid| !sid.is_empty())
            .ok_or_else(|| CastError::protocol("SUBSCRIBE response missing SID"))?;
        Ok(Grant {
            sid,
            timeout: self.granted_timeout(response.headers()),
        })
    }

    async fn send_renew(&self, event_url: &str, sid: &str) -> Result<Duration, CastError> {
        let method = gena_method(b"SUBSCRIBE")?;
        let response = self
            .client
            .request(method, event_url)
            .header("SID", sid)
            .header("TIMEOUT", timeout_header(self.settings.subscription_timeout))
            .timeout(self.settings.http_timeout)
            .send()
            .await
            .map_err(|e| gena_http_error("SUBSCRIBE renewal", event_url, e))?;

        if !response.status().is_success() {
            return Err(CastError::device_unreachable(format!(
                "renewal of {sid} returned HTTP {}",
                response.status()
            )));
        }
        Ok(self.granted_timeout(response.headers()))
    }

    async fn send_unsubscribe(&self, event_url: &str, sid: &str) {
        let method = match gena_method(b"UNSUBSCRIBE") {
            Ok(method) => method,
            Err(e) => {
                warn!(error = %e, "Failed to build UNSUBSCRIBE request");
                return;
            }
        };
        match self
            .client
            .request(method, event_url)
            .header("SID", sid)
            .timeout(self.settings.http_timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                debug!(sid, "Unsubscribed from renderer events");
            }
            Ok(response) => {
                warn!(sid, status = %response.status(), "UNSUBSCRIBE returned non-success status");
            }
            Err(e) => warn!(sid, error = %e, "UNSUBSCRIBE request failed"),
        }
    }

    fn granted_timeout(&self, headers: &reqwest::header::HeaderMap) -> Duration {
        parse_timeout(
            header(headers, "TIMEOUT").as_deref(),
            self.settings.subscription_timeout,
        )
        .filter(|timeout| !timeout.is_zero())
        .unwrap_or(self.settings.subscription_timeout)
    }

    /// Instant de renouvellement : échéance moins la marge, ou mi-parcours
    /// si la durée accordée est plus courte que la marge.
    fn renewal_deadline(&self, expires_at: Instant, granted: Duration) -> Instant {
        let lead = if self.settings.renewal_margin < granted {
            self.settings.renewal_margin
        } else {
            granted / 2
        };
        expires_at - lead
    }
}

impl Drop for GenaEventListener {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl EventSource for GenaEventListener {
    async fn subscribe(&self, device: &DiscoveredDevice) -> Result<EventSubscription, CastError> {
        let avtransport = device.avtransport().ok_or_else(|| {
            CastError::protocol(format!("{} exposes no AVTransport service", device.id))
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let mut tasks = vec![
            self.subscribe_service(device, avtransport, tx.clone(), cancel.child_token())
                .await?,
        ];

        if let Some(rendering) = device
            .rendering_control()
            .filter(|rc| rc.event_sub_url.is_some())
        {
            match self
                .subscribe_service(device, rendering, tx, cancel.child_token())
                .await
            {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    warn!(device = %device.id, error = %e, "RenderingControl events unavailable")
                }
            }
        }

        let id = format!("{}#{}", device.id, uuid::Uuid::new_v4().simple());
        Ok(EventSubscription::new(id, rx, cancel)
            .with_tasks(tasks, self.gena.settings.http_timeout * 2))
    }
}

struct Grant {
    sid: String,
    timeout: Duration,
}

/// Suivi d'un abonnement : NOTIFY, renouvellement, résiliation
struct SubscriptionTask {
    gena: GenaClient,
    device_id: String,
    service_type: String,
    event_url: String,
    key: String,
    sid: String,
    expires_at: Instant,
    granted: Duration,
    incoming: mpsc::UnboundedReceiver<IncomingNotify>,
    events: mpsc::UnboundedSender<RemoteEvent>,
    cancel: CancellationToken,
}

impl SubscriptionTask {
    async fn run(mut self) {
        let mut gate = SequenceGate::new(DEFAULT_REORDER_WINDOW);
        let mut translator = NotifyTranslator::default();

        loop {
            let renew_at = self.gena.renewal_deadline(self.expires_at, self.granted);

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.gena.unregister(&self.key);
                    self.gena.send_unsubscribe(&self.event_url, &self.sid).await;
                    break;
                }
                notify = self.incoming.recv() => {
                    let Some(notify) = notify else { break };
                    if !notify.validate_sid(&self.sid) {
                        debug!(
                            device = %self.device_id,
                            expected_sid = self.sid.as_str(),
                            received_sid = notify.sid.as_deref().unwrap_or("none"),
                            "Ignoring notify with mismatched SID"
                        );
                        continue;
                    }
                    for body in gate.push(notify.seq, notify.body) {
                        self.deliver(&mut translator, &body);
                    }
                }
                _ = tokio::time::sleep_until(renew_at) => {
                    if let Err(e) = self.renew().await {
                        warn!(
                            device = %self.device_id,
                            service = self.service_type.as_str(),
                            error = %e,
                            "Event subscription lost"
                        );
                        self.gena.unregister(&self.key);
                        let _ = self.events.send(RemoteEvent::ConnectionLost {
                            reason: e.to_string(),
                        });
                        break;
                    }
                }
            }
        }
        trace!(device = %self.device_id, service = self.service_type.as_str(), "Subscription task ended");
    }

    fn deliver(&self, translator: &mut NotifyTranslator, body: &[u8]) {
        let values = match parse_notify_body(body) {
            Ok(values) => values,
            Err(e) => {
                debug!(device = %self.device_id, error = %e, "Malformed NOTIFY body dropped");
                return;
            }
        };
        for event in translator.translate(&values) {
            trace!(device = %self.device_id, ?event, "Renderer event");
            if self.events.send(event).is_err() {
                return;
            }
        }
    }

    /// Renouvelle avec `renewal_attempts` essais avant l'échéance.
    async fn renew(&mut self) -> Result<(), CastError> {
        let attempts = self.gena.settings.renewal_attempts.max(1);
        let mut last_error = CastError::device_unreachable("renewal not attempted");

        for attempt in 1..=attempts {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            match self.gena.send_renew(&self.event_url, &self.sid).await {
                Ok(granted) => {
                    self.granted = granted;
                    self.expires_at = Instant::now() + granted;
                    debug!(
                        device = %self.device_id,
                        sid = self.sid.as_str(),
                        timeout_secs = granted.as_secs(),
                        "Renewed event subscription"
                    );
                    return Ok(());
                }
                Err(e) => {
                    debug!(device = %self.device_id, attempt, error = %e, "Renewal failed");
                    last_error = e;
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_secs(1) * attempt).await;
                    }
                }
            }
        }
        Err(CastError::device_unreachable(format!(
            "subscription renewal failed after {attempts} attempts: {last_error}"
        )))
    }
}

fn gena_method(name: &[u8]) -> Result<Method, CastError> {
    Method::from_bytes(name).map_err(|e| CastError::protocol(format!("invalid method: {e}")))
}

fn gena_http_error(action: &str, url: &str, err: reqwest::Error) -> CastError {
    if err.is_timeout() {
        CastError::Timeout(format!("{action} on {url}"))
    } else {
        CastError::device_unreachable(format!("{action} on {url}: {err}"))
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
}

async fn notify_handler(
    State(callbacks): State<CallbackTable>,
    Path(key): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if method.as_str() != "NOTIFY" {
        return StatusCode::METHOD_NOT_ALLOWED;
    }

    let nt_ok = header(&headers, "NT").is_some_and(|nt| nt.eq_ignore_ascii_case(NT_UPNP_EVENT));
    let nts_ok =
        header(&headers, "NTS").is_some_and(|nts| nts.eq_ignore_ascii_case(NTS_PROPCHANGE));
    let sid = header(&headers, "SID");
    if !nt_ok || !nts_ok || sid.is_none() {
        return StatusCode::PRECONDITION_FAILED;
    }

    let sender = callbacks
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .get(&key)
        .cloned();
    let Some(sender) = sender else {
        debug!(key = key.as_str(), "NOTIFY for unknown subscription");
        return StatusCode::PRECONDITION_FAILED;
    };

    let notify = IncomingNotify {
        sid,
        seq: parse_seq(header(&headers, "SEQ").as_deref()),
        body,
    };
    if sender.send(notify).is_err() {
        return StatusCode::PRECONDITION_FAILED;
    }
    StatusCode::OK
}
