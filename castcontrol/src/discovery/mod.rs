//! Découverte SSDP des renderers.
//!
//! Le service envoie périodiquement des M-SEARCH, écoute les annonces
//! `ssdp:alive` / `ssdp:byebye` et alimente le [`DeviceRegistry`]. Un
//! balayage à chaque période oublie les renderers silencieux.
//!
//! Sans multicast (pas d'interface, port refusé...), `start` signale
//! [`CastError::DiscoveryDegraded`] mais la boucle continue et retente la
//! création du socket à chaque période.
//!
//! Certaines TV ne répondent pas aux M-SEARCH : le /24 local est alors
//! balayé périodiquement en interrogeant directement une URL de description
//! connue (`http://<hôte>:9197/dmr` par défaut). Les renderers trouvés ainsi
//! sont revérifiés à chaque période pour ne pas expirer.

pub mod upnp_provider;

use std::collections::HashSet;
use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use castupnp::ssdp::{SsdpClient, SsdpEvent, extract_udn_from_usn};
use castutils::{guess_local_ip, subnet_hosts};
use futures::stream::{self, StreamExt};
use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::errors::CastError;
use crate::model::DiscoveredDevice;
use crate::registry::{DeviceRegistry, UpsertOutcome};
use crate::settings::{DiscoverySettings, SweepSettings};

pub use upnp_provider::DescriptionProvider;

/// État de la boucle de découverte
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryStatus {
    Stopped,
    Running,
    /// Découverte partielle ou impossible, la boucle retente
    Degraded(String),
}

/// Renderer vu (inséré ou rafraîchi avec une nouvelle description)
#[derive(Debug, Clone)]
pub struct DeviceSighting {
    pub device: DiscoveredDevice,
    pub outcome: UpsertOutcome,
}

pub struct DiscoveryService {
    registry: Arc<DeviceRegistry>,
    settings: DiscoverySettings,
    provider: DescriptionProvider,
    status: watch::Sender<DiscoveryStatus>,
    sightings: broadcast::Sender<DeviceSighting>,
    /// Descriptions en cours de téléchargement, par `LOCATION`
    fetching: Mutex<HashSet<String>>,
    /// Descriptions trouvées par balayage, revérifiées à chaque période
    swept: Mutex<HashSet<String>>,
    sweeping: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
}

impl DiscoveryService {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        settings: DiscoverySettings,
    ) -> Result<Arc<Self>, CastError> {
        let provider = DescriptionProvider::new(settings.description_timeout)?;
        let (status, _) = watch::channel(DiscoveryStatus::Stopped);
        let (sightings, _) = broadcast::channel(64);
        Ok(Arc::new(Self {
            registry,
            settings,
            provider,
            status,
            sightings,
            fetching: Mutex::new(HashSet::new()),
            swept: Mutex::new(HashSet::new()),
            sweeping: AtomicBool::new(false),
            cancel: Mutex::new(None),
        }))
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn status(&self) -> DiscoveryStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<DiscoveryStatus> {
        self.status.subscribe()
    }

    /// Flux des renderers vus ; chaque abonné reprend au moment de
    /// l'abonnement.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceSighting> {
        self.sightings.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Démarre la découverte. Idempotent.
    ///
    /// Retourne `DiscoveryDegraded` si le multicast est indisponible ; la
    /// boucle tourne quand même et retente.
    pub fn start(self: &Arc<Self>) -> Result<(), CastError> {
        let token = {
            let mut guard = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
            if guard.is_some() {
                return Ok(());
            }
            let token = CancellationToken::new();
            *guard = Some(token.clone());
            token
        };

        let (client, degraded) = open_client();
        self.set_status(match &degraded {
            Some(reason) => DiscoveryStatus::Degraded(reason.clone()),
            None => DiscoveryStatus::Running,
        });

        info!(
            interval_ms = self.settings.probe_interval.as_millis() as u64,
            targets = ?self.settings.search_targets,
            "Starting SSDP discovery"
        );
        tokio::spawn(Arc::clone(self).run(token, client));

        match degraded {
            Some(reason) => Err(CastError::DiscoveryDegraded(reason)),
            None => Ok(()),
        }
    }

    pub fn stop(&self) {
        let token = self
            .cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(token) = token {
            info!("Stopping SSDP discovery");
            token.cancel();
            self.set_status(DiscoveryStatus::Stopped);
        }
    }

    /// Interroge directement une URL de description et enregistre le
    /// renderer (TV qui ignore les M-SEARCH).
    pub async fn probe_location(&self, location: &str) -> Result<DiscoveredDevice, CastError> {
        let device = self.provider.build_renderer(location, None, None).await?;
        self.record(device.clone());
        Ok(device)
    }

    /// Balaye le /24 de l'adresse locale. Retourne les renderers trouvés.
    pub async fn sweep_subnet(&self) -> Vec<DiscoveredDevice> {
        let Some(sweep) = &self.settings.sweep else {
            return Vec::new();
        };
        let hosts = match guess_local_ip().parse::<Ipv4Addr>() {
            Ok(local) => subnet_hosts(local),
            Err(_) => Vec::new(),
        };
        if hosts.is_empty() {
            debug!("No IPv4 subnet to sweep");
            return Vec::new();
        }
        self.sweep_hosts(&hosts, sweep).await
    }

    /// Interroge `http://<hôte>:<port><path>` pour chaque hôte, au plus
    /// `concurrency` requêtes à la fois.
    pub async fn sweep_hosts(
        &self,
        hosts: &[Ipv4Addr],
        sweep: &SweepSettings,
    ) -> Vec<DiscoveredDevice> {
        let started = Instant::now();
        let found: Vec<DiscoveredDevice> = stream::iter(hosts.iter().copied())
            .map(|host| {
                let location = format!("http://{host}:{}{}", sweep.port, sweep.path);
                self.sweep_location(location, sweep.timeout)
            })
            .buffer_unordered(sweep.concurrency.max(1))
            .filter_map(|device| async move { device })
            .collect()
            .await;
        debug!(
            hosts = hosts.len(),
            found = found.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Subnet sweep done"
        );
        found
    }

    async fn sweep_location(&self, location: String, timeout: Duration) -> Option<DiscoveredDevice> {
        if !self.begin_fetch(&location) {
            return None;
        }
        let result =
            tokio::time::timeout(timeout, self.provider.build_renderer(&location, None, None)).await;
        self.end_fetch(&location);

        match result {
            Ok(Ok(device)) => {
                self.swept
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(location);
                self.record(device.clone());
                Some(device)
            }
            Ok(Err(e)) => {
                trace!(location = location.as_str(), error = %e, "No renderer at swept address");
                None
            }
            Err(_) => {
                trace!(location = location.as_str(), "Swept address timed out");
                None
            }
        }
    }

    /// Revérifie les renderers trouvés par balayage ; un renderer qui ne
    /// répond plus est laissé à l'expiration.
    async fn refresh_swept(&self, sweep: &SweepSettings) {
        let locations: Vec<String> = self
            .swept
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        stream::iter(locations)
            .for_each_concurrent(sweep.concurrency.max(1), |location| async move {
                if self.is_fetching(&location) {
                    return;
                }
                if self
                    .sweep_location(location.clone(), sweep.timeout)
                    .await
                    .is_none()
                {
                    debug!(location = location.as_str(), "Swept renderer no longer answers");
                    self.swept
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .remove(&location);
                }
            })
            .await;
    }

    /// Lance un balayage en tâche de fond, sauf s'il y en a déjà un.
    fn spawn_sweep(self: &Arc<Self>, cancel: &CancellationToken, full: bool) {
        let Some(sweep) = self.settings.sweep.clone() else {
            return;
        };
        if self.sweeping.swap(true, Ordering::SeqCst) {
            trace!("Subnet sweep still running");
            return;
        }
        let this = Arc::clone(self);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = async {
                    if full {
                        let found = this.sweep_subnet().await;
                        if !found.is_empty() {
                            info!(count = found.len(), "Subnet sweep found renderers");
                        }
                    } else {
                        this.refresh_swept(&sweep).await;
                    }
                } => {}
            }
            this.sweeping.store(false, Ordering::SeqCst);
        });
    }

    fn set_status(&self, status: DiscoveryStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    fn record(&self, device: DiscoveredDevice) -> UpsertOutcome {
        let outcome = self.registry.upsert(device.clone());
        let _ = self.sightings.send(DeviceSighting { device, outcome });
        outcome
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken, mut client: Option<SsdpClient>) {
        let mut probe = tokio::time::interval(self.settings.probe_interval);
        probe.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep = self.settings.sweep.as_ref().map(|sweep| {
            let mut timer = tokio::time::interval(sweep.interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = probe.tick() => {
                    let expired = self.registry.purge_expired();
                    if !expired.is_empty() {
                        debug!(count = expired.len(), "Expired silent renderers");
                    }

                    if client.is_none() {
                        let (reopened, degraded) = open_client();
                        client = reopened;
                        self.set_status(match degraded {
                            Some(reason) => DiscoveryStatus::Degraded(reason),
                            None => DiscoveryStatus::Running,
                        });
                    }

                    let probed = match &client {
                        Some(ssdp) => self.probe(ssdp).await,
                        None => Ok(()),
                    };
                    if let Err(e) = probed {
                        warn!(error = %e, "M-SEARCH failed, discovery degraded");
                        self.set_status(DiscoveryStatus::Degraded(e.to_string()));
                        client = None;
                    }

                    if self.has_swept() {
                        self.spawn_sweep(&cancel, false);
                    }
                }
                _ = next_tick(sweep.as_mut()) => self.spawn_sweep(&cancel, true),
                received = next_event(client.as_ref()) => match received {
                    Ok(Some(event)) => {
                        let this = Arc::clone(&self);
                        tokio::spawn(async move { this.handle_event(event).await });
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, "SSDP receive failed, discovery degraded");
                        self.set_status(DiscoveryStatus::Degraded(e.to_string()));
                        client = None;
                    }
                },
            }
        }
        debug!("SSDP discovery loop ended");
    }

    async fn probe(&self, ssdp: &SsdpClient) -> io::Result<()> {
        for target in &self.settings.search_targets {
            ssdp.send_msearch(target, self.settings.mx).await?;
        }
        trace!(targets = self.settings.search_targets.len(), "M-SEARCH sent");
        Ok(())
    }

    /// Traite une annonce SSDP.
    ///
    /// Une `LOCATION` inchangée pour un renderer connu rafraîchit seulement
    /// `last_seen` ; sinon la description est (re)lue.
    pub(crate) async fn handle_event(&self, event: SsdpEvent) {
        let Some(id) = extract_udn_from_usn(event.usn()) else {
            trace!(usn = event.usn(), "Advertisement without uuid, dropped");
            return;
        };

        if let SsdpEvent::ByeBye { .. } = event {
            self.registry.remove(&id);
            return;
        }

        if !is_renderer_type(event.notification_type()) {
            trace!(device = %id, nt = event.notification_type(), "Not a renderer advertisement");
            return;
        }
        let Some(location) = event.location().filter(|l| !l.is_empty()) else {
            debug!(device = %id, "Advertisement without LOCATION, dropped");
            return;
        };

        let unchanged = self
            .registry
            .get_any(&id)
            .is_some_and(|known| known.location == location && known.address == event.from().ip());
        if unchanged {
            self.registry.touch(&id, Instant::now());
            return;
        }

        if !self.begin_fetch(location) {
            return;
        }
        let result = self
            .provider
            .build_renderer(location, Some(&id), Some(event.from().ip()))
            .await;
        self.end_fetch(location);

        match result {
            Ok(device) => {
                self.record(device);
            }
            Err(e) => debug!(device = %id, location, error = %e, "Description dropped"),
        }
    }

    fn begin_fetch(&self, location: &str) -> bool {
        self.fetching
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(location.to_string())
    }

    fn is_fetching(&self, location: &str) -> bool {
        self.fetching
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(location)
    }

    fn has_swept(&self) -> bool {
        !self
            .swept
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    fn end_fetch(&self, location: &str) {
        self.fetching
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(location);
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        if let Some(token) = self
            .cancel
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            token.cancel();
        }
    }
}

fn open_client() -> (Option<SsdpClient>, Option<String>) {
    match SsdpClient::new() {
        Ok(client) if client.is_listening() => (Some(client), None),
        Ok(client) => {
            warn!("SSDP port 1900 unavailable, only search responses will be seen");
            (
                Some(client),
                Some("passive listening unavailable".to_string()),
            )
        }
        Err(e) => {
            warn!(error = %e, "Cannot open SSDP socket");
            (None, Some(e.to_string()))
        }
    }
}

async fn next_event(client: Option<&SsdpClient>) -> io::Result<Option<SsdpEvent>> {
    match client {
        Some(client) => client.recv_event().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(timer: Option<&mut Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Types (NT/ST) qui peuvent désigner un renderer vidéo
fn is_renderer_type(nt: &str) -> bool {
    let nt = nt.to_ascii_lowercase();
    nt.contains(":device:mediarenderer:")
        || nt.contains(":service:avtransport:")
        || nt.contains(":service:renderingcontrol:")
}
