//! # Contrôleur de session de cast
//!
//! Une tâche unique possède la session active (au plus une) et reçoit les
//! commandes de l'interface par un canal ; les événements du renderer
//! arrivent par l'abonnement de la session. Toutes les transitions passent
//! par cette tâche : ni le proxy ni le client de contrôle n'ont de notion
//! de « session courante ».
//!
//! ```text
//! Idle → Connecting → Active → (ChannelSwitching → Active)* → Stopping → Idle
//!                 \________________ Failed → Idle ________________/
//! ```
//!
//! Changement de chaîne : la nouvelle route est créée (source sondée), le
//! renderer y est basculé, puis l'ancienne route n'est détruite qu'une fois
//! les premiers octets servis par la nouvelle. Si ces octets tardent,
//! l'ancienne route reste ouverte en vidange jusqu'à ce premier transfert ou
//! jusqu'à la fin de la session.

use std::sync::Arc;
use std::time::Duration;

use castconfig::Config;
use castproxy::RouteInfo;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::catalog::ChannelCatalog;
use crate::control_client::{ControlFactory, RendererControl};
use crate::errors::CastError;
use crate::events::{EventSource, EventSubscription};
use crate::interpretation::{SessionContext, SkipInterpreter};
use crate::model::{
    Channel, DiscoveredDevice, PlaybackState, RemoteEvent, SwitchDirection, TransportState,
};
use crate::registry::DeviceRegistry;
use crate::routes::StreamRoutes;
use crate::session::{CastFailure, SessionPhase, SessionSnapshot, SessionUpdate};
use crate::settings::{ControlSettings, SessionSettings, SyncSettings};
use crate::sync::{LocalPlayer, SyncCoordinator};

const COMMAND_QUEUE: usize = 32;
const UPDATE_BUFFER: usize = 64;
/// Attente maximale du premier transfert pour une route en vidange
const DRAIN_WATCH_LIMIT: Duration = Duration::from_secs(6 * 3600);

/// Réglages du contrôleur
#[derive(Debug, Clone, Default)]
pub struct ControllerSettings {
    pub control: ControlSettings,
    pub session: SessionSettings,
    pub sync: SyncSettings,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            control: ControlSettings::from_config(config),
            session: SessionSettings::from_config(config),
            sync: SyncSettings::from_config(config),
        }
    }
}

/// Collaborateurs du contrôleur
pub struct ControllerDeps {
    pub registry: Arc<DeviceRegistry>,
    pub routes: Arc<dyn StreamRoutes>,
    pub controls: Arc<dyn ControlFactory>,
    pub events: Arc<dyn EventSource>,
    pub catalog: Arc<dyn ChannelCatalog>,
    /// Lecteur local, requis par le mode synchronisé
    pub player: Option<Arc<dyn LocalPlayer>>,
}

type Reply<T> = oneshot::Sender<Result<T, CastError>>;

enum Command {
    StartCast {
        device_id: String,
        channel: String,
        reply: Reply<SessionSnapshot>,
    },
    SwitchChannel {
        direction: SwitchDirection,
        reply: Reply<SessionSnapshot>,
    },
    StopCast {
        reply: Reply<()>,
    },
    SetSyncMode {
        enabled: bool,
        reply: Reply<()>,
    },
    SetVolume {
        level: u16,
        reply: Reply<()>,
    },
    SetMute {
        mute: bool,
        reply: Reply<()>,
    },
    Pause {
        reply: Reply<()>,
    },
    Resume {
        reply: Reply<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Poignée publique du contrôleur de session
pub struct CastController {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
    updates: broadcast::Sender<SessionUpdate>,
    registry: Arc<DeviceRegistry>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl CastController {
    /// Lance la tâche du contrôleur.
    pub fn spawn(deps: ControllerDeps, settings: ControllerSettings) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let (snapshot_tx, snapshots) = watch::channel(SessionSnapshot::idle(false));
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        let registry = deps.registry.clone();

        let actor = SessionActor {
            deps,
            settings,
            commands: commands_rx,
            snapshot: snapshot_tx,
            updates: updates.clone(),
            session: None,
            sync_mode: false,
        };
        let task = tokio::spawn(actor.run());

        Self {
            commands: commands_tx,
            snapshots,
            updates,
            registry,
            task: std::sync::Mutex::new(Some(task)),
        }
    }

    /// Renderers actuellement connus
    pub fn list_devices(&self) -> Vec<DiscoveredDevice> {
        self.registry.list()
    }

    /// Caste `channel` vers le renderer `device_id`.
    ///
    /// Une session déjà active est entièrement démontée avant. Rend la
    /// session une fois `play` acquitté, en `Connecting` ou `Active`.
    pub async fn start_cast(
        &self,
        device_id: &str,
        channel: &str,
    ) -> Result<SessionSnapshot, CastError> {
        self.request(|reply| Command::StartCast {
            device_id: device_id.to_string(),
            channel: channel.to_string(),
            reply,
        })
        .await
    }

    pub async fn switch_channel(
        &self,
        direction: SwitchDirection,
    ) -> Result<SessionSnapshot, CastError> {
        self.request(|reply| Command::SwitchChannel { direction, reply })
            .await
    }

    pub async fn stop_cast(&self) -> Result<(), CastError> {
        self.request(|reply| Command::StopCast { reply }).await
    }

    pub async fn set_sync_mode(&self, enabled: bool) -> Result<(), CastError> {
        self.request(|reply| Command::SetSyncMode { enabled, reply })
            .await
    }

    pub async fn set_volume(&self, level: u16) -> Result<(), CastError> {
        self.request(|reply| Command::SetVolume { level, reply })
            .await
    }

    pub async fn set_mute(&self, mute: bool) -> Result<(), CastError> {
        self.request(|reply| Command::SetMute { mute, reply }).await
    }

    /// Met la lecture en pause sur le renderer ; la route reste ouverte.
    pub async fn pause(&self) -> Result<(), CastError> {
        self.request(|reply| Command::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<(), CastError> {
        self.request(|reply| Command::Resume { reply }).await
    }

    /// Dernier état publié
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Changements d'état et échecs de session
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    /// Arrête la session en cours puis la tâche du contrôleur.
    pub async fn shutdown(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = done.await;
        }
        let task = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, CastError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| CastError::ControllerClosed)?;
        response.await.map_err(|_| CastError::ControllerClosed)?
    }
}

/// Session active, possédée par la tâche du contrôleur
struct Session {
    id: String,
    device: DiscoveredDevice,
    control: Arc<dyn RendererControl>,
    channel: Channel,
    route: Option<RouteInfo>,
    /// Anciennes routes encore lues par le renderer
    draining: Vec<DrainingRoute>,
    events: Option<EventSubscription>,
    phase: SessionPhase,
    playback: PlaybackState,
    interpreter: SkipInterpreter,
    sync: Option<SyncCoordinator>,
    /// Échéance de confirmation de lecture en `Connecting`
    confirm_by: Option<Instant>,
    created_at: chrono::DateTime<Utc>,
}

/// Route remplacée dont la remplaçante n'a encore rien servi
struct DrainingRoute {
    route: RouteInfo,
    release: JoinHandle<()>,
}

impl Session {
    fn snapshot(&self, sync_mode: bool) -> SessionSnapshot {
        SessionSnapshot {
            session_id: Some(self.id.clone()),
            phase: self.phase,
            device_id: Some(self.device.id.clone()),
            device_name: Some(self.device.friendly_name.clone()),
            channel: Some(self.channel.name.clone()),
            route_url: self.route.as_ref().map(|r| r.url.clone()),
            playback: self.playback.clone(),
            sync_mode,
            created_at: Some(self.created_at),
        }
    }
}

struct SessionActor {
    deps: ControllerDeps,
    settings: ControllerSettings,
    commands: mpsc::Receiver<Command>,
    snapshot: watch::Sender<SessionSnapshot>,
    updates: broadcast::Sender<SessionUpdate>,
    session: Option<Session>,
    sync_mode: bool,
}

async fn next_event(session: &mut Option<Session>) -> Option<RemoteEvent> {
    match session.as_mut().and_then(|s| s.events.as_mut()) {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl SessionActor {
    async fn run(mut self) {
        loop {
            let confirm_by = self.session.as_ref().and_then(|s| s.confirm_by);

            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.end_session(true).await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.end_session(true).await;
                        break;
                    }
                },
                event = next_event(&mut self.session) => match event {
                    Some(event) => self.on_remote_event(event).await,
                    None => self.on_event_stream_closed(),
                },
                _ = sleep_until_opt(confirm_by) => self.on_confirmation_deadline().await,
            }
        }
        debug!("Cast controller stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartCast {
                device_id,
                channel,
                reply,
            } => {
                let result = self.start_cast(&device_id, &channel).await;
                let _ = reply.send(result);
            }
            Command::SwitchChannel { direction, reply } => {
                let result = self.switch_channel(direction).await;
                let _ = reply.send(result);
            }
            Command::StopCast { reply } => {
                let result = if self.session.is_some() {
                    self.end_session(true).await;
                    Ok(())
                } else {
                    Err(CastError::NoActiveSession)
                };
                let _ = reply.send(result);
            }
            Command::SetSyncMode { enabled, reply } => {
                self.set_sync_mode(enabled).await;
                let _ = reply.send(Ok(()));
            }
            Command::SetVolume { level, reply } => {
                let result = self.set_volume(level).await;
                let _ = reply.send(result);
            }
            Command::SetMute { mute, reply } => {
                let result = self.set_mute(mute).await;
                let _ = reply.send(result);
            }
            Command::Pause { reply } => {
                let result = self.pause().await;
                let _ = reply.send(result);
            }
            Command::Resume { reply } => {
                let result = self.resume().await;
                let _ = reply.send(result);
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn publish(&self) {
        let snapshot = match &self.session {
            Some(session) => session.snapshot(self.sync_mode),
            None => SessionSnapshot::idle(self.sync_mode),
        };
        let _ = self.updates.send(SessionUpdate::Changed(snapshot.clone()));
        self.snapshot.send_replace(snapshot);
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if let Some(session) = self.session.as_mut() {
            if session.phase != phase {
                info!(session = %session.id, from = ?session.phase, to = ?phase, "Session transition");
                session.phase = phase;
            }
        }
        self.publish();
    }

    async fn start_cast(
        &mut self,
        device_id: &str,
        channel_name: &str,
    ) -> Result<SessionSnapshot, CastError> {
        let device = self
            .deps
            .registry
            .get(device_id)
            .ok_or_else(|| CastError::UnknownDevice(device_id.to_string()))?;
        let channel = self
            .deps
            .catalog
            .resolve(channel_name)
            .ok_or_else(|| CastError::UnknownChannel(channel_name.to_string()))?;

        if self.session.is_some() {
            self.end_session(true).await;
        }

        let control = self.deps.controls.connect(&device)?;
        let session = Session {
            id: uuid::Uuid::new_v4().simple().to_string(),
            device,
            control,
            channel,
            route: None,
            draining: Vec::new(),
            events: None,
            phase: SessionPhase::Connecting,
            playback: PlaybackState::default(),
            interpreter: SkipInterpreter::new(self.settings.session.inference_grace),
            sync: None,
            confirm_by: None,
            created_at: Utc::now(),
        };
        info!(
            session = %session.id,
            device = %session.device.id,
            channel = session.channel.name.as_str(),
            "Starting cast session"
        );
        self.session = Some(session);
        self.publish();

        match self.establish().await {
            Ok(()) => Ok(self.snapshot.borrow().clone()),
            Err(e) => {
                self.fail(e.clone()).await;
                Err(e)
            }
        }
    }

    /// Route, abonnement, `setSource` puis `play`, dans cet ordre.
    async fn establish(&mut self) -> Result<(), CastError> {
        let Some(session) = self.session.as_mut() else {
            return Err(CastError::NoActiveSession);
        };
        let control = session.control.clone();

        if self.settings.control.stop_before_set_source {
            if let Err(e) = control.stop().await {
                debug!(device = %session.device.id, error = %e, "Stop before setSource ignored");
            }
        }

        let route = self
            .deps
            .routes
            .create_route(&session.channel.url, &session.device.host())
            .await?;
        let route_url = route.url.clone();
        session.route = Some(route);

        match self.deps.events.subscribe(&session.device).await {
            Ok(events) => session.events = Some(events),
            Err(e) => warn!(
                device = %session.device.id,
                error = %e,
                "Renderer events unavailable, relying on play acknowledgment"
            ),
        }

        control.set_source(&route_url, &session.channel.name).await?;
        play_with_retries(control.as_ref(), &self.settings.control).await?;

        let now = Instant::now();
        session.interpreter.note_own_command(now);
        session.playback.transport = TransportState::Transitioning;
        if session.events.is_some() {
            session.confirm_by = Some(now + self.settings.session.playing_confirmation_timeout);
            self.publish();
        } else {
            self.activate();
        }
        Ok(())
    }

    /// `Connecting → Active`
    fn activate(&mut self) {
        let sync_mode = self.sync_mode;
        let player = self.deps.player.clone();
        let sync_settings = self.settings.sync.clone();
        if let Some(session) = self.session.as_mut() {
            session.confirm_by = None;
            if sync_mode && session.sync.is_none() {
                if let Some(player) = player {
                    session.sync = Some(SyncCoordinator::spawn(
                        session.control.clone(),
                        player,
                        sync_settings,
                    ));
                }
            }
        }
        self.set_phase(SessionPhase::Active);
    }

    async fn switch_channel(
        &mut self,
        direction: SwitchDirection,
    ) -> Result<SessionSnapshot, CastError> {
        let current = match &self.session {
            Some(session) if session.phase == SessionPhase::Active => session.channel.name.clone(),
            _ => return Err(CastError::NoActiveSession),
        };
        let channel = self
            .deps
            .catalog
            .neighbour(&current, direction)
            .ok_or_else(|| CastError::UnknownChannel(current.clone()))?;

        self.refresh_device().await?;
        match self.switch_to(channel).await {
            Ok(()) => Ok(self.snapshot.borrow().clone()),
            Err(e) if e.is_transient() => {
                warn!(channel = current.as_str(), error = %e, "Channel switch failed, keeping current channel");
                self.set_phase(SessionPhase::Active);
                Err(e)
            }
            Err(e) => {
                self.fail(e.clone()).await;
                Err(e)
            }
        }
    }

    async fn switch_to(&mut self, channel: Channel) -> Result<(), CastError> {
        self.set_phase(SessionPhase::ChannelSwitching);
        let Some(session) = self.session.as_mut() else {
            return Err(CastError::NoActiveSession);
        };
        info!(
            session = %session.id,
            from = session.channel.name.as_str(),
            to = channel.name.as_str(),
            "Switching channel"
        );

        let routes = self.deps.routes.clone();
        let new_route = routes
            .create_route(&channel.url, &session.device.host())
            .await?;

        let control = session.control.clone();
        let commanded = match control.set_source(&new_route.url, &channel.name).await {
            Ok(()) => play_with_retries(control.as_ref(), &self.settings.control).await,
            Err(e) => Err(e),
        };
        if let Err(e) = commanded {
            routes.destroy_route(new_route.id);
            return Err(e);
        }
        session.interpreter.note_own_command(Instant::now());

        let new_id = new_route.id;
        let served = routes
            .wait_first_transfer(new_id, self.settings.session.switch_drain_timeout)
            .await;
        let old = session.route.replace(new_route);
        if served {
            // le renderer lit la nouvelle route : plus rien à vider
            for draining in session.draining.drain(..) {
                draining.release.abort();
                routes.destroy_route(draining.route.id);
            }
            if let Some(old) = old {
                routes.destroy_route(old.id);
            }
        } else if let Some(old) = old {
            debug!(route = %new_id, old = %old.id, "New route has not served yet, old route kept draining");
            let watcher = routes.clone();
            let old_id = old.id;
            let release = tokio::spawn(async move {
                if watcher.wait_first_transfer(new_id, DRAIN_WATCH_LIMIT).await {
                    watcher.destroy_route(old_id);
                }
            });
            session.draining.push(DrainingRoute { route: old, release });
        }

        // les événements reçus pendant l'attente répondent au changement
        session.interpreter.note_own_command(Instant::now());
        session.channel = channel;
        self.set_phase(SessionPhase::Active);
        Ok(())
    }

    /// Reconnexion si le renderer a changé d'adresse depuis le début de la session.
    async fn refresh_device(&mut self) -> Result<(), CastError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let Some(current) = self.deps.registry.get(&session.device.id) else {
            return Ok(());
        };
        if current.address == session.device.address {
            return Ok(());
        }

        info!(
            session = %session.id,
            old = %session.device.address,
            new = %current.address,
            "Renderer moved, reconnecting"
        );
        session.control = self.deps.controls.connect(&current)?;
        if let Some(events) = session.events.take() {
            events.close().await;
        }
        match self.deps.events.subscribe(&current).await {
            Ok(events) => session.events = Some(events),
            Err(e) => warn!(device = %current.id, error = %e, "Resubscription failed"),
        }
        session.device = current;
        Ok(())
    }

    async fn set_sync_mode(&mut self, enabled: bool) {
        self.sync_mode = enabled;
        if enabled && self.deps.player.is_none() {
            warn!("Sync mode enabled without a local player");
        }

        let active = self
            .session
            .as_ref()
            .is_some_and(|s| s.phase == SessionPhase::Active);
        if enabled && active {
            self.activate();
            return;
        }
        if !enabled {
            let sync = self.session.as_mut().and_then(|s| s.sync.take());
            if let Some(sync) = sync {
                sync.stop().await;
            }
        }
        self.publish();
    }

    async fn set_volume(&mut self, level: u16) -> Result<(), CastError> {
        self.refresh_device().await?;
        let control = self.active_control()?;
        match control.set_volume(level).await {
            Ok(()) => {
                if let Some(session) = self.session.as_mut() {
                    session.playback.volume = Some(level);
                }
                self.publish();
                Ok(())
            }
            Err(e) => self.command_failed(e).await,
        }
    }

    async fn set_mute(&mut self, mute: bool) -> Result<(), CastError> {
        self.refresh_device().await?;
        let control = self.active_control()?;
        match control.set_mute(mute).await {
            Ok(()) => {
                if let Some(session) = self.session.as_mut() {
                    session.playback.muted = Some(mute);
                }
                self.publish();
                Ok(())
            }
            Err(e) => self.command_failed(e).await,
        }
    }

    async fn pause(&mut self) -> Result<(), CastError> {
        self.refresh_device().await?;
        let control = self.playing_control()?;
        match control.pause().await {
            Ok(()) => {
                if let Some(session) = self.session.as_mut() {
                    info!(session = %session.id, "Playback paused");
                    session.playback.transport = TransportState::Paused;
                }
                self.publish();
                Ok(())
            }
            Err(e) => self.command_failed(e).await,
        }
    }

    async fn resume(&mut self) -> Result<(), CastError> {
        self.refresh_device().await?;
        let control = self.playing_control()?;
        match play_with_retries(control.as_ref(), &self.settings.control).await {
            Ok(()) => {
                if let Some(session) = self.session.as_mut() {
                    info!(session = %session.id, "Playback resumed");
                    session.interpreter.note_own_command(Instant::now());
                    session.playback.transport = TransportState::Playing;
                }
                self.publish();
                Ok(())
            }
            Err(e) => self.command_failed(e).await,
        }
    }

    /// Contrôle du renderer d'une session `Active`
    fn playing_control(&self) -> Result<Arc<dyn RendererControl>, CastError> {
        match &self.session {
            Some(session) if session.phase == SessionPhase::Active => Ok(session.control.clone()),
            _ => Err(CastError::NoActiveSession),
        }
    }

    fn active_control(&self) -> Result<Arc<dyn RendererControl>, CastError> {
        self.session
            .as_ref()
            .map(|s| s.control.clone())
            .ok_or(CastError::NoActiveSession)
    }

    /// Un renderer injoignable met fin à la session ; les refus sont rendus
    /// à l'appelant.
    async fn command_failed(&mut self, error: CastError) -> Result<(), CastError> {
        if matches!(error, CastError::DeviceUnreachable(_)) {
            self.fail(error.clone()).await;
        }
        Err(error)
    }

    async fn on_remote_event(&mut self, event: RemoteEvent) {
        if let RemoteEvent::ConnectionLost { reason } = &event {
            self.on_connection_lost(reason.clone()).await;
            return;
        }

        let routes = self.deps.routes.clone();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.playback.apply(&event);

        let confirms = session.phase == SessionPhase::Connecting
            && event == RemoteEvent::TransportStateChanged(TransportState::Playing);

        let context = SessionContext {
            active: session.phase == SessionPhase::Active,
            upstream_ended: session
                .route
                .as_ref()
                .is_some_and(|route| routes.upstream_ended(route.id)),
        };
        let skip = session
            .interpreter
            .interpret(&event, context, Instant::now());

        if confirms {
            self.activate();
        } else {
            self.publish();
        }

        if let Some(skip) = skip {
            info!(direction = ?skip.direction, origin = ?skip.origin, "Channel change requested from the renderer");
            if let Err(e) = self.switch_channel(skip.direction).await {
                warn!(error = %e, "Renderer-requested channel change failed");
            }
        }
    }

    /// Une seule tentative de réabonnement, sinon la session échoue.
    async fn on_connection_lost(&mut self, reason: String) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        warn!(session = %session.id, reason = reason.as_str(), "Renderer event subscription lost");
        if let Some(events) = session.events.take() {
            events.close().await;
        }
        match self.deps.events.subscribe(&session.device).await {
            Ok(events) => {
                info!(session = %session.id, "Resubscribed to renderer events");
                session.events = Some(events);
            }
            Err(e) => {
                debug!(error = %e, "Resubscription failed");
                self.fail(CastError::device_unreachable(format!(
                    "event subscription lost: {reason}"
                )))
                .await;
            }
        }
    }

    fn on_event_stream_closed(&mut self) {
        if let Some(session) = self.session.as_mut() {
            warn!(session = %session.id, "Renderer event stream closed");
            session.events = None;
        }
    }

    /// Pas de Playing reçu à temps : on interroge le renderer.
    async fn on_confirmation_deadline(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.confirm_by = None;
        let control = session.control.clone();
        match control.transport_state().await {
            Ok(TransportState::Playing | TransportState::Transitioning) => {
                debug!("Playback confirmed by query");
                self.activate();
            }
            Ok(state) => {
                self.fail(CastError::Timeout(format!(
                    "playback confirmation (renderer is {state})"
                )))
                .await
            }
            Err(e) => self.fail(e).await,
        }
    }

    /// `* → Failed → Idle` : une seule notification, puis démontage.
    async fn fail(&mut self, error: CastError) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        warn!(session = %session.id, device = %session.device.id, error = %error, "Cast session failed");
        let failure = CastFailure::new(&error, Some(session.device.id.clone()));
        self.set_phase(SessionPhase::Failed);
        let _ = self.updates.send(SessionUpdate::Failed(failure));
        self.teardown(false).await;
        self.publish();
    }

    /// `Active → Stopping → Idle`
    async fn end_session(&mut self, stop_renderer: bool) {
        if self.session.is_none() {
            return;
        }
        self.set_phase(SessionPhase::Stopping);
        self.teardown(stop_renderer).await;
        self.publish();
    }

    /// Route d'abord, abonnement ensuite.
    async fn teardown(&mut self, stop_renderer: bool) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if let Some(sync) = session.sync.take() {
            sync.stop().await;
        }
        if stop_renderer {
            if let Err(e) = session.control.stop().await {
                debug!(device = %session.device.id, error = %e, "Renderer stop failed");
            }
        }
        if let Some(route) = session.route.take() {
            self.deps.routes.destroy_route(route.id);
        }
        for draining in session.draining.drain(..) {
            draining.release.abort();
            self.deps.routes.destroy_route(draining.route.id);
        }
        if let Some(events) = session.events.take() {
            events.close().await;
        }
        info!(session = %session.id, "Cast session ended");
    }
}

/// `play` réessayé sur `Timeout` jusqu'à `max_action_attempts`, puis
/// le renderer est déclaré injoignable.
async fn play_with_retries(
    control: &dyn RendererControl,
    settings: &ControlSettings,
) -> Result<(), CastError> {
    let attempts = settings.max_action_attempts.max(1);
    for attempt in 1..=attempts {
        match control.play().await {
            Ok(()) => return Ok(()),
            Err(CastError::Timeout(what)) => {
                warn!(attempt, attempts, "{what} timed out");
            }
            Err(e) => return Err(e),
        }
    }
    Err(CastError::device_unreachable(format!(
        "play timed out {attempts} times"
    )))
}
