use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use castcontrol::{
    CastController, CastError, Channel, ChannelList, ControlFactory, ControlSettings,
    ControllerDeps, ControllerSettings, DeviceRegistry, DiscoveredDevice, EventSource,
    EventSubscription, FailureKind, LocalPlayer, PositionInfo, RemoteEvent, RendererControl,
    SessionPhase, SessionSettings, SessionUpdate, StreamRoutes, SwitchDirection, TransportState,
};
use castproxy::{RouteId, RouteInfo};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

type CallLog = Arc<Mutex<Vec<String>>>;

fn record(log: &CallLog, entry: String) {
    log.lock().unwrap().push(entry);
}

/// `http://iptv.example/live/BBC1.ts` → `BBC1`
fn channel_of(url: &str) -> String {
    let file = url.rsplit('/').next().unwrap_or(url);
    file.split('.').next().unwrap_or(file).to_string()
}

struct FakeRoutes {
    log: CallLog,
    routes: Mutex<HashMap<RouteId, String>>,
    upstream_ended: AtomicBool,
    /// Délai avant le premier octet servi ; `None` : attendre `serve`
    serve_delay: Mutex<Option<Duration>>,
    served: watch::Sender<BTreeSet<String>>,
}

impl FakeRoutes {
    /// Le renderer lit enfin la route de `channel`
    fn serve(&self, channel: &str) {
        self.served.send_modify(|served| {
            served.insert(channel.to_string());
        });
    }

    fn live_routes(&self) -> BTreeSet<String> {
        self.routes.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl StreamRoutes for FakeRoutes {
    async fn create_route(
        &self,
        source_url: &str,
        _renderer_host: &str,
    ) -> Result<RouteInfo, CastError> {
        let channel = channel_of(source_url);
        record(&self.log, format!("route+ {channel}"));
        let id = RouteId::new();
        self.routes.lock().unwrap().insert(id, channel.clone());
        Ok(RouteInfo {
            id,
            url: format!("http://10.0.0.2:4000/stream/{channel}.ts"),
            token: channel,
        })
    }

    fn destroy_route(&self, id: RouteId) -> bool {
        match self.routes.lock().unwrap().remove(&id) {
            Some(channel) => {
                record(&self.log, format!("route- {channel}"));
                true
            }
            None => false,
        }
    }

    async fn wait_first_transfer(&self, id: RouteId, timeout: Duration) -> bool {
        let Some(channel) = self.routes.lock().unwrap().get(&id).cloned() else {
            return false;
        };
        let delay = *self.serve_delay.lock().unwrap();
        let mut served = self.served.subscribe();
        let transfer = async {
            match delay {
                Some(delay) => {
                    tokio::time::sleep(delay).await;
                    true
                }
                None => served.wait_for(|s| s.contains(&channel)).await.is_ok(),
            }
        };
        let transferred = tokio::time::timeout(timeout, transfer)
            .await
            .unwrap_or(false);
        if transferred {
            record(&self.log, format!("first_transfer {channel}"));
        }
        transferred
    }

    fn upstream_ended(&self, _id: RouteId) -> bool {
        self.upstream_ended.load(Ordering::SeqCst)
    }
}

struct FakeControl {
    device: String,
    log: CallLog,
    play_timeouts: Arc<AtomicU32>,
    position: Arc<Mutex<Duration>>,
}

impl FakeControl {
    fn record(&self, action: &str) {
        record(&self.log, format!("{action} {}", self.device));
    }
}

#[async_trait]
impl RendererControl for FakeControl {
    async fn set_source(&self, _uri: &str, title: &str) -> Result<(), CastError> {
        record(&self.log, format!("set_source {} {title}", self.device));
        Ok(())
    }
    async fn set_next_source(&self, _uri: &str, _title: &str) -> Result<(), CastError> {
        Ok(())
    }
    async fn play(&self) -> Result<(), CastError> {
        self.record("play");
        let remaining = self.play_timeouts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.play_timeouts.store(remaining - 1, Ordering::SeqCst);
            return Err(CastError::Timeout("Play".into()));
        }
        Ok(())
    }
    async fn pause(&self) -> Result<(), CastError> {
        self.record("pause");
        Ok(())
    }
    async fn stop(&self) -> Result<(), CastError> {
        self.record("stop");
        Ok(())
    }
    async fn seek(&self, position: Duration) -> Result<(), CastError> {
        self.record("seek");
        *self.position.lock().unwrap() = position;
        Ok(())
    }
    async fn set_volume(&self, level: u16) -> Result<(), CastError> {
        record(&self.log, format!("set_volume {} {level}", self.device));
        Ok(())
    }
    async fn set_mute(&self, _mute: bool) -> Result<(), CastError> {
        Ok(())
    }
    async fn volume(&self) -> Result<u16, CastError> {
        Ok(0)
    }
    async fn mute(&self) -> Result<bool, CastError> {
        Ok(false)
    }
    async fn transport_state(&self) -> Result<TransportState, CastError> {
        Ok(TransportState::Playing)
    }
    async fn position(&self) -> Result<PositionInfo, CastError> {
        Ok(PositionInfo {
            rel_time: Some(*self.position.lock().unwrap()),
            ..PositionInfo::default()
        })
    }
}

struct FakeFactory {
    log: CallLog,
    play_timeouts: Arc<AtomicU32>,
    position: Arc<Mutex<Duration>>,
}

impl ControlFactory for FakeFactory {
    fn connect(&self, device: &DiscoveredDevice) -> Result<Arc<dyn RendererControl>, CastError> {
        Ok(Arc::new(FakeControl {
            device: short_id(&device.id),
            log: self.log.clone(),
            play_timeouts: self.play_timeouts.clone(),
            position: self.position.clone(),
        }))
    }
}

struct FakeEvents {
    log: CallLog,
    senders: Mutex<HashMap<String, mpsc::UnboundedSender<RemoteEvent>>>,
    refuse: AtomicBool,
}

impl FakeEvents {
    fn emit(&self, device: &str, event: RemoteEvent) {
        let senders = self.senders.lock().unwrap();
        senders[device].send(event).unwrap();
    }
}

#[async_trait]
impl EventSource for FakeEvents {
    async fn subscribe(&self, device: &DiscoveredDevice) -> Result<EventSubscription, CastError> {
        let name = short_id(&device.id);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(CastError::device_unreachable("SUBSCRIBE refused"));
        }
        record(&self.log, format!("subscribe {name}"));

        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().insert(name.clone(), tx);

        let cancel = CancellationToken::new();
        let cancelled = cancel.clone();
        let log = self.log.clone();
        let task = tokio::spawn(async move {
            cancelled.cancelled().await;
            record(&log, format!("unsubscribe {name}"));
        });
        Ok(EventSubscription::new(device.id.clone(), rx, cancel)
            .with_tasks(vec![task], Duration::from_secs(1)))
    }
}

#[derive(Default)]
struct FakePlayer {
    position: Mutex<Duration>,
    seeks: AtomicU32,
}

#[async_trait]
impl LocalPlayer for FakePlayer {
    async fn current_position(&self) -> Option<Duration> {
        Some(*self.position.lock().unwrap())
    }
    async fn seek(&self, position: Duration) -> Result<(), CastError> {
        self.seeks.fetch_add(1, Ordering::SeqCst);
        *self.position.lock().unwrap() = position;
        Ok(())
    }
}

fn short_id(id: &str) -> String {
    id.trim_start_matches("uuid:").to_string()
}

fn device(id: &str, name: &str, last_octet: u8) -> DiscoveredDevice {
    DiscoveredDevice {
        id: id.to_string(),
        friendly_name: name.to_string(),
        address: format!("192.168.1.{last_octet}").parse().unwrap(),
        location: format!("http://192.168.1.{last_octet}:9197/dmr"),
        manufacturer: None,
        model_name: None,
        service_types: BTreeSet::from([
            "urn:schemas-upnp-org:service:AVTransport:1".to_string(),
        ]),
        endpoints: Vec::new(),
        last_seen: tokio::time::Instant::now(),
    }
}

struct Harness {
    controller: CastController,
    log: CallLog,
    routes: Arc<FakeRoutes>,
    events: Arc<FakeEvents>,
    renderer_position: Arc<Mutex<Duration>>,
}

struct Options {
    play_timeouts: u32,
    inference_grace: Duration,
    player: Option<Arc<FakePlayer>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            play_timeouts: 0,
            inference_grace: Duration::ZERO,
            player: None,
        }
    }
}

impl Harness {
    fn new(play_timeouts: u32) -> Self {
        Self::with(Options {
            play_timeouts,
            ..Options::default()
        })
    }

    fn with(options: Options) -> Self {
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(DeviceRegistry::new(Duration::from_secs(60)));
        registry.upsert(device("uuid:dev-42", "LivingRoomTV", 20));
        registry.upsert(device("uuid:dev-a", "Kitchen", 21));
        registry.upsert(device("uuid:dev-b", "Bedroom", 22));

        let routes = Arc::new(FakeRoutes {
            log: log.clone(),
            routes: Mutex::new(HashMap::new()),
            upstream_ended: AtomicBool::new(false),
            serve_delay: Mutex::new(Some(Duration::ZERO)),
            served: watch::channel(BTreeSet::new()).0,
        });
        let events = Arc::new(FakeEvents {
            log: log.clone(),
            senders: Mutex::new(HashMap::new()),
            refuse: AtomicBool::new(false),
        });
        let renderer_position = Arc::new(Mutex::new(Duration::ZERO));
        let catalog: ChannelList = ["BBC1", "BBC2", "ITV"]
            .into_iter()
            .map(|name| Channel::new(name, format!("http://iptv.example/live/{name}.ts")))
            .collect();

        let controller = CastController::spawn(
            ControllerDeps {
                registry,
                routes: routes.clone(),
                controls: Arc::new(FakeFactory {
                    log: log.clone(),
                    play_timeouts: Arc::new(AtomicU32::new(options.play_timeouts)),
                    position: renderer_position.clone(),
                }),
                events: events.clone(),
                catalog: Arc::new(catalog),
                player: options
                    .player
                    .map(|player| player as Arc<dyn LocalPlayer>),
            },
            ControllerSettings {
                control: ControlSettings {
                    stop_before_set_source: false,
                    ..ControlSettings::default()
                },
                session: SessionSettings {
                    inference_grace: options.inference_grace,
                    ..SessionSettings::default()
                },
                ..ControllerSettings::default()
            },
        );

        Self {
            controller,
            log,
            routes,
            events,
            renderer_position,
        }
    }

    fn called(&self, entry: &str) -> bool {
        self.calls().iter().any(|call| call == entry)
    }

    /// Attend qu'un appel apparaisse dans le journal
    async fn wait_call(&self, entry: &str) {
        let appeared = tokio::time::timeout(Duration::from_secs(30), async {
            while !self.called(entry) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(appeared.is_ok(), "{entry} not called: {:?}", self.calls());
    }

    fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.log.lock().unwrap().clear();
    }

    fn position(&self, entry: &str) -> usize {
        self.calls()
            .iter()
            .position(|call| call == entry)
            .unwrap_or_else(|| panic!("{entry} not called: {:?}", self.calls()))
    }

    async fn wait_for(&self, predicate: impl Fn(&castcontrol::SessionSnapshot) -> bool) {
        let mut watch = self.controller.watch();
        tokio::time::timeout(Duration::from_secs(2), watch.wait_for(|s| predicate(s)))
            .await
            .expect("state not reached in time")
            .expect("controller stopped");
    }

    async fn cast_active(&self, device_id: &str, channel: &str) {
        self.controller.start_cast(device_id, channel).await.unwrap();
        self.events.emit(
            &short_id(device_id),
            RemoteEvent::TransportStateChanged(TransportState::Playing),
        );
        let channel = channel.to_string();
        self.wait_for(move |s| {
            s.phase == SessionPhase::Active && s.channel.as_deref() == Some(channel.as_str())
        })
        .await;
    }
}

fn drain_phases(updates: &mut tokio::sync::broadcast::Receiver<SessionUpdate>) -> Vec<SessionPhase> {
    let mut phases: Vec<SessionPhase> = Vec::new();
    while let Ok(update) = updates.try_recv() {
        if let SessionUpdate::Changed(snapshot) = update {
            if phases.last() != Some(&snapshot.phase) {
                phases.push(snapshot.phase);
            }
        }
    }
    phases
}

#[tokio::test]
async fn cast_to_living_room_tv() {
    let harness = Harness::new(0);
    let mut updates = harness.controller.subscribe();

    let snapshot = harness
        .controller
        .start_cast("uuid:dev-42", "BBC1")
        .await
        .unwrap();
    assert_eq!(snapshot.phase, SessionPhase::Connecting);
    assert_eq!(snapshot.device_name.as_deref(), Some("LivingRoomTV"));
    assert_eq!(
        snapshot.route_url.as_deref(),
        Some("http://10.0.0.2:4000/stream/BBC1.ts")
    );

    harness.events.emit(
        "dev-42",
        RemoteEvent::TransportStateChanged(TransportState::Playing),
    );
    harness
        .wait_for(|s| s.phase == SessionPhase::Active)
        .await;

    assert_eq!(
        harness.calls(),
        vec![
            "route+ BBC1",
            "subscribe dev-42",
            "set_source dev-42 BBC1",
            "play dev-42",
        ]
    );
    assert_eq!(
        drain_phases(&mut updates),
        vec![SessionPhase::Connecting, SessionPhase::Active]
    );
    assert_eq!(
        harness.controller.snapshot().playback.transport,
        TransportState::Playing
    );
}

#[tokio::test]
async fn switch_channel_is_gapless() {
    let harness = Harness::new(0);
    harness.cast_active("uuid:dev-42", "BBC1").await;
    harness.clear();

    let snapshot = harness
        .controller
        .switch_channel(SwitchDirection::Next)
        .await
        .unwrap();
    assert_eq!(snapshot.phase, SessionPhase::Active);
    assert_eq!(snapshot.channel.as_deref(), Some("BBC2"));

    assert_eq!(
        harness.calls(),
        vec![
            "route+ BBC2",
            "set_source dev-42 BBC2",
            "play dev-42",
            "first_transfer BBC2",
            "route- BBC1",
        ]
    );
    assert_eq!(harness.routes.routes.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn play_timeouts_fail_the_session() {
    let harness = Harness::new(3);
    let mut updates = harness.controller.subscribe();

    let result = harness.controller.start_cast("uuid:dev-42", "BBC1").await;
    assert!(matches!(result, Err(CastError::DeviceUnreachable(_))));

    let calls = harness.calls();
    assert_eq!(calls.iter().filter(|c| *c == "play dev-42").count(), 3);
    assert!(calls.contains(&"route- BBC1".to_string()));
    assert!(calls.contains(&"unsubscribe dev-42".to_string()));
    assert!(harness.routes.routes.lock().unwrap().is_empty());

    let mut failures = Vec::new();
    let mut phases = Vec::new();
    while let Ok(update) = updates.try_recv() {
        match update {
            SessionUpdate::Failed(failure) => failures.push(failure),
            SessionUpdate::Changed(snapshot) => {
                if phases.last() != Some(&snapshot.phase) {
                    phases.push(snapshot.phase);
                }
            }
        }
    }
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, FailureKind::DeviceUnreachable);
    assert_eq!(
        phases,
        vec![
            SessionPhase::Connecting,
            SessionPhase::Failed,
            SessionPhase::Idle
        ]
    );
    assert_eq!(harness.controller.snapshot().phase, SessionPhase::Idle);
}

#[tokio::test]
async fn new_session_tears_down_the_previous_one_first() {
    let harness = Harness::new(0);
    harness.cast_active("uuid:dev-a", "BBC1").await;

    harness
        .controller
        .start_cast("uuid:dev-b", "BBC2")
        .await
        .unwrap();

    let set_source_b = harness.position("set_source dev-b BBC2");
    assert!(harness.position("stop dev-a") < set_source_b);
    assert!(harness.position("route- BBC1") < set_source_b);
    assert!(harness.position("unsubscribe dev-a") < set_source_b);
    assert!(harness.position("route- BBC1") < harness.position("unsubscribe dev-a"));
    assert_eq!(harness.routes.routes.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn stop_cast_releases_route_then_subscription() {
    let harness = Harness::new(0);
    assert_eq!(
        harness.controller.stop_cast().await,
        Err(CastError::NoActiveSession)
    );

    harness.cast_active("uuid:dev-42", "BBC1").await;
    harness.controller.stop_cast().await.unwrap();

    assert!(harness.position("route- BBC1") < harness.position("unsubscribe dev-42"));
    let snapshot = harness.controller.snapshot();
    assert_eq!(snapshot.phase, SessionPhase::Idle);
    assert_eq!(snapshot.channel, None);
}

#[tokio::test]
async fn renderer_stop_is_read_as_next_channel() {
    let harness = Harness::new(0);
    harness.cast_active("uuid:dev-42", "BBC1").await;

    harness.events.emit(
        "dev-42",
        RemoteEvent::TransportStateChanged(TransportState::Stopped),
    );
    harness
        .wait_for(|s| s.phase == SessionPhase::Active && s.channel.as_deref() == Some("BBC2"))
        .await;
    assert!(harness.position("route- BBC1") > harness.position("first_transfer BBC2"));
}

#[tokio::test]
async fn stop_at_end_of_stream_keeps_the_channel() {
    let harness = Harness::new(0);
    harness.cast_active("uuid:dev-42", "BBC1").await;
    harness.routes.upstream_ended.store(true, Ordering::SeqCst);

    harness.events.emit(
        "dev-42",
        RemoteEvent::TransportStateChanged(TransportState::Stopped),
    );
    harness
        .wait_for(|s| s.playback.transport == TransportState::Stopped)
        .await;
    assert_eq!(harness.controller.snapshot().channel.as_deref(), Some("BBC1"));
    assert!(!harness.calls().contains(&"route+ BBC2".to_string()));
}

#[tokio::test]
async fn renderer_without_events_is_active_on_play_ack() {
    let harness = Harness::new(0);
    harness.events.refuse.store(true, Ordering::SeqCst);

    let snapshot = harness
        .controller
        .start_cast("uuid:dev-42", "BBC1")
        .await
        .unwrap();
    assert_eq!(snapshot.phase, SessionPhase::Active);

    harness.controller.set_volume(12).await.unwrap();
    assert!(harness.calls().contains(&"set_volume dev-42 12".to_string()));
    assert_eq!(harness.controller.snapshot().playback.volume, Some(12));
}

#[tokio::test]
async fn lost_subscription_ends_the_session() {
    let harness = Harness::new(0);
    let mut updates = harness.controller.subscribe();
    harness.cast_active("uuid:dev-42", "BBC1").await;

    harness.events.refuse.store(true, Ordering::SeqCst);
    harness.events.emit(
        "dev-42",
        RemoteEvent::ConnectionLost {
            reason: "renewal refused".into(),
        },
    );
    harness
        .wait_for(|s| s.phase == SessionPhase::Idle)
        .await;

    let failed = std::iter::from_fn(|| updates.try_recv().ok())
        .filter_map(|update| match update {
            SessionUpdate::Failed(failure) => Some(failure),
            SessionUpdate::Changed(_) => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].kind, FailureKind::DeviceUnreachable);
    assert!(harness.calls().contains(&"route- BBC1".to_string()));
}

#[tokio::test]
async fn unknown_device_or_channel_is_rejected() {
    let harness = Harness::new(0);
    assert_eq!(
        harness.controller.start_cast("uuid:nope", "BBC1").await,
        Err(CastError::UnknownDevice("uuid:nope".into()))
    );
    assert_eq!(
        harness.controller.start_cast("uuid:dev-42", "CNN").await,
        Err(CastError::UnknownChannel("CNN".into()))
    );
    assert_eq!(
        harness
            .controller
            .switch_channel(SwitchDirection::Next)
            .await,
        Err(CastError::NoActiveSession)
    );
    assert!(harness.calls().is_empty());
}

fn transport(state: TransportState) -> RemoteEvent {
    RemoteEvent::TransportStateChanged(state)
}

fn channels(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

#[tokio::test(start_paused = true)]
async fn slow_switch_does_not_read_its_own_stop_as_a_skip() {
    let harness = Harness::with(Options {
        inference_grace: Duration::from_secs(3),
        ..Options::default()
    });
    harness.cast_active("uuid:dev-42", "BBC1").await;
    // premier octet servi après la fin de la fenêtre de grâce
    *harness.routes.serve_delay.lock().unwrap() = Some(Duration::from_secs(4));

    let switch = harness.controller.switch_channel(SwitchDirection::Next);
    let television = async {
        harness.wait_call("set_source dev-42 BBC2").await;
        harness.events.emit("dev-42", transport(TransportState::Stopped));
        harness.events.emit("dev-42", transport(TransportState::Playing));
    };
    let (switched, ()) = tokio::join!(switch, television);
    assert_eq!(switched.unwrap().channel.as_deref(), Some("BBC2"));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!harness.called("route+ ITV"), "{:?}", harness.calls());
    let snapshot = harness.controller.snapshot();
    assert_eq!(snapshot.channel.as_deref(), Some("BBC2"));
    assert_eq!(snapshot.phase, SessionPhase::Active);
    assert_eq!(harness.routes.live_routes(), channels(&["BBC2"]));
}

#[tokio::test(start_paused = true)]
async fn old_route_drains_until_the_new_one_serves() {
    let harness = Harness::new(0);
    harness.cast_active("uuid:dev-42", "BBC1").await;
    *harness.routes.serve_delay.lock().unwrap() = None;

    let snapshot = harness
        .controller
        .switch_channel(SwitchDirection::Next)
        .await
        .unwrap();
    assert_eq!(snapshot.phase, SessionPhase::Active);
    assert_eq!(snapshot.channel.as_deref(), Some("BBC2"));
    assert!(!harness.called("route- BBC1"));
    assert_eq!(harness.routes.live_routes(), channels(&["BBC1", "BBC2"]));

    harness.routes.serve("BBC2");
    harness.wait_call("route- BBC1").await;
    assert!(harness.position("first_transfer BBC2") < harness.position("route- BBC1"));
    assert_eq!(harness.routes.live_routes(), channels(&["BBC2"]));
}

#[tokio::test(start_paused = true)]
async fn draining_route_is_released_when_the_session_stops() {
    let harness = Harness::new(0);
    harness.cast_active("uuid:dev-42", "BBC1").await;
    *harness.routes.serve_delay.lock().unwrap() = None;

    harness
        .controller
        .switch_channel(SwitchDirection::Next)
        .await
        .unwrap();
    assert_eq!(harness.routes.live_routes(), channels(&["BBC1", "BBC2"]));

    harness.controller.stop_cast().await.unwrap();
    assert!(harness.routes.live_routes().is_empty());
    assert!(harness.called("route- BBC1"));
    assert!(harness.called("route- BBC2"));
    assert!(!harness.called("first_transfer BBC2"));
}

#[tokio::test]
async fn pause_and_resume_keep_the_session() {
    let harness = Harness::new(0);
    assert_eq!(
        harness.controller.pause().await,
        Err(CastError::NoActiveSession)
    );
    harness.cast_active("uuid:dev-42", "BBC1").await;
    harness.clear();

    harness.controller.pause().await.unwrap();
    assert_eq!(
        harness.controller.snapshot().playback.transport,
        TransportState::Paused
    );

    harness.controller.resume().await.unwrap();
    let snapshot = harness.controller.snapshot();
    assert_eq!(snapshot.playback.transport, TransportState::Playing);
    assert_eq!(snapshot.phase, SessionPhase::Active);
    assert_eq!(snapshot.channel.as_deref(), Some("BBC1"));

    assert_eq!(harness.calls(), vec!["pause dev-42", "play dev-42"]);
    assert_eq!(harness.routes.live_routes(), channels(&["BBC1"]));
}

#[tokio::test(start_paused = true)]
async fn sync_mode_corrects_drift_until_disabled() {
    let player = Arc::new(FakePlayer::default());
    let harness = Harness::with(Options {
        player: Some(player.clone()),
        ..Options::default()
    });
    harness.cast_active("uuid:dev-42", "BBC1").await;

    // lecteur local 10 s devant la TV
    *player.position.lock().unwrap() = Duration::from_secs(10);
    harness.controller.set_sync_mode(true).await.unwrap();
    assert!(harness.controller.snapshot().sync_mode);

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(player.seeks.load(Ordering::SeqCst), 1);
    assert_eq!(*player.position.lock().unwrap(), Duration::ZERO);
    assert_eq!(*harness.renderer_position.lock().unwrap(), Duration::ZERO);
    assert!(!harness.called("seek dev-42"));

    harness.controller.set_sync_mode(false).await.unwrap();
    assert!(!harness.controller.snapshot().sync_mode);

    *player.position.lock().unwrap() = Duration::from_secs(30);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(player.seeks.load(Ordering::SeqCst), 1);
}
