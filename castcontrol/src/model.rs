use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Identifiant stable d'un renderer : `uuid:...` en minuscules
pub type DeviceId = String;

/// Point d'accès d'un service UPnP, URLs déjà résolues en absolu
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceEndpoint {
    pub service_type: String,
    pub control_url: String,
    pub event_sub_url: Option<String>,
}

/// Renderer vu sur le réseau local
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredDevice {
    pub id: DeviceId,
    pub friendly_name: String,
    pub address: IpAddr,
    /// URL de la description (`LOCATION`)
    pub location: String,
    pub manufacturer: Option<String>,
    pub model_name: Option<String>,
    pub service_types: BTreeSet<String>,
    pub endpoints: Vec<ServiceEndpoint>,
    #[serde(skip)]
    pub last_seen: Instant,
}

impl DiscoveredDevice {
    fn endpoint(&self, fragment: &str) -> Option<&ServiceEndpoint> {
        self.endpoints
            .iter()
            .find(|e| e.service_type.to_ascii_lowercase().contains(fragment))
    }

    pub fn avtransport(&self) -> Option<&ServiceEndpoint> {
        self.endpoint(":service:avtransport:")
    }

    pub fn rendering_control(&self) -> Option<&ServiceEndpoint> {
        self.endpoint(":service:renderingcontrol:")
    }

    pub fn host(&self) -> String {
        self.address.to_string()
    }
}

/// État de transport d'un renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TransportState {
    #[default]
    Stopped,
    Transitioning,
    Playing,
    Paused,
    Error,
}

impl TransportState {
    /// Valeur `TransportState` UPnP ; `None` si inconnue
    pub fn from_upnp(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "STOPPED" | "NO_MEDIA_PRESENT" => Some(TransportState::Stopped),
            "PLAYING" => Some(TransportState::Playing),
            "PAUSED_PLAYBACK" | "PAUSED_RECORDING" => Some(TransportState::Paused),
            "TRANSITIONING" | "RECORDING" => Some(TransportState::Transitioning),
            "ERROR" => Some(TransportState::Error),
            _ => None,
        }
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportState::Stopped => "Stopped",
            TransportState::Transitioning => "Transitioning",
            TransportState::Playing => "Playing",
            TransportState::Paused => "Paused",
            TransportState::Error => "Error",
        };
        f.write_str(name)
    }
}

/// Dernier état connu de la lecture distante
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackState {
    pub transport: TransportState,
    pub position: Option<Duration>,
    pub duration: Option<Duration>,
    pub volume: Option<u16>,
    pub muted: Option<bool>,
}

impl PlaybackState {
    /// Applique une notification du renderer (état faisant autorité)
    pub fn apply(&mut self, event: &RemoteEvent) {
        match event {
            RemoteEvent::TransportStateChanged(state) => self.transport = *state,
            RemoteEvent::PositionChanged { position, duration } => {
                self.position = Some(*position);
                if duration.is_some() {
                    self.duration = *duration;
                }
            }
            RemoteEvent::VolumeChanged(volume) => self.volume = Some(*volume),
            RemoteEvent::MuteChanged(muted) => self.muted = Some(*muted),
            RemoteEvent::ConnectionLost { .. } => self.transport = TransportState::Error,
            RemoteEvent::TrackChanged { .. } | RemoteEvent::SourceChanged { .. } => {}
        }
    }
}

/// Notification brute venant du renderer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    TransportStateChanged(TransportState),
    /// `CurrentTrack` a changé : saut explicite depuis la télécommande
    TrackChanged { previous: Option<u32>, current: u32 },
    PositionChanged {
        position: Duration,
        duration: Option<Duration>,
    },
    VolumeChanged(u16),
    MuteChanged(bool),
    SourceChanged { uri: String },
    /// Abonnement perdu (renouvellement impossible)
    ConnectionLost { reason: String },
}

/// Sens d'un changement de chaîne
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SwitchDirection {
    Next,
    Previous,
}

/// Chaîne IPTV fournie par le catalogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Channel {
    pub name: String,
    pub url: String,
}

impl Channel {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}
