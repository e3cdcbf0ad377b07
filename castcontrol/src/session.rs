//! État public d'une session de cast, tel que publié à l'interface.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::{CastError, FailureKind};
use crate::model::{DeviceId, PlaybackState};

/// Phase de la machine à états du contrôleur
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SessionPhase {
    #[default]
    Idle,
    Connecting,
    Active,
    ChannelSwitching,
    Stopping,
    Failed,
}

/// Vue instantanée de la session courante
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Option<String>,
    pub phase: SessionPhase,
    pub device_id: Option<DeviceId>,
    pub device_name: Option<String>,
    pub channel: Option<String>,
    pub route_url: Option<String>,
    pub playback: PlaybackState,
    pub sync_mode: bool,
    pub created_at: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    /// Aucune session : phase `Idle`
    pub fn idle(sync_mode: bool) -> Self {
        Self {
            sync_mode,
            ..Self::default()
        }
    }
}

/// Fin de session présentée à l'utilisateur : « casting stopped: ... »
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CastFailure {
    pub kind: FailureKind,
    pub device_id: Option<DeviceId>,
    pub message: String,
}

impl CastFailure {
    pub fn new(error: &CastError, device_id: Option<DeviceId>) -> Self {
        Self {
            kind: error.kind(),
            device_id,
            message: format!("casting stopped: {error}"),
        }
    }
}

/// Notification publiée aux abonnés du contrôleur
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Changed(SessionSnapshot),
    Failed(CastFailure),
}
