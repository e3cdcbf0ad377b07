//! Notifications des renderers : abonnement, remise en ordre et traduction
//! en [`RemoteEvent`].

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::errors::CastError;
use crate::model::{DiscoveredDevice, RemoteEvent, TransportState};
use crate::rendering_control_client::parse_bool;
use crate::time_utils::parse_upnp_time;

/// Nombre de NOTIFY en avance retenus avant d'abandonner un trou de `SEQ`
pub const DEFAULT_REORDER_WINDOW: usize = 4;

/// Source d'événements d'un renderer
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn subscribe(&self, device: &DiscoveredDevice) -> Result<EventSubscription, CastError>;
}

/// Abonnement actif ; les événements arrivent dans l'ordre d'émission.
///
/// Le flux se termine après un `ConnectionLost` ou après `close`.
pub struct EventSubscription {
    id: String,
    events: mpsc::UnboundedReceiver<RemoteEvent>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    close_timeout: Duration,
}

impl EventSubscription {
    pub fn new(
        id: impl Into<String>,
        events: mpsc::UnboundedReceiver<RemoteEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: id.into(),
            events,
            cancel,
            tasks: Vec::new(),
            close_timeout: Duration::from_secs(5),
        }
    }

    /// Tâches attendues par `close` (UNSUBSCRIBE en cours)
    pub fn with_tasks(mut self, tasks: Vec<JoinHandle<()>>, close_timeout: Duration) -> Self {
        self.tasks = tasks;
        self.close_timeout = close_timeout;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Prochain événement. Annulable sans perte.
    pub async fn recv(&mut self) -> Option<RemoteEvent> {
        self.events.recv().await
    }

    /// Résilie l'abonnement et attend la fin des tâches, dans une limite
    /// de temps.
    pub async fn close(mut self) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut self.tasks);
        if tasks.is_empty() {
            return;
        }
        if tokio::time::timeout(self.close_timeout, futures::future::join_all(tasks))
            .await
            .is_err()
        {
            debug!(subscription = %self.id, "Unsubscribe did not finish in time");
        }
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// `SEQ` suivant ; après `u32::MAX` la séquence repart à 1
fn successor(seq: u32) -> u32 {
    if seq == u32::MAX { 1 } else { seq + 1 }
}

/// Remet les NOTIFY d'un abonnement dans l'ordre de leur `SEQ`.
///
/// Le premier NOTIFY d'un abonnement porte `SEQ: 0`. Les arrivées en avance
/// sont retenues ; un trou qui persiste au-delà de `window` notifications
/// est sauté.
#[derive(Debug)]
pub struct SequenceGate<T> {
    next: u32,
    pending: BTreeMap<u32, T>,
    window: usize,
}

impl<T> SequenceGate<T> {
    pub fn new(window: usize) -> Self {
        Self {
            next: 0,
            pending: BTreeMap::new(),
            window: window.max(1),
        }
    }

    /// Ajoute une notification, retourne celles qui peuvent être livrées.
    pub fn push(&mut self, seq: Option<u32>, item: T) -> Vec<T> {
        let Some(seq) = seq else {
            return vec![item];
        };

        if seq == 0 && self.next != 0 {
            // le renderer a recréé l'abonnement
            debug!(expected = self.next, "SEQ restarted at 0");
            let mut released: Vec<T> = std::mem::take(&mut self.pending).into_values().collect();
            released.push(item);
            self.next = 1;
            return released;
        }
        if seq < self.next {
            trace!(seq, expected = self.next, "Late or duplicate NOTIFY dropped");
            return Vec::new();
        }
        self.pending.insert(seq, item);

        let mut released = self.release();
        if self.pending.len() > self.window {
            if let Some(first) = self.pending.keys().next().copied() {
                debug!(expected = self.next, resumed_at = first, "SEQ gap skipped");
                self.next = first;
                released.extend(self.release());
            }
        }
        released
    }

    fn release(&mut self) -> Vec<T> {
        let mut released = Vec::new();
        while let Some(item) = self.pending.remove(&self.next) {
            released.push(item);
            self.next = successor(self.next);
        }
        released
    }
}

/// Traduit les variables d'état d'un NOTIFY en événements.
///
/// Garde la dernière `CurrentTrack` vue pour signaler les changements.
#[derive(Debug, Default)]
pub struct NotifyTranslator {
    last_track: Option<u32>,
    last_uri: Option<String>,
}

impl NotifyTranslator {
    pub fn translate(&mut self, values: &HashMap<String, String>) -> Vec<RemoteEvent> {
        let mut events = Vec::new();

        let uri = values
            .get("AVTransportURI")
            .map(|u| u.trim())
            .filter(|u| !u.is_empty());
        if let Some(uri) = uri {
            if self.last_uri.as_deref() != Some(uri) {
                self.last_uri = Some(uri.to_string());
                events.push(RemoteEvent::SourceChanged {
                    uri: uri.to_string(),
                });
            }
        }

        let track = values
            .get("CurrentTrack")
            .and_then(|t| t.trim().parse::<u32>().ok());
        if let Some(track) = track {
            if self.last_track != Some(track) {
                events.push(RemoteEvent::TrackChanged {
                    previous: self.last_track,
                    current: track,
                });
                self.last_track = Some(track);
            }
        }

        if let Some(raw) = values.get("TransportState") {
            match TransportState::from_upnp(raw) {
                Some(state) => events.push(RemoteEvent::TransportStateChanged(state)),
                None => debug!(state = raw.as_str(), "Unknown TransportState ignored"),
            }
        }

        let position = values
            .get("RelativeTimePosition")
            .and_then(|p| parse_upnp_time(p));
        let duration = values
            .get("CurrentTrackDuration")
            .and_then(|d| parse_upnp_time(d));
        if let Some(position) = position {
            events.push(RemoteEvent::PositionChanged { position, duration });
        }

        if let Some(volume) = values.get("Volume").and_then(|v| v.trim().parse::<u16>().ok()) {
            events.push(RemoteEvent::VolumeChanged(volume));
        }
        if let Some(muted) = values.get("Mute").and_then(|m| parse_bool(m)) {
            events.push(RemoteEvent::MuteChanged(muted));
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_in_order() {
        let mut gate = SequenceGate::new(4);
        assert_eq!(gate.push(Some(0), "a"), vec!["a"]);
        assert_eq!(gate.push(Some(1), "b"), vec!["b"]);
        assert_eq!(gate.push(None, "c"), vec!["c"]);
    }

    #[test]
    fn test_gate_reorders() {
        let mut gate = SequenceGate::new(4);
        assert_eq!(gate.push(Some(0), 0), vec![0]);
        assert!(gate.push(Some(2), 2).is_empty());
        assert!(gate.push(Some(3), 3).is_empty());
        assert_eq!(gate.push(Some(1), 1), vec![1, 2, 3]);
        assert!(gate.push(Some(2), 2).is_empty());
    }

    #[test]
    fn test_gate_skips_persistent_gap() {
        let mut gate = SequenceGate::new(2);
        assert_eq!(gate.push(Some(0), 0), vec![0]);
        assert!(gate.push(Some(2), 2).is_empty());
        assert!(gate.push(Some(3), 3).is_empty());
        assert_eq!(gate.push(Some(4), 4), vec![2, 3, 4]);
        assert_eq!(gate.push(Some(5), 5), vec![5]);
    }

    #[test]
    fn test_gate_restart_and_wrap() {
        let mut gate = SequenceGate::new(4);
        assert_eq!(gate.push(Some(0), "a"), vec!["a"]);
        assert_eq!(gate.push(Some(1), "b"), vec!["b"]);
        assert_eq!(gate.push(Some(0), "c"), vec!["c"]);
        assert_eq!(gate.push(Some(1), "d"), vec!["d"]);
        assert_eq!(successor(u32::MAX), 1);
    }

    #[test]
    fn test_subscription_waits_for_events() {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let mut subscription = EventSubscription::new("uuid:dev-42#1", rx, cancel.clone());
        {
            let mut recv = tokio_test::task::spawn(subscription.recv());
            tokio_test::assert_pending!(recv.poll());
            tx.send(RemoteEvent::VolumeChanged(3)).unwrap();
            assert!(recv.is_woken());
            assert_eq!(
                tokio_test::assert_ready!(recv.poll()),
                Some(RemoteEvent::VolumeChanged(3))
            );
        }
        drop(subscription);
        assert!(cancel.is_cancelled());
    }

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_translate_avtransport_change() {
        let mut translator = NotifyTranslator::default();
        let events = translator.translate(&values(&[
            ("TransportState", "PLAYING"),
            ("CurrentTrack", "1"),
            ("AVTransportURI", "http://10.0.0.2:4000/stream/abc.ts"),
            ("RelativeTimePosition", "0:00:12"),
            ("CurrentTrackDuration", "NOT_IMPLEMENTED"),
        ]));
        assert_eq!(
            events,
            vec![
                RemoteEvent::SourceChanged {
                    uri: "http://10.0.0.2:4000/stream/abc.ts".into()
                },
                RemoteEvent::TrackChanged {
                    previous: None,
                    current: 1
                },
                RemoteEvent::TransportStateChanged(TransportState::Playing),
                RemoteEvent::PositionChanged {
                    position: Duration::from_secs(12),
                    duration: None
                },
            ]
        );

        // même piste, même URI : seul l'état est rapporté
        let events = translator.translate(&values(&[
            ("TransportState", "STOPPED"),
            ("CurrentTrack", "1"),
            ("AVTransportURI", "http://10.0.0.2:4000/stream/abc.ts"),
        ]));
        assert_eq!(
            events,
            vec![RemoteEvent::TransportStateChanged(TransportState::Stopped)]
        );

        let events = translator.translate(&values(&[("CurrentTrack", "2")]));
        assert_eq!(
            events,
            vec![RemoteEvent::TrackChanged {
                previous: Some(1),
                current: 2
            }]
        );
    }

    #[test]
    fn test_translate_rendering_control() {
        let mut translator = NotifyTranslator::default();
        let events = translator.translate(&values(&[("Volume", "25"), ("Mute", "0")]));
        assert_eq!(
            events,
            vec![RemoteEvent::VolumeChanged(25), RemoteEvent::MuteChanged(false)]
        );
    }
}
