//! Lecture des événements bruts : repérer un « chaîne suivante » demandé
//! depuis la télécommande de la TV.
//!
//! Un renderer qui rapporte ses sauts (`CurrentTrack` qui change) passe en
//! mode explicite et l'inférence est coupée pour lui. Sinon, un passage à
//! `Stopped` pendant une session active, hors de la fenêtre qui suit nos
//! propres commandes et alors que la source n'est pas terminée, vaut
//! « suivante ».
//!
//! Après un `setSource` / `play` de notre part, les arrêts que le renderer
//! rapporte avant de repasser en `Playing` répondent à notre commande : ils
//! ne sont jamais lus comme un saut, quel que soit le délai de traitement.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::model::{RemoteEvent, SwitchDirection, TransportState};

/// Origine d'une demande de changement de chaîne
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipOrigin {
    /// Saut rapporté par le renderer
    Explicit,
    /// Déduit d'un arrêt inattendu
    Inferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipRequest {
    pub direction: SwitchDirection,
    pub origin: SkipOrigin,
}

/// Ce que le contrôleur sait au moment de l'événement
#[derive(Debug, Clone, Copy)]
pub struct SessionContext {
    pub active: bool,
    /// La source de la route courante a atteint sa fin
    pub upstream_ended: bool,
}

#[derive(Debug)]
pub struct SkipInterpreter {
    explicit: bool,
    grace: Duration,
    quiet_until: Option<Instant>,
    /// Commande émise, `Playing` pas encore rapporté
    awaiting_playing: bool,
}

impl SkipInterpreter {
    pub fn new(grace: Duration) -> Self {
        Self {
            explicit: false,
            grace,
            quiet_until: None,
            awaiting_playing: false,
        }
    }

    /// Vrai une fois que le renderer a rapporté un saut lui-même
    pub fn is_explicit(&self) -> bool {
        self.explicit
    }

    /// À appeler après chaque `setSource` / `play` émis par nous
    pub fn note_own_command(&mut self, now: Instant) {
        self.quiet_until = Some(now + self.grace);
        self.awaiting_playing = true;
    }

    fn in_grace(&self, now: Instant) -> bool {
        self.quiet_until.is_some_and(|until| now < until)
    }

    pub fn interpret(
        &mut self,
        event: &RemoteEvent,
        context: SessionContext,
        now: Instant,
    ) -> Option<SkipRequest> {
        match event {
            RemoteEvent::TrackChanged {
                previous: Some(previous),
                current,
            } if previous != current => {
                if self.in_grace(now) {
                    return None;
                }
                if !self.explicit {
                    debug!("Renderer reports track skips, inference disabled");
                    self.explicit = true;
                }
                let direction = if current > previous {
                    SwitchDirection::Next
                } else {
                    SwitchDirection::Previous
                };
                Some(SkipRequest {
                    direction,
                    origin: SkipOrigin::Explicit,
                })
            }
            RemoteEvent::TransportStateChanged(TransportState::Playing) => {
                self.awaiting_playing = false;
                None
            }
            RemoteEvent::TransportStateChanged(TransportState::Stopped) => {
                if self.explicit
                    || self.awaiting_playing
                    || !context.active
                    || context.upstream_ended
                    || self.in_grace(now)
                {
                    return None;
                }
                Some(SkipRequest {
                    direction: SwitchDirection::Next,
                    origin: SkipOrigin::Inferred,
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACTIVE: SessionContext = SessionContext {
        active: true,
        upstream_ended: false,
    };

    fn stopped() -> RemoteEvent {
        RemoteEvent::TransportStateChanged(TransportState::Stopped)
    }

    fn playing() -> RemoteEvent {
        RemoteEvent::TransportStateChanged(TransportState::Playing)
    }

    #[test]
    fn test_stop_while_active_means_next() {
        let mut interpreter = SkipInterpreter::new(Duration::from_secs(3));
        let now = Instant::now();
        interpreter.note_own_command(now);

        assert_eq!(
            interpreter.interpret(&playing(), ACTIVE, now + Duration::from_millis(500)),
            None
        );
        assert_eq!(
            interpreter.interpret(&stopped(), ACTIVE, now + Duration::from_secs(1)),
            None
        );
        assert_eq!(
            interpreter.interpret(&stopped(), ACTIVE, now + Duration::from_secs(4)),
            Some(SkipRequest {
                direction: SwitchDirection::Next,
                origin: SkipOrigin::Inferred
            })
        );
    }

    #[test]
    fn test_stop_before_playing_answers_our_command() {
        let mut interpreter = SkipInterpreter::new(Duration::from_secs(3));
        let now = Instant::now();
        interpreter.note_own_command(now);

        // traité bien après la fenêtre, mais antérieur au Playing
        let late = now + Duration::from_secs(10);
        assert_eq!(interpreter.interpret(&stopped(), ACTIVE, late), None);
        assert_eq!(interpreter.interpret(&playing(), ACTIVE, late), None);
        assert_eq!(
            interpreter
                .interpret(&stopped(), ACTIVE, late)
                .map(|s| s.origin),
            Some(SkipOrigin::Inferred)
        );
    }

    #[test]
    fn test_stop_at_end_of_stream_is_not_a_skip() {
        let mut interpreter = SkipInterpreter::new(Duration::ZERO);
        let context = SessionContext {
            active: true,
            upstream_ended: true,
        };
        assert_eq!(interpreter.interpret(&stopped(), context, Instant::now()), None);

        let idle = SessionContext {
            active: false,
            upstream_ended: false,
        };
        assert_eq!(interpreter.interpret(&stopped(), idle, Instant::now()), None);
    }

    #[test]
    fn test_explicit_skip_disables_inference() {
        let mut interpreter = SkipInterpreter::new(Duration::ZERO);
        let now = Instant::now();

        let previous = RemoteEvent::TrackChanged {
            previous: Some(4),
            current: 3,
        };
        assert_eq!(
            interpreter.interpret(&previous, ACTIVE, now),
            Some(SkipRequest {
                direction: SwitchDirection::Previous,
                origin: SkipOrigin::Explicit
            })
        );
        assert!(interpreter.is_explicit());
        assert_eq!(interpreter.interpret(&stopped(), ACTIVE, now), None);

        let next = RemoteEvent::TrackChanged {
            previous: Some(3),
            current: 4,
        };
        assert_eq!(
            interpreter.interpret(&next, ACTIVE, now).map(|s| s.direction),
            Some(SwitchDirection::Next)
        );
    }

    #[test]
    fn test_first_track_report_is_not_a_skip() {
        let mut interpreter = SkipInterpreter::new(Duration::ZERO);
        let first = RemoteEvent::TrackChanged {
            previous: None,
            current: 1,
        };
        assert_eq!(interpreter.interpret(&first, ACTIVE, Instant::now()), None);
        assert!(!interpreter.is_explicit());
    }
}
