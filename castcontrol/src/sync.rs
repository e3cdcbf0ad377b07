//! Mode « regarder ensemble » : garder le lecteur local et le renderer
//! alignés à une tolérance près.
//!
//! À chaque période les deux positions sont comparées ; au-delà de la
//! tolérance une seule correction est émise, puis quelques périodes sont
//! laissées aux lecteurs pour se stabiliser.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::control_client::RendererControl;
use crate::errors::CastError;
use crate::settings::SyncSettings;

/// Coût relatif d'un seek sur le lecteur local
pub const LOCAL_SEEK_COST: u32 = 1;
/// Coût relatif d'un seek sur le renderer (rebuffering de la TV)
pub const REMOTE_SEEK_COST: u32 = 3;

/// Lecteur local, fourni par l'application
#[async_trait]
pub trait LocalPlayer: Send + Sync {
    async fn current_position(&self) -> Option<Duration>;
    async fn seek(&self, position: Duration) -> Result<(), CastError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSide {
    Local,
    Remote,
}

/// Seek correctif décidé pour une période
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Correction {
    pub side: SyncSide,
    pub target: Duration,
}

/// Côté à corriger : celui en retard, sauf si le seek de l'autre côté est
/// moins coûteux (on recule alors le côté en avance).
pub fn choose_correction(
    local: Duration,
    remote: Duration,
    tolerance: Duration,
    local_cost: u32,
    remote_cost: u32,
) -> Option<Correction> {
    let drift = local.abs_diff(remote);
    if drift <= tolerance {
        return None;
    }

    let (behind, ahead) = if local < remote {
        (SyncSide::Local, SyncSide::Remote)
    } else {
        (SyncSide::Remote, SyncSide::Local)
    };
    let cost = |side| match side {
        SyncSide::Local => local_cost,
        SyncSide::Remote => remote_cost,
    };
    let side = if cost(behind) <= cost(ahead) { behind } else { ahead };
    let target = match side {
        SyncSide::Local => remote,
        SyncSide::Remote => local,
    };
    Some(Correction { side, target })
}

struct SyncLoop {
    control: Arc<dyn RendererControl>,
    player: Arc<dyn LocalPlayer>,
    settings: SyncSettings,
    cancel: CancellationToken,
    corrections: Arc<AtomicU32>,
    settling: u32,
}

impl SyncLoop {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.poll() => {}
            }
        }
        debug!("Sync loop stopped");
    }

    async fn poll(&mut self) {
        if self.settling > 0 {
            self.settling -= 1;
            return;
        }

        let Some(local) = self.player.current_position().await else {
            return;
        };
        let remote = match self.control.position().await {
            Ok(info) => info.rel_time,
            Err(e) => {
                debug!(error = %e, "Remote position unavailable");
                return;
            }
        };
        let Some(remote) = remote else {
            return;
        };

        let Some(correction) = choose_correction(
            local,
            remote,
            self.settings.tolerance,
            LOCAL_SEEK_COST,
            REMOTE_SEEK_COST,
        ) else {
            return;
        };

        if self.cancel.is_cancelled() {
            return;
        }
        info!(
            local_ms = local.as_millis() as u64,
            remote_ms = remote.as_millis() as u64,
            side = ?correction.side,
            "Correcting playback drift"
        );
        let result = match correction.side {
            SyncSide::Local => self.player.seek(correction.target).await,
            SyncSide::Remote => self.control.seek(correction.target).await,
        };
        match result {
            Ok(()) => {
                self.corrections.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => warn!(error = %e, side = ?correction.side, "Corrective seek failed"),
        }
        self.settling = self.settings.settle_polls;
    }
}

/// Boucle de synchronisation en tâche de fond
pub struct SyncCoordinator {
    cancel: CancellationToken,
    corrections: Arc<AtomicU32>,
    handle: Option<JoinHandle<()>>,
}

impl SyncCoordinator {
    pub fn spawn(
        control: Arc<dyn RendererControl>,
        player: Arc<dyn LocalPlayer>,
        settings: SyncSettings,
    ) -> Self {
        let cancel = CancellationToken::new();
        let corrections = Arc::new(AtomicU32::new(0));
        let sync_loop = SyncLoop {
            control,
            player,
            settings,
            cancel: cancel.clone(),
            corrections: corrections.clone(),
            settling: 0,
        };
        Self {
            cancel,
            corrections,
            handle: Some(tokio::spawn(sync_loop.run())),
        }
    }

    /// Seeks correctifs émis depuis le démarrage
    pub fn corrections(&self) -> u32 {
        self.corrections.load(Ordering::SeqCst)
    }

    /// Arrête la boucle ; aucun seek n'est émis après l'appel.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::avtransport_client::PositionInfo;
    use crate::model::TransportState;

    #[derive(Default)]
    struct FakeRenderer {
        position: Mutex<Duration>,
        seeks: AtomicU32,
    }

    #[async_trait]
    impl RendererControl for FakeRenderer {
        async fn set_source(&self, _: &str, _: &str) -> Result<(), CastError> {
            Ok(())
        }
        async fn set_next_source(&self, _: &str, _: &str) -> Result<(), CastError> {
            Ok(())
        }
        async fn play(&self) -> Result<(), CastError> {
            Ok(())
        }
        async fn pause(&self) -> Result<(), CastError> {
            Ok(())
        }
        async fn stop(&self) -> Result<(), CastError> {
            Ok(())
        }
        async fn seek(&self, position: Duration) -> Result<(), CastError> {
            self.seeks.fetch_add(1, Ordering::SeqCst);
            *self.position.lock().unwrap() = position;
            Ok(())
        }
        async fn set_volume(&self, _: u16) -> Result<(), CastError> {
            Ok(())
        }
        async fn set_mute(&self, _: bool) -> Result<(), CastError> {
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

    fn settings() -> SyncSettings {
        SyncSettings {
            poll_interval: Duration::from_millis(1500),
            tolerance: Duration::from_secs(2),
            settle_polls: 2,
        }
    }

    #[test]
    fn test_choose_correction() {
        let secs = Duration::from_secs;
        let tolerance = secs(2);
        assert_eq!(choose_correction(secs(10), secs(11), tolerance, 1, 3), None);
        assert_eq!(choose_correction(secs(10), secs(12), tolerance, 1, 3), None);

        // local en retard : on l'avance
        assert_eq!(
            choose_correction(secs(10), secs(15), tolerance, 1, 3),
            Some(Correction {
                side: SyncSide::Local,
                target: secs(15)
            })
        );
        // renderer en retard mais plus coûteux : on recule le local
        assert_eq!(
            choose_correction(secs(15), secs(10), tolerance, 1, 3),
            Some(Correction {
                side: SyncSide::Local,
                target: secs(10)
            })
        );
        // coûts égaux : le côté en retard
        assert_eq!(
            choose_correction(secs(15), secs(10), tolerance, 1, 1),
            Some(Correction {
                side: SyncSide::Remote,
                target: secs(15)
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_seek_without_drift() {
        let renderer = Arc::new(FakeRenderer::default());
        let player = Arc::new(FakePlayer::default());
        let coordinator = SyncCoordinator::spawn(renderer.clone(), player.clone(), settings());

        // 20 périodes à dérive nulle
        tokio::time::sleep(Duration::from_millis(1500 * 20 - 1)).await;
        coordinator.stop().await;

        assert_eq!(renderer.seeks.load(Ordering::SeqCst), 0);
        assert_eq!(player.seeks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_seek_for_injected_drift() {
        let renderer = Arc::new(FakeRenderer::default());
        let player = Arc::new(FakePlayer::default());
        let coordinator = SyncCoordinator::spawn(renderer.clone(), player.clone(), settings());

        tokio::time::sleep(Duration::from_millis(3000)).await;
        *player.position.lock().unwrap() = Duration::from_secs(5);
        tokio::time::sleep(Duration::from_millis(1500 * 20)).await;

        assert_eq!(coordinator.corrections(), 1);
        coordinator.stop().await;
        assert_eq!(player.seeks.load(Ordering::SeqCst), 1);
        assert_eq!(renderer.seeks.load(Ordering::SeqCst), 0);
        assert_eq!(*player.position.lock().unwrap(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_seek_after_stop() {
        let renderer = Arc::new(FakeRenderer::default());
        let player = Arc::new(FakePlayer::default());
        let coordinator = SyncCoordinator::spawn(renderer.clone(), player.clone(), settings());
        coordinator.stop().await;

        *player.position.lock().unwrap() = Duration::from_secs(30);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(player.seeks.load(Ordering::SeqCst), 0);
    }
}
