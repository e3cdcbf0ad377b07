use tokio::time::{Duration, Instant, sleep};

/// Limiteur de débit d'une réponse : dort quand on est en avance sur
/// l'allure cible.
pub(crate) struct Throttle {
    bytes_per_sec: u64,
    started: Instant,
    sent: u64,
}

impl Throttle {
    /// `None` quand la limite vaut 0 (illimité). Limite en Kio/s.
    pub fn new(limit_kbps: u64) -> Option<Self> {
        (limit_kbps > 0).then(|| Self {
            bytes_per_sec: limit_kbps * 1024,
            started: Instant::now(),
            sent: 0,
        })
    }

    pub async fn pace(&mut self, len: usize) {
        self.sent += len as u64;
        let due = Duration::from_secs_f64(self.sent as f64 / self.bytes_per_sec as f64);
        let elapsed = self.started.elapsed();
        if due > elapsed {
            sleep(due - elapsed).await;
        }
    }
}
