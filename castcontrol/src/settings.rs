//! Réglages des composants de contrôle, lus depuis `castconfig`.
//!
//! Chaque composant reçoit sa structure de réglages ; aucun ne lit le
//! singleton de configuration lui-même.

use std::time::Duration;

use castconfig::Config;

fn ms(value: anyhow::Result<u64>, default: Duration) -> Duration {
    value.map(Duration::from_millis).unwrap_or(default)
}

fn secs(value: anyhow::Result<u64>, default: Duration) -> Duration {
    value.map(Duration::from_secs).unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub probe_interval: Duration,
    /// Silence au-delà duquel un renderer est oublié
    pub expiry: Duration,
    pub mx: u32,
    pub description_timeout: Duration,
    pub search_targets: Vec<String>,
    /// Balayage du /24 local pour les TV muettes en SSDP ; `None` : coupé
    pub sweep: Option<SweepSettings>,
}

/// Interrogation directe de `http://<hôte>:<port><path>` sur le sous-réseau
#[derive(Debug, Clone)]
pub struct SweepSettings {
    pub port: u16,
    pub path: String,
    pub interval: Duration,
    pub concurrency: usize,
    pub timeout: Duration,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            port: 9197,
            path: "/dmr".to_string(),
            interval: Duration::from_millis(60_000),
            concurrency: 32,
            timeout: Duration::from_millis(1000),
        }
    }
}

impl SweepSettings {
    pub fn from_config(config: &Config) -> Option<Self> {
        if !config.get_subnet_sweep().unwrap_or(true) {
            return None;
        }
        let d = Self::default();
        let path = config
            .get_sweep_path()
            .ok()
            .map(|path| path.trim().to_string())
            .filter(|path| !path.is_empty())
            .map(|path| {
                if path.starts_with('/') {
                    path
                } else {
                    format!("/{path}")
                }
            })
            .unwrap_or(d.path);
        Some(Self {
            port: config.get_sweep_port(),
            path,
            interval: ms(config.get_sweep_interval_ms(), d.interval).max(Duration::from_secs(1)),
            concurrency: config
                .get_sweep_concurrency()
                .map(|n| n.max(1))
                .unwrap_or(d.concurrency),
            timeout: ms(config.get_sweep_timeout_ms(), d.timeout),
        })
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_millis(5000),
            expiry: Duration::from_millis(15_000),
            mx: 2,
            description_timeout: Duration::from_millis(3000),
            search_targets: vec![
                castupnp::MEDIA_RENDERER_V1.to_string(),
                castupnp::AVTRANSPORT_V1.to_string(),
            ],
            sweep: Some(SweepSettings::default()),
        }
    }
}

impl DiscoverySettings {
    pub fn from_config(config: &Config) -> Self {
        let d = Self::default();
        let probe_interval = ms(config.get_probe_interval_ms(), d.probe_interval)
            .max(Duration::from_millis(100));
        let factor = config.get_expiry_factor().unwrap_or(3).max(1) as u32;
        Self {
            probe_interval,
            expiry: probe_interval * factor,
            mx: config.get_discovery_mx().map(|mx| mx as u32).unwrap_or(d.mx),
            description_timeout: ms(config.get_description_timeout_ms(), d.description_timeout),
            search_targets: config
                .get_search_targets()
                .ok()
                .filter(|targets| !targets.is_empty())
                .unwrap_or(d.search_targets),
            sweep: SweepSettings::from_config(config),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControlSettings {
    pub call_timeout: Duration,
    /// Nombre de nouvelles tentatives d'une requête de lecture d'état
    pub query_retries: u32,
    pub retry_backoff: Duration,
    /// Tentatives de `play` avant d'abandonner la session
    pub max_action_attempts: u32,
    pub stop_before_set_source: bool,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_millis(5000),
            query_retries: 3,
            retry_backoff: Duration::from_millis(250),
            max_action_attempts: 3,
            stop_before_set_source: true,
        }
    }
}

impl ControlSettings {
    pub fn from_config(config: &Config) -> Self {
        let d = Self::default();
        Self {
            call_timeout: ms(config.get_call_timeout_ms(), d.call_timeout),
            query_retries: config
                .get_query_retries()
                .map(|n| n as u32)
                .unwrap_or(d.query_retries),
            retry_backoff: ms(config.get_retry_backoff_ms(), d.retry_backoff),
            max_action_attempts: config
                .get_max_action_attempts()
                .map(|n| (n as u32).max(1))
                .unwrap_or(d.max_action_attempts),
            stop_before_set_source: config
                .get_stop_before_set_source()
                .unwrap_or(d.stop_before_set_source),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSettings {
    /// Durée d'abonnement demandée au renderer
    pub subscription_timeout: Duration,
    /// Avance prise sur l'expiration pour renouveler
    pub renewal_margin: Duration,
    pub renewal_attempts: u32,
    /// Délai d'une requête SUBSCRIBE/UNSUBSCRIBE
    pub http_timeout: Duration,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            subscription_timeout: Duration::from_secs(300),
            renewal_margin: Duration::from_secs(30),
            renewal_attempts: 3,
            http_timeout: Duration::from_secs(5),
        }
    }
}

impl EventSettings {
    pub fn from_config(config: &Config) -> Self {
        let d = Self::default();
        Self {
            subscription_timeout: secs(config.get_subscription_timeout_secs(), d.subscription_timeout),
            renewal_margin: secs(config.get_renewal_margin_secs(), d.renewal_margin),
            renewal_attempts: config
                .get_renewal_attempts()
                .map(|n| (n as u32).max(1))
                .unwrap_or(d.renewal_attempts),
            http_timeout: ms(config.get_call_timeout_ms(), d.http_timeout),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Attente d'un événement Playing avant d'interroger le renderer
    pub playing_confirmation_timeout: Duration,
    /// Attente du premier octet servi par la nouvelle route d'un changement de chaîne
    pub switch_drain_timeout: Duration,
    /// Fenêtre après nos propres commandes où un Stopped n'est pas un "suivant"
    pub inference_grace: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            playing_confirmation_timeout: Duration::from_millis(15_000),
            switch_drain_timeout: Duration::from_millis(5000),
            inference_grace: Duration::from_millis(3000),
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        let d = Self::default();
        Self {
            playing_confirmation_timeout: ms(
                config.get_playing_confirmation_timeout_ms(),
                d.playing_confirmation_timeout,
            ),
            switch_drain_timeout: ms(config.get_switch_drain_timeout_ms(), d.switch_drain_timeout),
            inference_grace: ms(config.get_inference_grace_ms(), d.inference_grace),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub poll_interval: Duration,
    pub tolerance: Duration,
    /// Relevés ignorés après une correction, le temps que le seek prenne effet
    pub settle_polls: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1500),
            tolerance: Duration::from_millis(2000),
            settle_polls: 2,
        }
    }
}

impl SyncSettings {
    pub fn from_config(config: &Config) -> Self {
        let d = Self::default();
        Self {
            poll_interval: ms(config.get_sync_poll_interval_ms(), d.poll_interval)
                .max(Duration::from_millis(100)),
            tolerance: ms(config.get_sync_tolerance_ms(), d.tolerance),
            settle_polls: config
                .get_sync_settle_polls()
                .map(|n| n as u32)
                .unwrap_or(d.settle_polls),
        }
    }
}
