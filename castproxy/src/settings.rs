use castconfig::Config;
use std::time::Duration;

/// Réglages du proxy de flux
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Adresse d'écoute (ex: `0.0.0.0`)
    pub bind_address: String,
    /// Port d'écoute, 0 pour un port éphémère
    pub http_port: u16,
    /// Hôte annoncé dans les URLs de route ; vide = IP locale vue du renderer
    pub advertised_host: String,
    /// Délai maximal d'établissement de la connexion amont
    pub upstream_connect_timeout: Duration,
    /// Taille maximale des morceaux envoyés au renderer
    pub chunk_size: usize,
    /// Débit maximal par réponse en Kio/s, 0 = illimité
    pub bandwidth_limit_kbps: u64,
    /// Délai laissé aux transferts en cours après destruction de la route
    pub drain_grace: Duration,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: 0,
            advertised_host: String::new(),
            upstream_connect_timeout: Duration::from_millis(10_000),
            chunk_size: 65_536,
            bandwidth_limit_kbps: 0,
            drain_grace: Duration::from_millis(2000),
        }
    }
}

impl ProxySettings {
    pub fn from_config(config: &Config) -> Self {
        let defaults = Self::default();
        // Lu brut : l'adresse devinée dépend du renderer visé
        let advertised_host = config
            .get_proxy_advertised_host_raw()
            .map(|host| host.trim().to_string())
            .unwrap_or_default();
        Self {
            bind_address: config
                .get_proxy_bind_address()
                .unwrap_or(defaults.bind_address),
            http_port: config.get_proxy_http_port(),
            advertised_host,
            upstream_connect_timeout: config
                .get_upstream_connect_timeout_ms()
                .map(Duration::from_millis)
                .unwrap_or(defaults.upstream_connect_timeout),
            chunk_size: config
                .get_proxy_chunk_size()
                .ok()
                .filter(|size| *size > 0)
                .unwrap_or(defaults.chunk_size),
            bandwidth_limit_kbps: config
                .get_bandwidth_limit_kbps()
                .unwrap_or(defaults.bandwidth_limit_kbps),
            drain_grace: config
                .get_drain_grace_ms()
                .map(Duration::from_millis)
                .unwrap_or(defaults.drain_grace),
        }
    }

    /// Taille de morceau effective : plus petite quand le débit est limité,
    /// pour lisser l'allure (4 à 32 Kio, un quart de seconde de débit).
    pub fn effective_chunk_size(&self) -> usize {
        if self.bandwidth_limit_kbps == 0 {
            return self.chunk_size;
        }
        let quarter_second = (self.bandwidth_limit_kbps as usize * 1024) / 4;
        quarter_second.clamp(4096, 32 * 1024).min(self.chunk_size.max(4096))
    }
}
