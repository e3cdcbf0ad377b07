use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::model::{DeviceId, DiscoveredDevice};

/// Résultat d'un `upsert`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// L'adresse a changé (bail DHCP renouvelé)
    AddressChanged,
}

/// Renderers découverts, indexés par identifiant.
///
/// Les entrées silencieuses depuis plus de `expiry` ne sont jamais
/// rendues par `get` / `list`, même avant le passage du balayage.
#[derive(Debug)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<DeviceId, DiscoveredDevice>>,
    expiry: Duration,
}

impl DeviceRegistry {
    pub fn new(expiry: Duration) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            expiry,
        }
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    fn is_fresh(&self, device: &DiscoveredDevice, now: Instant) -> bool {
        now.saturating_duration_since(device.last_seen) <= self.expiry
    }

    /// Insère ou rafraîchit un renderer.
    ///
    /// Adresse, nom et URLs : la dernière écriture gagne. Les types de
    /// services sont fusionnés.
    pub fn upsert(&self, device: DiscoveredDevice) -> UpsertOutcome {
        let mut devices = self.devices.write().unwrap_or_else(|e| e.into_inner());
        match devices.get_mut(&device.id) {
            Some(existing) => {
                let outcome = if existing.address != device.address {
                    info!(
                        device = %device.id,
                        old = %existing.address,
                        new = %device.address,
                        "Renderer address changed"
                    );
                    UpsertOutcome::AddressChanged
                } else {
                    UpsertOutcome::Updated
                };

                existing.address = device.address;
                existing.friendly_name = device.friendly_name;
                existing.location = device.location;
                if device.manufacturer.is_some() {
                    existing.manufacturer = device.manufacturer;
                }
                if device.model_name.is_some() {
                    existing.model_name = device.model_name;
                }
                existing.service_types.extend(device.service_types);
                for endpoint in device.endpoints {
                    match existing
                        .endpoints
                        .iter_mut()
                        .find(|e| e.service_type == endpoint.service_type)
                    {
                        Some(slot) => *slot = endpoint,
                        None => existing.endpoints.push(endpoint),
                    }
                }
                existing.last_seen = existing.last_seen.max(device.last_seen);
                outcome
            }
            None => {
                info!(
                    device = %device.id,
                    name = device.friendly_name.as_str(),
                    address = %device.address,
                    "Renderer discovered"
                );
                devices.insert(device.id.clone(), device);
                UpsertOutcome::Inserted
            }
        }
    }

    /// Rafraîchit `last_seen` sans toucher au reste ; `false` si inconnu.
    pub fn touch(&self, id: &str, seen_at: Instant) -> bool {
        let mut devices = self.devices.write().unwrap_or_else(|e| e.into_inner());
        match devices.get_mut(id) {
            Some(device) => {
                device.last_seen = device.last_seen.max(seen_at);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &str) -> Option<DiscoveredDevice> {
        let removed = self
            .devices
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        if removed.is_some() {
            info!(device = id, "Renderer removed");
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<DiscoveredDevice> {
        let now = Instant::now();
        let devices = self.devices.read().unwrap_or_else(|e| e.into_inner());
        devices
            .get(id)
            .filter(|device| self.is_fresh(device, now))
            .cloned()
    }

    /// Entrée connue, même expirée : sert au cache de description
    pub(crate) fn get_any(&self, id: &str) -> Option<DiscoveredDevice> {
        let devices = self.devices.read().unwrap_or_else(|e| e.into_inner());
        devices.get(id).cloned()
    }

    /// Instantané des renderers non expirés, triés par nom
    pub fn list(&self) -> Vec<DiscoveredDevice> {
        let now = Instant::now();
        let devices = self.devices.read().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<DiscoveredDevice> = devices
            .values()
            .filter(|device| self.is_fresh(device, now))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.friendly_name.cmp(&b.friendly_name));
        list
    }

    /// Supprime les entrées expirées, retourne leurs identifiants
    pub fn purge_expired(&self) -> Vec<DeviceId> {
        let now = Instant::now();
        let mut devices = self.devices.write().unwrap_or_else(|e| e.into_inner());
        let expired: Vec<DeviceId> = devices
            .values()
            .filter(|device| !self.is_fresh(device, now))
            .map(|device| device.id.clone())
            .collect();
        for id in &expired {
            devices.remove(id);
            debug!(device = id.as_str(), "Renderer expired");
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.devices.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::ServiceEndpoint;
    use std::collections::BTreeSet;
    use std::net::{IpAddr, Ipv4Addr};

    pub(crate) fn device(id: &str, ip: [u8; 4], services: &[&str]) -> DiscoveredDevice {
        let address = IpAddr::V4(Ipv4Addr::from(ip));
        DiscoveredDevice {
            id: id.to_string(),
            friendly_name: format!("TV {id}"),
            address,
            location: format!("http://{address}:9197/dmr"),
            manufacturer: None,
            model_name: None,
            service_types: services.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            endpoints: services
                .iter()
                .map(|s| ServiceEndpoint {
                    service_type: s.to_string(),
                    control_url: format!("http://{address}:9197/ctl/{s}"),
                    event_sub_url: Some(format!("http://{address}:9197/evt/{s}")),
                })
                .collect(),
            last_seen: Instant::now(),
        }
    }

    const AVT: &str = "urn:schemas-upnp-org:service:AVTransport:1";
    const RC: &str = "urn:schemas-upnp-org:service:RenderingControl:1";

    #[tokio::test(start_paused = true)]
    async fn test_upsert_merges_services_and_overwrites_address() {
        let registry = DeviceRegistry::new(Duration::from_secs(15));
        assert_eq!(
            registry.upsert(device("uuid:dev-42", [10, 0, 0, 5], &[AVT])),
            UpsertOutcome::Inserted
        );
        assert_eq!(
            registry.upsert(device("uuid:dev-42", [10, 0, 0, 9], &[RC])),
            UpsertOutcome::AddressChanged
        );

        let dev = registry.get("uuid:dev-42").unwrap();
        assert_eq!(dev.address.to_string(), "10.0.0.9");
        assert_eq!(dev.service_types.len(), 2);
        assert!(dev.avtransport().is_some());
        assert!(dev.rendering_control().is_some());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_devices_are_never_listed() {
        let registry = DeviceRegistry::new(Duration::from_secs(15));
        registry.upsert(device("uuid:a", [10, 0, 0, 1], &[AVT]));
        tokio::time::advance(Duration::from_secs(10)).await;
        registry.upsert(device("uuid:b", [10, 0, 0, 2], &[AVT]));

        tokio::time::advance(Duration::from_secs(6)).await;
        // a: 16 s de silence, b: 6 s
        let listed: Vec<String> = registry.list().into_iter().map(|d| d.id).collect();
        assert_eq!(listed, vec!["uuid:b".to_string()]);
        assert!(registry.get("uuid:a").is_none());
        assert!(registry.get_any("uuid:a").is_some());

        assert_eq!(registry.purge_expired(), vec!["uuid:a".to_string()]);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_keeps_device_alive() {
        let registry = DeviceRegistry::new(Duration::from_secs(15));
        registry.upsert(device("uuid:a", [10, 0, 0, 1], &[AVT]));
        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(10)).await;
            assert!(registry.touch("uuid:a", Instant::now()));
        }
        assert!(registry.get("uuid:a").is_some());
        assert!(!registry.touch("uuid:unknown", Instant::now()));
        assert!(registry.remove("uuid:a").is_some());
        assert!(registry.is_empty());
    }
}
