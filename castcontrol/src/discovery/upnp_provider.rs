use std::collections::BTreeSet;
use std::net::IpAddr;
use std::time::Duration;

use castupnp::description::{DeviceDescription, parse_device_description};
use castutils::{parse_host_port, resolve_url};
use tokio::time::Instant;
use tracing::debug;

use crate::errors::CastError;
use crate::model::{DiscoveredDevice, ServiceEndpoint};
use crate::soap_client::http_error;

/// Récupère et interprète la description (`LOCATION`) d'un renderer.
#[derive(Debug, Clone)]
pub struct DescriptionProvider {
    client: reqwest::Client,
    timeout: Duration,
}

impl DescriptionProvider {
    pub fn new(timeout: Duration) -> Result<Self, CastError> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| CastError::protocol(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client, timeout })
    }

    /// GET + parse du `description.xml`
    pub async fn fetch(&self, location: &str) -> Result<DeviceDescription, CastError> {
        debug!(location, "Fetching device description");
        let response = self
            .client
            .get(location)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| http_error("description", location, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CastError::protocol(format!(
                "description at {location} answered HTTP {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| http_error("description", location, e))?;
        parse_device_description(&body)
            .map_err(|e| CastError::protocol(format!("description at {location}: {e}")))
    }

    /// Construit le renderer décrit à `location`.
    ///
    /// `id` (tiré de l'USN) prime sur l'UDN de la description ; `address`
    /// est l'émetteur SSDP, à défaut l'hôte de `location`.
    pub async fn build_renderer(
        &self,
        location: &str,
        id: Option<&str>,
        address: Option<IpAddr>,
    ) -> Result<DiscoveredDevice, CastError> {
        let description = self.fetch(location).await?;
        let address = match address {
            Some(address) => address,
            None => resolve_host(location).await?,
        };
        renderer_from_description(&description, location, id, address)
    }
}

async fn resolve_host(location: &str) -> Result<IpAddr, CastError> {
    let (host, port) = parse_host_port(location)
        .ok_or_else(|| CastError::protocol(format!("invalid description URL {location}")))?;
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|e| CastError::device_unreachable(format!("cannot resolve {host}: {e}")))?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| CastError::device_unreachable(format!("no address for {host}")))
}

/// Convertit une description en `DiscoveredDevice`, URLs résolues.
///
/// Échoue si le device n'est pas un MediaRenderer ou n'a pas d'identité.
pub(crate) fn renderer_from_description(
    description: &DeviceDescription,
    location: &str,
    id: Option<&str>,
    address: IpAddr,
) -> Result<DiscoveredDevice, CastError> {
    if !description.is_media_renderer() {
        return Err(CastError::protocol(format!(
            "{location} does not describe a MediaRenderer"
        )));
    }

    let id = id
        .map(str::to_string)
        .or_else(|| description.udn.as_ref().map(|udn| udn.trim().to_ascii_lowercase()))
        .filter(|id| !id.is_empty())
        .ok_or_else(|| CastError::protocol(format!("{location} has no UDN")))?;

    let base = description
        .url_base
        .as_deref()
        .filter(|base| !base.trim().is_empty())
        .unwrap_or(location);

    let endpoints: Vec<ServiceEndpoint> = description
        .services
        .iter()
        .map(|service| ServiceEndpoint {
            service_type: service.service_type.clone(),
            control_url: resolve_url(base, &service.control_url),
            event_sub_url: service
                .event_sub_url
                .as_deref()
                .filter(|url| !url.trim().is_empty())
                .map(|url| resolve_url(base, url)),
        })
        .collect();
    let service_types: BTreeSet<String> =
        endpoints.iter().map(|e| e.service_type.clone()).collect();

    Ok(DiscoveredDevice {
        friendly_name: description
            .friendly_name
            .clone()
            .unwrap_or_else(|| id.clone()),
        id,
        address,
        location: location.to_string(),
        manufacturer: description.manufacturer.clone(),
        model_name: description.model_name.clone(),
        service_types,
        endpoints,
        last_seen: Instant::now(),
    })
}
