//! Contrôle d'un renderer : intentions de lecture traduites en actions UPnP.
//!
//! Les appels d'un même client sont sérialisés : jamais deux actions en vol
//! en même temps vers le renderer. Les lectures d'état sont réessayées sur
//! `Timeout` ; les commandes (`play`, `set_source`...) ne le sont jamais ici,
//! c'est le contrôleur de session qui décide.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use castupnp::didl::build_video_broadcast_metadata;
use castupnp::soap::error_codes;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::avtransport_client::{AvTransportClient, PositionInfo};
use crate::errors::CastError;
use crate::model::{DiscoveredDevice, TransportState};
use crate::rendering_control_client::RenderingControlClient;
use crate::settings::ControlSettings;

/// Commandes de lecture d'un renderer
#[async_trait]
pub trait RendererControl: Send + Sync {
    /// `SetAVTransportURI` avec les métadonnées DIDL-Lite de la chaîne
    async fn set_source(&self, uri: &str, title: &str) -> Result<(), CastError>;
    /// `SetNextAVTransportURI`, pour les renderers qui pré-chargent
    async fn set_next_source(&self, uri: &str, title: &str) -> Result<(), CastError>;
    async fn play(&self) -> Result<(), CastError>;
    async fn pause(&self) -> Result<(), CastError>;
    async fn stop(&self) -> Result<(), CastError>;
    async fn seek(&self, position: Duration) -> Result<(), CastError>;
    async fn set_volume(&self, level: u16) -> Result<(), CastError>;
    async fn set_mute(&self, mute: bool) -> Result<(), CastError>;
    async fn volume(&self) -> Result<u16, CastError>;
    async fn mute(&self) -> Result<bool, CastError>;
    async fn transport_state(&self) -> Result<TransportState, CastError>;
    async fn position(&self) -> Result<PositionInfo, CastError>;
}

/// Construit le client de contrôle d'un renderer choisi
pub trait ControlFactory: Send + Sync {
    fn connect(&self, device: &DiscoveredDevice) -> Result<Arc<dyn RendererControl>, CastError>;
}

/// Réessaie une lecture d'état sur `Timeout`, avec un délai croissant.
pub(crate) async fn retry_query<T, F, Fut>(
    settings: &ControlSettings,
    action: &str,
    mut call: F,
) -> Result<T, CastError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CastError>>,
{
    let mut attempt = 0u32;
    loop {
        match call().await {
            Err(CastError::Timeout(_)) if attempt < settings.query_retries => {
                attempt += 1;
                debug!(action, attempt, "Query timed out, retrying");
                tokio::time::sleep(settings.retry_backoff * attempt).await;
            }
            other => return other,
        }
    }
}

/// Client UPnP (AVTransport + RenderingControl) d'un renderer
pub struct UpnpControlClient {
    device_id: String,
    avtransport: AvTransportClient,
    rendering: Option<RenderingControlClient>,
    settings: ControlSettings,
    in_flight: Mutex<()>,
}

impl UpnpControlClient {
    pub fn for_device(
        device: &DiscoveredDevice,
        client: reqwest::Client,
        settings: ControlSettings,
    ) -> Result<Self, CastError> {
        let avt = device.avtransport().ok_or_else(|| {
            CastError::protocol(format!("{} exposes no AVTransport service", device.id))
        })?;
        let avtransport = AvTransportClient::new(
            client.clone(),
            avt.control_url.clone(),
            avt.service_type.clone(),
            settings.call_timeout,
        );
        let rendering = device.rendering_control().map(|rc| {
            RenderingControlClient::new(
                client,
                rc.control_url.clone(),
                rc.service_type.clone(),
                settings.call_timeout,
            )
        });
        if rendering.is_none() {
            warn!(device = %device.id, "Renderer has no RenderingControl service, volume disabled");
        }

        Ok(Self {
            device_id: device.id.clone(),
            avtransport,
            rendering,
            settings,
            in_flight: Mutex::new(()),
        })
    }

    fn rendering(&self, action: &str) -> Result<&RenderingControlClient, CastError> {
        self.rendering.as_ref().ok_or_else(|| CastError::ActionRejected {
            action: action.to_string(),
            code: error_codes::INVALID_ACTION,
            description: "RenderingControl service not available".to_string(),
        })
    }

    async fn mutate<T, Fut>(&self, action: &str, call: Fut) -> Result<T, CastError>
    where
        Fut: Future<Output = Result<T, CastError>>,
    {
        let _guard = self.in_flight.lock().await;
        debug!(device = %self.device_id, action, "Control action");
        call.await.inspect_err(|e| {
            warn!(device = %self.device_id, action, error = %e, "Control action failed");
        })
    }

    async fn query<T, F, Fut>(&self, action: &str, call: F) -> Result<T, CastError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CastError>>,
    {
        let in_flight = &self.in_flight;
        let call = &call;
        retry_query(&self.settings, action, move || async move {
            let _guard = in_flight.lock().await;
            call().await
        })
        .await
    }
}

#[async_trait]
impl RendererControl for UpnpControlClient {
    async fn set_source(&self, uri: &str, title: &str) -> Result<(), CastError> {
        let metadata = build_video_broadcast_metadata(uri, title);
        self.mutate(
            "SetAVTransportURI",
            self.avtransport.set_av_transport_uri(uri, &metadata),
        )
        .await
    }

    async fn set_next_source(&self, uri: &str, title: &str) -> Result<(), CastError> {
        let metadata = build_video_broadcast_metadata(uri, title);
        self.mutate(
            "SetNextAVTransportURI",
            self.avtransport.set_next_av_transport_uri(uri, &metadata),
        )
        .await
    }

    async fn play(&self) -> Result<(), CastError> {
        self.mutate("Play", self.avtransport.play()).await
    }

    async fn pause(&self) -> Result<(), CastError> {
        self.mutate("Pause", self.avtransport.pause()).await
    }

    async fn stop(&self) -> Result<(), CastError> {
        self.mutate("Stop", self.avtransport.stop()).await
    }

    async fn seek(&self, position: Duration) -> Result<(), CastError> {
        self.mutate("Seek", self.avtransport.seek(position)).await
    }

    async fn set_volume(&self, level: u16) -> Result<(), CastError> {
        let rendering = self.rendering("SetVolume")?;
        self.mutate("SetVolume", rendering.set_volume(level)).await
    }

    async fn set_mute(&self, mute: bool) -> Result<(), CastError> {
        let rendering = self.rendering("SetMute")?;
        self.mutate("SetMute", rendering.set_mute(mute)).await
    }

    async fn volume(&self) -> Result<u16, CastError> {
        let rendering = self.rendering("GetVolume")?;
        self.query("GetVolume", move || rendering.get_volume()).await
    }

    async fn mute(&self) -> Result<bool, CastError> {
        let rendering = self.rendering("GetMute")?;
        self.query("GetMute", move || rendering.get_mute()).await
    }

    async fn transport_state(&self) -> Result<TransportState, CastError> {
        let info = self
            .query("GetTransportInfo", move || self.avtransport.get_transport_info())
            .await?;
        TransportState::from_upnp(&info.current_transport_state).ok_or_else(|| {
            CastError::protocol(format!(
                "unknown transport state {}",
                info.current_transport_state
            ))
        })
    }

    async fn position(&self) -> Result<PositionInfo, CastError> {
        self.query("GetPositionInfo", move || self.avtransport.get_position_info())
            .await
    }
}

/// Fabrique de clients UPnP partageant un même client HTTP
pub struct UpnpControlFactory {
    client: reqwest::Client,
    settings: ControlSettings,
}

impl UpnpControlFactory {
    pub fn new(settings: ControlSettings) -> Result<Self, CastError> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .connect_timeout(settings.call_timeout)
            .build()
            .map_err(|e| CastError::protocol(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client, settings })
    }
}

impl ControlFactory for UpnpControlFactory {
    fn connect(&self, device: &DiscoveredDevice) -> Result<Arc<dyn RendererControl>, CastError> {
        let client = UpnpControlClient::for_device(device, self.client.clone(), self.settings.clone())?;
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn settings() -> ControlSettings {
        ControlSettings {
            query_retries: 2,
            retry_backoff: Duration::from_millis(100),
            ..ControlSettings::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_retried_on_timeout() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result = retry_query(&settings(), "GetTransportInfo", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CastError::Timeout("GetTransportInfo".into()))
            } else {
                Ok(TransportState::Playing)
            }
        })
        .await;
        assert_eq!(result, Ok(TransportState::Playing));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_gives_up_after_retries() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<(), CastError> = retry_query(&settings(), "GetVolume", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CastError::Timeout("GetVolume".into()))
        })
        .await;
        assert!(matches!(result, Err(CastError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_not_retried_on_rejection() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<(), CastError> = retry_query(&settings(), "GetMute", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CastError::device_unreachable("refused"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_factory_requires_avtransport() {
        let factory = UpnpControlFactory::new(ControlSettings::default()).unwrap();
        let mut device = crate::registry::tests::device(
            "uuid:rc-only",
            [10, 0, 0, 3],
            &["urn:schemas-upnp-org:service:RenderingControl:1"],
        );
        assert!(factory.connect(&device).is_err());

        device.endpoints.push(crate::model::ServiceEndpoint {
            service_type: "urn:schemas-upnp-org:service:AVTransport:1".into(),
            control_url: "http://10.0.0.3/avt".into(),
            event_sub_url: None,
        });
        assert!(factory.connect(&device).is_ok());
    }
}
