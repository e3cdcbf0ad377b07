use std::collections::HashMap;
use std::time::Duration;

use crate::errors::CastError;
use crate::soap_client::{handle_action_response, invoke_upnp_action};

const INSTANCE_ID: &str = "0";
const MASTER: &str = "Master";

#[derive(Debug, Clone)]
pub struct RenderingControlClient {
    client: reqwest::Client,
    pub control_url: String,
    pub service_type: String,
    pub call_timeout: Duration,
}

impl RenderingControlClient {
    pub fn new(
        client: reqwest::Client,
        control_url: String,
        service_type: String,
        call_timeout: Duration,
    ) -> Self {
        Self {
            client,
            control_url,
            service_type,
            call_timeout,
        }
    }

    async fn call(
        &self,
        action: &str,
        args: &[(&str, &str)],
    ) -> Result<HashMap<String, String>, CastError> {
        let call_result = invoke_upnp_action(
            &self.client,
            &self.control_url,
            &self.service_type,
            action,
            args,
            self.call_timeout,
        )
        .await?;
        handle_action_response(action, &call_result)
    }

    /// RenderingControl:1 `GetVolume`
    pub async fn get_volume(&self) -> Result<u16, CastError> {
        let values = self
            .call("GetVolume", &[("InstanceID", INSTANCE_ID), ("Channel", MASTER)])
            .await?;
        parse_volume(&values)
    }

    /// RenderingControl:1 `SetVolume`
    pub async fn set_volume(&self, volume: u16) -> Result<(), CastError> {
        let volume_str = volume.min(100).to_string();
        let args = [
            ("InstanceID", INSTANCE_ID),
            ("Channel", MASTER),
            ("DesiredVolume", volume_str.as_str()),
        ];
        self.call("SetVolume", &args).await.map(|_| ())
    }

    /// RenderingControl:1 `GetMute`
    pub async fn get_mute(&self) -> Result<bool, CastError> {
        let values = self
            .call("GetMute", &[("InstanceID", INSTANCE_ID), ("Channel", MASTER)])
            .await?;
        parse_mute(&values)
    }

    /// RenderingControl:1 `SetMute`
    pub async fn set_mute(&self, mute: bool) -> Result<(), CastError> {
        let args = [
            ("InstanceID", INSTANCE_ID),
            ("Channel", MASTER),
            ("DesiredMute", if mute { "1" } else { "0" }),
        ];
        self.call("SetMute", &args).await.map(|_| ())
    }
}

fn parse_volume(values: &HashMap<String, String>) -> Result<u16, CastError> {
    let text = values
        .get("CurrentVolume")
        .ok_or_else(|| CastError::protocol("Missing CurrentVolume element in SOAP body"))?;
    text.parse::<u16>()
        .map_err(|_| CastError::protocol(format!("Invalid CurrentVolume value: {text}")))
}

/// `0`/`1` ou `false`/`true`, selon les firmwares
pub(crate) fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "0" | "false" | "no" => Some(false),
        "1" | "true" | "yes" => Some(true),
        _ => None,
    }
}

fn parse_mute(values: &HashMap<String, String>) -> Result<bool, CastError> {
    let text = values
        .get("CurrentMute")
        .ok_or_else(|| CastError::protocol("Missing CurrentMute element in SOAP body"))?;
    parse_bool(text).ok_or_else(|| CastError::protocol(format!("Invalid CurrentMute value: {text}")))
}
