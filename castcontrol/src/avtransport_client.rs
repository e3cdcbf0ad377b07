use std::collections::HashMap;
use std::time::Duration;

use crate::errors::CastError;
use crate::soap_client::{handle_action_response, invoke_upnp_action};
use crate::time_utils::{format_upnp_time, parse_upnp_time};

const INSTANCE_ID: &str = "0";

#[derive(Debug, Clone)]
pub struct AvTransportClient {
    client: reqwest::Client,
    pub control_url: String,
    pub service_type: String,
    pub call_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportInfo {
    pub current_transport_state: String,
    pub current_transport_status: String,
    pub current_speed: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionInfo {
    pub track: Option<u32>,
    pub track_duration: Option<Duration>,
    pub track_uri: Option<String>,
    pub rel_time: Option<Duration>,
}

impl AvTransportClient {
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

    /// AVTransport:1 `SetAVTransportURI`
    pub async fn set_av_transport_uri(&self, uri: &str, metadata: &str) -> Result<(), CastError> {
        let args = [
            ("InstanceID", INSTANCE_ID),
            ("CurrentURI", uri),
            ("CurrentURIMetaData", metadata),
        ];
        self.call("SetAVTransportURI", &args).await.map(|_| ())
    }

    /// AVTransport:1 `SetNextAVTransportURI`
    pub async fn set_next_av_transport_uri(
        &self,
        uri: &str,
        metadata: &str,
    ) -> Result<(), CastError> {
        let args = [
            ("InstanceID", INSTANCE_ID),
            ("NextURI", uri),
            ("NextURIMetaData", metadata),
        ];
        self.call("SetNextAVTransportURI", &args).await.map(|_| ())
    }

    pub async fn play(&self) -> Result<(), CastError> {
        let args = [("InstanceID", INSTANCE_ID), ("Speed", "1")];
        self.call("Play", &args).await.map(|_| ())
    }

    pub async fn pause(&self) -> Result<(), CastError> {
        self.call("Pause", &[("InstanceID", INSTANCE_ID)])
            .await
            .map(|_| ())
    }

    pub async fn stop(&self) -> Result<(), CastError> {
        self.call("Stop", &[("InstanceID", INSTANCE_ID)])
            .await
            .map(|_| ())
    }

    /// Seek en temps relatif (`REL_TIME`, cible `HH:MM:SS`)
    pub async fn seek(&self, position: Duration) -> Result<(), CastError> {
        let target = format_upnp_time(position);
        let args = [
            ("InstanceID", INSTANCE_ID),
            ("Unit", "REL_TIME"),
            ("Target", target.as_str()),
        ];
        self.call("Seek", &args).await.map(|_| ())
    }

    pub async fn get_transport_info(&self) -> Result<TransportInfo, CastError> {
        let values = self
            .call("GetTransportInfo", &[("InstanceID", INSTANCE_ID)])
            .await?;
        parse_transport_info(&values)
    }

    pub async fn get_position_info(&self) -> Result<PositionInfo, CastError> {
        let values = self
            .call("GetPositionInfo", &[("InstanceID", INSTANCE_ID)])
            .await?;
        Ok(parse_position_info(&values))
    }
}

fn parse_transport_info(values: &HashMap<String, String>) -> Result<TransportInfo, CastError> {
    let current_transport_state = values
        .get("CurrentTransportState")
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| {
            CastError::protocol("Missing CurrentTransportState element in GetTransportInfoResponse")
        })?;

    Ok(TransportInfo {
        current_transport_state,
        current_transport_status: values
            .get("CurrentTransportStatus")
            .cloned()
            .unwrap_or_else(|| "OK".to_string()),
        current_speed: values
            .get("CurrentSpeed")
            .cloned()
            .unwrap_or_else(|| "1".to_string()),
    })
}

fn parse_position_info(values: &HashMap<String, String>) -> PositionInfo {
    PositionInfo {
        track: values.get("Track").and_then(|v| v.parse().ok()),
        track_duration: values.get("TrackDuration").and_then(|v| parse_upnp_time(v)),
        track_uri: values.get("TrackURI").filter(|v| !v.is_empty()).cloned(),
        rel_time: values.get("RelTime").and_then(|v| parse_upnp_time(v)),
    }
}
