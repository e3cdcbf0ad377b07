use std::collections::HashMap;
use std::time::Duration;

use castupnp::soap::{
    SOAP_CONTENT_TYPE, SoapEnvelope, build_soap_request, parse_action_response,
    parse_soap_envelope, parse_upnp_error, soap_action_header,
};
use tracing::{debug, trace};

use crate::errors::CastError;

/// Résultat d'un appel SOAP :
/// - code de statut HTTP
/// - corps XML brut (toujours présent)
/// - enveloppe SOAP, si elle a pu être lue
pub struct SoapCallResult {
    pub status: u16,
    pub raw_body: String,
    pub envelope: Option<SoapEnvelope>,
}

/// Convertit une erreur reqwest en erreur de cast pour l'action donnée
pub(crate) fn http_error(action: &str, url: &str, err: reqwest::Error) -> CastError {
    if err.is_timeout() {
        CastError::Timeout(format!("{action} on {url}"))
    } else {
        CastError::DeviceUnreachable(format!("{action} on {url}: {err}"))
    }
}

/// Invoque une action SOAP UPnP sur une URL de contrôle.
///
/// Un HTTP 500 n'est pas une erreur à ce niveau : le corps est lu pour que
/// l'appelant puisse en extraire l'`UPnPError`.
pub async fn invoke_upnp_action(
    client: &reqwest::Client,
    control_url: &str,
    service_type: &str,
    action: &str,
    args: &[(&str, &str)],
    timeout: Duration,
) -> Result<SoapCallResult, CastError> {
    let body_xml = build_soap_request(service_type, action, args)
        .map_err(|e| CastError::protocol(format!("cannot build {action} request: {e}")))?;

    trace!(action, url = control_url, "Sending SOAP request");

    let response = client
        .post(control_url)
        .header("Content-Type", SOAP_CONTENT_TYPE)
        .header("SOAPAction", soap_action_header(service_type, action))
        .timeout(timeout)
        .body(body_xml)
        .send()
        .await
        .map_err(|e| http_error(action, control_url, e))?;

    let status = response.status().as_u16();
    let raw_body = response
        .text()
        .await
        .map_err(|e| http_error(action, control_url, e))?;

    let envelope = parse_soap_envelope(raw_body.as_bytes()).ok();

    Ok(SoapCallResult {
        status,
        raw_body,
        envelope,
    })
}

/// Valeurs de sortie d'une action réussie ; une fault devient
/// `ActionRejected`.
pub fn handle_action_response(
    action: &str,
    call_result: &SoapCallResult,
) -> Result<HashMap<String, String>, CastError> {
    if (200..300).contains(&call_result.status) {
        let envelope = call_result.envelope.as_ref().ok_or_else(|| {
            CastError::protocol(format!("missing SOAP envelope in {action} response"))
        })?;
        return Ok(parse_action_response(envelope, action)?);
    }

    if let Some(err) = call_result.envelope.as_ref().and_then(parse_upnp_error) {
        debug!(
            action,
            code = err.code,
            description = err.description.as_str(),
            "Renderer rejected action"
        );
        return Err(CastError::ActionRejected {
            action: action.to_string(),
            code: err.code,
            description: err.description,
        });
    }

    Err(CastError::protocol(format!(
        "{action} failed with HTTP status {} and body: {}",
        call_result.status,
        call_result.raw_body.chars().take(200).collect::<String>()
    )))
}
