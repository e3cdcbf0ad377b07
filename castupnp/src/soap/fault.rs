//! SOAP Faults UPnP (réponses HTTP 500)

use super::parser::{SoapEnvelope, child_text, find_child_with_suffix};

/// Erreur UPnP retournée dans `<detail><UPnPError>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpnpError {
    /// Code d'erreur UPnP (ex: 401, 714)
    pub code: u32,

    /// Description de l'erreur, vide si absente
    pub description: String,
}

/// Extrait l'erreur UPnP d'une enveloppe de fault.
///
/// Format attendu :
/// `s:Body/s:Fault/detail/UPnPError/{errorCode,errorDescription}`
pub fn parse_upnp_error(envelope: &SoapEnvelope) -> Option<UpnpError> {
    let fault = find_child_with_suffix(&envelope.body.content, "Fault")?;
    let detail = find_child_with_suffix(fault, "detail")?;
    let upnp_error = find_child_with_suffix(detail, "UPnPError")?;

    let code = child_text(upnp_error, "errorCode")?.parse().ok()?;
    let description = child_text(upnp_error, "errorDescription").unwrap_or_default();

    Some(UpnpError { code, description })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soap::parse_soap_envelope;

    #[test]
    fn test_parse_upnp_error() {
        let xml = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <s:Fault>
      <faultcode>s:Client</faultcode>
      <faultstring>UPnPError</faultstring>
      <detail>
        <UPnPError xmlns="urn:schemas-upnp-org:control-1-0">
          <errorCode>714</errorCode>
          <errorDescription>Illegal MIME-type</errorDescription>
        </UPnPError>
      </detail>
    </s:Fault>
  </s:Body>
</s:Envelope>"#;

        let envelope = parse_soap_envelope(xml.as_bytes()).unwrap();
        let err = parse_upnp_error(&envelope).unwrap();
        assert_eq!(err.code, 714);
        assert_eq!(err.description, "Illegal MIME-type");
    }

    #[test]
    fn test_fault_without_detail() {
        let xml = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><s:Fault><faultcode>s:Server</faultcode></s:Fault></s:Body></s:Envelope>"#;
        let envelope = parse_soap_envelope(xml.as_bytes()).unwrap();
        assert_eq!(parse_upnp_error(&envelope), None);
    }
}
