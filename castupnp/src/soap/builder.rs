//! Construction des requêtes SOAP

use super::{SOAP_ENCODING_STYLE, SOAP_ENVELOPE_NS};
use xmltree::{Element, XMLNode};

/// Erreur de construction d'une enveloppe SOAP
#[derive(Debug, thiserror::Error)]
pub enum SoapBuildError {
    #[error("XML write error: {0}")]
    Xml(#[from] xmltree::Error),

    #[error("Invalid UTF-8 in generated XML: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

fn build_soap_envelope_with_body(body_child: Element) -> Result<String, SoapBuildError> {
    let mut body = Element::new("s:Body");
    body.children.push(XMLNode::Element(body_child));

    let mut envelope = Element::new("s:Envelope");
    envelope
        .attributes
        .insert("xmlns:s".to_string(), SOAP_ENVELOPE_NS.to_string());
    envelope
        .attributes
        .insert("s:encodingStyle".to_string(), SOAP_ENCODING_STYLE.to_string());
    envelope.children.push(XMLNode::Element(body));

    let mut buf = Vec::new();
    let config = xmltree::EmitterConfig::new()
        .write_document_declaration(true)
        .perform_indent(false);
    envelope.write_with_config(&mut buf, config)?;

    Ok(String::from_utf8(buf)?)
}

/// Construit une requête SOAP UPnP.
///
/// Les arguments sont émis dans l'ordre donné : les firmwares TV sont
/// sensibles à l'ordre déclaré dans le SCPD.
///
/// # Arguments
///
/// * `service_urn` - URN du service (ex: "urn:schemas-upnp-org:service:AVTransport:1")
/// * `action` - Nom de l'action (ex: "SetAVTransportURI")
/// * `args` - Paires (nom, valeur), valeurs non échappées
pub fn build_soap_request(
    service_urn: &str,
    action: &str,
    args: &[(&str, &str)],
) -> Result<String, SoapBuildError> {
    let mut request_elem = Element::new(&format!("u:{}", action));
    request_elem
        .attributes
        .insert("xmlns:u".to_string(), service_urn.to_string());

    for (name, value) in args {
        let mut child = Element::new(name);
        child.children.push(XMLNode::Text((*value).to_string()));
        request_elem.children.push(XMLNode::Element(child));
    }

    build_soap_envelope_with_body(request_elem)
}

/// Valeur de l'en-tête `SOAPAction` : `"urn#Action"`, guillemets compris
pub fn soap_action_header(service_urn: &str, action: &str) -> String {
    format!(r#""{}#{}""#, service_urn, action)
}
