//! Parser des réponses SOAP

use std::collections::HashMap;
use std::io::BufReader;
use xmltree::{Element, XMLNode};

/// Enveloppe SOAP, réduite à son corps
#[derive(Debug, Clone)]
pub struct SoapEnvelope {
    pub body: SoapBody,
}

/// Corps SOAP
#[derive(Debug, Clone)]
pub struct SoapBody {
    /// Contenu XML brut du corps
    pub content: Element,
}

/// Erreur de parsing SOAP
#[derive(Debug, thiserror::Error)]
pub enum SoapParseError {
    #[error("XML parse error: {0}")]
    XmlError(#[from] xmltree::ParseError),

    #[error("Missing SOAP Envelope")]
    MissingEnvelope,

    #[error("Missing SOAP Body")]
    MissingBody,

    #[error("Missing {0} element in SOAP body")]
    MissingResponse(String),
}

/// Parse une enveloppe SOAP complète
pub fn parse_soap_envelope(xml: &[u8]) -> Result<SoapEnvelope, SoapParseError> {
    let root = Element::parse(BufReader::new(xml))?;

    if !root.name.ends_with("Envelope") {
        return Err(SoapParseError::MissingEnvelope);
    }

    let body = find_child_with_suffix(&root, "Body").ok_or(SoapParseError::MissingBody)?;

    Ok(SoapEnvelope {
        body: SoapBody {
            content: body.clone(),
        },
    })
}

/// Extrait les valeurs de sortie de `<u:{action}Response>`.
///
/// Les éléments vides donnent une chaîne vide.
pub fn parse_action_response(
    envelope: &SoapEnvelope,
    action: &str,
) -> Result<HashMap<String, String>, SoapParseError> {
    let response_name = format!("{}Response", action);
    let response = find_child_with_suffix(&envelope.body.content, &response_name)
        .ok_or(SoapParseError::MissingResponse(response_name))?;

    let mut values = HashMap::new();
    for child in &response.children {
        if let XMLNode::Element(elem) = child {
            let value = elem
                .get_text()
                .map(|t| t.trim().to_string())
                .unwrap_or_default();
            values.insert(elem.name.clone(), value);
        }
    }
    Ok(values)
}

/// Premier enfant élément dont le nom (local) se termine par `suffix`
pub fn find_child_with_suffix<'a>(parent: &'a Element, suffix: &str) -> Option<&'a Element> {
    parent.children.iter().find_map(|node| match node {
        XMLNode::Element(elem) if elem.name.ends_with(suffix) => Some(elem),
        _ => None,
    })
}

/// Texte non vide du premier enfant dont le nom se termine par `suffix`
pub fn child_text(parent: &Element, suffix: &str) -> Option<String> {
    find_child_with_suffix(parent, suffix)?
        .get_text()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}
