//! GENA : en-têtes d'abonnement et corps des NOTIFY.
//!
//! Un NOTIFY AVTransport/RenderingControl transporte un `e:propertyset`
//! dont la propriété `LastChange` contient un document `<Event>` échappé :
//!
//! ```xml
//! <Event xmlns="urn:schemas-upnp-org:metadata-1-0/AVT/">
//!   <InstanceID val="0">
//!     <TransportState val="PLAYING"/>
//!     <CurrentTrack val="2"/>
//!   </InstanceID>
//! </Event>
//! ```

use std::collections::HashMap;
use std::io::Cursor;
use std::time::Duration;
use xmltree::{Element, XMLNode};

/// Valeur de l'en-tête NT des abonnements et notifications
pub const NT_UPNP_EVENT: &str = "upnp:event";

/// Valeur de l'en-tête NTS des notifications
pub const NTS_PROPCHANGE: &str = "upnp:propchange";

/// Erreur de parsing d'un corps NOTIFY
#[derive(Debug, thiserror::Error)]
pub enum NotifyParseError {
    #[error("XML parse error: {0}")]
    Xml(#[from] xmltree::ParseError),

    #[error("Missing propertyset root element")]
    MissingPropertySet,

    #[error("Missing InstanceID in LastChange event")]
    MissingInstance,
}

/// Helper to iterate over XML element children (filters out non-element nodes)
fn xml_children(element: &Element) -> impl Iterator<Item = &Element> {
    element.children.iter().filter_map(|node| match node {
        XMLNode::Element(elem) => Some(elem),
        _ => None,
    })
}

/// Propriétés d'un `e:propertyset`, dans l'ordre du document
pub fn parse_property_set(body: &[u8]) -> Result<Vec<(String, String)>, NotifyParseError> {
    let root = Element::parse(Cursor::new(body))?;
    if !root.name.ends_with("propertyset") {
        return Err(NotifyParseError::MissingPropertySet);
    }

    let mut properties = Vec::new();
    for property in xml_children(&root) {
        for child in xml_children(property) {
            let value = child
                .get_text()
                .map(|t| t.into_owned())
                .unwrap_or_default();
            properties.push((child.name.clone(), value));
        }
    }
    Ok(properties)
}

/// Variables de l'instance 0 d'un document `LastChange`.
///
/// Pour les variables multi-canal (`Volume`, `Mute`), seule la valeur du
/// canal `Master` (ou sans canal) est retenue.
pub fn parse_last_change(raw: &str) -> Result<HashMap<String, String>, NotifyParseError> {
    let root = Element::parse(Cursor::new(raw.trim().as_bytes()))?;

    let mut instances = xml_children(&root).filter(|e| e.name == "InstanceID");
    let first = instances.next().ok_or(NotifyParseError::MissingInstance)?;
    let instance = std::iter::once(first)
        .chain(instances)
        .find(|e| e.attributes.get("val").map(String::as_str) == Some("0"))
        .unwrap_or(first);

    let mut values = HashMap::new();
    for var in xml_children(instance) {
        let Some(val) = var.attributes.get("val") else {
            continue;
        };
        match var.attributes.get("channel").map(String::as_str) {
            None | Some("Master") => {
                values.insert(var.name.clone(), val.clone());
            }
            Some(_) => {}
        }
    }
    Ok(values)
}

/// Corps NOTIFY complet : propriétés directes plus le contenu de `LastChange`
/// aplati dans la même table.
pub fn parse_notify_body(body: &[u8]) -> Result<HashMap<String, String>, NotifyParseError> {
    let mut values = HashMap::new();
    for (name, value) in parse_property_set(body)? {
        if name == "LastChange" {
            if value.trim().is_empty() {
                continue;
            }
            values.extend(parse_last_change(&value)?);
        } else {
            values.insert(name, value);
        }
    }
    Ok(values)
}

/// En-tête `TIMEOUT` d'une demande d'abonnement
pub fn timeout_header(duration: Duration) -> String {
    format!("Second-{}", duration.as_secs())
}

/// Parse l'en-tête `TIMEOUT` d'une réponse SUBSCRIBE.
///
/// `Second-infinite` est ramené à `infinite_as` : on renouvelle quand même.
pub fn parse_timeout(raw: Option<&str>, infinite_as: Duration) -> Option<Duration> {
    let lower = raw?.trim().to_ascii_lowercase();
    if lower == "second-infinite" || lower == "infinite" {
        return Some(infinite_as);
    }
    let idx = lower.find("second-")?;
    lower[idx + 7..].trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Parse l'en-tête `SEQ` d'un NOTIFY
pub fn parse_seq(raw: Option<&str>) -> Option<u32> {
    raw?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTIFY_BODY: &str = r#"<?xml version="1.0"?>
<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
  <e:property>
    <LastChange>&lt;Event xmlns="urn:schemas-upnp-org:metadata-1-0/AVT/"&gt;&lt;InstanceID val="0"&gt;&lt;TransportState val="PLAYING"/&gt;&lt;CurrentTrack val="3"/&gt;&lt;RelativeTimePosition val="00:00:12"/&gt;&lt;/InstanceID&gt;&lt;/Event&gt;</LastChange>
  </e:property>
</e:propertyset>"#;

    #[test]
    fn test_parse_notify_with_last_change() {
        let values = parse_notify_body(NOTIFY_BODY.as_bytes()).unwrap();
        assert_eq!(values.get("TransportState").unwrap(), "PLAYING");
        assert_eq!(values.get("CurrentTrack").unwrap(), "3");
        assert_eq!(values.get("RelativeTimePosition").unwrap(), "00:00:12");
        assert!(!values.contains_key("LastChange"));
    }

    #[test]
    fn test_last_change_keeps_master_channel() {
        let raw = r#"<Event xmlns="urn:schemas-upnp-org:metadata-1-0/RCS/">
  <InstanceID val="0">
    <Volume channel="LF" val="10"/>
    <Volume channel="Master" val="35"/>
    <Mute channel="Master" val="0"/>
  </InstanceID>
</Event>"#;
        let values = parse_last_change(raw).unwrap();
        assert_eq!(values.get("Volume").unwrap(), "35");
        assert_eq!(values.get("Mute").unwrap(), "0");
    }

    #[test]
    fn test_last_change_without_instance() {
        assert!(matches!(
            parse_last_change("<Event/>"),
            Err(NotifyParseError::MissingInstance)
        ));
    }

    #[test]
    fn test_plain_properties() {
        let body = r#"<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0"><e:property><Volume>20</Volume></e:property></e:propertyset>"#;
        let values = parse_notify_body(body.as_bytes()).unwrap();
        assert_eq!(values.get("Volume").unwrap(), "20");
        assert!(parse_notify_body(b"<other/>").is_err());
    }

    #[test]
    fn test_parse_timeout() {
        let infinite = Duration::from_secs(300);
        assert_eq!(
            parse_timeout(Some("Second-1800"), infinite),
            Some(Duration::from_secs(1800))
        );
        assert_eq!(parse_timeout(Some("second-infinite"), infinite), Some(infinite));
        assert_eq!(parse_timeout(Some("bogus"), infinite), None);
        assert_eq!(parse_timeout(None, infinite), None);
        assert_eq!(timeout_header(Duration::from_secs(300)), "Second-300");
    }

    #[test]
    fn test_parse_seq() {
        assert_eq!(parse_seq(Some(" 7 ")), Some(7));
        assert_eq!(parse_seq(Some("x")), None);
        assert_eq!(parse_seq(None), None);
    }
}
