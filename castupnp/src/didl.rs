//! Métadonnées DIDL-Lite pour `SetAVTransportURI`.
//!
//! Les TV (Samsung en particulier) refusent souvent un `CurrentURIMetaData`
//! vide : on décrit le flux comme un `videoBroadcast` avec un `protocolInfo`
//! déduit de l'extension de l'URL.

use castutils::url_extension;
use xmltree::{Element, EmitterConfig, XMLNode};

const DIDL_NS: &str = "urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/";
const DC_NS: &str = "http://purl.org/dc/elements/1.1/";
const UPNP_NS: &str = "urn:schemas-upnp-org:metadata-1-0/upnp/";

/// Classe UPnP d'une chaîne live
pub const VIDEO_BROADCAST_CLASS: &str = "object.item.videoItem.videoBroadcast";

const DLNA_STREAMING_FLAGS: &str = "DLNA.ORG_OP=01;DLNA.ORG_FLAGS=01700000000000000000000000000000";

/// `protocolInfo` à annoncer pour une URL de flux.
///
/// | extension | protocolInfo |
/// |-----------|--------------|
/// | `.m3u8`   | `http-get:*:application/x-mpegURL:*` |
/// | `.ts`     | `http-get:*:video/MP2T:<flags DLNA>` |
/// | `.mp4`    | `http-get:*:video/mp4:<flags DLNA>` |
/// | autre     | `http-get:*:video/MP2T:*` |
pub fn protocol_info_for(url: &str) -> String {
    match url_extension(url).as_deref() {
        Some("m3u8") => "http-get:*:application/x-mpegURL:*".to_string(),
        Some("ts") => format!("http-get:*:video/MP2T:{}", DLNA_STREAMING_FLAGS),
        Some("mp4") => format!("http-get:*:video/mp4:{}", DLNA_STREAMING_FLAGS),
        _ => "http-get:*:video/MP2T:*".to_string(),
    }
}

/// `contentFeatures.dlna.org` cohérent avec [`protocol_info_for`]
/// (quatrième champ du protocolInfo).
pub fn content_features_for(url: &str) -> String {
    let info = protocol_info_for(url);
    match info.rsplit(':').next() {
        Some(features) if features != "*" => features.to_string(),
        _ => "DLNA.ORG_OP=00;DLNA.ORG_CI=0".to_string(),
    }
}

fn text_element(name: &str, text: &str) -> Element {
    let mut elem = Element::new(name);
    elem.children.push(XMLNode::Text(text.to_string()));
    elem
}

/// Construit le document DIDL-Lite d'une chaîne live.
///
/// Le document n'est pas échappé : l'échappement est fait par le builder
/// SOAP quand il devient la valeur de `CurrentURIMetaData`.
pub fn build_video_broadcast_metadata(url: &str, title: &str) -> String {
    let mut item = Element::new("item");
    item.attributes.insert("id".to_string(), "0".to_string());
    item.attributes.insert("parentID".to_string(), "-1".to_string());
    item.attributes.insert("restricted".to_string(), "1".to_string());
    item.children
        .push(XMLNode::Element(text_element("dc:title", title)));
    item.children.push(XMLNode::Element(text_element(
        "upnp:class",
        VIDEO_BROADCAST_CLASS,
    )));

    let mut res = text_element("res", url);
    res.attributes
        .insert("protocolInfo".to_string(), protocol_info_for(url));
    item.children.push(XMLNode::Element(res));

    let mut didl = Element::new("DIDL-Lite");
    didl.attributes
        .insert("xmlns".to_string(), DIDL_NS.to_string());
    didl.attributes
        .insert("xmlns:dc".to_string(), DC_NS.to_string());
    didl.attributes
        .insert("xmlns:upnp".to_string(), UPNP_NS.to_string());
    didl.children.push(XMLNode::Element(item));

    let mut buf = Vec::new();
    let config = EmitterConfig::new().write_document_declaration(false);
    match didl.write_with_config(&mut buf, config) {
        Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
        // Écrire dans un Vec ne peut échouer que sur un nom invalide ;
        // les noms sont constants.
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_info_by_extension() {
        assert_eq!(
            protocol_info_for("http://h/live/index.m3u8?token=1"),
            "http-get:*:application/x-mpegURL:*"
        );
        assert_eq!(
            protocol_info_for("http://h/live/1234.ts"),
            "http-get:*:video/MP2T:DLNA.ORG_OP=01;DLNA.ORG_FLAGS=01700000000000000000000000000000"
        );
        assert_eq!(
            protocol_info_for("http://h/movie/1.MP4"),
            "http-get:*:video/mp4:DLNA.ORG_OP=01;DLNA.ORG_FLAGS=01700000000000000000000000000000"
        );
        assert_eq!(protocol_info_for("http://h/live/1234"), "http-get:*:video/MP2T:*");
    }

    #[test]
    fn test_content_features() {
        assert!(content_features_for("http://h/x.ts").starts_with("DLNA.ORG_OP=01"));
        assert_eq!(
            content_features_for("http://h/x"),
            "DLNA.ORG_OP=00;DLNA.ORG_CI=0"
        );
    }

    #[test]
    fn test_metadata_document() {
        let didl = build_video_broadcast_metadata("http://10.0.0.2:8080/stream/ab.ts", "BBC One & Two");

        assert!(didl.starts_with("<DIDL-Lite"));
        assert!(didl.contains("xmlns=\"urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/\""));
        assert!(didl.contains("<dc:title>BBC One &amp; Two</dc:title>"));
        assert!(didl.contains("<upnp:class>object.item.videoItem.videoBroadcast</upnp:class>"));
        assert!(didl.contains("protocolInfo=\"http-get:*:video/MP2T:DLNA.ORG_OP=01"));
        assert!(didl.contains(">http://10.0.0.2:8080/stream/ab.ts</res>"));
    }
}
