//! Parsing et construction des messages SSDP (HTTPU)

use super::{MAX_AGE, SSDP_MULTICAST_ADDR, SSDP_PORT, USER_AGENT};
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::trace;

/// Événements SSDP intéressants pour un control point
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsdpEvent {
    Alive {
        usn: String,
        nt: String,
        location: String,
        server: String,
        max_age: u32,
        from: SocketAddr,
    },
    ByeBye {
        usn: String,
        nt: String,
        from: SocketAddr,
    },
    SearchResponse {
        usn: String,
        st: String,
        location: String,
        server: String,
        max_age: u32,
        from: SocketAddr,
    },
}

impl SsdpEvent {
    pub fn usn(&self) -> &str {
        match self {
            SsdpEvent::Alive { usn, .. }
            | SsdpEvent::ByeBye { usn, .. }
            | SsdpEvent::SearchResponse { usn, .. } => usn,
        }
    }

    /// Type annoncé (NT pour un NOTIFY, ST pour une réponse de recherche)
    pub fn notification_type(&self) -> &str {
        match self {
            SsdpEvent::Alive { nt, .. } | SsdpEvent::ByeBye { nt, .. } => nt,
            SsdpEvent::SearchResponse { st, .. } => st,
        }
    }

    pub fn location(&self) -> Option<&str> {
        match self {
            SsdpEvent::Alive { location, .. } | SsdpEvent::SearchResponse { location, .. } => {
                Some(location)
            }
            SsdpEvent::ByeBye { .. } => None,
        }
    }

    pub fn from(&self) -> SocketAddr {
        match self {
            SsdpEvent::Alive { from, .. }
            | SsdpEvent::ByeBye { from, .. }
            | SsdpEvent::SearchResponse { from, .. } => *from,
        }
    }
}

/// Construit un M-SEARCH pour un search target donné.
///
/// MX est borné à [1, 5] comme l'exige UPnP 1.1.
pub fn build_msearch(st: &str, mx: u32) -> String {
    let mx = mx.clamp(1, 5);
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}:{}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\
         USER-AGENT: {}\r\n\
         \r\n",
        SSDP_MULTICAST_ADDR, SSDP_PORT, mx, st, USER_AGENT
    )
}

/// Extrait l'identifiant `uuid:...` d'un USN (partie avant `::`), en minuscules.
pub fn extract_udn_from_usn(usn: &str) -> Option<String> {
    let lower = usn.trim().to_ascii_lowercase();
    let idx = lower.find("uuid:")?;
    let sub = &lower[idx..];
    let udn = match sub.find("::") {
        Some(end) => &sub[..end],
        None => sub,
    };
    if udn.len() <= "uuid:".len() {
        return None;
    }
    Some(udn.to_string())
}

/// Parse un datagramme SSDP reçu de `from`.
///
/// Retourne `None` pour les messages malformés ou sans intérêt pour un
/// control point (M-SEARCH d'autres clients, NTS inconnu...).
pub fn parse_message(data: &str, from: SocketAddr) -> Option<SsdpEvent> {
    let mut lines = data.lines();
    let first_line = lines.next()?.trim();
    let upper = first_line.to_ascii_uppercase();
    let headers = parse_headers(lines);

    let result = if upper.starts_with("NOTIFY ") {
        handle_notify(&headers, from)
    } else if upper.starts_with("HTTP/") && upper.contains(" 200") {
        handle_search_response(&headers, from)
    } else if upper.starts_with("M-SEARCH ") {
        // Another control point querying the network.
        return None;
    } else {
        trace!(%from, line = first_line, "Unknown SSDP message type");
        None
    };

    if result.is_none() {
        trace!(%from, "SSDP message could not be parsed:\n{}", data);
    }

    result
}

fn handle_notify(headers: &HashMap<String, String>, from: SocketAddr) -> Option<SsdpEvent> {
    let nts = headers.get("NTS")?.to_ascii_lowercase();
    let nt = headers.get("NT")?.to_string();
    let usn = headers.get("USN")?.to_string();

    match nts.as_str() {
        "ssdp:alive" => {
            let Some(location) = headers.get("LOCATION") else {
                trace!(%from, "NOTIFY ssdp:alive missing LOCATION header, ignoring");
                return None;
            };
            Some(SsdpEvent::Alive {
                usn,
                nt,
                location: location.to_string(),
                server: server_header(headers),
                max_age: parse_max_age(headers.get("CACHE-CONTROL")),
                from,
            })
        }
        "ssdp:byebye" => Some(SsdpEvent::ByeBye { usn, nt, from }),
        _ => {
            trace!(%from, nts = %nts, "Unknown NTS value");
            None
        }
    }
}

fn handle_search_response(
    headers: &HashMap<String, String>,
    from: SocketAddr,
) -> Option<SsdpEvent> {
    // ST, USN et LOCATION sont obligatoires
    let (Some(st), Some(usn), Some(location)) =
        (headers.get("ST"), headers.get("USN"), headers.get("LOCATION"))
    else {
        trace!(%from, "M-SEARCH response missing ST, USN or LOCATION, ignoring");
        return None;
    };

    Some(SsdpEvent::SearchResponse {
        usn: usn.to_string(),
        st: st.to_string(),
        location: location.to_string(),
        server: server_header(headers),
        max_age: parse_max_age(headers.get("CACHE-CONTROL")),
        from,
    })
}

fn server_header(headers: &HashMap<String, String>) -> String {
    headers
        .get("SERVER")
        .cloned()
        .unwrap_or_else(|| "Unknown".to_string())
}

fn parse_headers<'a, I>(lines: I) -> HashMap<String, String>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers = HashMap::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }

        // Split on first ':' only (values may contain ':')
        match line.split_once(':') {
            Some((name, value)) => {
                let name = name.trim().to_ascii_uppercase();
                let value = value.trim();
                if !name.is_empty() && !value.is_empty() {
                    headers.insert(name, value.to_string());
                } else {
                    trace!("Skipping malformed header: '{}'", line);
                }
            }
            None => trace!("Skipping line without colon: '{}'", line),
        }
    }
    headers
}

fn parse_max_age(value: Option<&String>) -> u32 {
    if let Some(v) = value {
        let lower = v.to_ascii_lowercase();
        if let Some(idx) = lower.find("max-age") {
            let after_eq = lower[idx + 7..].trim_start().trim_start_matches('=').trim_start();
            let digits: String = after_eq.chars().take_while(|c| c.is_ascii_digit()).collect();
            if let Ok(age) = digits.parse::<u32>() {
                return age;
            }
        }
        trace!(
            "Could not parse max-age from CACHE-CONTROL: '{}', using default {}",
            v,
            MAX_AGE
        );
    }
    MAX_AGE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from() -> SocketAddr {
        "192.168.1.42:1900".parse().unwrap()
    }

    #[test]
    fn test_parse_alive() {
        let msg = "NOTIFY * HTTP/1.1\r\n\
                   HOST: 239.255.255.250:1900\r\n\
                   CACHE-CONTROL: max-age = 900\r\n\
                   LOCATION: http://192.168.1.42:9197/dmr\r\n\
                   NT: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
                   NTS: ssdp:alive\r\n\
                   SERVER: Samsung/1.0 UPnP/1.0\r\n\
                   USN: uuid:ABCD-1234::urn:schemas-upnp-org:device:MediaRenderer:1\r\n\r\n";

        let event = parse_message(msg, from()).unwrap();
        match &event {
            SsdpEvent::Alive {
                location, max_age, server, ..
            } => {
                assert_eq!(location, "http://192.168.1.42:9197/dmr");
                assert_eq!(*max_age, 900);
                assert_eq!(server, "Samsung/1.0 UPnP/1.0");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            event.notification_type(),
            "urn:schemas-upnp-org:device:MediaRenderer:1"
        );
    }

    #[test]
    fn test_parse_byebye_without_location() {
        let msg = "NOTIFY * HTTP/1.1\r\n\
                   NT: upnp:rootdevice\r\n\
                   NTS: ssdp:byebye\r\n\
                   USN: uuid:abcd-1234::upnp:rootdevice\r\n\r\n";
        let event = parse_message(msg, from()).unwrap();
        assert!(matches!(event, SsdpEvent::ByeBye { .. }));
        assert_eq!(event.location(), None);
    }

    #[test]
    fn test_parse_search_response_lowercase_headers() {
        let msg = "HTTP/1.1 200 OK\r\n\
                   cache-control: max-age=1800\r\n\
                   location: http://10.0.0.3:49152/description.xml\r\n\
                   st: urn:schemas-upnp-org:service:AVTransport:1\r\n\
                   usn: uuid:dev-42::urn:schemas-upnp-org:service:AVTransport:1\r\n\r\n";
        let event = parse_message(msg, from()).unwrap();
        match event {
            SsdpEvent::SearchResponse { st, server, .. } => {
                assert_eq!(st, "urn:schemas-upnp-org:service:AVTransport:1");
                assert_eq!(server, "Unknown");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_malformed_messages_are_dropped() {
        // alive without LOCATION
        let msg = "NOTIFY * HTTP/1.1\r\nNT: upnp:rootdevice\r\nNTS: ssdp:alive\r\nUSN: uuid:x\r\n\r\n";
        assert!(parse_message(msg, from()).is_none());

        // response without USN
        let msg = "HTTP/1.1 200 OK\r\nST: upnp:rootdevice\r\nLOCATION: http://x/\r\n\r\n";
        assert!(parse_message(msg, from()).is_none());

        // M-SEARCH from another control point
        let msg = build_msearch("ssdp:all", 2);
        assert!(parse_message(&msg, from()).is_none());

        assert!(parse_message("garbage", from()).is_none());
        assert!(parse_message("", from()).is_none());
    }

    #[test]
    fn test_build_msearch_clamps_mx() {
        let msg = build_msearch("urn:schemas-upnp-org:device:MediaRenderer:1", 0);
        assert!(msg.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(msg.contains("MAN: \"ssdp:discover\"\r\n"));
        assert!(msg.contains("MX: 1\r\n"));
        assert!(msg.contains("ST: urn:schemas-upnp-org:device:MediaRenderer:1\r\n"));
        assert!(msg.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_extract_udn_from_usn() {
        assert_eq!(
            extract_udn_from_usn("uuid:ABCD-1234::urn:schemas-upnp-org:device:MediaRenderer:1"),
            Some("uuid:abcd-1234".to_string())
        );
        assert_eq!(
            extract_udn_from_usn("uuid:dev-42"),
            Some("uuid:dev-42".to_string())
        );
        assert_eq!(extract_udn_from_usn("upnp:rootdevice"), None);
        assert_eq!(extract_udn_from_usn("uuid:"), None);
    }

    #[test]
    fn test_parse_max_age_defaults() {
        assert_eq!(parse_max_age(None), MAX_AGE);
        assert_eq!(parse_max_age(Some(&"no-cache".to_string())), MAX_AGE);
        assert_eq!(parse_max_age(Some(&"MAX-AGE=60".to_string())), 60);
    }
}
