//! Petits utilitaires d'URL partagés par la découverte, le contrôle et
//! l'eventing : extraction hôte/port et résolution des URLs relatives d'une
//! description UPnP.

/// Extrait `(hôte, port)` d'une URL http(s).
///
/// Le port par défaut dépend du schéma (80 ou 443). Les IPv6 entre crochets
/// sont retournées sans crochets.
pub fn parse_host_port(url: &str) -> Option<(String, u16)> {
    let default_port = if url.to_ascii_lowercase().starts_with("https://") {
        443
    } else {
        80
    };
    let (_, rest) = url.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next()?.trim();
    if authority.is_empty() {
        return None;
    }

    if let Some(stripped) = authority.strip_prefix('[') {
        let end = stripped.find(']')?;
        let host = &stripped[..end];
        let port = match stripped[end + 1..].strip_prefix(':') {
            Some(p) => p.parse().ok()?,
            None => default_port,
        };
        return Some((host.to_string(), port));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => Some((host.to_string(), port.parse().ok()?)),
        None => Some((authority.to_string(), default_port)),
    }
}

/// Résout une URL (controlURL, eventSubURL...) par rapport à l'URL de la
/// description du device.
///
/// - URL absolue : retournée telle quelle.
/// - Chemin absolu (`/ctl`) : préfixé par `scheme://authority`.
/// - Chemin relatif (`ctl`) : résolu par rapport au répertoire de la description.
pub fn resolve_url(description_url: &str, target: &str) -> String {
    let target = target.trim();
    if target.starts_with("http://") || target.starts_with("https://") {
        return target.to_string();
    }

    let Some((scheme, rest)) = description_url.split_once("://") else {
        return target.to_string();
    };

    let (authority, path) = match rest.find('/') {
        Some(pos) => (&rest[..pos], &rest[pos..]),
        None => (rest, "/"),
    };

    if target.starts_with('/') {
        return format!("{}://{}{}", scheme, authority, target);
    }

    let dir = match path.rfind('/') {
        Some(pos) => &path[..=pos],
        None => "/",
    };
    format!("{}://{}{}{}", scheme, authority, dir, target)
}

/// Extension de fichier de l'URL (sans query string), en minuscules.
pub fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let last = path.rsplit('/').next()?;
    let (_, ext) = last.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port() {
        assert_eq!(
            parse_host_port("http://192.168.1.20:9197/dmr"),
            Some(("192.168.1.20".to_string(), 9197))
        );
        assert_eq!(
            parse_host_port("http://tv.local/desc.xml"),
            Some(("tv.local".to_string(), 80))
        );
        assert_eq!(
            parse_host_port("https://example.org"),
            Some(("example.org".to_string(), 443))
        );
        assert_eq!(
            parse_host_port("http://[fe80::1]:8080/x"),
            Some(("fe80::1".to_string(), 8080))
        );
        assert_eq!(parse_host_port("not a url"), None);
    }

    #[test]
    fn test_resolve_url() {
        let desc = "http://192.168.1.20:9197/dmr/desc.xml";
        assert_eq!(
            resolve_url(desc, "http://other:1/ctl"),
            "http://other:1/ctl"
        );
        assert_eq!(
            resolve_url(desc, "/upnp/control/AVTransport1"),
            "http://192.168.1.20:9197/upnp/control/AVTransport1"
        );
        assert_eq!(
            resolve_url(desc, "AVTransport/ctrl"),
            "http://192.168.1.20:9197/dmr/AVTransport/ctrl"
        );
    }

    #[test]
    fn test_url_extension() {
        assert_eq!(url_extension("http://h/live/1234.ts"), Some("ts".to_string()));
        assert_eq!(
            url_extension("http://h/live/index.M3U8?token=abc"),
            Some("m3u8".to_string())
        );
        assert_eq!(url_extension("http://h/live/1234"), None);
    }
}
