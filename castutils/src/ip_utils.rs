use get_if_addrs::get_if_addrs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Devine l'adresse IP locale utilisée pour les connexions sortantes.
///
/// Un socket UDP est "connecté" vers `8.8.8.8:80` : aucun paquet n'est émis,
/// le système choisit simplement l'interface de sortie. En cas d'échec,
/// retourne `"127.0.0.1"`.
pub fn guess_local_ip() -> String {
    match local_ip_towards("8.8.8.8", 80) {
        Ok(ip) => ip.to_string(),
        Err(_) => "127.0.0.1".to_string(),
    }
}

/// Adresse locale que le système utiliserait pour joindre `remote_host:remote_port`.
///
/// C'est l'adresse à annoncer à un renderer (URL de callback GENA, URL de
/// route du proxy) : elle est garantie routable depuis ce pair, contrairement
/// à [`guess_local_ip`] sur une machine multi-interfaces.
pub fn local_ip_towards(remote_host: &str, remote_port: u16) -> io::Result<IpAddr> {
    let host = remote_host.trim_matches(|c| c == '[' || c == ']');
    let is_ipv6 = host.contains(':');
    let (bind_addr, target) = if is_ipv6 {
        ("[::]:0", format!("[{}]:{}", host, remote_port))
    } else {
        ("0.0.0.0:0", format!("{}:{}", host, remote_port))
    };

    let socket = UdpSocket::bind(bind_addr)?;
    socket.connect(target)?;
    Ok(socket.local_addr()?.ip())
}

/// Formate une IP pour une URL (crochets autour des IPv6).
pub fn format_ip(ip: &IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{}]", v6),
    }
}

/// Liste les adresses IPv4 non-loopback de la machine, avec le nom de
/// l'interface qui les porte.
///
/// Utilisé par le client SSDP pour rejoindre le groupe multicast sur chaque
/// interface.
pub fn list_ipv4_interfaces() -> io::Result<Vec<(String, std::net::Ipv4Addr)>> {
    let mut result = Vec::new();
    for iface in get_if_addrs()? {
        if let IpAddr::V4(ipv4) = iface.ip() {
            if !ipv4.is_loopback() {
                result.push((iface.name, ipv4));
            }
        }
    }
    Ok(result)
}

/// Hôtes `a.b.c.1` à `a.b.c.254` du /24 de `local`, `local` exclu.
///
/// Vide pour une adresse loopback ou non spécifiée : rien à balayer.
pub fn subnet_hosts(local: Ipv4Addr) -> Vec<Ipv4Addr> {
    if local.is_loopback() || local.is_unspecified() {
        return Vec::new();
    }
    let [a, b, c, _] = local.octets();
    (1..=254)
        .map(|d| Ipv4Addr::new(a, b, c, d))
        .filter(|host| *host != local)
        .collect()
}
