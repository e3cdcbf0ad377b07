/*!
Client SSDP asynchrone d'un *control point*.

Deux sockets :

* un socket de recherche lié sur un port éphémère (`0.0.0.0:0`) : il envoie
  les M-SEARCH et reçoit les réponses HTTP/200 unicast ;
* un socket d'écoute lié sur `0.0.0.0:1900` (SO_REUSEADDR) qui rejoint le
  groupe multicast sur chaque interface IPv4 et reçoit les NOTIFY.

Le socket d'écoute est optionnel : si le port 1900 est indisponible, le
client fonctionne en recherche seule et les annonces passives sont perdues.
*/

use super::message::{SsdpEvent, build_msearch, parse_message};
use super::{SSDP_MULTICAST_IP, SSDP_PORT};
use castutils::list_ipv4_interfaces;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

const MAX_DATAGRAM: usize = 8192;

/// Client SSDP pour envoyer des M-SEARCH et écouter les annonces
pub struct SsdpClient {
    search: UdpSocket,
    listener: Option<UdpSocket>,
    joined_interfaces: usize,
}

impl SsdpClient {
    /// Crée un nouveau client SSDP.
    ///
    /// Doit être appelé depuis un runtime tokio.
    pub fn new() -> io::Result<Self> {
        let (search, _) = bind_socket(0)?;
        let search = UdpSocket::from_std(search)?;

        let (listener, joined_interfaces) = match bind_socket(SSDP_PORT) {
            Ok((socket, joined)) => (Some(UdpSocket::from_std(socket)?), joined),
            Err(err) => {
                warn!(
                    error = %err,
                    "SSDP: cannot listen on port {}, passive announcements disabled", SSDP_PORT
                );
                (None, 0)
            }
        };

        info!(
            listening = listener.is_some(),
            interfaces = joined_interfaces,
            "SSDP client ready"
        );

        Ok(Self {
            search,
            listener,
            joined_interfaces,
        })
    }

    /// Nombre d'interfaces sur lesquelles le groupe multicast a été rejoint
    pub fn joined_interfaces(&self) -> usize {
        self.joined_interfaces
    }

    /// Vrai si les annonces passives (NOTIFY) sont reçues
    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Envoie un M-SEARCH pour un type donné
    pub async fn send_msearch(&self, st: &str, mx: u32) -> io::Result<()> {
        let msg = build_msearch(st, mx);
        let addr = SocketAddr::V4(SocketAddrV4::new(SSDP_MULTICAST_IP, SSDP_PORT));

        match self.search.send_to(msg.as_bytes(), addr).await {
            Ok(_) => {
                debug!(st, mx, "M-SEARCH sent");
                Ok(())
            }
            Err(e) => {
                warn!(st, error = %e, "Failed to send M-SEARCH");
                Err(e)
            }
        }
    }

    /// Attend le prochain datagramme SSDP sur l'un des deux sockets.
    ///
    /// Retourne `Ok(None)` pour un datagramme non interprétable. Annulable :
    /// aucun datagramme n'est perdu si le future est abandonné.
    pub async fn recv_event(&self) -> io::Result<Option<SsdpEvent>> {
        let (data, from) = match &self.listener {
            Some(listener) => tokio::select! {
                res = recv_datagram(&self.search) => res?,
                res = recv_datagram(listener) => res?,
            },
            None => recv_datagram(&self.search).await?,
        };
        Ok(parse_message(&data, from))
    }
}

async fn recv_datagram(socket: &UdpSocket) -> io::Result<(String, SocketAddr)> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let (n, from) = socket.recv_from(&mut buf).await?;
    Ok((String::from_utf8_lossy(&buf[..n]).into_owned(), from))
}

fn bind_socket(port: u16) -> io::Result<(std::net::UdpSocket, usize)> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&bind_addr.into())?;
    socket.set_multicast_loop_v4(true)?;
    socket.set_nonblocking(true)?;

    let socket: std::net::UdpSocket = socket.into();
    let mut joined = 0;
    if port == SSDP_PORT {
        for (name, ipv4) in list_ipv4_interfaces()? {
            match socket.join_multicast_v4(&SSDP_MULTICAST_IP, &ipv4) {
                Ok(()) => {
                    debug!(interface = %name, %ipv4, "SSDP: joined multicast group");
                    joined += 1;
                }
                Err(e) => {
                    warn!(interface = %name, %ipv4, error = %e, "SSDP: failed to join multicast group");
                }
            }
        }
    }
    Ok((socket, joined))
}
