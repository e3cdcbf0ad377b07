//! # Module SSDP - Simple Service Discovery Protocol
//!
//! Côté *control point* uniquement : envoi de M-SEARCH, réception des
//! réponses unicast et des annonces NOTIFY (`ssdp:alive` / `ssdp:byebye`).
//!
//! ## Constantes SSDP
//!
//! - **Multicast Address**: 239.255.255.250:1900
//! - **Max-Age** par défaut : 1800 secondes

mod client;
mod message;

use std::net::Ipv4Addr;

pub use client::SsdpClient;
pub use message::{SsdpEvent, build_msearch, extract_udn_from_usn, parse_message};

/// Adresse multicast SSDP
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250";

/// Adresse multicast SSDP, forme typée
pub const SSDP_MULTICAST_IP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// Port SSDP
pub const SSDP_PORT: u16 = 1900;

/// Durée de validité des annonces (en secondes) quand CACHE-CONTROL est absent
pub const MAX_AGE: u32 = 1800;

/// USER-AGENT envoyé dans les M-SEARCH
pub const USER_AGENT: &str = "IPTVCast/0.1 UPnP/1.1 DLNADOC/1.50";
