//! Utilitaires réseau partagés par les crates IPTVCast.
//!
//! - [`guess_local_ip`] / [`local_ip_towards`] : adresse à annoncer aux renderers
//! - [`subnet_hosts`] : candidats du balayage du sous-réseau
//! - [`parse_host_port`] / [`resolve_url`] : manipulation des URLs UPnP
mod ip_utils;
mod url_utils;

pub use ip_utils::{
    format_ip, guess_local_ip, list_ipv4_interfaces, local_ip_towards, subnet_hosts,
};
pub use url_utils::{parse_host_port, resolve_url, url_extension};
