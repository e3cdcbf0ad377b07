//! # castproxy - Proxy HTTP de flux pour renderers DLNA
//!
//! Le renderer ne lit jamais la source IPTV directement : il reçoit une URL
//! locale `http://<hôte>:<port>/stream/<jeton>.<ext>` dont le jeton, tiré au
//! hasard, n'est valable que pendant la vie de la route.
//!
//! - [`StreamProxyServer`] : serveur axum multi-routes, relais reqwest
//! - [`ConversionPolicy`] : passthrough ou présentation DLNA d'un flux live
//! - [`ProxySettings`] : réglages lus depuis `castconfig`
//!
//! ```rust,no_run
//! use castproxy::{ConversionPolicy, ProxySettings, StreamProxyServer};
//!
//! # async fn example() -> Result<(), castproxy::ProxyError> {
//! let proxy = StreamProxyServer::start(ProxySettings::default()).await?;
//! let route = proxy
//!     .create_route("http://iptv.example/live/1.ts", ConversionPolicy::DlnaLive, Some("192.168.1.20"))
//!     .await?;
//! println!("renderer URL: {}", route.url);
//! proxy.destroy_route(route.id);
//! # Ok(())
//! # }
//! ```

mod error;
mod route;
mod server;
mod settings;
mod throttle;

pub use error::ProxyError;
pub use route::{ConversionPolicy, ProxyRoute, RouteId, content_type_for_extension};
pub use server::{RouteInfo, StreamProxyServer};
pub use settings::ProxySettings;
