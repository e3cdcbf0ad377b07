//! # castupnp - formats de fil UPnP/DLNA d'un control point
//!
//! - [`ssdp`] : découverte (M-SEARCH, NOTIFY, réponses)
//! - [`description`] : `description.xml` des devices
//! - [`soap`] : invocation d'actions et lecture des faults
//! - [`gena`] : abonnements aux événements et corps NOTIFY
//! - [`didl`] : métadonnées DIDL-Lite des flux castés

pub mod description;
pub mod didl;
pub mod gena;
pub mod soap;
pub mod ssdp;

/// Type de service AVTransport utilisé quand la description n'en fournit pas
pub const AVTRANSPORT_V1: &str = "urn:schemas-upnp-org:service:AVTransport:1";

/// Type de service RenderingControl utilisé quand la description n'en fournit pas
pub const RENDERING_CONTROL_V1: &str = "urn:schemas-upnp-org:service:RenderingControl:1";

/// Type de device MediaRenderer
pub const MEDIA_RENDERER_V1: &str = "urn:schemas-upnp-org:device:MediaRenderer:1";
