//! # Module SOAP - Simple Object Access Protocol
//!
//! Support SOAP côté client UPnP :
//!
//! - [`build_soap_request`] : enveloppe d'invocation d'action
//! - [`parse_soap_envelope`] / [`parse_action_response`] : lecture des réponses
//! - [`parse_upnp_error`] : lecture des faults `UPnPError`

mod builder;
mod fault;
mod parser;

pub use builder::{SoapBuildError, build_soap_request, soap_action_header};
pub use fault::{UpnpError, parse_upnp_error};
pub use parser::{
    SoapBody, SoapEnvelope, SoapParseError, child_text, find_child_with_suffix,
    parse_action_response, parse_soap_envelope,
};

/// Namespace de l'enveloppe SOAP 1.1
pub const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Encoding style exigé par UPnP
pub const SOAP_ENCODING_STYLE: &str = "http://schemas.xmlsoap.org/soap/encoding/";

/// Content-Type des requêtes SOAP
pub const SOAP_CONTENT_TYPE: &str = r#"text/xml; charset="utf-8""#;

/// Codes d'erreur SOAP UPnP standards
pub mod error_codes {
    /// Action invalide
    pub const INVALID_ACTION: u32 = 401;

    /// Arguments invalides
    pub const INVALID_ARGS: u32 = 402;

    /// Action échouée
    pub const ACTION_FAILED: u32 = 501;

    /// Transition non disponible (AVTransport)
    pub const TRANSITION_NOT_AVAILABLE: u32 = 701;

    /// Type MIME refusé (AVTransport)
    pub const ILLEGAL_MIME_TYPE: u32 = 714;
}
