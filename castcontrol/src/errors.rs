use castproxy::ProxyError;
use castupnp::gena::NotifyParseError;
use castupnp::soap::SoapParseError;
use thiserror::Error;

/// Erreurs du sous-système de cast
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CastError {
    /// Échec réseau vers le renderer (découverte, contrôle, événements)
    #[error("device unreachable: {0}")]
    DeviceUnreachable(String),

    /// La source du flux ne peut pas être lue
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// Le renderer a refusé l'action (SOAP fault)
    #[error("{action} rejected by renderer: UPnP error {code}: {description}")]
    ActionRejected {
        action: String,
        code: u32,
        description: String,
    },

    #[error("{0} timed out")]
    Timeout(String),

    /// Réponse mal formée du renderer ou de la source
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Multicast indisponible : la découverte tourne en mode dégradé
    #[error("discovery degraded: {0}")]
    DiscoveryDegraded(String),

    #[error("no active cast session")]
    NoActiveSession,

    #[error("unknown device {0}")]
    UnknownDevice(String),

    #[error("unknown channel {0}")]
    UnknownChannel(String),

    #[error("cast controller is closed")]
    ControllerClosed,
}

/// Catégorie d'échec présentée à l'utilisateur
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum FailureKind {
    DeviceUnreachable,
    UpstreamUnreachable,
    ActionRejected,
    Timeout,
    ProtocolError,
    Other,
}

impl CastError {
    /// `Timeout` et `UpstreamUnreachable` se réessaient dans l'état courant ;
    /// le reste met fin à la session.
    pub fn is_transient(&self) -> bool {
        matches!(self, CastError::Timeout(_) | CastError::UpstreamUnreachable(_))
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            CastError::DeviceUnreachable(_) => FailureKind::DeviceUnreachable,
            CastError::UpstreamUnreachable(_) => FailureKind::UpstreamUnreachable,
            CastError::ActionRejected { .. } => FailureKind::ActionRejected,
            CastError::Timeout(_) => FailureKind::Timeout,
            CastError::ProtocolError(_) => FailureKind::ProtocolError,
            _ => FailureKind::Other,
        }
    }

    pub fn device_unreachable(message: impl Into<String>) -> Self {
        CastError::DeviceUnreachable(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        CastError::ProtocolError(message.into())
    }
}

impl From<ProxyError> for CastError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::UpstreamUnreachable { .. } | ProxyError::UpstreamStatus { .. } => {
                CastError::UpstreamUnreachable(err.to_string())
            }
            ProxyError::Timeout { .. } => CastError::Timeout(err.to_string()),
            ProxyError::Closed => CastError::ControllerClosed,
            ProxyError::Bind { .. } | ProxyError::HttpClient(_) => {
                CastError::ProtocolError(err.to_string())
            }
        }
    }
}

impl From<SoapParseError> for CastError {
    fn from(err: SoapParseError) -> Self {
        CastError::ProtocolError(err.to_string())
    }
}

impl From<NotifyParseError> for CastError {
    fn from(err: NotifyParseError) -> Self {
        CastError::ProtocolError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CastError::Timeout("Play".into()).is_transient());
        assert!(CastError::UpstreamUnreachable("x".into()).is_transient());
        assert!(!CastError::DeviceUnreachable("x".into()).is_transient());
        assert!(
            !CastError::ActionRejected {
                action: "Play".into(),
                code: 701,
                description: "Transition not available".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_proxy_errors_map_to_taxonomy() {
        let err: CastError = ProxyError::UpstreamStatus {
            url: "http://iptv/1.ts".into(),
            status: 403,
        }
        .into();
        assert_eq!(err.kind(), FailureKind::UpstreamUnreachable);

        let err: CastError = ProxyError::Timeout {
            url: "http://iptv/1.ts".into(),
            timeout_ms: 10,
        }
        .into();
        assert!(matches!(err, CastError::Timeout(_)));
    }
}
