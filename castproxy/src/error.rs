use thiserror::Error;

/// Erreurs du serveur proxy
#[derive(Debug, Error)]
pub enum ProxyError {
    /// La connexion initiale à la source n'a pas pu être établie
    #[error("upstream unreachable: {url}: {reason}")]
    UpstreamUnreachable { url: String, reason: String },

    /// La source a répondu avec un statut HTTP d'échec
    #[error("upstream {url} answered HTTP {status}")]
    UpstreamStatus { url: String, status: u16 },

    /// Aucune réponse de la source dans le délai imparti
    #[error("upstream {url} did not answer within {timeout_ms} ms")]
    Timeout { url: String, timeout_ms: u64 },

    /// Impossible d'ouvrir le port d'écoute
    #[error("cannot bind proxy listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// Le serveur n'accepte plus de routes (arrêté)
    #[error("stream proxy is shut down")]
    Closed,
}
