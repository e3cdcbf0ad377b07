use std::time::Duration;

use async_trait::async_trait;
use castproxy::{ConversionPolicy, RouteId, RouteInfo, StreamProxyServer};

use crate::errors::CastError;

/// Routes de flux vues par le contrôleur de session
#[async_trait]
pub trait StreamRoutes: Send + Sync {
    /// Crée une route servant `source_url` au renderer joignable à `renderer_host`.
    async fn create_route(&self, source_url: &str, renderer_host: &str)
    -> Result<RouteInfo, CastError>;

    /// Idempotent
    fn destroy_route(&self, id: RouteId) -> bool;

    async fn wait_first_transfer(&self, id: RouteId, timeout: Duration) -> bool;

    fn upstream_ended(&self, id: RouteId) -> bool;
}

#[async_trait]
impl StreamRoutes for StreamProxyServer {
    async fn create_route(
        &self,
        source_url: &str,
        renderer_host: &str,
    ) -> Result<RouteInfo, CastError> {
        Ok(StreamProxyServer::create_route(
            self,
            source_url,
            ConversionPolicy::DlnaLive,
            Some(renderer_host),
        )
        .await?)
    }

    fn destroy_route(&self, id: RouteId) -> bool {
        StreamProxyServer::destroy_route(self, id)
    }

    async fn wait_first_transfer(&self, id: RouteId, timeout: Duration) -> bool {
        StreamProxyServer::wait_first_transfer(self, id, timeout).await
    }

    fn upstream_ended(&self, id: RouteId) -> bool {
        StreamProxyServer::upstream_ended(self, id)
    }
}
