//! Ordered composition of stages around an endpoint handler.

use std::sync::Arc;

use async_trait::async_trait;

use crate::handler::{
    CloseGuard, ConnectionLogger, Handler, HandlerContext, Next, PanicGuard, SocketOption, Stage,
    Tuner,
};
use crate::net::Connection;

/// A fixed list of stages in front of an endpoint handler.
///
/// The first stage is the outermost. A chain is itself a [`Handler`].
pub struct HandlerChain {
    stages: Vec<Arc<dyn Stage>>,
    endpoint: Arc<dyn Handler>,
}

impl HandlerChain {
    pub fn builder<H>(endpoint: H) -> ChainBuilder
    where
        H: Handler + 'static,
    {
        ChainBuilder {
            stages: Vec::new(),
            endpoint: Arc::new(endpoint),
        }
    }

    /// The production chain: close-guard, panic-guard, logger, tuner, endpoint.
    pub fn standard<H>(endpoint: H, options: Vec<Arc<dyn SocketOption>>) -> Self
    where
        H: Handler + 'static,
    {
        Self::builder(endpoint)
            .stage(CloseGuard)
            .stage(PanicGuard)
            .stage(ConnectionLogger)
            .stage(Tuner::new(options))
            .build()
    }

    /// Stage names, outermost first.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }
}

#[async_trait]
impl Handler for HandlerChain {
    async fn handle(&self, ctx: &HandlerContext, conn: &mut Connection) {
        Next::new(&self.stages, self.endpoint.as_ref())
            .run(ctx, conn)
            .await
    }
}

/// Builder for [`HandlerChain`].
pub struct ChainBuilder {
    stages: Vec<Arc<dyn Stage>>,
    endpoint: Arc<dyn Handler>,
}

impl ChainBuilder {
    /// Append a stage inside the ones already added.
    pub fn stage<S>(mut self, stage: S) -> Self
    where
        S: Stage + 'static,
    {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn build(self) -> HandlerChain {
        HandlerChain {
            stages: self.stages,
            endpoint: self.endpoint,
        }
    }
}
