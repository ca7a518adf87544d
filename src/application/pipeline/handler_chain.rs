//! Ordered list of request handlers; the first one claiming a request wins.

use std::sync::Arc;

use crate::domain::entities::Request;
use crate::domain::errors::{LeverError, LeverResult};
use crate::domain::ports::{
    AssetResolver, ContentResolver, Downloader, RequestHandler, ResourceResolver,
};
use crate::infrastructure::handlers::{
    AssetRequestHandler, BytesRequestHandler, ContentStreamRequestHandler, FileRequestHandler,
    NetworkRequestHandler, ResourceRequestHandler,
};
use crate::infrastructure::stats::Stats;

/// Collaborators of the built-in handlers.
#[derive(Clone)]
pub struct BuiltInHandlers {
    pub downloader: Arc<dyn Downloader>,
    pub stats: Arc<Stats>,
    pub content_resolver: Option<Arc<dyn ContentResolver>>,
    pub asset_resolver: Option<Arc<dyn AssetResolver>>,
    pub resource_resolver: Option<Arc<dyn ResourceResolver>>,
}

/// Handlers in resolution order.
pub struct RequestHandlerChain {
    handlers: Vec<Arc<dyn RequestHandler>>,
}

impl std::fmt::Debug for RequestHandlerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|h| h.name()))
            .finish()
    }
}

impl RequestHandlerChain {
    /// Builds the standard chain: bytes, resource, the user handlers, then
    /// content, asset, file and network.
    ///
    /// # Errors
    /// Returns a state error if the same user handler is registered twice.
    pub fn new(
        built_ins: BuiltInHandlers,
        user_handlers: Vec<Arc<dyn RequestHandler>>,
    ) -> LeverResult<Self> {
        for (i, handler) in user_handlers.iter().enumerate() {
            if user_handlers[..i].iter().any(|h| Arc::ptr_eq(h, handler)) {
                return Err(LeverError::illegal_state("RequestHandler already registered."));
            }
        }

        let mut handlers: Vec<Arc<dyn RequestHandler>> = Vec::with_capacity(user_handlers.len() + 6);
        handlers.push(Arc::new(BytesRequestHandler));
        handlers.push(Arc::new(ResourceRequestHandler::new(built_ins.resource_resolver)));
        handlers.extend(user_handlers);
        handlers.push(Arc::new(ContentStreamRequestHandler::new(built_ins.content_resolver)));
        handlers.push(Arc::new(AssetRequestHandler::new(built_ins.asset_resolver)));
        handlers.push(Arc::new(FileRequestHandler));
        handlers.push(Arc::new(NetworkRequestHandler::new(
            built_ins.downloader,
            built_ins.stats,
        )));
        Ok(Self { handlers })
    }

    /// A chain of exactly the given handlers.
    #[must_use]
    pub fn from_handlers(handlers: Vec<Arc<dyn RequestHandler>>) -> Self {
        Self { handlers }
    }

    /// First handler claiming the request.
    #[must_use]
    pub fn find(&self, request: &Request) -> Option<Arc<dyn RequestHandler>> {
        self.handlers
            .iter()
            .find(|handler| handler.can_handle(request))
            .cloned()
    }

    /// Like [`find`](Self::find), but a miss is a caller error.
    ///
    /// # Errors
    /// Returns [`LeverError::NoHandler`] if no handler claims the request.
    pub fn require(&self, request: &Request) -> LeverResult<Arc<dyn RequestHandler>> {
        self.find(request).ok_or_else(|| LeverError::NoHandler {
            request: request.to_string(),
        })
    }

    /// Handler names in resolution order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
