//! Tower layer wiring the payment gate into axum routes.
//!
//! [`Sol402Middleware`] holds the facilitator and server-wide settings;
//! [`Sol402Middleware::with_price_tag`] produces a [`Sol402LayerBuilder`]
//! for one protected route, which in turn builds the
//! [`Sol402MiddlewareService`] wrapping the route's handler.

use axum_core::extract::Request;
use axum_core::response::Response;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};
use url::Url;

use sol402::facilitator::Facilitator;

use crate::paygate::{Paygate, PriceTag, ResourceInfoBuilder};

/// Entry point for enforcing payments on routes.
///
/// Create one per application, then derive a layer per protected route.
#[derive(Clone, Debug)]
pub struct Sol402Middleware<F> {
    facilitator: F,
    base_url: Option<Url>,
    settle: bool,
}

impl<F> Sol402Middleware<F> {
    pub fn facilitator(&self) -> &F {
        &self.facilitator
    }
}

impl<F> Sol402Middleware<F>
where
    F: Clone,
{
    /// Wrap a facilitator. Settlement runs synchronously per request unless
    /// disabled with [`Sol402Middleware::without_settlement`].
    pub fn new(facilitator: F) -> Self {
        Self {
            facilitator,
            base_url: None,
            settle: true,
        }
    }

    /// Base URL used to compute resource URLs from request paths.
    ///
    /// Prefer setting this (or an explicit resource) in production; the
    /// fallback base is `http://localhost/`.
    pub fn with_base_url(&self, base_url: Url) -> Self {
        let mut this = self.clone();
        this.base_url = Some(base_url);
        this
    }

    /// Verify only; skip on-ledger settlement.
    pub fn without_settlement(&self) -> Self {
        let mut this = self.clone();
        this.settle = false;
        this
    }

    /// Verify and settle before forwarding (default).
    pub fn with_settlement(&self) -> Self {
        let mut this = self.clone();
        this.settle = true;
        this
    }

    /// Start a layer for one protected route, accepting `tag` as payment.
    pub fn with_price_tag(&self, tag: PriceTag) -> Sol402LayerBuilder<F> {
        Sol402LayerBuilder {
            facilitator: self.facilitator.clone(),
            settle: self.settle,
            base_url: self.base_url.clone().map(Arc::new),
            accepts: Arc::new(vec![tag]),
            resource: Arc::new(ResourceInfoBuilder::default()),
        }
    }
}

/// Route-level configuration of the payment gate.
#[derive(Clone)]
pub struct Sol402LayerBuilder<F> {
    facilitator: F,
    settle: bool,
    base_url: Option<Arc<Url>>,
    accepts: Arc<Vec<PriceTag>>,
    resource: Arc<ResourceInfoBuilder>,
}

impl<F> Sol402LayerBuilder<F> {
    /// Accept another payment option for the same route. The accepted list
    /// is advertised in full on the 402 challenge.
    pub fn with_price_tag(mut self, tag: PriceTag) -> Self {
        let mut accepts = (*self.accepts).clone();
        accepts.push(tag);
        self.accepts = Arc::new(accepts);
        self
    }

    /// What the payment grants access to, shown to the payer.
    pub fn with_description(mut self, description: String) -> Self {
        let mut resource = (*self.resource).clone();
        resource.description = description;
        self.resource = Arc::new(resource);
        self
    }

    /// MIME type of the protected resource. Defaults to `application/json`.
    pub fn with_mime_type(mut self, mime_type: String) -> Self {
        let mut resource = (*self.resource).clone();
        resource.mime_type = mime_type;
        self.resource = Arc::new(resource);
        self
    }

    /// Full URL of the protected resource, overriding per-request
    /// resolution from the base URL.
    pub fn with_resource(mut self, resource: Url) -> Self {
        let mut builder = (*self.resource).clone();
        builder.url = Some(resource);
        self.resource = Arc::new(builder);
        self
    }
}

impl<S, F> Layer<S> for Sol402LayerBuilder<F>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    F: Facilitator + Clone,
{
    type Service = Sol402MiddlewareService<F>;

    fn layer(&self, inner: S) -> Self::Service {
        Sol402MiddlewareService {
            facilitator: self.facilitator.clone(),
            settle: self.settle,
            base_url: self.base_url.clone(),
            accepts: self.accepts.clone(),
            resource: self.resource.clone(),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

/// The service enforcing payment on each incoming request.
#[derive(Clone)]
pub struct Sol402MiddlewareService<F> {
    facilitator: F,
    settle: bool,
    base_url: Option<Arc<Url>>,
    accepts: Arc<Vec<PriceTag>>,
    resource: Arc<ResourceInfoBuilder>,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl<F> Service<Request> for Sol402MiddlewareService<F>
where
    F: Facilitator + Clone + Send + Sync + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let gate = Paygate {
            facilitator: self.facilitator.clone(),
            accepts: self.accepts.clone(),
            resource: self.resource.resolve(self.base_url.as_deref(), req.uri()),
            settle: self.settle,
        };
        let inner = self.inner.clone();
        Box::pin(async move { Ok(gate.handle_request(inner, req).await) })
    }
}
