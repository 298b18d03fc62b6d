//! Tower middleware that runs the admission gate in front of every route.

use futures::future::BoxFuture;
use std::collections::HashSet;
use std::sync::Arc;
use std::task::{Context, Poll};
use tonic::body::BoxBody;
use tower::{Layer, Service};

use crate::congestion::{AdmissionGate, OperationName, RejectionResponder};

/// A layer that checks every request against an [`AdmissionGate`].
#[derive(Clone, Debug)]
pub struct AdmissionLayer {
    gate: Arc<AdmissionGate>,
    routes: Option<Arc<HashSet<String>>>,
}

impl AdmissionLayer {
    pub fn new(gate: Arc<AdmissionGate>) -> Self {
        Self { gate, routes: None }
    }

    /// Only gate the given paths. Anything else goes straight to the router,
    /// which answers `UNIMPLEMENTED`, so unknown paths neither consume the
    /// rate budget nor show up in the rejection counts.
    pub fn with_routes<I, P>(mut self, routes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.routes = Some(Arc::new(routes.into_iter().map(Into::into).collect()));
        self
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService {
            inner: service,
            gate: self.gate.clone(),
            routes: self.routes.clone(),
        }
    }
}

/// Middleware service that answers rejected requests itself.
///
/// The operation name is the request path (`/package.Service/Method`). A
/// rejected request never reaches the inner service.
#[derive(Clone, Debug)]
pub struct AdmissionService<S> {
    inner: S,
    gate: Arc<AdmissionGate>,
    routes: Option<Arc<HashSet<String>>>,
}

impl<S> AdmissionService<S> {
    fn is_routed(&self, path: &str) -> bool {
        self.routes
            .as_ref()
            .map_or(true, |routes| routes.contains(path))
    }
}

impl<S, ReqBody> Service<http::Request<ReqBody>> for AdmissionService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<BoxBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: 'static,
    ReqBody: Send + 'static,
{
    type Response = http::Response<BoxBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<ReqBody>) -> Self::Future {
        let path = req.uri().path();

        if self.is_routed(path) {
            let decision = self.gate.decide(&OperationName::new(path));

            if let Some(status) = RejectionResponder.respond(&decision) {
                let response = RejectionResponder.into_response(&status);
                return Box::pin(async move { Ok::<_, S::Error>(response) });
            }
        }

        // The clone is not guaranteed to be ready; keep the one that was polled.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move { inner.call(req).await })
    }
}
