//! Tower middleware that runs every request through a named policy.

use crate::error::ResilienceError;
use crate::policy::PolicyHandle;
use futures::future::BoxFuture;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// Wraps services in a [`ResilienceService`] bound to one policy.
#[derive(Clone, Debug)]
pub struct ResilienceLayer {
    policy: PolicyHandle,
}

impl ResilienceLayer {
    pub fn new(policy: PolicyHandle) -> Self {
        Self { policy }
    }
}

impl<S> Layer<S> for ResilienceLayer {
    type Service = ResilienceService<S>;

    fn layer(&self, service: S) -> Self::Service {
        ResilienceService { inner: service, policy: self.policy.clone() }
    }
}

/// Service wrapper produced by [`ResilienceLayer`].
#[derive(Clone, Debug)]
pub struct ResilienceService<S> {
    inner: S,
    policy: PolicyHandle,
}

impl<S> ResilienceService<S> {
    pub fn policy(&self) -> &PolicyHandle {
        &self.policy
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, Req> Service<Req> for ResilienceService<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = ResilienceError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(ResilienceError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        // Keep the instance that was polled ready, leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let policy = self.policy.clone();
        Box::pin(async move { policy.execute(move || inner.call(req)).await })
    }
}
