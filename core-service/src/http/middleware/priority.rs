use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use axum::{body::Body, http::Request, response::Response};
use core_sync::RequestPriorityTracker;
use tower::{Layer, Service};

/// Requests slower than this are logged at warn level.
pub const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_secs(1);

/// Pauses background sync for as long as any request is being handled.
#[derive(Clone)]
pub struct RequestPriorityLayer {
    tracker: Arc<RequestPriorityTracker>,
}

impl RequestPriorityLayer {
    pub fn new(tracker: Arc<RequestPriorityTracker>) -> Self {
        Self { tracker }
    }
}

impl<S> Layer<S> for RequestPriorityLayer {
    type Service = RequestPriorityService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestPriorityService {
            inner,
            tracker: Arc::clone(&self.tracker),
        }
    }
}

#[derive(Clone)]
pub struct RequestPriorityService<S> {
    inner: S,
    tracker: Arc<RequestPriorityTracker>,
}

impl<S> Service<Request<Body>> for RequestPriorityService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        // The clone is not ready yet; keep the polled service for this call.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let tracker = Arc::clone(&self.tracker);

        Box::pin(async move {
            let method = req.method().clone();
            let path = req.uri().path().to_owned();

            // Dropped on completion, error or cancellation alike
            let guard = tracker.begin();
            let response = inner.call(req).await;
            let elapsed = guard.elapsed();
            drop(guard);

            if elapsed > SLOW_REQUEST_THRESHOLD {
                tracing::warn!(
                    %method,
                    path = %path,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Slow request"
                );
            } else {
                tracing::trace!(
                    %method,
                    path = %path,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Request handled"
                );
            }
            response
        })
    }
}
