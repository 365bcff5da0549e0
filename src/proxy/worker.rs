// src/proxy/worker.rs
use super::connections::ConnectionRouter;
use super::proxy::ProxyError;
use super::reply::{reject, reply_error, send_to_client};
use crate::metrics::{MetricsCollector, Timer};
use crate::protocol::Serializer;
use crate::transport::{Frames, RouterSocket, TransportError};
use bytes::Bytes;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

pub(crate) type SharedQueue = Arc<Mutex<mpsc::Receiver<Frames>>>;

pub(crate) struct WorkerContext {
    pub socket: Arc<RouterSocket>,
    pub router: Arc<ConnectionRouter>,
    pub serializer: Arc<dyn Serializer>,
    pub metrics: Option<Arc<MetricsCollector>>,
}

// Correlation data learned while handling a request, kept outside the fault
// boundary so an error reply can still carry it.
#[derive(Debug, Default)]
struct RequestScope {
    id: Option<i64>,
    kind: Option<String>,
}

pub(crate) async fn run_worker(
    number: usize,
    context: Arc<WorkerContext>,
    queue: SharedQueue,
    cancel: CancellationToken,
) {
    debug!("Worker {} started", number);

    loop {
        let frames = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frames = next_message(&queue) => match frames {
                Some(frames) => frames,
                None => break,
            },
        };

        // The fault boundary wraps one message, never the loop.
        if let Err(panic) = AssertUnwindSafe(context.process(number, frames))
            .catch_unwind()
            .await
        {
            error!("Panic recovered in worker {}: {}", number, panic_message(&*panic));
        }
    }

    if cancel.is_cancelled() {
        context.drain(number, &queue).await;
    }

    debug!("Worker {} stopped", number);
}

async fn next_message(queue: &SharedQueue) -> Option<Frames> {
    queue.lock().await.recv().await
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl WorkerContext {
    async fn process(&self, worker: usize, frames: Frames) {
        let timer = Timer::new();

        let Some(identity) = frames.first().cloned() else {
            warn!("Worker {} dropping message without identity frame", worker);
            return;
        };

        let mut scope = RequestScope::default();
        let handled = AssertUnwindSafe(self.handle(worker, &identity, frames, &mut scope))
            .catch_unwind()
            .await;

        let result = handled.unwrap_or_else(|panic| {
            let message = panic_message(&*panic);
            warn!("Worker {} recovered from fault: {}", worker, message);
            if let Some(metrics) = &self.metrics {
                metrics.record_worker_fault();
            }
            Err(ProxyError::WorkerFault(message))
        });

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.outcome(),
        };

        let delivered = match result {
            Ok(reply) => send_to_client(&self.socket, &identity, reply),
            Err(e) => {
                error!(
                    "Worker {} failed request (identity: {}, id: {:?}): {}",
                    worker,
                    String::from_utf8_lossy(&identity),
                    scope.id,
                    e
                );
                reply_error(
                    &self.socket,
                    self.serializer.as_ref(),
                    &identity,
                    scope.id.unwrap_or(0),
                    scope.kind.as_deref().unwrap_or(""),
                    &e,
                )
            }
        };

        // The client left while its request was in flight.
        if let Err(TransportError::UnknownPeer) = delivered {
            self.router.release(&identity).await;
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_request(outcome, timer.elapsed());
        }
    }

    async fn handle(
        &self,
        worker: usize,
        identity: &Bytes,
        frames: Frames,
        scope: &mut RequestScope,
    ) -> Result<Bytes, ProxyError> {
        if frames.len() < 2 {
            return Err(ProxyError::MalformedRequest(frames.len()));
        }
        let payload = frames[1].clone();

        debug!(
            "Received request from client (worker: {}, size: {}, identity: {})",
            worker,
            payload.len(),
            String::from_utf8_lossy(identity)
        );

        let request = match self.serializer.decode_request(&payload) {
            Ok(request) => request,
            Err(e) => {
                scope.id = e.correlation_id();
                scope.kind = e.kind().map(str::to_owned);
                return Err(e.into());
            }
        };
        scope.id = Some(request.id);
        scope.kind = Some(request.kind.clone());

        let routed = self.router.route(identity).await?;
        let address = routed.address().to_string();

        let timer = Timer::new();
        let reply = match routed.request(payload).await {
            Ok(reply) => reply,
            Err(e) => {
                self.record_backend(&address, false, &timer);
                self.router.invalidate(routed).await;
                return Err(e);
            }
        };
        self.record_backend(&address, true, &timer);

        let Some(reply) = reply.into_iter().next() else {
            self.router.invalidate(routed).await;
            return Err(ProxyError::EmptyReply(address));
        };
        drop(routed);

        debug!(
            "Received response from backend (worker: {}, backend: {}, type: {}, id: {})",
            worker, address, request.kind, request.id
        );

        Ok(reply)
    }

    // Answers whatever is still queued once shutdown has started.
    async fn drain(&self, worker: usize, queue: &SharedQueue) {
        let mut queue = queue.lock().await;

        while let Ok(frames) = queue.try_recv() {
            debug!("Worker {} rejecting queued request during shutdown", worker);
            reject(&self.socket, self.serializer.as_ref(), frames, &ProxyError::ShuttingDown);
        }
    }

    fn record_backend(&self, address: &str, success: bool, timer: &Timer) {
        if let Some(metrics) = &self.metrics {
            metrics.record_backend_request(address, success, timer.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let panic: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(&*panic), "static message");

        let panic: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(&*panic), "owned message");

        let panic: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(&*panic), "unknown panic");
    }
}
