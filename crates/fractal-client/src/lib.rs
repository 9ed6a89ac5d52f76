//! Client-side request coalescing for the fractal viewer.
//!
//! Slider input arrives far faster than surfaces can be generated, so
//! submissions are debounced into the most recent parameter set, an
//! in-flight request is cancelled the moment a newer one supersedes
//! it, and the consumer only ever observes results for requests that
//! were still current when they completed (last-submission-wins,
//! never last-completion-wins).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use fractal_core::{GeometryPayload, ParameterSet};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;

/// Debounce window applied between a submission and its boundary
/// crossing.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(150);

/// Terminal outcome of a non-superseded request, delivered exactly
/// once to the consumer.
#[derive(Debug)]
pub struct Delivery<E> {
    pub request_id: u64,
    pub parameters: ParameterSet,
    pub result: Result<GeometryPayload, E>,
}

/// Handle to a running coalescer.
///
/// Dropping the handle (or calling [`Coalescer::shutdown`]) tears the
/// driver down; no delivery occurs after teardown begins.
pub struct Coalescer {
    submissions: mpsc::UnboundedSender<ParameterSet>,
    shutdown: CancellationToken,
    driver: JoinHandle<()>,
}

impl Coalescer {
    /// Starts a coalescer over `backend`, the boundary crossing for a
    /// winning parameter set. The backend receives a cancellation
    /// token it may forward as a best-effort abort signal; regardless
    /// of whether it honors the token, a superseded request's result
    /// is discarded before delivery.
    pub fn spawn<F, Fut, E>(
        backend: F,
        debounce: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<Delivery<E>>)
    where
        F: Fn(ParameterSet, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<GeometryPayload, E>> + Send + 'static,
        E: Send + 'static,
    {
        let (submission_tx, submission_rx) = mpsc::unbounded_channel();
        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let driver = tokio::spawn(run_driver(
            Arc::new(backend),
            debounce,
            submission_rx,
            delivery_tx,
            shutdown.clone(),
        ));

        (
            Self {
                submissions: submission_tx,
                shutdown,
                driver,
            },
            delivery_rx,
        )
    }

    /// Submits a new desired parameter set, superseding any pending or
    /// in-flight request.
    pub fn submit(&self, params: ParameterSet) {
        if self.submissions.send(params).is_err() {
            tracing::debug!("submission ignored, coalescer already shut down");
        }
    }

    /// Cancels pending and in-flight work and waits for the driver to
    /// stop.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.driver.await;
    }
}

struct Flight {
    request_id: u64,
    token: CancellationToken,
}

struct Completion<E> {
    request_id: u64,
    parameters: ParameterSet,
    token: CancellationToken,
    result: Result<GeometryPayload, E>,
}

async fn run_driver<F, Fut, E>(
    backend: Arc<F>,
    debounce: Duration,
    mut submissions: mpsc::UnboundedReceiver<ParameterSet>,
    deliveries: mpsc::UnboundedSender<Delivery<E>>,
    shutdown: CancellationToken,
) where
    F: Fn(ParameterSet, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<GeometryPayload, E>> + Send + 'static,
    E: Send + 'static,
{
    let (completion_tx, mut completions) = mpsc::unbounded_channel::<Completion<E>>();
    let mut pending: Option<ParameterSet> = None;
    let mut debounce_timer: Option<Pin<Box<Sleep>>> = None;
    let mut in_flight: Option<Flight> = None;
    let mut next_request_id: u64 = 0;

    loop {
        // Biased polling keeps cancellation-before-result: a queued
        // submission is always observed before a queued completion, so
        // a stale result can never overwrite a newer request.
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                if let Some(flight) = in_flight.take() {
                    flight.token.cancel();
                }
                break;
            }

            submission = submissions.recv() => {
                let Some(params) = submission else {
                    // All handles dropped; treat as teardown.
                    if let Some(flight) = in_flight.take() {
                        flight.token.cancel();
                    }
                    break;
                };
                if let Some(flight) = in_flight.as_ref() {
                    flight.token.cancel();
                }
                pending = Some(params);
                debounce_timer = Some(Box::pin(tokio::time::sleep(debounce)));
            }

            _ = debounce_elapsed(&mut debounce_timer), if debounce_timer.is_some() => {
                debounce_timer = None;
                if let Some(params) = pending.take() {
                    next_request_id += 1;
                    in_flight = Some(launch(
                        &backend,
                        next_request_id,
                        params,
                        completion_tx.clone(),
                    ));
                }
            }

            completion = completions.recv() => {
                // The driver holds a sender, so the channel never closes
                // while this loop runs.
                let Some(done) = completion else { continue };
                if in_flight
                    .as_ref()
                    .is_some_and(|flight| flight.request_id == done.request_id)
                {
                    in_flight = None;
                }
                if done.token.is_cancelled() {
                    tracing::debug!(
                        request_id = done.request_id,
                        "discarding result of superseded request"
                    );
                    continue;
                }
                let delivery = Delivery {
                    request_id: done.request_id,
                    parameters: done.parameters,
                    result: done.result,
                };
                if deliveries.send(delivery).is_err() {
                    // Consumer went away; stop driving.
                    if let Some(flight) = in_flight.take() {
                        flight.token.cancel();
                    }
                    break;
                }
            }
        }
    }
}

fn launch<F, Fut, E>(
    backend: &Arc<F>,
    request_id: u64,
    parameters: ParameterSet,
    completions: mpsc::UnboundedSender<Completion<E>>,
) -> Flight
where
    F: Fn(ParameterSet, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<GeometryPayload, E>> + Send + 'static,
    E: Send + 'static,
{
    let token = CancellationToken::new();
    let flight_token = token.clone();
    let backend = Arc::clone(backend);

    tokio::spawn(async move {
        let result = backend(parameters.clone(), flight_token.clone()).await;
        let _ = completions.send(Completion {
            request_id,
            parameters,
            token: flight_token,
            result,
        });
    });

    Flight { request_id, token }
}

async fn debounce_elapsed(timer: &mut Option<Pin<Box<Sleep>>>) {
    if let Some(timer) = timer.as_mut() {
        timer.await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use fractal_core::{generate_fallback, GeometryPayload, ParameterSet};
    use tokio::sync::mpsc;
    use tokio::time::{self, timeout};
    use tokio_util::sync::CancellationToken;

    use super::{Coalescer, Delivery};

    fn params(iterations: u32) -> ParameterSet {
        ParameterSet::new(iterations, [-0.2, 0.8, 0.0, 0.0], 24)
    }

    async fn recv_delivery(
        rx: &mut mpsc::UnboundedReceiver<Delivery<String>>,
        within: Duration,
    ) -> Option<Delivery<String>> {
        timeout(within, rx.recv()).await.ok().flatten()
    }

    fn counting_backend(
        calls: Arc<AtomicUsize>,
    ) -> impl Fn(
        ParameterSet,
        CancellationToken,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<GeometryPayload, String>> + Send>,
    > + Send
           + Sync
           + 'static {
        move |params, _token| {
            calls.fetch_add(1, Ordering::SeqCst);
            let future: std::pin::Pin<
                Box<dyn std::future::Future<Output = Result<GeometryPayload, String>> + Send>,
            > = Box::pin(async move { Ok(generate_fallback(&params)) });
            future
        }
    }

    #[tokio::test]
    async fn rapid_submissions_coalesce_into_one_crossing_for_the_last() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (coalescer, mut rx) =
            Coalescer::spawn(counting_backend(Arc::clone(&calls)), Duration::from_millis(50));

        for iterations in 1..=10 {
            coalescer.submit(params(iterations));
        }

        let delivery = recv_delivery(&mut rx, Duration::from_secs(2))
            .await
            .expect("one delivery should arrive");
        assert_eq!(delivery.parameters, params(10));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let extra = recv_delivery(&mut rx, Duration::from_millis(200)).await;
        assert!(extra.is_none(), "expected a single delivery, got {extra:?}");

        coalescer.shutdown().await;
    }

    #[tokio::test]
    async fn superseded_in_flight_result_is_discarded() {
        let tokens = Arc::new(Mutex::new(Vec::<CancellationToken>::new()));
        let backend = {
            let tokens = Arc::clone(&tokens);
            move |params: ParameterSet, token: CancellationToken| {
                tokens.lock().expect("token log should lock").push(token);
                async move {
                    // The first request is slow enough to still be in
                    // flight when the second one supersedes it.
                    let latency = if params.iterations == 1 { 400 } else { 10 };
                    time::sleep(Duration::from_millis(latency)).await;
                    Ok::<_, String>(generate_fallback(&params))
                }
            }
        };
        let (coalescer, mut rx) = Coalescer::spawn(backend, Duration::from_millis(20));

        coalescer.submit(params(1));
        time::sleep(Duration::from_millis(60)).await;
        coalescer.submit(params(2));

        let delivery = recv_delivery(&mut rx, Duration::from_secs(2))
            .await
            .expect("the superseding request should deliver");
        assert_eq!(delivery.parameters, params(2));

        // The first request completes around 460ms in; its result must
        // be discarded, not delivered late.
        let extra = recv_delivery(&mut rx, Duration::from_millis(600)).await;
        assert!(extra.is_none(), "stale result was delivered: {extra:?}");

        let recorded = tokens.lock().expect("token log should lock");
        assert_eq!(recorded.len(), 2);
        assert!(recorded[0].is_cancelled());
        assert!(!recorded[1].is_cancelled());

        coalescer.shutdown().await;
    }

    #[tokio::test]
    async fn deliveries_follow_submission_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (coalescer, mut rx) =
            Coalescer::spawn(counting_backend(Arc::clone(&calls)), Duration::from_millis(20));

        coalescer.submit(params(3));
        let first = recv_delivery(&mut rx, Duration::from_secs(2))
            .await
            .expect("first delivery should arrive");
        coalescer.submit(params(4));
        let second = recv_delivery(&mut rx, Duration::from_secs(2))
            .await
            .expect("second delivery should arrive");

        assert_eq!(first.parameters, params(3));
        assert_eq!(second.parameters, params(4));
        assert!(second.request_id > first.request_id);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        coalescer.shutdown().await;
    }

    #[tokio::test]
    async fn delivered_payloads_are_structurally_valid() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (coalescer, mut rx) =
            Coalescer::spawn(counting_backend(calls), Duration::from_millis(20));

        coalescer.submit(params(6));
        let delivery = recv_delivery(&mut rx, Duration::from_secs(2))
            .await
            .expect("delivery should arrive");
        let payload = delivery.result.expect("backend should succeed");
        assert_eq!(payload.validate(), Ok(()));
        assert!(payload.triangle_count > 0);

        coalescer.shutdown().await;
    }

    #[tokio::test]
    async fn teardown_cancels_in_flight_work_and_stops_delivery() {
        let backend = |params: ParameterSet, _token: CancellationToken| async move {
            time::sleep(Duration::from_millis(150)).await;
            Ok::<_, String>(generate_fallback(&params))
        };
        let (coalescer, mut rx) = Coalescer::spawn(backend, Duration::from_millis(10));

        coalescer.submit(params(5));
        // Let the debounce elapse so the request is actually in flight.
        time::sleep(Duration::from_millis(50)).await;
        coalescer.shutdown().await;

        let leftover = recv_delivery(&mut rx, Duration::from_millis(400)).await;
        assert!(leftover.is_none(), "delivery after teardown: {leftover:?}");
    }

    #[tokio::test]
    async fn pending_debounce_is_dropped_on_teardown() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (coalescer, mut rx) = Coalescer::spawn(
            counting_backend(Arc::clone(&calls)),
            Duration::from_millis(200),
        );

        coalescer.submit(params(7));
        coalescer.shutdown().await;

        let leftover = recv_delivery(&mut rx, Duration::from_millis(400)).await;
        assert!(leftover.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
