use fractal_core::{generate_fallback_with_note, GeometryPayload, ParameterSet};
use tokio::sync::Mutex;

use crate::coordinator::SingleFlight;
use crate::error::GenerateError;
use crate::invoker::ComputeInvoker;

/// Response policy when a generation is already in flight.
///
/// The two policies are observably different to callers; the service
/// applies whichever it was constructed with, consistently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyPolicy {
    /// Serve a reduced-resolution fallback payload tagged with a note.
    DegradedFallback,
    /// Report `GenerateError::Busy` so the boundary can answer with a
    /// retry hint.
    Reject,
}

/// Orchestrates one generation attempt end to end: warm cache, single
/// flight admission, external invocation, and local fallback recovery.
pub struct GenerationService {
    invoker: ComputeInvoker,
    flight: SingleFlight,
    busy_policy: BusyPolicy,
    last_primary: Mutex<Option<CachedPayload>>,
}

struct CachedPayload {
    params: ParameterSet,
    payload: GeometryPayload,
}

impl GenerationService {
    pub fn new(invoker: ComputeInvoker, busy_policy: BusyPolicy) -> Self {
        Self {
            invoker,
            flight: SingleFlight::new(),
            busy_policy,
            last_primary: Mutex::new(None),
        }
    }

    pub fn busy_policy(&self) -> BusyPolicy {
        self.busy_policy
    }

    pub fn is_busy(&self) -> bool {
        self.flight.is_busy()
    }

    /// Produces a payload for `params`. Always resolves within the
    /// invoker timeout plus a small margin: invoker failures degrade
    /// to the fallback generator, and a busy coordinator answers
    /// immediately per the configured policy.
    pub async fn generate(&self, params: &ParameterSet) -> Result<GeometryPayload, GenerateError> {
        if let Some(payload) = self.cached(params).await {
            tracing::debug!("serving cached primary payload");
            return Ok(payload);
        }

        match self.flight.try_run(self.invoker.invoke(params)).await {
            None => match self.busy_policy {
                BusyPolicy::DegradedFallback => {
                    tracing::info!("generation in progress, serving fallback");
                    self.degraded(params, "generation already in progress, using fallback")
                }
                BusyPolicy::Reject => Err(GenerateError::Busy),
            },
            Some(Ok(payload)) => {
                self.remember(params, &payload).await;
                Ok(payload)
            }
            Some(Err(err)) if err.is_recoverable() => {
                tracing::warn!(error = %err, "external generation failed, serving fallback");
                self.degraded(params, format!("external generation failed ({err}), using fallback"))
            }
            Some(Err(err)) => Err(err),
        }
    }

    fn degraded(
        &self,
        params: &ParameterSet,
        note: impl Into<String>,
    ) -> Result<GeometryPayload, GenerateError> {
        let payload = generate_fallback_with_note(params, note);
        payload.validate()?;
        Ok(payload)
    }

    async fn cached(&self, params: &ParameterSet) -> Option<GeometryPayload> {
        let cache = self.last_primary.lock().await;
        cache
            .as_ref()
            .filter(|cached| cached.params == *params)
            .map(|cached| cached.payload.clone())
    }

    async fn remember(&self, params: &ParameterSet, payload: &GeometryPayload) {
        let mut cache = self.last_primary.lock().await;
        *cache = Some(CachedPayload {
            params: params.clone(),
            payload: payload.clone(),
        });
    }
}
