//! The extraction backend a batch runs against.

use std::sync::Arc;

use lectern_council::Council;
use lectern_provider::{
    ExtractionRequest, ExtractionResult, Provider, ProviderError, Result, RetryPolicy,
};

/// A single provider or a council of providers.
#[derive(Clone)]
pub enum Backend {
    Single(Arc<dyn Provider>),
    Council(Arc<Council>),
}

impl Backend {
    pub fn single(provider: impl Provider + 'static) -> Self {
        Self::Single(Arc::new(provider))
    }

    pub fn council(council: Council) -> Self {
        Self::Council(Arc::new(council))
    }

    pub fn name(&self) -> String {
        match self {
            Self::Single(provider) => provider.name().to_string(),
            Self::Council(council) => council.name(),
        }
    }

    /// Run one extraction, retrying transient failures under `retry`.
    ///
    /// A single provider is retried as a whole. A council retries each member
    /// on its own, so one flaky member does not cost the others' answers.
    /// Unsuccessful results become errors so the policy sees every failure.
    pub async fn extract(
        &self,
        request: &ExtractionRequest,
        retry: &RetryPolicy,
    ) -> Result<ExtractionResult> {
        match self {
            Self::Single(provider) => {
                retry
                    .execute(|| async move {
                        let result = provider.extract(request).await?;
                        if result.success && result.payload.is_some() {
                            Ok(result)
                        } else {
                            Err(ProviderError::other(
                                result
                                    .error
                                    .unwrap_or_else(|| "provider returned no payload".to_string()),
                            ))
                        }
                    })
                    .await
            }
            Self::Council(council) => council
                .extract_with_retry(request, retry)
                .await
                .into_extraction_result(council.name()),
        }
    }

    pub fn estimate_cost(&self, text_length: usize) -> f64 {
        match self {
            Self::Single(provider) => provider.estimate_cost(text_length),
            Self::Council(council) => council.estimate_cost(text_length),
        }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Backend").field(&self.name()).finish()
    }
}

impl From<Arc<dyn Provider>> for Backend {
    fn from(provider: Arc<dyn Provider>) -> Self {
        Self::Single(provider)
    }
}

impl From<Council> for Backend {
    fn from(council: Council) -> Self {
        Self::council(council)
    }
}
