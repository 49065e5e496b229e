//! Backend dispatcher - routes a job to a backend family, retries, post-processes

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backend::alternate::AlternateProvider;
use crate::backend::generation_server::GenerationServerClient;
use crate::backend::models::{self, BackendFamily, ModelInfo};
use crate::backend::traits::{BackendRequest, GeneratedImage, Generator, ImageBackend, Job};
use crate::config::DispatchConfig;
use crate::error::{AppError, Result};
use crate::gateway::ServerRegistry;
use crate::pipeline::{watermark_for, Pipeline, Provenance};

/// Calls generation backends on behalf of admitted jobs
pub struct Dispatcher {
    registry: Arc<ServerRegistry>,
    servers: GenerationServerClient,
    alternate: Option<Arc<dyn ImageBackend>>,
    pipeline: Pipeline,
    max_attempts: u32,
    backoff: Duration,
    safety_delay: Duration,
}

impl Dispatcher {
    /// Create a dispatcher from configuration
    pub fn new(registry: Arc<ServerRegistry>, config: &DispatchConfig) -> Result<Self> {
        let alternate = match &config.alternate_url {
            Some(url) => {
                let provider = AlternateProvider::new(url.clone(), config.alternate_api_key.clone(), config.timeout_ms)?;
                Some(Arc::new(provider) as Arc<dyn ImageBackend>)
            }
            None => None,
        };

        Ok(Self {
            registry,
            servers: GenerationServerClient::new(config.timeout_ms)?,
            alternate,
            pipeline: Pipeline::default(),
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
            safety_delay: Duration::from_secs(config.safety_delay_secs),
        })
    }

    /// Replace the post-processing collaborators
    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Replace the alternate-family backend
    pub fn with_alternate(mut self, backend: Arc<dyn ImageBackend>) -> Self {
        self.alternate = Some(backend);
        self
    }

    /// Call registry-selected servers, moving to another server after each
    /// failure and backing off `attempt * backoff` between attempts
    async fn generate_on_servers(&self, request: &BackendRequest) -> Result<GeneratedImage> {
        let mut failed: Vec<String> = Vec::new();
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            // An empty registry is terminal for this job, not retried here
            let server = self.registry.select_server_excluding(&failed).await?;
            let permit = server.acquire().await?;

            match self.servers.generate(permit.url(), request).await {
                Ok(image) => {
                    debug!(server = %permit.url(), attempt, "Generation succeeded");
                    return Ok(image);
                }
                Err(e) => {
                    warn!(
                        server = %permit.url(),
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Generation attempt failed"
                    );
                    last_error = e.to_string();
                    failed.push(permit.url().to_string());
                }
            }
            drop(permit);

            if attempt < self.max_attempts {
                tokio::time::sleep(self.backoff * attempt).await;
            }
        }

        Err(AppError::BackendUnavailable {
            attempts: self.max_attempts,
            last_error,
        })
    }

    async fn render(&self, model: &ModelInfo, request: &BackendRequest) -> Result<GeneratedImage> {
        match (model.family, &self.alternate) {
            (BackendFamily::Alternate, Some(provider)) => {
                provider
                    .generate(request)
                    .await
                    .map_err(|e| AppError::BackendUnavailable {
                        attempts: 1,
                        last_error: e.to_string(),
                    })
            }
            (family, _) => {
                if family == BackendFamily::Alternate {
                    warn!(model = %model.name, "No alternate provider configured, using generation servers");
                }
                let (width, height) = model.native_size(request.width, request.height);
                let native = BackendRequest {
                    width,
                    height,
                    ..request.clone()
                };
                self.generate_on_servers(&native).await
            }
        }
    }
}

#[async_trait]
impl Generator for Dispatcher {
    async fn generate(&self, job: &Job) -> Result<GeneratedImage> {
        let params = &job.params;
        let model = models::lookup(&params.model);

        let prompt = if params.enhance {
            self.pipeline.enhancer.enhance(&job.prompt, params.seed).await?
        } else {
            job.prompt.clone()
        };

        let request = BackendRequest {
            prompt,
            negative_prompt: params.negative_prompt.clone(),
            width: params.width,
            height: params.height,
            seed: params.seed,
            model: model.name.to_string(),
        };

        let generated = self.render(model, &request).await?;
        let maturity = generated.maturity;

        let provenance = Provenance::new(&job.prompt, params, &request);
        let watermark = watermark_for(model, maturity, params.nologo);
        let bytes = self
            .pipeline
            .post_process(generated.bytes, watermark, params.width, params.height, &provenance)
            .await?;

        if maturity.is_child && maturity.is_mature {
            warn!(job = %job.id, delay_secs = self.safety_delay.as_secs(), "Delaying flagged result");
            tokio::time::sleep(self.safety_delay).await;
        }

        info!(
            job = %job.id,
            model = %model.name,
            size = bytes.len(),
            mature = maturity.is_mature,
            "Job generated"
        );

        Ok(GeneratedImage { bytes, maturity })
    }
}
