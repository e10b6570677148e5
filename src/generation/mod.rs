//! Generation client.
//!
//! One structured request/response round trip to the external content-generation service.
//! The service sits behind [`GenerationService`] so the pipeline never depends on a concrete
//! endpoint; [`GenerationClient`] adds model selection, resource packaging and typed decoding.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::models::{Resource, ResourceKind};

pub mod openai;
pub mod schema;

pub use schema::ResponseSchema;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub image_urls: Vec<String>,
    pub file_urls: Vec<String>,
    pub schema: ResponseSchema,
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Returns the single JSON object produced for `request`.
    async fn generate(&self, request: GenerationRequest) -> Result<Value>;
}

/// Resource material ready to be attached to a request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Material {
    pub text: String,
    pub image_urls: Vec<String>,
    pub file_urls: Vec<String>,
}

impl Material {
    pub fn from_resources(resources: &[Resource]) -> Self {
        let mut material = Material::default();
        let mut blocks = Vec::new();
        for (i, r) in resources.iter().enumerate() {
            match r.kind {
                ResourceKind::Image => {
                    if let Some(url) = &r.file_url {
                        material.image_urls.push(url.clone());
                    }
                }
                ResourceKind::File | ResourceKind::Text => {
                    if r.kind == ResourceKind::File {
                        if let Some(url) = &r.file_url {
                            material.file_urls.push(url.clone());
                        }
                    }
                    if let Some(text) = r.content.as_deref().filter(|t| !t.trim().is_empty()) {
                        blocks.push(format!("[Resource {}]\n{}", i + 1, text.trim()));
                    }
                }
            }
        }
        material.text = blocks.join("\n\n");
        material
    }
}

#[derive(Clone)]
pub struct GenerationClient {
    service: Arc<dyn GenerationService>,
    text_model: String,
    vision_model: String,
}

impl GenerationClient {
    pub fn new(
        service: Arc<dyn GenerationService>,
        text_model: impl Into<String>,
        vision_model: impl Into<String>,
    ) -> Self {
        Self {
            service,
            text_model: text_model.into(),
            vision_model: vision_model.into(),
        }
    }

    pub fn build_request(
        &self,
        system: &str,
        prompt: String,
        material: Option<&Material>,
        schema: ResponseSchema,
    ) -> GenerationRequest {
        let (image_urls, file_urls) = material
            .map(|m| (m.image_urls.clone(), m.file_urls.clone()))
            .unwrap_or_default();
        let model = if image_urls.is_empty() {
            self.text_model.clone()
        } else {
            self.vision_model.clone()
        };
        GenerationRequest {
            model,
            system: system.to_string(),
            prompt,
            image_urls,
            file_urls,
            schema,
        }
    }

    /// Issue one request and decode the response into `T`.
    pub async fn generate<T: DeserializeOwned>(&self, request: GenerationRequest) -> Result<T> {
        let schema_name = request.schema.name;
        tracing::debug!(schema = schema_name, model = %request.model, "generation request");
        let value = self.service.generate(request).await?;
        serde_json::from_value(value).map_err(|e| {
            PipelineError::validation(format!("{schema_name} response has the wrong shape: {e}"))
        })
    }

    /// Condense `content` to roughly `target_len` characters.
    pub async fn summarize(&self, content: String, target_len: usize) -> Result<String> {
        let prompt = format!(
            "Summarize the following learning material in at most {target_len} characters. \
             Keep the key facts, terms and examples a learner would need.\n\n{content}"
        );
        let request = self.build_request(
            "You condense study material without losing key facts.",
            prompt,
            None,
            schema::summary_schema(),
        );
        let resp: schema::SummaryResponse = self.generate(request).await?;
        Ok(resp.summary)
    }
}
