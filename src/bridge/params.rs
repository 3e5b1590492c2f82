//! Named host parameters.
//!
//! Host calls arrive as JSON objects with camelCase keys. The names used by
//! the first mobile plugin release (`nThreads`, `nCtx`, `nPredict`, `url`,
//! `filename`) are accepted as aliases. Validation happens here, before a
//! call reaches the command queue.

use serde::Deserialize;

use crate::config::{GenerationConfig, ModelConfig};
use crate::download::DownloadRequest;
use crate::error::BridgeError;
use crate::inference::lifecycle::{GenerateRequest, LoadRequest};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadModelParams {
    pub model_path: Option<String>,
    #[serde(alias = "nThreads")]
    pub thread_count: Option<u32>,
    #[serde(alias = "nCtx")]
    pub context_size: Option<u32>,
}

impl LoadModelParams {
    pub fn new(model_path: impl Into<String>) -> Self {
        Self {
            model_path: Some(model_path.into()),
            ..Default::default()
        }
    }

    pub fn into_request(self, defaults: &ModelConfig) -> Result<LoadRequest, BridgeError> {
        let model_path = self
            .model_path
            .filter(|p| !p.is_empty())
            .ok_or(BridgeError::MissingParameter("modelPath"))?;

        Ok(LoadRequest {
            model_path,
            thread_count: at_least_one("threadCount", self.thread_count.unwrap_or(defaults.thread_count))?,
            context_size: at_least_one("contextSize", self.context_size.unwrap_or(defaults.context_size))?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateParams {
    pub prompt: Option<String>,
    #[serde(alias = "nPredict")]
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl GenerateParams {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Default::default()
        }
    }

    /// A missing prompt is not rejected here: the worker reports
    /// `ModelNotLoaded` ahead of `MissingPrompt`.
    pub fn into_request(self, defaults: &GenerationConfig) -> Result<GenerateRequest, BridgeError> {
        let temperature = self.temperature.unwrap_or(defaults.temperature);
        if !temperature.is_finite() || temperature < 0.0 {
            return Err(BridgeError::InvalidParameter {
                name: "temperature",
                reason: format!("must be a finite value >= 0, got {temperature}"),
            });
        }

        Ok(GenerateRequest {
            prompt: self.prompt.unwrap_or_default(),
            max_tokens: at_least_one("maxTokens", self.max_tokens.unwrap_or(defaults.max_tokens))?,
            temperature,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadModelParams {
    #[serde(alias = "url")]
    pub source_url: Option<String>,
    #[serde(alias = "filename")]
    pub destination_name: Option<String>,
}

impl DownloadModelParams {
    pub fn new(source_url: impl Into<String>, destination_name: impl Into<String>) -> Self {
        Self {
            source_url: Some(source_url.into()),
            destination_name: Some(destination_name.into()),
        }
    }

    pub fn into_request(self) -> Result<DownloadRequest, BridgeError> {
        let source_url = self
            .source_url
            .filter(|u| !u.is_empty())
            .ok_or(BridgeError::MissingParameter("sourceUrl"))?;
        let destination_name = self
            .destination_name
            .filter(|d| !d.is_empty())
            .ok_or(BridgeError::MissingParameter("destinationName"))?;

        Ok(DownloadRequest {
            source_url,
            destination_name,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelExistsParams {
    pub model_path: Option<String>,
}

impl ModelExistsParams {
    pub fn new(model_path: impl Into<String>) -> Self {
        Self {
            model_path: Some(model_path.into()),
        }
    }

    pub fn into_path(self) -> Result<String, BridgeError> {
        self.model_path
            .filter(|p| !p.is_empty())
            .ok_or(BridgeError::MissingParameter("modelPath"))
    }
}

fn at_least_one(name: &'static str, value: u32) -> Result<u32, BridgeError> {
    if value == 0 {
        return Err(BridgeError::InvalidParameter {
            name,
            reason: "must be >= 1".to_string(),
        });
    }
    Ok(value)
}
