use async_trait::async_trait;

pub mod gemini;

pub use gemini::GeminiClient;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl SamplingParams {
    /// Fixed parameters used for script generation.
    pub const SCRIPT: SamplingParams = SamplingParams {
        temperature: 0.7,
        top_p: 0.95,
        top_k: 40,
        max_output_tokens: 8192,
    };
}

/// A generative-text service: one prompt in, free text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// `None` leaves sampling to the service defaults.
    async fn generate(&self, prompt: &str, params: Option<SamplingParams>)
    -> crate::error::Result<String>;
}
