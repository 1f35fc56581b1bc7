//! Generation trait and the timeout wrapper every caller goes through.

use crate::adaptation::{Directive, Tone};
use crate::error::{GenerationError, Result};

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Style knobs derived from the adaptation directive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StyleHints {
    pub tone: Tone,
    pub energy: f32,
    pub humor: f32,
    pub formality: f32,
    pub empathy: f32,
}

impl StyleHints {
    pub fn from_directive(directive: &Directive) -> Self {
        Self {
            tone: directive.tone,
            energy: directive.energy,
            humor: directive.humor,
            formality: directive.formality,
            empathy: directive.empathy,
        }
    }

    /// Sampling temperature: livelier and funnier means hotter.
    pub fn temperature(&self) -> f32 {
        (0.5 + 0.3 * self.energy + 0.3 * self.humor - 0.2 * self.formality).clamp(0.2, 1.2)
    }
}

impl Default for StyleHints {
    fn default() -> Self {
        Self::from_directive(&Directive::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub style: StyleHints,
}

/// Anything that can turn prompts into a reply.
///
/// `Ok(None)` means the collaborator had nothing to say; errors and
/// timeouts are treated the same way by the caller.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Identifies the model in response cache keys.
    fn model_tag(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<Option<String>>;
}

/// Call `generator` once with a deadline. Failures, timeouts and blank
/// output all come back as `None`; generation is never retried.
pub async fn generate_with_timeout(
    generator: &dyn Generator,
    request: &GenerationRequest,
    timeout: Duration,
) -> Option<String> {
    let outcome = match tokio::time::timeout(timeout, generator.generate(request)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(GenerationError::Timeout {
            seconds: timeout.as_secs(),
        }
        .into()),
    };

    match outcome {
        Ok(Some(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Ok(_) => {
            tracing::debug!(model = generator.model_tag(), "generation returned nothing");
            None
        }
        Err(error) => {
            tracing::warn!(%error, model = generator.model_tag(), "generation failed, using fallback");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Option<&'static str>);

    #[async_trait]
    impl Generator for Fixed {
        fn model_tag(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<Option<String>> {
            Ok(self.0.map(str::to_string))
        }
    }

    struct Slow;

    #[async_trait]
    impl Generator for Slow {
        fn model_tag(&self) -> &str {
            "slow"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<Option<String>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Some("too late".into()))
        }
    }

    struct Broken;

    #[async_trait]
    impl Generator for Broken {
        fn model_tag(&self) -> &str {
            "broken"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<Option<String>> {
            Err(GenerationError::Request("502 bad gateway".into()).into())
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            system_prompt: "system".into(),
            user_prompt: "user".into(),
            style: StyleHints::default(),
        }
    }

    #[tokio::test]
    async fn trims_successful_output() {
        let text = generate_with_timeout(&Fixed(Some("  привет  ")), &request(), Duration::from_secs(1)).await;
        assert_eq!(text.as_deref(), Some("привет"));
    }

    #[tokio::test]
    async fn blank_error_and_timeout_are_all_none() {
        let timeout = Duration::from_millis(50);
        assert_eq!(generate_with_timeout(&Fixed(Some("   ")), &request(), timeout).await, None);
        assert_eq!(generate_with_timeout(&Fixed(None), &request(), timeout).await, None);
        assert_eq!(generate_with_timeout(&Broken, &request(), timeout).await, None);
        assert_eq!(generate_with_timeout(&Slow, &request(), timeout).await, None);
    }

    #[test]
    fn temperature_follows_style() {
        let calm = StyleHints {
            tone: Tone::Calming,
            energy: 0.0,
            humor: 0.0,
            formality: 1.0,
            empathy: 0.8,
        };
        let lively = StyleHints {
            tone: Tone::Playful,
            energy: 1.0,
            humor: 1.0,
            formality: 0.0,
            empathy: 0.5,
        };
        assert!(calm.temperature() < lively.temperature());
        assert!((0.2..=1.2).contains(&lively.temperature()));
    }
}
