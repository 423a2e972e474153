//! Generation request and summary types.

use std::fmt;

use peer_runtime::Metrics;
use serde::{Deserialize, Serialize};

/// Parameters for one generation run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Prepended to the prompt, separated by a blank line, when non-empty.
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i32,
    pub max_tokens: usize,
    /// Checked in this order; the first stop matching the output tail wins.
    pub stops: Vec<String>,
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            system_prompt: None,
            temperature: 0.8,
            top_p: 0.9,
            top_k: 40,
            max_tokens: 512,
            stops: Vec::new(),
        }
    }
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p;
        self
    }

    pub fn with_top_k(mut self, top_k: i32) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_stop(mut self, stop: impl Into<String>) -> Self {
        self.stops.push(stop.into());
        self
    }

    /// The text actually tokenized.
    pub fn full_prompt(&self) -> String {
        match self.system_prompt.as_deref() {
            Some(system) if !system.is_empty() => format!("{system}\n\n{}", self.prompt),
            _ => self.prompt.clone(),
        }
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    None,
    Eos,
    StopSequence,
    MaxTokens,
    Error,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::None => "none",
            StopReason::Eos => "eos",
            StopReason::StopSequence => "stop_sequence",
            StopReason::MaxTokens => "max_tokens",
            StopReason::Error => "error",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one run, committed into the session when the run ends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationSummary {
    pub metrics: Metrics,
    pub reason: StopReason,
    /// Empty unless `reason` is [`StopReason::StopSequence`].
    pub stop_sequence: String,
    pub success: bool,
    /// The run was ended by an abort request. `reason` is still `Error`.
    pub cancelled: bool,
}

impl GenerationSummary {
    pub(crate) fn failed() -> Self {
        Self {
            reason: StopReason::Error,
            ..Self::default()
        }
    }
}

/// Buffered generation result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    /// Everything delivered before the run ended, including partial output of a failed run.
    pub text: String,
    pub summary: GenerationSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults() {
        let req = GenerationRequest::default();
        assert_eq!(req.temperature, 0.8);
        assert_eq!(req.top_p, 0.9);
        assert_eq!(req.top_k, 40);
        assert_eq!(req.max_tokens, 512);
        assert!(req.stops.is_empty());
    }

    #[test]
    fn system_prompt_is_joined_with_blank_line() {
        let req = GenerationRequest::new("Hi").with_system_prompt("Be brief.");
        assert_eq!(req.full_prompt(), "Be brief.\n\nHi");
        assert_eq!(GenerationRequest::new("Hi").full_prompt(), "Hi");
        assert_eq!(
            GenerationRequest::new("Hi").with_system_prompt("").full_prompt(),
            "Hi"
        );
    }

    #[test]
    fn stop_reason_strings() {
        assert_eq!(StopReason::StopSequence.to_string(), "stop_sequence");
        assert_eq!(StopReason::MaxTokens.as_str(), "max_tokens");
        assert_eq!(
            serde_json::to_string(&StopReason::Eos).unwrap(),
            "\"eos\""
        );
        assert_eq!(StopReason::default(), StopReason::None);
    }
}
