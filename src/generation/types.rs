// Generation request/response types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::config::constants::DEFAULT_GENERATION_TIMEOUT_SECS;

/// A single chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Free-text generation request
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub timeout: Duration,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            temperature: 0.7,
            timeout: Duration::from_secs(DEFAULT_GENERATION_TIMEOUT_SECS),
        }
    }

    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Chat messages for this request (system first, if any)
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(self.prompt.clone()));
        messages
    }
}

/// A named JSON schema for structured output
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredSchema {
    pub name: String,
    pub schema: Value,
}

impl StructuredSchema {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }
}

/// Raw structured reply: either a value, or the reason the service refused.
///
/// Services must refuse rather than invent output when the schema cannot be met.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredReply {
    pub value: Option<Value>,
    pub refusal: Option<String>,
}

impl StructuredReply {
    pub fn value(value: Value) -> Self {
        Self {
            value: Some(value),
            refusal: None,
        }
    }

    pub fn refused(reason: impl Into<String>) -> Self {
        Self {
            value: None,
            refusal: Some(reason.into()),
        }
    }
}
