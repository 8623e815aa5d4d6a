//! Conversation types passed to and from the model.
//!
//! A [`Request`] carries the messages, tool declarations and generation
//! config for one model call. Four roles: system, user, assistant, and
//! tool (a tool-call response). Tool arguments are JSON objects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Message author role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// End-user input (also used for foreign-agent context lines).
    User,
    /// Model output.
    Assistant,
    /// Tool-call response.
    Tool,
}

/// A tool call emitted by the assistant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Discriminator tag.
    #[serde(rename = "type")]
    pub content_type: String,
    /// Unique tool call ID; responses echo the same ID.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Tool arguments (JSON object).
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    /// Create a tool call with the given ID, name, and arguments.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            content_type: "function".into(),
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

impl Default for ToolCall {
    fn default() -> Self {
        Self {
            content_type: "function".into(),
            id: String::new(),
            name: String::new(),
            arguments: Map::new(),
        }
    }
}

/// One message in a conversation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Author role.
    pub role: Role,
    /// Text content. May be empty for pure tool-call messages.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    /// Tool calls attached to an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For `Role::Tool` messages: the originating call ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For `Role::Tool` messages: the tool name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Default for Role {
    fn default() -> Self {
        Self::User
    }
}

impl Message {
    /// System message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            ..Self::default()
        }
    }

    /// User message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            ..Self::default()
        }
    }

    /// Assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            ..Self::default()
        }
    }

    /// Tool-response message for the given call.
    #[must_use]
    pub fn tool_response(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(call_id.into()),
            tool_name: Some(tool_name.into()),
            ..Self::default()
        }
    }

    /// Whether the message carries neither text nor tool calls.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.tool_calls.is_empty() && self.tool_call_id.is_none()
    }
}

/// Declaration of a tool exposed to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Declaration {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON schema of the parameters object.
    pub parameters: Value,
}

impl Declaration {
    /// Create a declaration with an empty object schema.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({"type": "object"}),
        }
    }

    /// Replace the parameter schema.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Generation settings for a model call.
///
/// All fields except `stream` are optional — models use their own
/// defaults when unset. Reasoning fields are written by built-in
/// planners.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Whether the model should stream partial responses.
    pub stream: bool,
    /// Maximum tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Top-p sampling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Stop sequences.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    /// Enable extended thinking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_enabled: Option<bool>,
    /// Thinking budget in tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_tokens: Option<u32>,
    /// Reasoning effort (`"low"`, `"medium"`, `"high"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            stream: true,
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop_sequences: None,
            thinking_enabled: None,
            thinking_tokens: None,
            reasoning_effort: None,
        }
    }
}

/// An in-flight model request assembled by the request processors.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Conversation messages, oldest first.
    pub messages: Vec<Message>,
    /// Tool declarations keyed by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tools: BTreeMap<String, Declaration>,
    /// Generation settings.
    pub generation_config: GenerationConfig,
    /// Structured-output schema forwarded from the invocation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_output_schema: Option<Value>,
}

impl Request {
    /// Mutable access to the leading system message, inserting an empty
    /// one at the front if none exists yet.
    pub fn system_message_mut(&mut self) -> &mut Message {
        if !matches!(self.messages.first(), Some(m) if m.role == Role::System) {
            self.messages.insert(0, Message::system(""));
        }
        &mut self.messages[0]
    }

    /// Append a paragraph to the system message.
    pub fn append_system(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let system = self.system_message_mut();
        if system.content.is_empty() {
            system.content = text.to_owned();
        } else {
            system.content.push_str("\n\n");
            system.content.push_str(text);
        }
    }
}
