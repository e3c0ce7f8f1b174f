//! Chat template registry and conversation formatting.
//!
//! Two templates are recognized: ChatML and Llama-3. Registering one records a
//! default system message for the rest of the process; the dataset loader then
//! resolves the template by kind when it formats conversation datasets.

use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};

/// System message used when a template is registered without one.
pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are a helpful assistant.";

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Role: "system", "user", or "assistant"
    pub role: String,
    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new message.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// Chat templates that can be registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatTemplateType {
    /// ChatML format: <|im_start|>role\ncontent<|im_end|>
    ChatMl,
    /// Llama-3 format: <|start_header_id|>role<|end_header_id|>content<|eot_id|>
    Llama3,
}

impl ChatTemplateType {
    /// All registrable templates.
    pub const ALL: [ChatTemplateType; 2] = [Self::ChatMl, Self::Llama3];

    /// Map a config name to a template. Exact match only; anything else is `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "chatml" => Some(Self::ChatMl),
            "llama3" => Some(Self::Llama3),
            _ => None,
        }
    }

    /// Config name of this template.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ChatMl => "chatml",
            Self::Llama3 => "llama3",
        }
    }

    /// Get the EOS token for this template type.
    pub fn eos_token(&self) -> &'static str {
        match self {
            Self::ChatMl => "<|im_end|>",
            Self::Llama3 => "<|eot_id|>",
        }
    }
}

/// Result of applying a chat template.
#[derive(Debug, Clone)]
pub struct FormattedChat {
    /// The full formatted text.
    pub text: String,
    /// Byte offset where the final response begins.
    pub response_start: usize,
    /// The template type used.
    pub template_type: ChatTemplateType,
}

impl FormattedChat {
    /// Get the prompt portion (before response).
    pub fn prompt(&self) -> &str {
        &self.text[..self.response_start]
    }

    /// Get the response portion.
    pub fn response(&self) -> &str {
        &self.text[self.response_start..]
    }
}

/// A chat template together with its default system message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTemplate {
    /// The template type.
    pub template_type: ChatTemplateType,
    /// Inserted as the first turn when a conversation has no system message.
    pub default_system_message: Option<String>,
}

impl ChatTemplate {
    /// Create a template with no default system message.
    pub fn new(template_type: ChatTemplateType) -> Self {
        Self {
            template_type,
            default_system_message: None,
        }
    }

    /// Set the default system message.
    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        self.default_system_message = Some(message.into());
        self
    }

    /// Format a conversation.
    ///
    /// When the last message is from the user an assistant header is appended so
    /// the formatted prompt ends where generation should begin.
    pub fn apply(&self, messages: &[Message]) -> FormattedChat {
        let messages = self.with_default_system(messages);
        let mut text = String::new();
        let mut response_start = 0;

        if self.template_type == ChatTemplateType::Llama3 {
            text.push_str("<|begin_of_text|>");
        }

        for (i, msg) in messages.iter().enumerate() {
            let header = self.header(&msg.role);
            if msg.role == "assistant" && i == messages.len() - 1 {
                response_start = text.len() + header.len();
            }
            text.push_str(&header);
            match self.template_type {
                ChatTemplateType::ChatMl => {
                    text.push_str(&msg.content);
                    text.push_str("<|im_end|>\n");
                }
                ChatTemplateType::Llama3 => {
                    text.push_str(msg.content.trim());
                    text.push_str("<|eot_id|>");
                }
            }
        }

        if messages.last().is_some_and(|m| m.role == "user") {
            text.push_str(&self.header("assistant"));
            response_start = text.len();
        }

        FormattedChat {
            text,
            response_start,
            template_type: self.template_type,
        }
    }

    fn header(&self, role: &str) -> String {
        match self.template_type {
            ChatTemplateType::ChatMl => format!("<|im_start|>{}\n", role),
            ChatTemplateType::Llama3 => format!("<|start_header_id|>{}<|end_header_id|>\n\n", role),
        }
    }

    fn with_default_system(&self, messages: &[Message]) -> Vec<Message> {
        let has_system = messages.iter().any(|m| m.role == "system");
        match &self.default_system_message {
            Some(system) if !has_system => std::iter::once(Message::system(system.clone()))
                .chain(messages.iter().cloned())
                .collect(),
            _ => messages.to_vec(),
        }
    }
}

type Registry = RwLock<HashMap<ChatTemplateType, ChatTemplate>>;

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a template for the rest of the process.
///
/// Overrides any earlier registration of the same kind, so calling it twice with
/// the same arguments leaves the same state behind.
pub fn register_template(
    template_type: ChatTemplateType,
    default_system_message: Option<&str>,
) -> ChatTemplate {
    let template = ChatTemplate::new(template_type)
        .with_system_message(default_system_message.unwrap_or(DEFAULT_SYSTEM_MESSAGE));
    registry()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(template_type, template.clone());
    tracing::debug!(template = template_type.name(), "Registered chat template");
    template
}

/// The registered template for `template_type`, or the built-in one.
pub fn resolve_template(template_type: ChatTemplateType) -> ChatTemplate {
    registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&template_type)
        .cloned()
        .unwrap_or_else(|| ChatTemplate::new(template_type))
}

/// The default system message recorded for `template_type`, if registered.
pub fn registered_system_message(template_type: ChatTemplateType) -> Option<String> {
    registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&template_type)
        .and_then(|t| t.default_system_message.clone())
}

#[cfg(test)]
pub(crate) fn clear_registry() {
    registry()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
}
