//! Question answering over retrieved chunks via an OpenAI-compatible
//! chat-completion API.
//!
//! Each turn renders the prompt template with the retrieved context and the
//! question, sends it after the bounded conversation history, and records
//! the question and answer in that history. Once there is history, callers
//! first turn a follow-up into a standalone question
//! ([`ChatClient::standalone_question`]) and retrieve with that.
//!
//! | Provider | Endpoint | Key |
//! |----------|----------|-----|
//! | `openai` | `{url or api.openai.com/v1}/chat/completions` | `OPENAI_API_KEY` |
//! | `azure`  | `{url}/openai/deployments/{deployment}/chat/completions` | `AZURE_OPENAI_API_KEY` |

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use docs_qa_core::models::ScoredChunk;

use crate::config::LlmConfig;
use crate::embedding::{azure_url, env_key, http_client, OPENAI_BASE_URL};
use crate::retry::{post_json_with_retry, JsonRequest};

/// Prompt used when `llm.prompt_template` is not set.
pub const DEFAULT_PROMPT: &str = "You are a helpful assistant answering questions about the \
documentation excerpts below. Answer using only this context. If the context does not \
contain the answer, say \"I don't know\" instead of making one up.

Context:
{context}

Question: {question}

Answer:";

/// Prompt used to rewrite a follow-up question before retrieval.
pub const CONDENSE_PROMPT: &str = "Given the following conversation and a follow-up question, \
rephrase the follow-up question to be a standalone question. Reply with the question only.

Chat history:
{history}

Follow-up question: {question}

Standalone question:";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// The model's answer plus the citations of the chunks it was given.
#[derive(Debug, Clone, Serialize)]
pub struct ChatAnswer {
    pub answer: String,
    pub sources: Vec<String>,
}

pub struct ChatClient {
    client: reqwest::Client,
    service: &'static str,
    url: String,
    headers: Vec<(&'static str, String)>,
    /// Sent in the body for OpenAI; Azure selects the model by deployment.
    model: Option<String>,
    temperature: f32,
    max_retries: u32,
    template: String,
    max_history: usize,
    history: VecDeque<ChatMessage>,
}

impl ChatClient {
    /// Build a client from config, or `None` when the LLM is disabled.
    pub fn from_config(config: &LlmConfig) -> Result<Option<Self>> {
        if !config.is_enabled() {
            return Ok(None);
        }
        Self::new(config).map(Some)
    }

    pub fn new(config: &LlmConfig) -> Result<Self> {
        let (service, url, headers, model) = match config.provider.as_str() {
            "openai" => {
                let base = config.url.as_deref().unwrap_or(OPENAI_BASE_URL);
                let model = config
                    .model
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("llm.model required for OpenAI provider"))?;
                (
                    "OpenAI",
                    format!("{}/chat/completions", base.trim_end_matches('/')),
                    vec![(
                        "Authorization",
                        format!("Bearer {}", env_key("OPENAI_API_KEY")?),
                    )],
                    Some(model),
                )
            }
            "azure" => {
                let endpoint = config
                    .url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("llm.url required for Azure OpenAI provider"))?;
                let deployment = config
                    .deployment
                    .as_deref()
                    .or(config.model.as_deref())
                    .ok_or_else(|| {
                        anyhow::anyhow!("llm.deployment or llm.model required for Azure OpenAI")
                    })?;
                (
                    "Azure OpenAI",
                    azure_url(endpoint, deployment, "chat/completions", &config.api_version),
                    vec![("api-key", env_key("AZURE_OPENAI_API_KEY")?)],
                    None,
                )
            }
            "disabled" => bail!("LLM is disabled (llm.provider = \"disabled\")"),
            other => bail!("Unknown llm provider: '{}'", other),
        };

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            service,
            url,
            headers,
            model,
            temperature: config.temperature,
            max_retries: config.max_retries,
            template: config
                .prompt_template
                .clone()
                .unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
            max_history: config.max_history,
            history: VecDeque::new(),
        })
    }

    pub fn history(&self) -> impl Iterator<Item = &ChatMessage> {
        self.history.iter()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Answer `question` from the retrieved `hits`.
    ///
    /// History is only extended after a successful completion.
    pub async fn answer(&mut self, question: &str, hits: &[ScoredChunk]) -> Result<ChatAnswer> {
        let question = question.trim();
        if question.is_empty() {
            bail!("question must not be empty");
        }

        let prompt = render_prompt(&self.template, &format_context(hits), question);
        let answer = self.complete(self.outgoing_messages(prompt)).await?;

        push_bounded(
            &mut self.history,
            ChatMessage::new("user", question),
            self.max_history,
        );
        push_bounded(
            &mut self.history,
            ChatMessage::new("assistant", answer.clone()),
            self.max_history,
        );

        tracing::debug!(
            sources = hits.len(),
            history = self.history.len(),
            "chat turn completed"
        );

        Ok(ChatAnswer {
            answer,
            sources: citations(hits),
        })
    }

    /// Rewrite a follow-up question into one that stands on its own, using
    /// the conversation so far. Without history the question is returned
    /// as is and no request is made.
    pub async fn standalone_question(&self, question: &str) -> Result<String> {
        let question = question.trim();
        if self.history.is_empty() || question.is_empty() {
            return Ok(question.to_string());
        }

        let prompt = condense_prompt(&self.history, question);
        let rewritten = self
            .complete(vec![ChatMessage::new("user", prompt)])
            .await?;
        if rewritten.is_empty() {
            return Ok(question.to_string());
        }
        tracing::debug!(original = question, standalone = %rewritten, "condensed follow-up");
        Ok(rewritten)
    }

    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let mut body = serde_json::json!({
            "messages": messages,
            "temperature": self.temperature,
        });
        if let Some(model) = &self.model {
            body["model"] = serde_json::Value::String(model.clone());
        }

        let request = JsonRequest {
            service: self.service,
            url: &self.url,
            headers: self.headers.clone(),
            body: &body,
        };
        let json = post_json_with_retry(&self.client, &request, self.max_retries).await?;
        parse_chat_response(&json)
    }

    fn outgoing_messages(&self, prompt: String) -> Vec<ChatMessage> {
        let mut messages: Vec<ChatMessage> = self.history.iter().cloned().collect();
        messages.push(ChatMessage::new("user", prompt));
        messages
    }
}

fn push_bounded(history: &mut VecDeque<ChatMessage>, message: ChatMessage, max: usize) {
    history.push_back(message);
    while history.len() > max {
        history.pop_front();
    }
}

/// Substitute `{context}` and `{question}` in one left-to-right pass, so
/// placeholder text inside either value is left alone.
pub fn render_prompt(template: &str, context: &str, question: &str) -> String {
    fill_placeholders(template, &[("{context}", context), ("{question}", question)])
}

/// Prompt asking the model to turn a follow-up into a standalone question.
pub fn condense_prompt(history: &VecDeque<ChatMessage>, question: &str) -> String {
    fill_placeholders(
        CONDENSE_PROMPT,
        &[("{history}", &format_history(history)), ("{question}", question)],
    )
}

fn format_history(history: &VecDeque<ChatMessage>) -> String {
    history
        .iter()
        .map(|m| {
            let speaker = if m.role == "assistant" { "Assistant" } else { "User" };
            format!("{}: {}", speaker, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn fill_placeholders(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    loop {
        let next = values
            .iter()
            .filter_map(|(token, value)| rest.find(token).map(|at| (at, *token, *value)))
            .min_by_key(|(at, _, _)| *at);
        match next {
            Some((at, token, value)) => {
                out.push_str(&rest[..at]);
                out.push_str(value);
                rest = &rest[at + token.len()..];
            }
            None => {
                out.push_str(rest);
                return out;
            }
        }
    }
}

/// Join retrieved chunks into the prompt context, each under its citation.
pub fn format_context(hits: &[ScoredChunk]) -> String {
    hits.iter()
        .map(|hit| format!("[{}]\n{}", hit.chunk.citation(), hit.chunk.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn citations(hits: &[ScoredChunk]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for hit in hits {
        let citation = hit.chunk.citation();
        if !sources.contains(&citation) {
            sources.push(citation);
        }
    }
    sources
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing choices[0].message.content"))
}
