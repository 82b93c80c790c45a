use std::time::Duration;

use async_trait::async_trait;
use dbrowse_core::chat::{ChatAssistant, ChatMessage};
use dbrowse_core::data_access::DataAccessError;
use serde::{Deserialize, Serialize};

/// Chat assistant backed by a local Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaAssistant {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

impl OllamaAssistant {
    pub fn new(endpoint: &str) -> Result<Self, DataAccessError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(to_access_error)?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.endpoint)
    }
}

#[async_trait]
impl ChatAssistant for OllamaAssistant {
    async fn list_models(&self) -> Result<Vec<String>, DataAccessError> {
        let response = self
            .client
            .get(self.url("api/tags"))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(to_access_error)?;
        let tags = response
            .json::<TagsResponse>()
            .await
            .map_err(to_access_error)?;
        Ok(tags.models.into_iter().map(|model| model.name).collect())
    }

    async fn send(
        &self,
        model: &str,
        conversation: &[ChatMessage],
    ) -> Result<String, DataAccessError> {
        let request = ChatRequest {
            model,
            messages: conversation,
            stream: false,
        };
        tracing::debug!(model, messages = conversation.len(), "sending chat request");
        let response = self
            .client
            .post(self.url("api/chat"))
            .json(&request)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(to_access_error)?;
        let reply = response
            .json::<ChatResponse>()
            .await
            .map_err(to_access_error)?;
        Ok(reply.message.content)
    }
}

fn to_access_error(error: reqwest::Error) -> DataAccessError {
    DataAccessError::backend(error.to_string())
}

#[cfg(test)]
mod tests {
    use dbrowse_core::chat::{ChatMessage, ChatRole};

    use super::{ChatRequest, ChatResponse, OllamaAssistant, TagsResponse};

    #[test]
    fn endpoint_trailing_slash_is_trimmed() {
        let assistant = OllamaAssistant::new("http://localhost:11434/").expect("client");
        assert_eq!(assistant.url("api/tags"), "http://localhost:11434/api/tags");
    }

    #[test]
    fn chat_request_uses_ollama_shape() {
        let messages = vec![ChatMessage::system("schema"), ChatMessage::user("count users")];
        let request = ChatRequest {
            model: "llama3",
            messages: &messages,
            stream: false,
        };
        let body = serde_json::to_value(&request).expect("serializable request");
        assert_eq!(body["model"], "llama3");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "count users");
    }

    #[test]
    fn responses_parse() {
        let tags: TagsResponse =
            serde_json::from_str(r#"{"models":[{"name":"llama3:8b","size":1},{"name":"qwen"}]}"#)
                .expect("tags parse");
        let names = tags
            .models
            .into_iter()
            .map(|model| model.name)
            .collect::<Vec<_>>();
        assert_eq!(names, ["llama3:8b", "qwen"]);

        let reply: ChatResponse = serde_json::from_str(
            r#"{"model":"llama3","message":{"role":"assistant","content":"SELECT 1"},"done":true}"#,
        )
        .expect("chat parse");
        assert_eq!(reply.message.role, ChatRole::Assistant);
        assert_eq!(reply.message.content, "SELECT 1");
    }
}
