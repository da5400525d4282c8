//! AnythingLLM-compatible generation client.

use super::generation::{CodeGenerator, GeneratedText, GenerationRequest};
use crate::config::{ChatMode, ModelOverrides, WorkflowConfig, API_KEY_ENV};
use crate::errors::GenerationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(5);
const CHAT_TIMEOUT: Duration = Duration::from_secs(600);

/// Models and agent support reported for a workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceInfo {
    /// Workspace slug.
    pub slug: String,
    /// Default chat model.
    #[serde(default)]
    pub chat_model: Option<String>,
    /// Default agent model.
    #[serde(default)]
    pub agent_model: Option<String>,
    /// Agent provider; agent mode is unavailable without one.
    #[serde(default)]
    pub agent_provider: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkspaceList {
    #[serde(default)]
    workspaces: Vec<WorkspaceInfo>,
}

/// Client for a workspace on an AnythingLLM server.
#[derive(Debug, Clone)]
pub struct AnythingLlmClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    workspace: WorkspaceInfo,
    mode: ChatMode,
    overrides: ModelOverrides,
}

impl AnythingLlmClient {
    /// Checks the server is up and the workspace exists, then returns a
    /// client bound to it.
    ///
    /// Agent mode falls back to chat when the workspace has no agent
    /// provider.
    pub async fn connect(config: &WorkflowConfig) -> Result<Self, GenerationError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| GenerationError::new(format!("{API_KEY_ENV} is not set")))?;
        let api_base = config.api_base.trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .timeout(CHAT_TIMEOUT)
            .build()?;

        http.get(format!("{api_base}/api/docs"))
            .timeout(AVAILABILITY_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        info!(api_base = %api_base, "Generation service reachable");

        let list: WorkspaceList = http
            .get(format!("{api_base}/api/v1/workspaces"))
            .bearer_auth(&api_key)
            .timeout(AVAILABILITY_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let workspace = find_workspace(list.workspaces, &config.workspace)?;
        let mode = effective_mode(config.mode, &workspace);
        info!(
            workspace = %workspace.slug,
            mode = %mode,
            chat_model = ?workspace.chat_model,
            agent_provider = ?workspace.agent_provider,
            "Workspace ready"
        );

        Ok(Self {
            http,
            api_base,
            api_key,
            workspace,
            mode,
            overrides: config.models.clone(),
        })
    }

    /// Mode actually used for requests.
    #[must_use]
    pub const fn mode(&self) -> ChatMode {
        self.mode
    }

    /// The bound workspace.
    #[must_use]
    pub const fn workspace(&self) -> &WorkspaceInfo {
        &self.workspace
    }

    fn requested_model(&self, request: &GenerationRequest) -> Option<String> {
        request.model.clone().or_else(|| match self.mode {
            ChatMode::Chat => self.overrides.chat.clone(),
            ChatMode::Agent => self.overrides.agent.clone(),
        })
    }
}

#[async_trait]
impl CodeGenerator for AnythingLlmClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedText, GenerationError> {
        let model = self.requested_model(&request);
        let mut payload = serde_json::json!({
            "message": request.prompt,
            "mode": self.mode.as_str(),
        });
        if let Some(model) = &model {
            payload["model"] = Value::String(model.clone());
        }

        let url = format!("{}/api/v1/workspace/{}/chat", self.api_base, self.workspace.slug);
        debug!(url = %url, mode = %self.mode, model = ?model, language = %request.language, "Sending prompt");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::new(format!("HTTP {status}: {body}")).with_status(status.as_u16()));
        }
        let body: Value = response.json().await?;

        let text = response_text(&body)?;
        let model_used = resolve_model(&body, &self.workspace, self.mode, model.as_deref());
        info!(model = %model_used, chars = text.len(), "Generation complete");
        Ok(GeneratedText {
            text,
            model: model_used,
        })
    }
}

fn find_workspace(workspaces: Vec<WorkspaceInfo>, slug: &str) -> Result<WorkspaceInfo, GenerationError> {
    let available: Vec<String> = workspaces.iter().map(|w| w.slug.clone()).collect();
    workspaces
        .into_iter()
        .find(|w| w.slug == slug)
        .ok_or_else(|| {
            GenerationError::new(format!(
                "workspace '{slug}' not found (available: {})",
                available.join(", ")
            ))
        })
}

fn effective_mode(requested: ChatMode, workspace: &WorkspaceInfo) -> ChatMode {
    let has_provider = workspace
        .agent_provider
        .as_deref()
        .is_some_and(|p| !p.is_empty());
    if requested == ChatMode::Agent && !has_provider {
        warn!(workspace = %workspace.slug, "No agent provider configured, falling back to chat mode");
        return ChatMode::Chat;
    }
    requested
}

/// Extracts `textResponse`, treating an `error` field as failure.
fn response_text(body: &Value) -> Result<String, GenerationError> {
    match body.get("error") {
        None | Some(Value::Null | Value::Bool(false)) => {}
        Some(Value::String(s)) if s.is_empty() => {}
        Some(err) => {
            let message = err.as_str().map_or_else(|| err.to_string(), ToString::to_string);
            return Err(GenerationError::new(format!("service error: {message}")));
        }
    }
    body.get("textResponse")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| GenerationError::new("response has no textResponse"))
}

/// Model that served a response: reported metrics, then the response's
/// chat model, then the workspace default for the mode, then the request.
fn resolve_model(body: &Value, workspace: &WorkspaceInfo, mode: ChatMode, requested: Option<&str>) -> String {
    let reported = body
        .pointer("/metrics/model")
        .and_then(Value::as_str)
        .or_else(|| body.get("chatModel").and_then(Value::as_str))
        .filter(|m| !m.is_empty())
        .map(ToString::to_string);
    let workspace_default = match mode {
        ChatMode::Chat => workspace.chat_model.clone(),
        ChatMode::Agent => workspace.agent_model.clone(),
    };
    reported
        .or(workspace_default)
        .or_else(|| requested.map(ToString::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workspace(provider: Option<&str>) -> WorkspaceInfo {
        WorkspaceInfo {
            slug: "development".to_string(),
            chat_model: Some("llama3".to_string()),
            agent_model: Some("qwen-agent".to_string()),
            agent_provider: provider.map(ToString::to_string),
        }
    }

    #[test]
    fn test_workspace_list_parsing() {
        let list: WorkspaceList = serde_json::from_value(json!({
            "workspaces": [
                {"slug": "other", "chatModel": null},
                {"slug": "development", "chatModel": "llama3", "agentProvider": "ollama"}
            ]
        }))
        .unwrap();
        let ws = find_workspace(list.workspaces, "development").unwrap();
        assert_eq!(ws.chat_model.as_deref(), Some("llama3"));
        assert_eq!(ws.agent_provider.as_deref(), Some("ollama"));
    }

    #[test]
    fn test_missing_workspace_lists_available() {
        let err = find_workspace(vec![workspace(None)], "prod").unwrap_err();
        assert!(err.message.contains("development"));
    }

    #[test]
    fn test_agent_mode_falls_back_without_provider() {
        assert_eq!(effective_mode(ChatMode::Agent, &workspace(None)), ChatMode::Chat);
        assert_eq!(
            effective_mode(ChatMode::Agent, &workspace(Some("ollama"))),
            ChatMode::Agent
        );
        assert_eq!(effective_mode(ChatMode::Chat, &workspace(Some("ollama"))), ChatMode::Chat);
    }

    #[test]
    fn test_response_text() {
        assert_eq!(
            response_text(&json!({"textResponse": "print(1)", "error": null})).unwrap(),
            "print(1)"
        );
        assert!(response_text(&json!({"textResponse": "x", "error": "rate limited"})).is_err());
        assert!(response_text(&json!({"textResponse": null})).is_err());
    }

    #[test]
    fn test_model_resolution_order() {
        let ws = workspace(Some("ollama"));
        let reported = json!({"metrics": {"model": "gpt-4o"}, "chatModel": "llama3"});
        assert_eq!(resolve_model(&reported, &ws, ChatMode::Chat, None), "gpt-4o");

        let chat_model_only = json!({"chatModel": "mistral"});
        assert_eq!(resolve_model(&chat_model_only, &ws, ChatMode::Chat, None), "mistral");

        assert_eq!(resolve_model(&json!({}), &ws, ChatMode::Agent, None), "qwen-agent");
        assert_eq!(
            resolve_model(&json!({}), &WorkspaceInfo::default(), ChatMode::Chat, Some("phi3")),
            "phi3"
        );
        assert_eq!(
            resolve_model(&json!({}), &WorkspaceInfo::default(), ChatMode::Chat, None),
            "unknown"
        );
    }

    #[tokio::test]
    async fn test_connect_requires_api_key() {
        let config = WorkflowConfig::new(crate::core::Language::Python, ".");
        let err = AnythingLlmClient::connect(&config).await.unwrap_err();
        assert!(err.message.contains(API_KEY_ENV));
    }
}
