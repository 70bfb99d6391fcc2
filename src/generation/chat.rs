use super::{GenerationRequest, GenerationService};
use crate::diagram::strip_fences;
use crate::model::{RunConfig, Track};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};

const THINK_HARD: &str = "Think hard and deep. Double check everything.";
const BE_BRIEF: &str = "Only print what needs changing, do not print out everything. Be brief.";

/// OpenAI-compatible chat completions adapter.
pub struct ChatCompletionsService {
    http: reqwest::Client,
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    brief: bool,
    system_prompt: Option<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl ChatCompletionsService {
    pub fn new(http: reqwest::Client, cfg: &RunConfig) -> Result<Self> {
        let base = cfg.service_url.trim_end_matches('/');
        let endpoint = Url::parse(&format!("{base}/chat/completions"))
            .with_context(|| format!("invalid service url '{}'", cfg.service_url))?;
        Ok(Self {
            http,
            endpoint,
            model: cfg.model.clone(),
            api_key: cfg.api_key.clone(),
            brief: cfg.brief,
            system_prompt: cfg.system_prompt.clone(),
        })
    }

    fn compose_prompt(&self, request: &GenerationRequest) -> String {
        let mut parts = vec![request.expertise_hint.trim().to_string()];
        if let Some(extra) = self.system_prompt.as_deref() {
            if !extra.trim().is_empty() {
                parts.push(extra.trim().to_string());
            }
        }
        if self.brief {
            parts.push(BE_BRIEF.to_string());
        }
        parts.push(THINK_HARD.to_string());
        parts.push(response_shape(request.track).to_string());
        parts.push(request.instruction.clone());
        parts.join("\n\n")
    }
}

/// JSON shape the model is asked to answer with for each track.
fn response_shape(track: Track) -> &'static str {
    match track {
        Track::Programming => {
            "Answer with a single JSON object with the string fields \"explanation\" and \"code\"."
        }
        Track::Diagram => {
            "Answer with a single JSON object with the string fields \"diagram_text\" (a short description) and \"diagram_code\" (the Graphviz DOT source only)."
        }
        Track::ThreatModel => {
            "Answer with a single JSON object with the string fields \"diagram_text\" (a short description) and \"diagram_code\" (the complete pytm Python program only)."
        }
    }
}

#[async_trait]
impl GenerationService for ChatCompletionsService {
    async fn generate(&self, request: &GenerationRequest) -> Result<serde_json::Value> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".into(),
                content: Some(self.compose_prompt(request)),
            }],
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let mut req = self.http.post(self.endpoint.clone()).json(&body);
        if let Some(key) = self.api_key.as_deref() {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.context("chat completion request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("chat completion returned {status}: {}", text.trim());
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .context("chat completion response is not valid JSON")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("chat completion returned no content")?;

        serde_json::from_str(strip_fences(&content))
            .context("chat completion content is not a JSON object")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{build_config, Cli};
    use clap::Parser;

    fn service(extra: &[&str]) -> ChatCompletionsService {
        let mut argv = vec!["jarvis", "--service-url", "http://localhost:9/v1"];
        argv.extend_from_slice(extra);
        let cfg = build_config(&Cli::parse_from(argv));
        ChatCompletionsService::new(reqwest::Client::new(), &cfg).unwrap()
    }

    fn request(track: Track) -> GenerationRequest {
        GenerationRequest {
            track,
            instruction: "an API in front of a database".into(),
            expertise_hint: "You model threats.".into(),
        }
    }

    #[test]
    fn endpoint_appends_chat_completions() {
        let svc = service(&[]);
        assert_eq!(
            svc.endpoint.as_str(),
            "http://localhost:9/v1/chat/completions"
        );
    }

    #[test]
    fn prompt_orders_hint_shape_then_instruction() {
        let prompt = service(&[]).compose_prompt(&request(Track::ThreatModel));
        let hint = prompt.find("You model threats.").unwrap();
        let shape = prompt.find("\"diagram_code\"").unwrap();
        let instruction = prompt.find("an API in front of a database").unwrap();
        assert!(hint < shape && shape < instruction);
        assert!(!prompt.contains(BE_BRIEF));
    }

    #[test]
    fn brief_mode_and_system_prompt_are_included() {
        let prompt = service(&["--brief", "--system-prompt", "Use AWS terms."])
            .compose_prompt(&request(Track::Programming));
        assert!(prompt.contains(BE_BRIEF));
        assert!(prompt.contains("Use AWS terms."));
        assert!(prompt.contains("\"explanation\""));
    }
}
