//! Agent chat loop
//!
//! One `chat` call is one full turn: the user message is appended, the model
//! is called in a loop where each response either requests tools or ends the
//! turn, requested tools run sequentially, and their results are folded back
//! into the next model call. Turns on a session are serialized by the
//! session's turn lock.
//!
//! Tool requests arrive as a JSON envelope embedded in free text:
//!
//! ```text
//! Let me check. {"tool_calls": [{"name": "get_balance", "arguments": {}}]}
//! ```
//!
//! Extraction is a heuristic brace scan, not a parser: first `{` to last
//! `}`. A response that mentions `tool_calls` but does not parse is treated
//! as a final answer in full.

use crate::ai::AiClient;
use crate::context::ContextBuilder;
use crate::error::AssistantError;
use crate::models::{AgentResponse, Message, Role, ToolCall, ToolResult};
use crate::session::SessionStore;
use crate::tools::ToolRegistry;
use crate::Result;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Tool call budget per turn, counted across all loop iterations
    pub max_tool_calls: usize,
    /// Session history capacity in messages
    pub max_history_messages: usize,
    /// Byte cap on the rendered tool transcript within one turn
    pub max_turn_transcript_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_calls: 10,
            max_history_messages: 50,
            max_turn_transcript_bytes: 16 * 1024,
        }
    }
}

/// One loop iteration's tool activity, kept structured so the transcript
/// can be bounded by whole exchanges.
struct ToolExchange {
    calls: Vec<ToolCall>,
    results: Vec<ToolResult>,
}

pub struct Agent {
    ai: Arc<dyn AiClient>,
    registry: RwLock<ToolRegistry>,
    sessions: SessionStore,
    config: AgentConfig,
    system_prompt: String,
    context: Option<Arc<ContextBuilder>>,
}

impl Agent {
    pub fn new(ai: Arc<dyn AiClient>, system_prompt: impl Into<String>, config: AgentConfig) -> Self {
        Self {
            ai,
            registry: RwLock::new(ToolRegistry::new()),
            sessions: SessionStore::new(config.max_history_messages),
            config,
            system_prompt: system_prompt.into(),
            context: None,
        }
    }

    /// Attaches a context builder; each turn then opens with a live
    /// portfolio snapshot in the system prompt.
    pub fn with_context(mut self, context: Arc<ContextBuilder>) -> Self {
        self.context = Some(context);
        self
    }

    pub async fn register_tool(&self, tool: Arc<dyn crate::tools::Tool>) {
        self.registry.write().await.register(tool);
    }

    pub async fn with_registry<F: FnOnce(&mut ToolRegistry)>(&self, f: F) {
        let mut registry = self.registry.write().await;
        f(&mut registry);
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Runs one full chat turn on the given session.
    pub async fn chat(
        &self,
        cancel: &CancellationToken,
        session_id: &str,
        text: &str,
    ) -> Result<AgentResponse> {
        let session = self.sessions.get_or_create(session_id).await;
        let _turn = session.lock_turn().await;

        session.add_message(Message::user(text)).await;

        let system_prompt = self.build_system_prompt().await;
        let history = render_history(
            &session
                .recent_messages(self.config.max_history_messages)
                .await,
        );

        let mut exchanges: Vec<ToolExchange> = Vec::new();
        let mut tool_call_count = 0usize;
        let mut last_text = String::new();

        let answer = loop {
            if cancel.is_cancelled() {
                return Err(AssistantError::Cancelled);
            }
            if tool_call_count >= self.config.max_tool_calls {
                warn!(session_id, tool_call_count, "Tool call cap reached, ending turn");
                // The last captured text, possibly empty
                break last_text;
            }

            let conversation = self.render_conversation(&history, &exchanges);
            let response = self.ai.call(&system_prompt, &conversation).await?;

            let extraction = extract_tool_calls(&response);
            if extraction.calls.is_empty() {
                break extraction.text;
            }

            debug!(
                session_id,
                count = extraction.calls.len(),
                "Executing requested tools"
            );
            // Resolve under the lock, execute with it released
            let resolved = {
                let registry = self.registry.read().await;
                registry.resolve(&extraction.calls)
            };
            let results = crate::tools::execute_resolved(cancel, &extraction.calls, resolved).await;

            tool_call_count += extraction.calls.len();
            if !extraction.text.is_empty() {
                last_text = extraction.text;
            }
            exchanges.push(ToolExchange {
                calls: extraction.calls,
                results,
            });
        };

        session.add_message(Message::assistant(&answer)).await;
        info!(session_id, tool_call_count, "Chat turn complete");

        Ok(AgentResponse {
            text: answer,
            session_id: session_id.to_string(),
        })
    }

    async fn build_system_prompt(&self) -> String {
        let mut prompt = self.system_prompt.clone();

        let catalog = self.registry.read().await.catalog();
        if !catalog.is_empty() {
            prompt.push_str("\n\n## Available tools\n");
            prompt.push_str(&catalog);
            prompt.push_str(
                "\nTo use tools, respond with a JSON object: \
                 {\"tool_calls\": [{\"name\": \"...\", \"arguments\": {...}}]}\n",
            );
        }

        if let Some(context) = &self.context {
            prompt.push_str(&context.build_context().await.format_for_prompt());
        }

        prompt
    }

    fn render_conversation(&self, history: &str, exchanges: &[ToolExchange]) -> String {
        let mut out = history.to_string();
        if exchanges.is_empty() {
            return out;
        }

        let transcript = render_transcript(exchanges, self.config.max_turn_transcript_bytes);
        out.push_str("\n## Tool activity this turn\n");
        out.push_str(&transcript);
        out.push_str(
            "\nContinue based on the tool results above. \
             Request more tools or give your final answer.\n",
        );
        out
    }
}

fn render_history(messages: &[Message]) -> String {
    let mut out = String::new();
    for msg in messages {
        match msg.role {
            Role::User => out.push_str(&format!("User: {}\n", msg.content)),
            Role::Assistant => out.push_str(&format!("Assistant: {}\n", msg.content)),
            Role::System | Role::Tool => {}
        }
    }
    out
}

/// Renders exchanges oldest-first, eliding whole oldest exchanges while the
/// rendered transcript exceeds the byte cap.
fn render_transcript(exchanges: &[ToolExchange], max_bytes: usize) -> String {
    let rendered: Vec<String> = exchanges.iter().map(render_exchange).collect();

    let mut skip = 0;
    while skip < rendered.len() {
        let total: usize = rendered[skip..].iter().map(|s| s.len()).sum();
        if total <= max_bytes {
            break;
        }
        skip += 1;
    }

    let mut out = String::new();
    if skip > 0 {
        out.push_str(&format!("[{} earlier tool exchanges elided]\n", skip));
    }
    for part in &rendered[skip..] {
        out.push_str(part);
    }
    out
}

fn render_exchange(exchange: &ToolExchange) -> String {
    let mut out = String::new();
    for (call, result) in exchange.calls.iter().zip(exchange.results.iter()) {
        out.push_str(&format!("Called {}({})\n", call.name, call.arguments));
        match (&result.result, &result.error) {
            (_, Some(error)) => out.push_str(&format!("Error: {}\n", error)),
            (Some(value), None) => out.push_str(&format!("Result: {}\n", value)),
            (None, None) => out.push_str("Result: null\n"),
        }
    }
    out
}

// =============================================================================
// Tool call extraction
// =============================================================================

#[derive(Deserialize)]
struct ToolCallEnvelope {
    tool_calls: Vec<ToolCall>,
}

struct Extraction {
    text: String,
    calls: Vec<ToolCall>,
}

impl Extraction {
    fn final_answer(text: &str) -> Self {
        Self {
            text: text.trim().to_string(),
            calls: Vec::new(),
        }
    }
}

/// Brace-scan extraction of a tool call envelope from free text. The scan
/// spans first `{` to last `}`, so prose containing braces around an
/// envelope can defeat it; that case falls back to a final answer.
fn extract_tool_calls(response: &str) -> Extraction {
    if !response.contains("tool_calls") {
        return Extraction::final_answer(response);
    }

    let (Some(start), Some(end)) = (response.find('{'), response.rfind('}')) else {
        return Extraction::final_answer(response);
    };
    if end < start {
        return Extraction::final_answer(response);
    }

    match serde_json::from_str::<ToolCallEnvelope>(&response[start..=end]) {
        Ok(envelope) => {
            let before = response[..start].trim();
            let after = response[end + 1..].trim();
            let text = match (before.is_empty(), after.is_empty()) {
                (true, true) => String::new(),
                (false, true) => before.to_string(),
                (true, false) => after.to_string(),
                (false, false) => format!("{} {}", before, after),
            };
            Extraction {
                text,
                calls: envelope.tool_calls,
            }
        }
        Err(e) => {
            debug!(error = %e, "Envelope candidate did not parse, treating as final answer");
            Extraction::final_answer(response)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::MockAiClient;
    use crate::tools::FnTool;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn envelope(name: &str) -> String {
        format!(r#"{{"tool_calls": [{{"name": "{}", "arguments": {{}}}}]}}"#, name)
    }

    fn counting_tool(name: &str, counter: Arc<AtomicUsize>) -> Arc<dyn crate::tools::Tool> {
        Arc::new(FnTool::new(
            name,
            "counts invocations",
            json!({"type": "object"}),
            move |_cancel, _args| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({"ok": true}))
                }
            },
        ))
    }

    async fn agent_with(client: MockAiClient) -> Agent {
        Agent::new(
            Arc::new(client),
            "You are a trading assistant.",
            AgentConfig::default(),
        )
    }

    // ---- extraction ----

    #[test]
    fn test_extract_plain_prose_is_final() {
        let e = extract_tool_calls("Your balance is $1000.");
        assert!(e.calls.is_empty());
        assert_eq!(e.text, "Your balance is $1000.");
    }

    #[test]
    fn test_extract_envelope_with_surrounding_text() {
        let response = format!("Let me check. {} One moment.", envelope("get_balance"));
        let e = extract_tool_calls(&response);
        assert_eq!(e.calls.len(), 1);
        assert_eq!(e.calls[0].name, "get_balance");
        assert_eq!(e.text, "Let me check. One moment.");
    }

    #[test]
    fn test_extract_prose_mentioning_tool_calls_without_json() {
        let e = extract_tool_calls("I can make tool_calls when needed, just ask.");
        assert!(e.calls.is_empty());
        assert_eq!(e.text, "I can make tool_calls when needed, just ask.");
    }

    #[test]
    fn test_extract_malformed_envelope_is_final_answer_in_full() {
        let response = r#"Checking {"tool_calls": [{"name": missing-quotes}]}"#;
        let e = extract_tool_calls(response);
        assert!(e.calls.is_empty());
        assert_eq!(e.text, response);
    }

    #[test]
    fn test_extract_brace_in_trailing_prose_defeats_scan() {
        // The scan spans to the last brace, producing an unparseable slice
        let response = format!("{} (use {{braces}} carefully)", envelope("get_balance"));
        let e = extract_tool_calls(&response);
        assert!(e.calls.is_empty());
        assert_eq!(e.text, response.trim());
    }

    #[test]
    fn test_extract_multiple_calls_preserve_order() {
        let response = r#"{"tool_calls": [
            {"name": "get_balance", "arguments": {}},
            {"name": "get_positions", "arguments": {}}
        ]}"#;
        let e = extract_tool_calls(response);
        assert_eq!(e.calls.len(), 2);
        assert_eq!(e.calls[0].name, "get_balance");
        assert_eq!(e.calls[1].name, "get_positions");
    }

    // ---- chat loop ----

    #[tokio::test]
    async fn test_turn_with_tools_then_final_answer() {
        let client = MockAiClient::scripted(vec![
            envelope("get_balance"),
            envelope("get_positions"),
            "You have $1000 and one BTC long.".to_string(),
        ]);
        let agent = agent_with(client).await;

        let executions = Arc::new(AtomicUsize::new(0));
        agent
            .register_tool(counting_tool("get_balance", executions.clone()))
            .await;
        agent
            .register_tool(counting_tool("get_positions", executions.clone()))
            .await;

        let cancel = CancellationToken::new();
        let response = agent.chat(&cancel, "s1", "how am I doing?").await.unwrap();

        assert_eq!(response.text, "You have $1000 and one BTC long.");
        assert_eq!(executions.load(Ordering::SeqCst), 2);

        // Turn appended exactly user + assistant to history
        let session = agent.sessions().get("s1").await.unwrap();
        assert_eq!(session.message_count().await, 2);
    }

    #[tokio::test]
    async fn test_tool_call_budget_ends_turn_with_last_text() {
        // Script never stops asking for tools
        let mut script = Vec::new();
        for _ in 0..20 {
            script.push(format!("Still checking. {}", envelope("get_balance")));
        }
        let agent = agent_with(MockAiClient::scripted(script)).await;

        let executions = Arc::new(AtomicUsize::new(0));
        agent
            .register_tool(counting_tool("get_balance", executions.clone()))
            .await;

        let cancel = CancellationToken::new();
        let response = agent.chat(&cancel, "s1", "loop forever").await.unwrap();

        assert_eq!(executions.load(Ordering::SeqCst), 10);
        assert_eq!(response.text, "Still checking.");
    }

    #[tokio::test]
    async fn test_tool_call_cap_with_no_captured_text_yields_empty_answer() {
        let mut script = Vec::new();
        for _ in 0..20 {
            script.push(envelope("get_balance"));
        }
        let agent = agent_with(MockAiClient::scripted(script)).await;
        agent
            .register_tool(counting_tool("get_balance", Arc::new(AtomicUsize::new(0))))
            .await;

        let cancel = CancellationToken::new();
        let response = agent.chat(&cancel, "s1", "loop forever").await.unwrap();
        assert_eq!(response.text, "");
    }

    #[tokio::test]
    async fn test_unknown_tool_flows_back_not_fatal() {
        let client = MockAiClient::scripted(vec![
            envelope("no_such_tool"),
            "That tool does not exist, sorry.".to_string(),
        ]);
        let agent = agent_with(client).await;

        let cancel = CancellationToken::new();
        let response = agent.chat(&cancel, "s1", "try it").await.unwrap();
        assert_eq!(response.text, "That tool does not exist, sorry.");
    }

    #[tokio::test]
    async fn test_cancelled_turn_appends_nothing() {
        let agent = agent_with(MockAiClient::new()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = agent.chat(&cancel, "s1", "hello").await.unwrap_err();
        assert!(matches!(err, AssistantError::Cancelled));

        // The user message is in; no assistant message was appended
        let session = agent.sessions().get("s1").await.unwrap();
        assert_eq!(session.message_count().await, 1);
    }

    #[tokio::test]
    async fn test_history_carries_across_turns() {
        let client = MockAiClient::scripted(vec![
            "Hi Alice.".to_string(),
            "You said your name is Alice.".to_string(),
        ]);
        let agent = agent_with(client).await;
        let cancel = CancellationToken::new();

        agent.chat(&cancel, "s1", "I'm Alice").await.unwrap();
        agent.chat(&cancel, "s1", "what's my name?").await.unwrap();

        let session = agent.sessions().get("s1").await.unwrap();
        assert_eq!(session.message_count().await, 4);
    }

    // ---- transcript bounding ----

    #[test]
    fn test_transcript_elides_oldest_exchanges() {
        let exchange = |payload: String| ToolExchange {
            calls: vec![ToolCall {
                name: "get_positions".to_string(),
                arguments: json!({}),
            }],
            results: vec![ToolResult::ok("get_positions", json!({ "data": payload }))],
        };

        let big = "x".repeat(600);
        let exchanges = vec![
            exchange(format!("first {}", big)),
            exchange(format!("second {}", big)),
            exchange(format!("third {}", big)),
        ];

        let transcript = render_transcript(&exchanges, 1500);
        assert!(transcript.contains("elided"));
        assert!(!transcript.contains("first"));
        assert!(transcript.contains("third"));
    }

    #[test]
    fn test_transcript_under_cap_keeps_everything() {
        let exchanges = vec![ToolExchange {
            calls: vec![ToolCall {
                name: "get_balance".to_string(),
                arguments: json!({}),
            }],
            results: vec![ToolResult::ok("get_balance", json!({"total": 1000}))],
        }];
        let transcript = render_transcript(&exchanges, 16 * 1024);
        assert!(!transcript.contains("elided"));
        assert!(transcript.contains("get_balance"));
    }
}
