#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use deep_researcher::ModelError;
use deep_researcher::config::{Config, ModelSettings};
use deep_researcher::llm::client::{ChatModel, Message, ModelCallSettings, Role, ToolCall};
use deep_researcher::llm::tools::{CONDUCT_RESEARCH, RESEARCH_COMPLETE, Tool, ToolRegistry};
use deep_researcher::llm::client::ToolDefinition;
use deep_researcher::research::ResearchContext;

pub const CLARIFY_MODEL: &str = "clarify-model";
pub const RESEARCH_MODEL: &str = "research-model";
pub const COMPRESSION_MODEL: &str = "compression-model";
pub const SUMMARY_MODEL: &str = "summary-model";
pub const REPORT_MODEL: &str = "report-model";

pub const SYNTHESIZE: &str = "SYNTHESIZE";

/// 一次被记录的模型调用
#[derive(Debug, Clone)]
pub struct ModelCall {
    pub messages: Vec<Message>,
    pub settings: ModelCallSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Clarify,
    Brief,
    Supervisor,
    Researcher,
    Compression,
    Summarize,
    FinalReport,
}

impl ModelCall {
    pub fn stage(&self) -> Stage {
        let tools = self.settings.allowed_tools();
        match self.settings.model.as_str() {
            CLARIFY_MODEL => Stage::Clarify,
            COMPRESSION_MODEL => Stage::Compression,
            SUMMARY_MODEL => Stage::Summarize,
            REPORT_MODEL => Stage::FinalReport,
            _ if tools.contains(&CONDUCT_RESEARCH) => Stage::Supervisor,
            _ if tools.contains(&RESEARCH_COMPLETE) => Stage::Researcher,
            _ => Stage::Brief,
        }
    }

    /// 第一条用户消息的文本，研究员对话中即研究主题
    pub fn first_user_text(&self) -> String {
        self.messages
            .iter()
            .find(|message| message.role == Role::User)
            .map(Message::text)
            .unwrap_or_default()
    }

    pub fn last_user_text(&self) -> String {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(Message::text)
            .unwrap_or_default()
    }

    pub fn tool_message_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|message| message.role == Role::Tool)
            .count()
    }
}

/// 模型的预设回复
pub struct Reply {
    pub result: Result<Message, ModelError>,
    pub delay: Duration,
}

impl Reply {
    pub fn text(text: &str) -> Self {
        Self::message(Message::assistant(text))
    }

    pub fn calls(calls: Vec<ToolCall>) -> Self {
        Self::message(Message::assistant_with_calls("", calls))
    }

    pub fn message(message: Message) -> Self {
        Self {
            result: Ok(message),
            delay: Duration::ZERO,
        }
    }

    pub fn error(error: ModelError) -> Self {
        Self {
            result: Err(error),
            delay: Duration::ZERO,
        }
    }

    pub fn overflow() -> Self {
        Self::error(ModelError::ContextWindowExceeded(
            "maximum context length exceeded".to_string(),
        ))
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type Responder = dyn Fn(&ModelCall) -> Reply + Send + Sync;

/// 按调用内容决定回复的模型，记录所有调用
pub struct ScriptedModel {
    responder: Box<Responder>,
    calls: Mutex<Vec<ModelCall>>,
}

impl ScriptedModel {
    pub fn new(responder: impl Fn(&ModelCall) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<ModelCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, stage: Stage) -> Vec<ModelCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.stage() == stage)
            .collect()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn send(
        &self,
        messages: &[Message],
        settings: &ModelCallSettings,
    ) -> Result<Message, ModelError> {
        let call = ModelCall {
            messages: messages.to_vec(),
            settings: settings.clone(),
        };
        self.calls.lock().unwrap().push(call.clone());
        let reply = (self.responder)(&call);
        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        reply.result
    }
}

/// 返回固定文本的工具，可带延迟
pub struct EchoTool {
    pub name: String,
    pub delay: Duration,
}

impl EchoTool {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            delay,
        }
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: format!("echo tool {}", self.name),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    async fn call(&self, arguments: Value) -> anyhow::Result<String> {
        tokio::time::sleep(self.delay).await;
        match arguments.get("text").and_then(Value::as_str) {
            Some(text) => Ok(text.to_string()),
            None => Ok(format!("{} done", self.name)),
        }
    }
}

/// 每个阶段使用可区分模型名的配置，搜索关闭
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.models.clarify = ModelSettings::new(CLARIFY_MODEL, 1024);
    config.models.research = ModelSettings::new(RESEARCH_MODEL, 1024);
    config.models.compression = ModelSettings::new(COMPRESSION_MODEL, 1024);
    config.models.summarization = ModelSettings::new(SUMMARY_MODEL, 1024);
    config.models.final_report = ModelSettings::new(REPORT_MODEL, 1024);
    config.models.final_report.context_window = Some(1000);
    config.prompts.compress_research_instruction = SYNTHESIZE.to_string();
    config.search.enabled = false;
    config
}

pub fn context(config: Config, model: Arc<ScriptedModel>, tools: ToolRegistry) -> ResearchContext {
    ResearchContext::new(Arc::new(config), model, Arc::new(tools))
}

pub fn conduct(id: &str, topic: &str) -> ToolCall {
    ToolCall::new(
        id,
        CONDUCT_RESEARCH,
        serde_json::json!({ "research_topic": topic }),
    )
}

pub fn complete(id: &str) -> ToolCall {
    ToolCall::new(id, RESEARCH_COMPLETE, serde_json::json!({}))
}
