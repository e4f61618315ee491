use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{Config, ModelSettings};
use crate::error::{ModelError, ResearchError};
use crate::llm::client::retry::{RetryError, RetryPolicy, always_retry, no_adjustment};
use crate::llm::client::{
    ChatModel, Message, MessageAccumulator, MessageDelta, ModelCallSettings, ToolCall, ToolMode,
};
use crate::llm::tools::{CLARITY_COMPLETED, CONDUCT_RESEARCH, RESEARCH_COMPLETE, ToolRegistry};
use crate::research::events::{EventSink, ResearchEvent};

/// 研究流程上下文，所有阶段共享的只读依赖
#[derive(Clone)]
pub struct ResearchContext {
    /// 配置
    pub config: Arc<Config>,
    /// 对话模型
    pub model: Arc<dyn ChatModel>,
    /// 工具注册表
    pub tools: Arc<ToolRegistry>,
    /// 事件输出
    pub events: EventSink,
    /// 取消信号
    pub cancel: CancellationToken,
}

impl ResearchContext {
    pub fn new(config: Arc<Config>, model: Arc<dyn ChatModel>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            config,
            model,
            tools,
            events: EventSink::disabled(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn ensure_active(&self) -> Result<(), ResearchError> {
        if self.cancel.is_cancelled() {
            Err(ResearchError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// 不带工具的调用参数
    pub fn model_settings(&self, stage: &ModelSettings) -> ModelCallSettings {
        ModelCallSettings::new(&stage.model, stage.max_tokens)
    }

    /// 带工具的调用参数，工具按注册表过滤
    pub fn tool_settings(
        &self,
        stage: &ModelSettings,
        tool_mode: ToolMode,
        allowed: &[&str],
    ) -> ModelCallSettings {
        self.model_settings(stage)
            .with_tools(tool_mode, self.tools.definitions(allowed))
    }

    /// 研究员可用的工具：除主管与澄清专用工具外的所有已注册工具，research_complete 在前
    pub fn worker_tool_names(&self) -> Vec<String> {
        let mut names = vec![RESEARCH_COMPLETE.to_string()];
        names.extend(self.tools.names().into_iter().filter(|name| {
            name != RESEARCH_COMPLETE && name != CONDUCT_RESEARCH && name != CLARITY_COMPLETED
        }));
        names
    }

    pub fn retry_policy(&self, max_attempts: usize) -> RetryPolicy {
        RetryPolicy::new(max_attempts)
            .with_delay(Duration::from_millis(self.config.research.retry_delay_ms))
    }

    /// 流式调用模型并输出事件，返回累积后的完整消息；失败的轮次以 MessageAbandoned 结束
    pub async fn stream_turn(
        &self,
        messages: &[Message],
        settings: &ModelCallSettings,
    ) -> Result<Message, ModelError> {
        let id = Uuid::new_v4().to_string();
        self.events
            .emit(ResearchEvent::MessageStart { id: id.clone() });
        let result = self.collect_stream(&id, messages, settings).await;
        match &result {
            Ok(_) => self.events.emit(ResearchEvent::MessageEnd { id }),
            Err(_) => self.events.emit(ResearchEvent::MessageAbandoned { id }),
        }
        result
    }

    async fn collect_stream(
        &self,
        id: &str,
        messages: &[Message],
        settings: &ModelCallSettings,
    ) -> Result<Message, ModelError> {
        let mut stream = self.model.send_streaming(messages, settings).await?;
        let mut accumulator = MessageAccumulator::new(id);
        while let Some(delta) = stream.next().await {
            let delta = delta?;
            if let MessageDelta::Text(text) = &delta {
                self.events.emit(ResearchEvent::TextDelta {
                    id: id.to_string(),
                    text: text.clone(),
                });
            }
            accumulator.push(delta);
        }
        Ok(accumulator.finish())
    }

    /// 结构化决策调用：任何模型错误都重试，耗尽后作为该阶段的致命错误
    pub async fn decide(
        &self,
        stage: &'static str,
        messages: &[Message],
        settings: &ModelCallSettings,
        streaming: bool,
    ) -> Result<Message, ResearchError> {
        let policy = self.retry_policy(self.config.research.max_structured_output_retries);
        let outcome = policy
            .run(
                &self.cancel,
                (),
                move |_| async move {
                    if streaming {
                        self.stream_turn(messages, settings).await
                    } else {
                        self.model.send(messages, settings).await
                    }
                },
                always_retry,
                no_adjustment,
            )
            .await;

        match outcome.result {
            Ok(mut message) => {
                if message.id().is_none() {
                    message.set_id(Uuid::new_v4().to_string());
                }
                Ok(message)
            }
            Err(RetryError::Cancelled) => Err(ResearchError::Cancelled),
            Err(e) => {
                tracing::error!("❌ {} 决策调用失败: {:?}", stage, e);
                Err(ResearchError::fatal(stage, e.to_string()))
            }
        }
    }

    /// 并发执行同一轮中的工具调用，结果按调用顺序返回
    pub async fn execute_tools(&self, calls: &[ToolCall]) -> Vec<String> {
        futures::future::join_all(calls.iter().map(|call| self.tools.execute(call))).await
    }
}
