//! LLM Provider支持模块

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use rig::{
    OneOrMany,
    client::CompletionClient,
    completion::{AssistantContent, CompletionError, CompletionModel, CompletionRequestBuilder},
    message::{ToolChoice, ToolResultContent, UserContent},
    streaming::StreamedAssistantContent,
};
use tracing::debug;

use super::types::{
    ContentItem, Message, MessageDelta, ModelCallSettings, Role, ToolCall, ToolMode,
};
use super::{ChatModel, DeltaStream};
use super::utils::is_context_overflow_message;
use crate::config::{LLMConfig, LLMProvider};
use crate::error::ModelError;

/// 统一的Provider客户端枚举
#[derive(Clone)]
pub enum ProviderClient {
    OpenAI(rig::providers::openai::Client),
    Moonshot(rig::providers::moonshot::Client),
    DeepSeek(rig::providers::deepseek::Client),
    Mistral(rig::providers::mistral::Client),
    OpenRouter(rig::providers::openrouter::Client),
    Anthropic(rig::providers::anthropic::Client),
    Ollama(rig::providers::ollama::Client),
}

impl ProviderClient {
    /// 根据配置创建相应的provider客户端
    pub fn new(config: &LLMConfig) -> Result<Self> {
        match config.provider {
            LLMProvider::OpenAI => {
                let client = rig::providers::openai::Client::builder(&config.api_key)
                    .base_url(&config.api_base_url)
                    .build();
                Ok(ProviderClient::OpenAI(client))
            }
            LLMProvider::Moonshot => {
                let client = rig::providers::moonshot::Client::builder(&config.api_key)
                    .base_url(&config.api_base_url)
                    .build();
                Ok(ProviderClient::Moonshot(client))
            }
            LLMProvider::DeepSeek => {
                let client = rig::providers::deepseek::Client::builder(&config.api_key)
                    .base_url(&config.api_base_url)
                    .build();
                Ok(ProviderClient::DeepSeek(client))
            }
            LLMProvider::Mistral => {
                let client = rig::providers::mistral::Client::builder(&config.api_key).build();
                Ok(ProviderClient::Mistral(client))
            }
            LLMProvider::OpenRouter => {
                let client = rig::providers::openrouter::Client::builder(&config.api_key).build();
                Ok(ProviderClient::OpenRouter(client))
            }
            LLMProvider::Anthropic => {
                let client =
                    rig::providers::anthropic::ClientBuilder::new(&config.api_key).build()?;
                Ok(ProviderClient::Anthropic(client))
            }
            LLMProvider::Ollama => {
                let client = rig::providers::ollama::Client::builder().build();
                Ok(ProviderClient::Ollama(client))
            }
        }
    }
}

/// 一次补全请求的rig表示
struct RigRequest {
    preamble: Option<String>,
    prompt: rig::completion::Message,
    history: Vec<rig::completion::Message>,
    tools: Vec<rig::completion::ToolDefinition>,
    tool_choice: Option<ToolChoice>,
    max_tokens: u64,
    temperature: f64,
}

impl RigRequest {
    fn build(
        messages: &[Message],
        settings: &ModelCallSettings,
        temperature: f64,
    ) -> Result<Self, ModelError> {
        let mut preamble = Vec::new();
        let mut converted: Vec<rig::completion::Message> = Vec::new();
        let mut pending_results: Vec<UserContent> = Vec::new();

        for message in messages {
            if message.role != Role::Tool && !pending_results.is_empty() {
                converted.push(tool_results_message(std::mem::take(&mut pending_results))?);
            }
            match message.role {
                Role::System => preamble.push(message.text()),
                Role::User => converted.push(rig::completion::Message::user(message.content())),
                Role::Assistant => {
                    if let Some(assistant) = assistant_message(message)? {
                        converted.push(assistant);
                    }
                }
                Role::Tool => {
                    for result in message.tool_results() {
                        pending_results.push(UserContent::tool_result(
                            result.id.clone(),
                            OneOrMany::one(ToolResultContent::text(result.result.clone())),
                        ));
                    }
                }
            }
        }
        if !pending_results.is_empty() {
            converted.push(tool_results_message(pending_results)?);
        }

        let prompt = converted
            .pop()
            .ok_or_else(|| ModelError::InvalidResponse("empty conversation".to_string()))?;

        let (tools, tool_choice) = if settings.tools.is_empty() {
            (Vec::new(), None)
        } else {
            let tools = settings
                .tools
                .iter()
                .map(|tool| rig::completion::ToolDefinition {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                })
                .collect();
            let choice = match settings.tool_mode {
                ToolMode::None => ToolChoice::None,
                ToolMode::Auto => ToolChoice::Auto,
                ToolMode::Required => ToolChoice::Required,
            };
            (tools, Some(choice))
        };

        Ok(Self {
            preamble: (!preamble.is_empty()).then(|| preamble.join("\n\n")),
            prompt,
            history: converted,
            tools,
            tool_choice,
            max_tokens: settings.max_tokens,
            temperature,
        })
    }
}

fn tool_results_message(results: Vec<UserContent>) -> Result<rig::completion::Message, ModelError> {
    let content = OneOrMany::many(results)
        .map_err(|e| ModelError::InvalidResponse(format!("empty tool results: {}", e)))?;
    Ok(rig::completion::Message::User { content })
}

fn assistant_message(message: &Message) -> Result<Option<rig::completion::Message>, ModelError> {
    let mut content = Vec::new();
    for item in &message.items {
        match item {
            ContentItem::Text(text) if !text.is_empty() => {
                content.push(AssistantContent::text(text.clone()))
            }
            ContentItem::Text(_) => {}
            ContentItem::ToolCall(call) => content.push(AssistantContent::tool_call(
                call.id.clone(),
                call.name.clone(),
                call.arguments.clone(),
            )),
            ContentItem::ToolResult(_) => {}
        }
    }
    if content.is_empty() {
        return Ok(None);
    }
    let content = OneOrMany::many(content)
        .map_err(|e| ModelError::InvalidResponse(format!("empty assistant message: {}", e)))?;
    Ok(Some(rig::completion::Message::Assistant { id: None, content }))
}

fn request_builder<M>(model: M, request: RigRequest) -> CompletionRequestBuilder<M>
where
    M: CompletionModel,
{
    let mut builder = model
        .completion_request(request.prompt)
        .messages(request.history)
        .tools(request.tools)
        .max_tokens(request.max_tokens)
        .temperature(request.temperature);
    if let Some(preamble) = request.preamble {
        builder = builder.preamble(preamble);
    }
    if let Some(tool_choice) = request.tool_choice {
        builder = builder.tool_choice(tool_choice);
    }
    builder
}

/// 使用具体的补全模型执行一次请求
async fn complete_with<M>(model: M, request: RigRequest) -> Result<Message, ModelError>
where
    M: CompletionModel,
{
    let response = request_builder(model, request)
        .send()
        .await
        .map_err(classify_completion_error)?;

    let mut text = String::new();
    let mut calls = Vec::new();
    for content in response.choice.iter() {
        match content {
            AssistantContent::Text(chunk) => text.push_str(&chunk.text),
            AssistantContent::ToolCall(tool_call) => calls.push(ToolCall::new(
                tool_call.id.clone(),
                tool_call.function.name.clone(),
                tool_call.function.arguments.clone(),
            )),
            _ => {}
        }
    }

    if text.trim().is_empty() && calls.is_empty() {
        return Err(ModelError::InvalidResponse(
            "model returned neither text nor tool calls".to_string(),
        ));
    }
    Ok(Message::assistant_with_calls(text, calls))
}

/// 使用具体的补全模型发起流式请求，文本片段和完整的工具调用逐个转发
async fn stream_with<M>(model: M, request: RigRequest) -> Result<DeltaStream, ModelError>
where
    M: CompletionModel + 'static,
    M::StreamingResponse: 'static,
{
    let response = request_builder(model, request)
        .stream()
        .await
        .map_err(classify_completion_error)?;

    let deltas = response.filter_map(|item| async move { streamed_delta(item) });
    Ok(deltas.boxed())
}

fn streamed_delta<R>(
    item: Result<StreamedAssistantContent<R>, CompletionError>,
) -> Option<Result<MessageDelta, ModelError>> {
    match item {
        Ok(StreamedAssistantContent::Text(chunk)) if !chunk.text.is_empty() => {
            Some(Ok(MessageDelta::Text(chunk.text)))
        }
        Ok(StreamedAssistantContent::ToolCall(tool_call)) => {
            Some(Ok(MessageDelta::ToolCall(ToolCall::new(
                tool_call.id,
                tool_call.function.name,
                tool_call.function.arguments,
            ))))
        }
        // 工具参数片段、推理内容与最终响应不转发
        Ok(_) => None,
        Err(e) => Some(Err(classify_completion_error(e))),
    }
}

fn classify_completion_error(error: CompletionError) -> ModelError {
    let message = error.to_string();
    if is_context_overflow_message(&message) {
        ModelError::ContextWindowExceeded(message)
    } else {
        ModelError::Provider(message)
    }
}

/// 基于rig的对话模型实现，模型名称由每次调用的参数决定
#[derive(Clone)]
pub struct ProviderChatModel {
    client: ProviderClient,
    temperature: f64,
}

impl ProviderChatModel {
    pub fn new(config: &LLMConfig) -> Result<Self> {
        Ok(Self {
            client: ProviderClient::new(config)?,
            temperature: config.temperature,
        })
    }

    /// 检查模型连接和功能是否正常
    pub async fn check_connection(&self, model: &str) -> Result<()> {
        println!("🔄 正在检查模型连接...");
        let messages = [
            Message::system("You are a helpful assistant."),
            Message::user("Hello"),
        ];
        match self.send(&messages, &ModelCallSettings::new(model, 16)).await {
            Ok(_) => {
                println!("✅ 模型连接正常");
                Ok(())
            }
            Err(e) => {
                eprintln!("❌ 模型连接失败: {}", e);
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl ChatModel for ProviderChatModel {
    async fn send(
        &self,
        messages: &[Message],
        settings: &ModelCallSettings,
    ) -> Result<Message, ModelError> {
        let request = RigRequest::build(messages, settings, self.temperature)?;
        debug!(
            model = %settings.model,
            tools = ?settings.allowed_tools(),
            history = request.history.len(),
            "sending completion request"
        );
        let model = settings.model.as_str();

        match &self.client {
            ProviderClient::OpenAI(client) => {
                complete_with(client.completion_model(model).completions_api(), request).await
            }
            ProviderClient::Moonshot(client) => {
                complete_with(client.completion_model(model), request).await
            }
            ProviderClient::DeepSeek(client) => {
                complete_with(client.completion_model(model), request).await
            }
            ProviderClient::Mistral(client) => {
                complete_with(client.completion_model(model), request).await
            }
            ProviderClient::OpenRouter(client) => {
                complete_with(client.completion_model(model), request).await
            }
            ProviderClient::Anthropic(client) => {
                complete_with(client.completion_model(model), request).await
            }
            ProviderClient::Ollama(client) => {
                complete_with(client.completion_model(model), request).await
            }
        }
    }

    async fn send_streaming(
        &self,
        messages: &[Message],
        settings: &ModelCallSettings,
    ) -> Result<DeltaStream, ModelError> {
        let request = RigRequest::build(messages, settings, self.temperature)?;
        debug!(
            model = %settings.model,
            history = request.history.len(),
            "sending streaming completion request"
        );
        let model = settings.model.as_str();

        match &self.client {
            ProviderClient::OpenAI(client) => {
                stream_with(client.completion_model(model).completions_api(), request).await
            }
            ProviderClient::Moonshot(client) => {
                stream_with(client.completion_model(model), request).await
            }
            ProviderClient::DeepSeek(client) => {
                stream_with(client.completion_model(model), request).await
            }
            ProviderClient::Mistral(client) => {
                stream_with(client.completion_model(model), request).await
            }
            ProviderClient::OpenRouter(client) => {
                stream_with(client.completion_model(model), request).await
            }
            ProviderClient::Anthropic(client) => {
                stream_with(client.completion_model(model), request).await
            }
            ProviderClient::Ollama(client) => {
                stream_with(client.completion_model(model), request).await
            }
        }
    }
}
