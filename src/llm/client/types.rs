//! 对话消息与模型调用参数

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// 元数据中标识助手轮次的键
pub const MESSAGE_ID_KEY: &str = "id";

/// 消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 模型发起的工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// 读取字符串类型的参数
    pub fn str_argument(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

/// 工具调用结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    pub result: String,
}

impl ToolResult {
    pub fn for_call(call: &ToolCall, result: impl Into<String>) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            result: result.into(),
        }
    }
}

/// 消息内容项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ContentItem {
    Text(String),
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

/// 对话消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub items: Vec<ContentItem>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Message {
    fn with_text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            items: vec![ContentItem::Text(text.into())],
            metadata: HashMap::new(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_text(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_text(Role::Assistant, text)
    }

    /// 带工具调用的助手消息
    pub fn assistant_with_calls(text: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let text = text.into();
        let mut items = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            items.push(ContentItem::Text(text));
        }
        items.extend(calls.into_iter().map(ContentItem::ToolCall));
        Self {
            role: Role::Assistant,
            items,
            metadata: HashMap::new(),
        }
    }

    pub fn tool(result: ToolResult) -> Self {
        Self {
            role: Role::Tool,
            items: vec![ContentItem::ToolResult(result)],
            metadata: HashMap::new(),
        }
    }

    /// 拼接所有文本内容
    pub fn text(&self) -> String {
        let mut text = String::new();
        for item in &self.items {
            if let ContentItem::Text(chunk) = item {
                text.push_str(chunk);
            }
        }
        text
    }

    /// 消息内容的纯文本表示，工具结果取其结果文本
    pub fn content(&self) -> String {
        let mut parts = Vec::new();
        for item in &self.items {
            match item {
                ContentItem::Text(text) => parts.push(text.as_str()),
                ContentItem::ToolResult(result) => parts.push(result.result.as_str()),
                ContentItem::ToolCall(_) => {}
            }
        }
        parts.join("\n")
    }

    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.items
            .iter()
            .filter_map(|item| match item {
                ContentItem::ToolCall(call) => Some(call),
                ContentItem::Text(_) | ContentItem::ToolResult(_) => None,
            })
            .collect()
    }

    pub fn tool_results(&self) -> Vec<&ToolResult> {
        self.items
            .iter()
            .filter_map(|item| match item {
                ContentItem::ToolResult(result) => Some(result),
                ContentItem::Text(_) | ContentItem::ToolCall(_) => None,
            })
            .collect()
    }

    pub fn has_tool_call(&self, name: &str) -> bool {
        self.tool_calls().iter().any(|call| call.name == name)
    }

    /// 助手轮次标识
    pub fn id(&self) -> Option<&str> {
        self.metadata.get(MESSAGE_ID_KEY).and_then(Value::as_str)
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.metadata
            .insert(MESSAGE_ID_KEY.to_string(), Value::String(id.into()));
    }
}

/// 工具调用模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolMode {
    #[default]
    None,
    Auto,
    Required,
}

/// 提供给模型的工具声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 单次模型调用参数
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelCallSettings {
    pub model: String,
    pub max_tokens: u64,
    pub tool_mode: ToolMode,
    /// 允许模型调用的工具
    pub tools: Vec<ToolDefinition>,
}

impl ModelCallSettings {
    pub fn new(model: impl Into<String>, max_tokens: u64) -> Self {
        Self {
            model: model.into(),
            max_tokens,
            tool_mode: ToolMode::None,
            tools: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tool_mode: ToolMode, tools: Vec<ToolDefinition>) -> Self {
        self.tool_mode = tool_mode;
        self.tools = tools;
        self
    }

    pub fn allowed_tools(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.name.as_str()).collect()
    }
}

/// 流式输出的增量
#[derive(Debug, Clone, PartialEq)]
pub enum MessageDelta {
    Text(String),
    ToolCall(ToolCall),
}

/// 将流式增量累积为完整的助手消息
#[derive(Debug)]
pub struct MessageAccumulator {
    message: Message,
}

impl MessageAccumulator {
    pub fn new(id: impl Into<String>) -> Self {
        let mut message = Message {
            role: Role::Assistant,
            items: Vec::new(),
            metadata: HashMap::new(),
        };
        message.set_id(id);
        Self { message }
    }

    pub fn push(&mut self, delta: MessageDelta) {
        match delta {
            MessageDelta::Text(chunk) => match self.message.items.last_mut() {
                Some(ContentItem::Text(text)) => text.push_str(&chunk),
                _ => self.message.items.push(ContentItem::Text(chunk)),
            },
            MessageDelta::ToolCall(call) => self.message.items.push(ContentItem::ToolCall(call)),
        }
    }

    pub fn finish(self) -> Message {
        self.message
    }
}

/// 将一条完整消息拆分为增量，用于不支持原生流式输出的模型
pub fn deltas_from_message(message: Message) -> Vec<MessageDelta> {
    message
        .items
        .into_iter()
        .filter_map(|item| match item {
            ContentItem::Text(text) => Some(MessageDelta::Text(text)),
            ContentItem::ToolCall(call) => Some(MessageDelta::ToolCall(call)),
            ContentItem::ToolResult(_) => None,
        })
        .collect()
}
