//! 面向调用方的事件流

use serde::Serialize;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::llm::client::{ContentItem, Message, ToolCall, ToolResult};

/// 每个助手轮次依次产生 MessageStart、若干 TextDelta、若干工具调用与结果、MessageEnd；
/// 流式调用中途失败时以 MessageAbandoned 代替 MessageEnd，调用方应丢弃该轮次已收到的内容，
/// 重试会以新的 id 开始下一个轮次。流水线结束时产生 Completed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResearchEvent {
    MessageStart { id: String },
    TextDelta { id: String, text: String },
    ToolCall { id: String, call: ToolCall },
    ToolResult { id: String, result: ToolResult },
    MessageEnd { id: String },
    MessageAbandoned { id: String },
    Completed { notes: Vec<String>, final_report: String },
}

/// 事件发送端，未连接接收方时静默丢弃
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<UnboundedSender<ResearchEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, UnboundedReceiver<ResearchEvent>) {
        let (sender, receiver) = unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: ResearchEvent) {
        if let Some(sender) = &self.sender {
            // 接收方已关闭时忽略
            let _ = sender.send(event);
        }
    }

    /// 以一个完整轮次的形式发出整条消息，工具调用与同一消息中的结果按顺序配对
    pub fn emit_message(&self, id: &str, message: &Message) {
        self.emit(ResearchEvent::MessageStart { id: id.to_string() });
        for item in &message.items {
            match item {
                ContentItem::Text(text) => self.emit(ResearchEvent::TextDelta {
                    id: id.to_string(),
                    text: text.clone(),
                }),
                ContentItem::ToolCall(call) => self.emit(ResearchEvent::ToolCall {
                    id: id.to_string(),
                    call: call.clone(),
                }),
                ContentItem::ToolResult(result) => self.emit(ResearchEvent::ToolResult {
                    id: id.to_string(),
                    result: result.clone(),
                }),
            }
        }
        self.emit(ResearchEvent::MessageEnd { id: id.to_string() });
    }
}
