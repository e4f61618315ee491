//! LLM客户端 - 提供统一的对话模型接口

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::error::ModelError;

mod providers;
pub mod retry;
pub mod types;
pub mod utils;

pub use providers::ProviderChatModel;
pub use types::{
    ContentItem, Message, MessageAccumulator, MessageDelta, ModelCallSettings, Role, ToolCall,
    ToolDefinition, ToolMode, ToolResult,
};

/// 流式输出的增量序列
pub type DeltaStream = BoxStream<'static, Result<MessageDelta, ModelError>>;

/// 对话模型接口：发送对话，得到一条助手消息
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn send(
        &self,
        messages: &[Message],
        settings: &ModelCallSettings,
    ) -> Result<Message, ModelError>;

    /// 流式调用，默认将非流式结果拆分为增量
    async fn send_streaming(
        &self,
        messages: &[Message],
        settings: &ModelCallSettings,
    ) -> Result<DeltaStream, ModelError> {
        let message = self.send(messages, settings).await?;
        let deltas = types::deltas_from_message(message);
        Ok(stream::iter(deltas.into_iter().map(Ok)).boxed())
    }
}
