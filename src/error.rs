//! 研究引擎错误类型

use thiserror::Error;

/// 模型调用错误
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    /// 输入超过模型上下文窗口，需要截断内容后再重试
    #[error("context window exceeded: {0}")]
    ContextWindowExceeded(String),

    /// 模型返回空内容或格式错误
    #[error("invalid model response: {0}")]
    InvalidResponse(String),

    #[error("provider error: {0}")]
    Provider(String),

    /// 调用超过时限，目前用于网页摘要
    #[error("model call timed out after {0}s")]
    Timeout(u64),
}

impl ModelError {
    pub fn is_context_window_exceeded(&self) -> bool {
        matches!(self, ModelError::ContextWindowExceeded(_))
    }
}

/// 研究流水线错误
#[derive(Debug, Error)]
pub enum ResearchError {
    /// 调用方断开连接，不视为失败
    #[error("research cancelled")]
    Cancelled,

    /// 结构化决策调用重试耗尽等不可恢复的错误
    #[error("Error in {stage}: {message}")]
    Fatal { stage: &'static str, message: String },
}

impl ResearchError {
    pub fn fatal(stage: &'static str, message: impl Into<String>) -> Self {
        ResearchError::Fatal {
            stage,
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ResearchError::Cancelled)
    }
}
