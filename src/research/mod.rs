//! 深度研究引擎

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::error::ResearchError;
use crate::llm::client::{ChatModel, Message, ProviderChatModel};
use crate::llm::tools::{ToolRegistry, WebSearchTool};
use crate::search::{HttpFetchProvider, TavilySearchProvider};

pub mod context;
pub mod dispatcher;
pub mod events;
pub mod pipeline;
pub mod prompts;
pub mod state;
pub mod supervisor;
pub mod worker;
pub mod workflow;

pub use context::ResearchContext;
pub use events::{EventSink, ResearchEvent};
pub use workflow::launch;

/// 一次研究请求的结果
#[derive(Debug, Clone)]
pub struct ResearchOutcome {
    pub notes: Vec<String>,
    pub raw_notes: Vec<String>,
    pub final_report: String,
    /// 追加了澄清、确认与最终报告之后的用户对话
    pub messages: Vec<Message>,
}

/// 研究引擎入口
#[derive(Clone)]
pub struct DeepResearcher {
    config: Arc<Config>,
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
}

impl DeepResearcher {
    pub fn new(config: Config, model: Arc<dyn ChatModel>, tools: ToolRegistry) -> Self {
        Self {
            config: Arc::new(config),
            model,
            tools: Arc::new(tools),
        }
    }

    /// 按配置创建模型客户端与工具，启用搜索时注册 web_search
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let model: Arc<dyn ChatModel> = Arc::new(ProviderChatModel::new(&config.llm)?);
        let mut tools = ToolRegistry::with_control_tools();

        if config.search.enabled {
            let search = TavilySearchProvider::new(&config.search)?;
            let fetch = HttpFetchProvider::new(config.search.fetch_timeout_secs)?;
            tools.register(WebSearchTool::new(
                Arc::new(search),
                Arc::new(fetch),
                model.clone(),
                config.search.clone(),
                config.models.summarization.clone(),
                config.prompts.summarize_webpage.clone(),
            ));
        }

        Ok(Self::new(config.clone(), model, tools))
    }

    /// 运行完整研究流程。取消时丢弃所有进行中的工作并返回 [`ResearchError::Cancelled`]
    pub async fn run(
        &self,
        messages: Vec<Message>,
        events: EventSink,
        cancel: CancellationToken,
    ) -> Result<ResearchOutcome, ResearchError> {
        let context = ResearchContext::new(self.config.clone(), self.model.clone(), self.tools.clone())
            .with_events(events.clone())
            .with_cancellation(cancel.clone());

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ResearchError::Cancelled),
            result = pipeline::run(&context, messages) => result,
        };

        match result {
            Ok(state) => {
                events.emit(ResearchEvent::Completed {
                    notes: state.notes.clone(),
                    final_report: state.final_report.clone(),
                });
                Ok(ResearchOutcome {
                    notes: state.notes,
                    raw_notes: state.raw_notes,
                    final_report: state.final_report,
                    messages: state.messages,
                })
            }
            Err(ResearchError::Cancelled) => {
                info!("研究已被取消");
                Err(ResearchError::Cancelled)
            }
            Err(e) => {
                error!("❌ 研究流程失败: {}", e);
                Err(e)
            }
        }
    }
}
