use std::io::Write;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::ResearchError;
use crate::llm::client::{Message, ProviderChatModel};
use crate::research::{DeepResearcher, EventSink, ResearchEvent};

/// 时间跟踪
pub struct TimingScope {
    start_time: Instant,
}

impl Default for TimingScope {
    fn default() -> Self {
        Self::new()
    }
}

impl TimingScope {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn report(&self) -> String {
        format!("总执行时间: {:.2}秒", self.elapsed().as_secs_f64())
    }
}

/// 将事件渲染为终端输出
pub fn render_event(event: &ResearchEvent, verbose: bool) -> Option<String> {
    match event {
        ResearchEvent::TextDelta { text, .. } => Some(text.clone()),
        ResearchEvent::MessageEnd { .. } => Some("\n".to_string()),
        ResearchEvent::MessageAbandoned { .. } => Some("\n⚠️ 本轮输出中断，正在重试\n".to_string()),
        ResearchEvent::ToolCall { call, .. } if verbose => {
            Some(format!("🔧 {} {}\n", call.name, call.arguments))
        }
        ResearchEvent::ToolResult { result, .. } if verbose => Some(format!(
            "📎 {} 返回 {} 字符\n",
            result.name,
            result.result.chars().count()
        )),
        ResearchEvent::Completed { notes, .. } => {
            Some(format!("📚 研究完成，共 {} 条研究笔记\n", notes.len()))
        }
        _ => None,
    }
}

/// 启动一次命令行研究
pub async fn launch(config: &Config, query: &str) -> Result<()> {
    let timing = TimingScope::new();

    // 启动时检查模型连接
    ProviderChatModel::new(&config.llm)?
        .check_connection(&config.models.research.model)
        .await?;

    let researcher = DeepResearcher::from_config(config)?;
    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n⏹️ 收到中断信号，正在取消研究...");
            ctrl_c_cancel.cancel();
        }
    });

    let (events, mut receiver) = EventSink::channel();
    let verbose = config.verbose;
    let printer = tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            if let Some(output) = render_event(&event, verbose) {
                print!("{}", output);
                let _ = std::io::stdout().flush();
            }
        }
    });

    let result = researcher
        .run(vec![Message::user(query)], events, cancel)
        .await;
    // 发送端随上下文释放，打印任务在输出完剩余事件后结束
    let _ = printer.await;

    match result {
        Ok(_) => {
            println!("✅ {}", timing.report());
            Ok(())
        }
        Err(ResearchError::Cancelled) => {
            println!("⏹️ 研究已取消，{}", timing.report());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::{ToolCall, ToolResult};
    use serde_json::json;

    #[test]
    fn test_render_event_hides_tool_traffic_unless_verbose() {
        let call = ToolCall::new("c1", "web_search", json!({"queries": ["rust"]}));
        let event = ResearchEvent::ToolCall {
            id: "t".to_string(),
            call: call.clone(),
        };
        assert!(render_event(&event, false).is_none());
        assert!(render_event(&event, true).is_some());

        let result = ResearchEvent::ToolResult {
            id: "t".to_string(),
            result: ToolResult::for_call(&call, "abc"),
        };
        assert_eq!(
            render_event(&result, true).as_deref(),
            Some("📎 web_search 返回 3 字符\n")
        );
    }

    #[test]
    fn test_render_event_passes_text_through() {
        let event = ResearchEvent::TextDelta {
            id: "t".to_string(),
            text: "partial".to_string(),
        };
        assert_eq!(render_event(&event, false).as_deref(), Some("partial"));

        let abandoned = ResearchEvent::MessageAbandoned { id: "t".to_string() };
        assert!(render_event(&abandoned, false).is_some_and(|text| text.contains("中断")));
    }
}
