//! 工具注册与执行

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::llm::client::{ToolCall, ToolDefinition};

pub mod web_search;

pub use web_search::WebSearchTool;

pub const CLARITY_COMPLETED: &str = "clarity_completed";
pub const CONDUCT_RESEARCH: &str = "conduct_research";
pub const RESEARCH_COMPLETE: &str = "research_complete";
pub const WEB_SEARCH: &str = "web_search";

/// 可被模型调用的工具
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn call(&self, arguments: Value) -> Result<String>;
}

/// 仅用于流程控制的工具，模型调用它们表达决策，直接执行时只返回确认信息
pub struct ControlTool {
    definition: ToolDefinition,
    acknowledgement: &'static str,
}

impl ControlTool {
    pub fn clarity_completed() -> Self {
        Self {
            definition: ToolDefinition {
                name: CLARITY_COMPLETED.to_string(),
                description: "Call this tool when the request is clear enough to start research."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "verification": {
                            "type": "string",
                            "description": "Message confirming that research will start, summarizing the understood request."
                        }
                    },
                    "required": ["verification"]
                }),
            },
            acknowledgement: "Clarification completed.",
        }
    }

    pub fn conduct_research() -> Self {
        Self {
            definition: ToolDefinition {
                name: CONDUCT_RESEARCH.to_string(),
                description: "Delegate a research task to a dedicated researcher.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "research_topic": {
                            "type": "string",
                            "description": "The topic to research. Should be a single topic, described in high detail (at least a paragraph)."
                        }
                    },
                    "required": ["research_topic"]
                }),
            },
            acknowledgement: "Research task accepted.",
        }
    }

    pub fn research_complete() -> Self {
        Self {
            definition: ToolDefinition {
                name: RESEARCH_COMPLETE.to_string(),
                description: "Call this tool to indicate that the research is complete."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {},
                    "required": []
                }),
            },
            acknowledgement: "Research is complete.",
        }
    }
}

#[async_trait]
impl Tool for ControlTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn call(&self, _arguments: Value) -> Result<String> {
        Ok(self.acknowledgement.to_string())
    }
}

/// 工具注册表：按名称解析工具，并把任何执行错误转换为字符串结果
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置流程控制工具的注册表
    pub fn with_control_tools() -> Self {
        let mut registry = Self::new();
        registry.register(ControlTool::clarity_completed());
        registry.register(ControlTool::conduct_research());
        registry.register(ControlTool::research_complete());
        registry
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        self.tools.insert(name, tool);
    }

    /// 已注册工具名，按字母排序
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// 按给定顺序返回已注册工具的声明，未注册的名称被忽略
    pub fn definitions(&self, names: &[&str]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|name| self.tools.get(*name))
            .map(|tool| tool.definition())
            .collect()
    }

    /// 执行一次工具调用，任何错误都作为结果文本返回
    pub async fn execute(&self, call: &ToolCall) -> String {
        let Some(tool) = self.resolve(&call.name) else {
            warn!("模型调用了未注册的工具: {}", call.name);
            return format!("Error executing tool: unknown tool '{}'", call.name);
        };

        debug!("🔧 tool called...{}@{}", call.name, call.arguments);
        match tool.call(call.arguments.clone()).await {
            Ok(result) => result,
            Err(e) => {
                warn!("工具 {} 执行失败: {:#}", call.name, e);
                format!("Error executing tool: {:#}", e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "flaky".to_string(),
                description: String::new(),
                parameters: json!({"type": "object"}),
            }
        }

        async fn call(&self, _arguments: Value) -> Result<String> {
            bail!("upstream unavailable")
        }
    }

    #[tokio::test]
    async fn test_execute_converts_errors_to_results() {
        let mut registry = ToolRegistry::with_control_tools();
        registry.register(FailingTool);

        let result = registry
            .execute(&ToolCall::new("1", "flaky", json!({})))
            .await;
        assert_eq!(result, "Error executing tool: upstream unavailable");

        let unknown = registry
            .execute(&ToolCall::new("2", "missing", json!({})))
            .await;
        assert!(unknown.starts_with("Error executing tool: unknown tool"));

        let ack = registry
            .execute(&ToolCall::new("3", RESEARCH_COMPLETE, json!({})))
            .await;
        assert_eq!(ack, "Research is complete.");
    }

    #[test]
    fn test_definitions_keep_requested_order() {
        let registry = ToolRegistry::with_control_tools();
        let names: Vec<String> = registry
            .definitions(&[RESEARCH_COMPLETE, WEB_SEARCH, CONDUCT_RESEARCH])
            .into_iter()
            .map(|definition| definition.name)
            .collect();
        assert_eq!(names, vec![RESEARCH_COMPLETE, CONDUCT_RESEARCH]);
    }
}
