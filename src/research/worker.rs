//! 研究员：针对单个主题的 ReAct 工具调用循环，结束时压缩研究结果

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::error::ResearchError;
use crate::llm::client::retry::{RetryError, always_retry};
use crate::llm::client::{Message, Role, ToolCall, ToolMode, ToolResult};
use crate::llm::tools::RESEARCH_COMPLETE;
use crate::research::context::ResearchContext;
use crate::research::dispatcher::{DispatchOutcome, StageMachine, dispatch};
use crate::research::prompts;
use crate::research::state::{WorkerState, WorkerStep};

pub const SYNTHESIS_FAILED: &str = "Error synthesizing research report: Maximum retries exceeded";

#[async_trait]
impl StageMachine for WorkerState {
    type Step = WorkerStep;
    const TERMINAL: WorkerStep = WorkerStep::End;

    fn next_step(&self) -> WorkerStep {
        self.next_step
    }

    async fn run_stage(
        &mut self,
        step: WorkerStep,
        context: &ResearchContext,
    ) -> Result<(), ResearchError> {
        match step {
            WorkerStep::Research => research(self, context).await,
            WorkerStep::ResearchTools => research_tools(self, context).await,
            WorkerStep::CompressResearch => compress_research(self, context).await,
            WorkerStep::End => Ok(()),
        }
    }
}

/// 运行一个研究员直到结束，返回其最终状态
#[instrument(name = "researcher", skip_all, fields(topic = %research_topic))]
pub async fn run(
    context: &ResearchContext,
    research_topic: String,
) -> Result<WorkerState, ResearchError> {
    let mut state = WorkerState::new(research_topic);
    let ceiling = 2 * context.config.research.max_react_tool_calls + 2;

    let outcome = dispatch(&mut state, context, ceiling).await?;
    if outcome == DispatchOutcome::CeilingReached && state.next_step != WorkerStep::End {
        compress_research(&mut state, context).await?;
    }

    info!(
        "✅ 研究员完成，工具调用轮次: {}，压缩结果 {} 字符",
        state.tool_call_iterations,
        state.compressed_research.chars().count()
    );
    Ok(state)
}

async fn research(state: &mut WorkerState, context: &ResearchContext) -> Result<(), ResearchError> {
    let config = context.config.as_ref();
    let tool_names = context.worker_tool_names();
    let allowed: Vec<&str> = tool_names.iter().map(String::as_str).collect();
    let settings = context.tool_settings(&config.models.research, ToolMode::Required, &allowed);

    let mut messages = Vec::with_capacity(state.researcher_messages.len() + 1);
    messages.push(Message::system(prompts::researcher_system_prompt(config)));
    messages.extend(state.researcher_messages.iter().cloned());

    let response = context
        .decide("researcher", &messages, &settings, false)
        .await?;

    if response.has_tool_call(RESEARCH_COMPLETE) {
        debug!("研究员声明研究完成");
        state.next_step = WorkerStep::CompressResearch;
        return Ok(());
    }

    state.researcher_messages.push(response);
    state.tool_call_iterations += 1;
    state.next_step = WorkerStep::ResearchTools;
    Ok(())
}

async fn research_tools(
    state: &mut WorkerState,
    context: &ResearchContext,
) -> Result<(), ResearchError> {
    let calls: Vec<ToolCall> = state
        .researcher_messages
        .last()
        .map(|message| message.tool_calls().into_iter().cloned().collect())
        .unwrap_or_default();

    if calls.is_empty() || calls.iter().any(|call| call.name == RESEARCH_COMPLETE) {
        state.next_step = WorkerStep::CompressResearch;
        return Ok(());
    }

    debug!("🔧 并发执行 {} 个工具调用", calls.len());
    let results = context.execute_tools(&calls).await;
    for (call, result) in calls.iter().zip(results) {
        state
            .researcher_messages
            .push(Message::tool(ToolResult::for_call(call, result)));
    }

    state.next_step =
        if state.tool_call_iterations >= context.config.research.max_react_tool_calls {
            WorkerStep::CompressResearch
        } else {
            WorkerStep::Research
        };
    Ok(())
}

async fn compress_research(
    state: &mut WorkerState,
    context: &ResearchContext,
) -> Result<(), ResearchError> {
    let config = context.config.as_ref();
    let instruction = config.prompts.compress_research_instruction.clone();
    state
        .researcher_messages
        .push(Message::user(instruction.clone()));

    let settings = context.model_settings(&config.models.compression);
    let system_prompt = prompts::compression_system_prompt(config);
    let settings = &settings;
    let system_prompt = &system_prompt;
    let instruction = &instruction;

    let policy = context.retry_policy(config.research.compression_max_attempts);
    let outcome = policy
        .run(
            &context.cancel,
            std::mem::take(&mut state.researcher_messages),
            move |conversation: Vec<Message>| async move {
                let mut messages = Vec::with_capacity(conversation.len() + 1);
                messages.push(Message::system(system_prompt.clone()));
                messages.extend(conversation);
                context.model.send(&messages, settings).await
            },
            always_retry,
            |conversation: &mut Vec<Message>, error, attempt| {
                if error.is_context_window_exceeded() {
                    prune_to_last_assistant(conversation, instruction);
                    warn!(
                        "⚠️ 压缩第 {} 次尝试超出上下文窗口，裁剪后剩余 {} 条消息",
                        attempt,
                        conversation.len()
                    );
                }
            },
        )
        .await;

    state.researcher_messages = outcome.state;
    state.raw_notes = vec![collect_raw_notes(&state.researcher_messages)];
    state.next_step = WorkerStep::End;

    match outcome.result {
        Ok(message) => {
            state.compressed_research = message.content();
            Ok(())
        }
        Err(RetryError::Cancelled) => Err(ResearchError::Cancelled),
        Err(e) => {
            warn!("❌ 研究结果压缩失败: {:?}", e);
            state.compressed_research = SYNTHESIS_FAILED.to_string();
            Ok(())
        }
    }
}

/// 删除最后一条助手消息及其之后的内容，再补回压缩指令
pub fn prune_to_last_assistant(conversation: &mut Vec<Message>, instruction: &str) {
    if let Some(index) = conversation
        .iter()
        .rposition(|message| message.role == Role::Assistant)
    {
        conversation.truncate(index);
        conversation.push(Message::user(instruction));
    }
}

/// 所有助手与工具消息的非空内容，按换行拼接
pub fn collect_raw_notes(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|message| matches!(message.role, Role::Assistant | Role::Tool))
        .map(Message::content)
        .filter(|content| !content.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
