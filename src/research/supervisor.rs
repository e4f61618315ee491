//! 研究主管：决定还需要哪些研究，并以有上限的并发度派发研究员

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, info, instrument, warn};

use crate::error::ResearchError;
use crate::llm::client::{ContentItem, Message, ToolCall, ToolMode, ToolResult};
use crate::llm::tools::{CONDUCT_RESEARCH, RESEARCH_COMPLETE};
use crate::research::context::ResearchContext;
use crate::research::dispatcher::{DispatchOutcome, StageMachine, dispatch};
use crate::research::state::{SupervisorState, SupervisorStep, WorkerState};
use crate::research::worker::{self, SYNTHESIS_FAILED};

/// 超出并发上限的派发请求收到的拒绝信息
pub fn overflow_rejection(max_units: usize) -> String {
    format!(
        "Error: Did not run this research as you have already exceeded the maximum number of concurrent research units. Please try again with {} or fewer research units.",
        max_units
    )
}

/// 对话中所有工具结果的内容，按出现顺序
pub fn extract_notes(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .flat_map(|message| message.tool_results())
        .map(|result| result.result.clone())
        .collect()
}

#[async_trait]
impl StageMachine for SupervisorState {
    type Step = SupervisorStep;
    const TERMINAL: SupervisorStep = SupervisorStep::End;

    fn next_step(&self) -> SupervisorStep {
        self.next_step
    }

    async fn run_stage(
        &mut self,
        step: SupervisorStep,
        context: &ResearchContext,
    ) -> Result<(), ResearchError> {
        match step {
            SupervisorStep::Supervise => supervise(self, context).await,
            SupervisorStep::SuperviseTools => supervise_tools(self, context).await,
            SupervisorStep::End => Ok(()),
        }
    }
}

/// 运行主管直到研究完成
#[instrument(name = "supervisor", skip_all)]
pub async fn run(
    context: &ResearchContext,
    research_brief: String,
    supervisor_messages: Vec<Message>,
) -> Result<SupervisorState, ResearchError> {
    let mut state = SupervisorState::new(research_brief, supervisor_messages);
    let ceiling = 2 * context.config.research.max_researcher_iterations + 2;

    if dispatch(&mut state, context, ceiling).await? == DispatchOutcome::CeilingReached {
        state.notes = extract_notes(&state.supervisor_messages);
        state.next_step = SupervisorStep::End;
    }

    info!(
        "📚 主管完成，共 {} 轮，收集到 {} 条研究笔记",
        state.research_iterations,
        state.notes.len()
    );
    Ok(state)
}

async fn supervise(
    state: &mut SupervisorState,
    context: &ResearchContext,
) -> Result<(), ResearchError> {
    let settings = context.tool_settings(
        &context.config.models.research,
        ToolMode::Required,
        &[CONDUCT_RESEARCH, RESEARCH_COMPLETE],
    );
    let response = context
        .decide("supervisor", &state.supervisor_messages, &settings, false)
        .await?;

    if response.has_tool_call(RESEARCH_COMPLETE) {
        state.notes = extract_notes(&state.supervisor_messages);
        state.next_step = SupervisorStep::End;
        return Ok(());
    }

    state.supervisor_messages.push(response);
    state.research_iterations += 1;
    state.next_step = SupervisorStep::SuperviseTools;
    Ok(())
}

/// 单个工具调用的处理方式
enum Resolution {
    /// 由第 n 个研究员的结果回答
    Worker(usize),
    /// 直接回答，不执行
    Immediate(String),
}

/// 按调用顺序决定每个调用的处理方式，前 `max_units` 个派发请求被接纳
fn admit(calls: &[ToolCall], max_units: usize) -> (Vec<Resolution>, Vec<String>) {
    let mut topics = Vec::new();
    let mut admitted = 0;
    let resolutions = calls
        .iter()
        .map(|call| {
            if call.name != CONDUCT_RESEARCH {
                return Resolution::Immediate(format!(
                    "Error executing tool: unknown tool '{}'",
                    call.name
                ));
            }
            if admitted >= max_units {
                return Resolution::Immediate(overflow_rejection(max_units));
            }
            admitted += 1;
            match call.str_argument("research_topic") {
                Some(topic) => {
                    topics.push(topic.to_string());
                    Resolution::Worker(topics.len() - 1)
                }
                None => Resolution::Immediate(
                    "Error executing tool: missing required argument 'research_topic'".to_string(),
                ),
            }
        })
        .collect();
    (resolutions, topics)
}

async fn supervise_tools(
    state: &mut SupervisorState,
    context: &ResearchContext,
) -> Result<(), ResearchError> {
    let research = &context.config.research;
    let Some(last) = state.supervisor_messages.last() else {
        state.next_step = SupervisorStep::End;
        return Ok(());
    };
    let calls: Vec<ToolCall> = last.tool_calls().into_iter().cloned().collect();
    let turn_id = last.id().unwrap_or_default().to_string();
    let turn_text = last.text();

    let exceeded = state.research_iterations >= research.max_researcher_iterations;
    let completed = calls.iter().any(|call| call.name == RESEARCH_COMPLETE);
    if exceeded || calls.is_empty() || completed {
        debug!(exceeded, completed, calls = calls.len(), "supervisor exiting");
        state.notes = extract_notes(&state.supervisor_messages);
        state.next_step = SupervisorStep::End;
        return Ok(());
    }

    let max_units = research.max_concurrent_research_units;
    let (resolutions, topics) = admit(&calls, max_units);
    let conduct_calls = calls.iter().filter(|call| call.name == CONDUCT_RESEARCH).count();
    if conduct_calls > max_units {
        warn!(
            "⚠️ 请求了 {} 个研究任务，超出并发上限 {}，多余的请求已被拒绝",
            conduct_calls, max_units
        );
    }

    info!("🚀 并发启动 {} 个研究员", topics.len());
    let workers: Vec<WorkerState> =
        try_join_all(topics.into_iter().map(|topic| worker::run(context, topic))).await?;

    let results: Vec<ToolResult> = calls
        .iter()
        .zip(&resolutions)
        .map(|(call, resolution)| {
            let content = match resolution {
                Resolution::Worker(index) => {
                    let compressed = &workers[*index].compressed_research;
                    if compressed.trim().is_empty() {
                        SYNTHESIS_FAILED.to_string()
                    } else {
                        compressed.clone()
                    }
                }
                Resolution::Immediate(text) => text.clone(),
            };
            ToolResult::for_call(call, content)
        })
        .collect();

    if let Some(raw_notes) = merge_raw_notes(&workers) {
        state.raw_notes.push(raw_notes);
    }

    emit_turn(context, &turn_id, &turn_text, &calls, &results);
    state
        .supervisor_messages
        .extend(results.into_iter().map(Message::tool));
    state.next_step = SupervisorStep::Supervise;
    Ok(())
}

/// 合并本轮所有研究员的原始笔记，本轮没有研究员运行时返回 None
fn merge_raw_notes(workers: &[WorkerState]) -> Option<String> {
    if workers.is_empty() {
        return None;
    }
    let notes: Vec<String> = workers
        .iter()
        .map(|worker| worker.raw_notes.join("\n"))
        .collect();
    Some(notes.join("\n"))
}

/// 以一个轮次输出主管的工具调用及其结果
fn emit_turn(
    context: &ResearchContext,
    id: &str,
    text: &str,
    calls: &[ToolCall],
    results: &[ToolResult],
) {
    let mut turn = Message::assistant(text);
    if text.is_empty() {
        turn.items.clear();
    }
    for (call, result) in calls.iter().zip(results) {
        turn.items.push(ContentItem::ToolCall(call.clone()));
        turn.items.push(ContentItem::ToolResult(result.clone()));
    }
    context.events.emit_message(id, &turn);
}
