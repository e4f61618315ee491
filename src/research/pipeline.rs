//! 顶层流水线：澄清 → 研究简报 → 主管 → 最终报告

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ResearchError;
use crate::llm::client::retry::{RetryError, always_retry};
use crate::llm::client::utils::{model_token_limit, truncate_chars};
use crate::llm::client::{Message, ToolCall, ToolMode};
use crate::llm::tools::CLARITY_COMPLETED;
use crate::research::context::ResearchContext;
use crate::research::dispatcher::{DispatchOutcome, StageMachine, dispatch};
use crate::research::prompts;
use crate::research::state::{PipelineState, PipelineStep};
use crate::research::supervisor;

/// 顶层状态机的阶段调用上限
pub const PIPELINE_CEILING: usize = 8;

pub const FINAL_REPORT_RETRIES_EXCEEDED: &str =
    "Error generating final report: Maximum retries exceeded";

#[async_trait]
impl StageMachine for PipelineState {
    type Step = PipelineStep;
    const TERMINAL: PipelineStep = PipelineStep::End;

    fn next_step(&self) -> PipelineStep {
        self.next_step
    }

    async fn run_stage(
        &mut self,
        step: PipelineStep,
        context: &ResearchContext,
    ) -> Result<(), ResearchError> {
        match step {
            PipelineStep::ClarifyWithUser => clarify_with_user(self, context).await,
            PipelineStep::WriteBrief => write_research_brief(self, context).await,
            PipelineStep::RunSupervisor => run_supervisor(self, context).await,
            PipelineStep::GenerateFinalReport => generate_final_report(self, context).await,
            PipelineStep::End => Ok(()),
        }
    }
}

/// 针对一段对话运行完整流水线
pub async fn run(
    context: &ResearchContext,
    messages: Vec<Message>,
) -> Result<PipelineState, ResearchError> {
    let mut state = PipelineState::new(messages);
    if dispatch(&mut state, context, PIPELINE_CEILING).await? == DispatchOutcome::CeilingReached {
        warn!("⚠️ 流水线未能在 {} 个阶段内结束", PIPELINE_CEILING);
    }
    Ok(state)
}

async fn clarify_with_user(
    state: &mut PipelineState,
    context: &ResearchContext,
) -> Result<(), ResearchError> {
    let config = context.config.as_ref();
    if !config.research.allow_clarification {
        state.next_step = PipelineStep::WriteBrief;
        return Ok(());
    }

    let prompt = prompts::clarify_prompt(config, &state.messages);
    let settings =
        context.tool_settings(&config.models.clarify, ToolMode::Auto, &[CLARITY_COMPLETED]);
    let response = context
        .decide("clarify_with_user", &[Message::user(prompt)], &settings, true)
        .await?;

    let calls: Vec<ToolCall> = response.tool_calls().into_iter().cloned().collect();
    match calls.as_slice() {
        [] => {
            info!("💬 模型直接回复了用户，跳过研究");
            state.messages.push(response);
            state.next_step = PipelineStep::End;
        }
        [call] if call.name == CLARITY_COMPLETED => {
            let verification = call.str_argument("verification").ok_or_else(|| {
                ResearchError::fatal(
                    "clarify_with_user",
                    "clarity_completed call is missing the 'verification' argument",
                )
            })?;
            let mut message = Message::assistant(verification);
            let id = Uuid::new_v4().to_string();
            message.set_id(id.clone());
            context.events.emit_message(&id, &message);
            state.messages.push(message);
            state.next_step = PipelineStep::WriteBrief;
        }
        [call] => {
            return Err(ResearchError::fatal(
                "clarify_with_user",
                format!("Unexpected tool call: {}", call.name),
            ));
        }
        _ => {
            return Err(ResearchError::fatal(
                "clarify_with_user",
                "Expected only one function call, got multiple",
            ));
        }
    }
    Ok(())
}

async fn write_research_brief(
    state: &mut PipelineState,
    context: &ResearchContext,
) -> Result<(), ResearchError> {
    let config = context.config.as_ref();
    let settings = context.model_settings(&config.models.research);
    let settings = &settings;

    let policy = context.retry_policy(config.research.max_structured_output_retries);
    let outcome = policy
        .run(
            &context.cancel,
            state.messages.clone(),
            move |conversation: Vec<Message>| async move {
                let prompt = prompts::brief_prompt(config, &conversation);
                context.stream_turn(&[Message::user(prompt)], settings).await
            },
            always_retry,
            |conversation: &mut Vec<Message>, error, _| {
                if error.is_context_window_exceeded() && conversation.len() > 1 {
                    conversation.remove(0);
                }
            },
        )
        .await;

    let brief = match outcome.result {
        Ok(message) => message.content(),
        Err(RetryError::Cancelled) => return Err(ResearchError::Cancelled),
        Err(e) => return Err(ResearchError::fatal("write_research_brief", e.to_string())),
    };
    info!("📝 研究简报已生成，{} 字符", brief.chars().count());

    state.supervisor_messages = vec![
        Message::system(prompts::supervisor_system_prompt(config)),
        Message::user(brief.clone()),
    ];
    state.research_brief = brief;
    state.next_step = PipelineStep::RunSupervisor;
    Ok(())
}

async fn run_supervisor(
    state: &mut PipelineState,
    context: &ResearchContext,
) -> Result<(), ResearchError> {
    let result = supervisor::run(
        context,
        state.research_brief.clone(),
        std::mem::take(&mut state.supervisor_messages),
    )
    .await?;

    state.supervisor_messages = result.supervisor_messages;
    state.notes = result.notes;
    state.raw_notes = result.raw_notes;
    state.next_step = PipelineStep::GenerateFinalReport;
    Ok(())
}

/// 超出上下文窗口时下一次尝试的研究发现字符预算：
/// 首次按 token 上限的 4 倍估算，之后每次缩减 10%
pub fn next_findings_budget(previous: Option<usize>, token_limit: usize) -> usize {
    match previous {
        None => token_limit.saturating_mul(4),
        Some(budget) => budget.saturating_sub((budget / 10).max(1)),
    }
}

#[derive(Debug, Clone)]
struct ReportAttempt {
    findings: String,
    char_budget: Option<usize>,
}

async fn generate_final_report(
    state: &mut PipelineState,
    context: &ResearchContext,
) -> Result<(), ResearchError> {
    let config = context.config.as_ref();
    let stage = &config.models.final_report;
    let token_limit = stage.context_window.or_else(|| model_token_limit(&stage.model));
    let settings = context.model_settings(stage);
    let settings = &settings;
    let brief = state.research_brief.as_str();
    let conversation = state.messages.as_slice();
    let full_findings = state.notes.join("\n");

    let policy = context.retry_policy(config.research.final_report_max_retries + 1);
    let outcome = policy
        .run(
            &context.cancel,
            ReportAttempt {
                findings: full_findings.clone(),
                char_budget: None,
            },
            move |attempt: ReportAttempt| async move {
                let prompt =
                    prompts::final_report_prompt(config, brief, conversation, &attempt.findings);
                context.stream_turn(&[Message::user(prompt)], settings).await
            },
            |error| error.is_context_window_exceeded() && token_limit.is_some(),
            |attempt: &mut ReportAttempt, _error, _| {
                if let Some(limit) = token_limit {
                    let budget = next_findings_budget(attempt.char_budget, limit);
                    warn!("⚠️ 最终报告超出上下文窗口，研究发现截断至 {} 字符", budget);
                    attempt.char_budget = Some(budget);
                    attempt.findings = truncate_chars(&full_findings, budget);
                }
            },
        )
        .await;

    let error_text = match outcome.result {
        Ok(report) => {
            info!("✅ 最终报告已生成");
            state.final_report = report.content();
            state.messages.push(report);
            state.next_step = PipelineStep::End;
            return Ok(());
        }
        Err(RetryError::Cancelled) => return Err(ResearchError::Cancelled),
        Err(RetryError::Exhausted { .. }) => FINAL_REPORT_RETRIES_EXCEEDED.to_string(),
        Err(RetryError::Aborted { source, .. }) => {
            if source.is_context_window_exceeded() && token_limit.is_none() {
                format!(
                    "Error generating final report: Token limit exceeded, however, we could not determine the model's maximum context length. Please set models.final_report.context_window for '{}'. {}",
                    stage.model, source
                )
            } else {
                format!("Error generating final report: {}", source)
            }
        }
    };

    warn!("❌ {}", error_text);
    let mut message = Message::assistant(error_text.clone());
    let id = Uuid::new_v4().to_string();
    message.set_id(id.clone());
    context.events.emit_message(&id, &message);
    state.messages.push(message);
    state.final_report = error_text;
    state.next_step = PipelineStep::End;
    Ok(())
}
