//! 三层状态机的状态定义

use crate::llm::client::Message;

/// 顶层流水线步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    ClarifyWithUser,
    WriteBrief,
    RunSupervisor,
    GenerateFinalReport,
    End,
}

/// 一次用户请求的流水线状态
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub next_step: PipelineStep,
    /// 用户可见的对话
    pub messages: Vec<Message>,
    pub research_brief: String,
    /// 主管对话的种子，主管结束后为其完整对话
    pub supervisor_messages: Vec<Message>,
    pub notes: Vec<String>,
    pub raw_notes: Vec<String>,
    pub final_report: String,
}

impl PipelineState {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            next_step: PipelineStep::ClarifyWithUser,
            messages,
            research_brief: String::new(),
            supervisor_messages: Vec::new(),
            notes: Vec::new(),
            raw_notes: Vec::new(),
            final_report: String::new(),
        }
    }
}

/// 主管步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorStep {
    Supervise,
    SuperviseTools,
    End,
}

#[derive(Debug, Clone)]
pub struct SupervisorState {
    /// 来自流水线的研究简报，只读
    pub research_brief: String,
    pub next_step: SupervisorStep,
    pub supervisor_messages: Vec<Message>,
    pub research_iterations: usize,
    pub notes: Vec<String>,
    pub raw_notes: Vec<String>,
}

impl SupervisorState {
    pub fn new(research_brief: String, supervisor_messages: Vec<Message>) -> Self {
        Self {
            research_brief,
            next_step: SupervisorStep::Supervise,
            supervisor_messages,
            research_iterations: 0,
            notes: Vec::new(),
            raw_notes: Vec::new(),
        }
    }
}

/// 研究员步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStep {
    Research,
    ResearchTools,
    CompressResearch,
    End,
}

#[derive(Debug, Clone)]
pub struct WorkerState {
    pub next_step: WorkerStep,
    pub researcher_messages: Vec<Message>,
    pub research_topic: String,
    pub compressed_research: String,
    pub raw_notes: Vec<String>,
    pub tool_call_iterations: usize,
}

impl WorkerState {
    pub fn new(research_topic: String) -> Self {
        Self {
            next_step: WorkerStep::Research,
            researcher_messages: vec![Message::user(research_topic.clone())],
            research_topic,
            compressed_research: String::new(),
            raw_notes: Vec::new(),
            tool_call_iterations: 0,
        }
    }
}
