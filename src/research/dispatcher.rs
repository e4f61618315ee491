//! 通用阶段调度器，流水线、主管与研究员共用

use async_trait::async_trait;
use std::fmt::Debug;
use tracing::{debug, warn};

use crate::error::ResearchError;
use crate::research::context::ResearchContext;

/// 由步骤驱动的状态机
#[async_trait]
pub trait StageMachine: Send {
    type Step: Copy + Eq + Debug + Send;

    /// 终止步骤
    const TERMINAL: Self::Step;

    fn next_step(&self) -> Self::Step;

    /// 执行当前步骤对应的阶段函数，由阶段函数设置下一步骤
    async fn run_stage(
        &mut self,
        step: Self::Step,
        context: &ResearchContext,
    ) -> Result<(), ResearchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 到达终止步骤
    Completed,
    /// 阶段调用次数达到上限
    CeilingReached,
}

/// 反复执行当前步骤直到终止步骤或达到调用上限
pub async fn dispatch<S>(
    state: &mut S,
    context: &ResearchContext,
    ceiling: usize,
) -> Result<DispatchOutcome, ResearchError>
where
    S: StageMachine,
{
    let mut invocations = 0;
    loop {
        let step = state.next_step();
        if step == S::TERMINAL {
            return Ok(DispatchOutcome::Completed);
        }
        if invocations >= ceiling {
            warn!("⚠️ 阶段调用次数达到上限 {}，停留在 {:?}", ceiling, step);
            return Ok(DispatchOutcome::CeilingReached);
        }
        context.ensure_active()?;

        debug!(?step, "dispatching stage");
        state.run_stage(step, context).await?;
        invocations += 1;
    }
}
