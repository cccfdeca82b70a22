use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::provider::AgentStatus;

/// 引擎观测事件
///
/// 每个事件相对它描述的状态转换同步触发，
/// 观察者不会看到“来自未来”的状态。

/// 乐章执行阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// 阶段一：执行
    Execute,
    /// 阶段二：写出报告
    Report,
    /// 阶段三：状态判定
    StatusJudgment,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Execute => "execute",
            Phase::Report => "report",
            Phase::StatusJudgment => "status-judgment",
        }
    }
}

#[derive(Clone, Debug)]
pub enum EngineEvent {
    MovementStart {
        movement: String,
        iteration: u32,
    },
    MovementComplete {
        movement: String,
        status: AgentStatus,
    },
    MovementBlocked {
        movement: String,
    },
    MovementUserInput {
        movement: String,
        condition: String,
    },
    PhaseStart {
        movement: String,
        phase: Phase,
    },
    PhaseComplete {
        movement: String,
        phase: Phase,
        status: AgentStatus,
    },
    IterationLimit {
        iteration: u32,
        max_iterations: u32,
    },
    LoopWarning {
        movement: String,
        count: u32,
    },
    RunComplete {
        piece: String,
        iterations: u32,
    },
    RunAbort {
        piece: String,
        reason: String,
    },
}

/// 引擎观察者 trait
pub trait EngineObserver: Send + Sync {
    fn on_event(&self, event: &EngineEvent);
}

/// 观察者注册表
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    observers: Vec<Arc<dyn EngineObserver>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: Arc<dyn EngineObserver>) {
        self.observers.push(observer);
    }

    pub fn emit(&self, event: &EngineEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}

/// 通过 tracing 输出全部事件的观察者
#[derive(Default, Clone)]
pub struct TracingObserver;

impl EngineObserver for TracingObserver {
    fn on_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::MovementStart {
                movement,
                iteration,
            } => info!(movement = %movement, iteration = *iteration, "movement start"),
            EngineEvent::MovementComplete { movement, status } => {
                info!(movement = %movement, status = status.as_str(), "movement complete");
            }
            EngineEvent::MovementBlocked { movement } => {
                warn!(movement = %movement, "movement blocked");
            }
            EngineEvent::MovementUserInput {
                movement,
                condition,
            } => info!(
                movement = %movement,
                condition = %condition,
                "movement waiting for user input"
            ),
            EngineEvent::PhaseStart { movement, phase } => {
                debug!(movement = %movement, phase = phase.as_str(), "phase start");
            }
            EngineEvent::PhaseComplete {
                movement,
                phase,
                status,
            } => debug!(
                movement = %movement,
                phase = phase.as_str(),
                status = status.as_str(),
                "phase complete"
            ),
            EngineEvent::IterationLimit {
                iteration,
                max_iterations,
            } => warn!(
                iteration = *iteration,
                max_iterations = *max_iterations,
                "iteration limit reached"
            ),
            EngineEvent::LoopWarning { movement, count } => {
                warn!(movement = %movement, count = *count, "loop warning");
            }
            EngineEvent::RunComplete { piece, iterations } => {
                info!(piece = %piece, iterations = *iterations, "run complete");
            }
            EngineEvent::RunAbort { piece, reason } => {
                warn!(piece = %piece, reason = %reason, "run aborted");
            }
        }
    }
}
