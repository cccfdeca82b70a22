// 编排引擎模块

mod evaluator;
mod events;
mod executor;
mod hooks;
mod instruction;
mod loop_detector;
mod parallel;
mod runner;
mod state;

pub use evaluator::{aggregate_match, find_tag, RuleEvaluator, RuleMatch};
pub use events::{EngineEvent, EngineObserver, ObserverRegistry, Phase, TracingObserver};
pub use executor::{ExecInput, MovementExecutor, MovementOutcome};
pub use hooks::{
    blocked_from_fn, extend_budget_from_fn, user_input_from_fn, BlockedContext, BlockedHook,
    EngineHooks, ExtendBudgetHook, UserInputHook, UserInputRequest,
};
pub use instruction::{build_instruction, write_context_snapshot};
pub use loop_detector::{LoopDecision, LoopDetector};
pub use parallel::ParallelRunner;
pub use runner::{Engine, RunOutcome};
pub use state::{RunState, RunStatus};
