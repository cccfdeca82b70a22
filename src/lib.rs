pub mod engine;
pub mod error;
pub mod piece;
pub mod pool;
pub mod provider;
pub mod sessions;
pub mod utils;

pub use engine::{
    aggregate_match, blocked_from_fn, build_instruction, extend_budget_from_fn, find_tag,
    user_input_from_fn, BlockedContext, BlockedHook, Engine, EngineEvent, EngineHooks,
    EngineObserver, ExecInput, ExtendBudgetHook, LoopDecision, LoopDetector, MovementExecutor,
    MovementOutcome, ObserverRegistry, ParallelRunner, Phase, RuleEvaluator, RuleMatch, RunOutcome,
    RunState, RunStatus, TracingObserver, UserInputHook, UserInputRequest,
};
pub use error::{MaestroError, Result};
pub use piece::{
    parse_condition, AggregateMode, LoopAction, LoopPolicy, Movement, MovementBody, OutputContract,
    PersonaRef, PieceConfig, Rule, RuleKind, RuleTarget, Snippet, ABORT, COMPLETE,
};
pub use pool::{run_with_worker_pool, PoolOutcome, TaskSource};
pub use provider::{
    AgentResponse, AgentStatus, CallOptions, Capability, DynProvider, EchoProvider, MatchMethod,
    Provider,
};
pub use sessions::{DynSessionStore, FileSessionStore, MemorySessionStore, SessionStore};
pub use utils::LoggingConfig;
