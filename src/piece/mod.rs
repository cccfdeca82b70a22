// 曲目数据模型模块

mod rules;
mod types;

pub use rules::{parse_condition, AggregateMode, Rule, RuleKind, RuleTarget, ABORT, COMPLETE};
pub use types::{
    LoopAction, LoopPolicy, Movement, MovementBody, OutputContract, PersonaRef, PieceConfig,
    Snippet,
};
