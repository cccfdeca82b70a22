use serde::{Deserialize, Serialize};

/// 完成哨兵目标
pub const COMPLETE: &str = "COMPLETE";
/// 中止哨兵目标
pub const ABORT: &str = "ABORT";

/// 规则目标
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleTarget {
    /// 路由到指定乐章
    Movement(String),
    /// 整曲完成
    Complete,
    /// 整曲中止
    Abort,
}

impl RuleTarget {
    pub fn parse(raw: &str) -> Self {
        match raw {
            COMPLETE => RuleTarget::Complete,
            ABORT => RuleTarget::Abort,
            other => RuleTarget::Movement(other.to_string()),
        }
    }
}

/// 聚合匹配模式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateMode {
    All,
    Any,
}

/// 规则匹配种类（加载时解析一次）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleKind {
    /// 普通标签匹配
    Tag,
    /// ai(...) 判定匹配
    AiJudge { condition: String },
    /// all(...) / any(...) 聚合匹配；单个文本为共享条件，多个为逐子条件
    Aggregate {
        mode: AggregateMode,
        conditions: Vec<String>,
    },
}

/// 路由规则
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rule {
    pub condition: String,
    pub kind: RuleKind,
    /// 并行子乐章的规则可以不带目标，由父乐章决定路由
    pub target: Option<RuleTarget>,
    #[serde(default)]
    pub requires_user_input: bool,
    #[serde(default)]
    pub interactive_only: bool,
}

impl Rule {
    pub fn new(condition: impl Into<String>, target: impl Into<String>) -> Self {
        let condition = condition.into();
        Self {
            kind: parse_condition(&condition),
            condition,
            target: Some(RuleTarget::parse(&target.into())),
            requires_user_input: false,
            interactive_only: false,
        }
    }

    /// 并行子乐章的无目标规则
    pub fn untargeted(condition: impl Into<String>) -> Self {
        let condition = condition.into();
        Self {
            kind: parse_condition(&condition),
            condition,
            target: None,
            requires_user_input: false,
            interactive_only: false,
        }
    }

    pub fn with_user_input(mut self) -> Self {
        self.requires_user_input = true;
        self
    }

    pub fn interactive_only(mut self) -> Self {
        self.interactive_only = true;
        self
    }

    /// 聚合条件文本（非聚合规则返回 None）
    pub fn aggregate(&self) -> Option<(AggregateMode, &[String])> {
        match &self.kind {
            RuleKind::Aggregate { mode, conditions } => Some((*mode, conditions.as_slice())),
            _ => None,
        }
    }

    pub fn is_ai_judge(&self) -> bool {
        matches!(self.kind, RuleKind::AiJudge { .. })
    }

    /// 用于判定与聚合比较的条件文本
    pub fn condition_text(&self) -> &str {
        match &self.kind {
            RuleKind::AiJudge { condition } => condition,
            _ => &self.condition,
        }
    }
}

/// 解析规则条件文本
pub fn parse_condition(condition: &str) -> RuleKind {
    let trimmed = condition.trim();
    if let Some(inner) = call_arguments(trimmed, "ai") {
        if let Some(first) = inner.into_iter().next() {
            return RuleKind::AiJudge { condition: first };
        }
    }
    if let Some(conditions) = call_arguments(trimmed, "all") {
        if !conditions.is_empty() {
            return RuleKind::Aggregate {
                mode: AggregateMode::All,
                conditions,
            };
        }
    }
    if let Some(conditions) = call_arguments(trimmed, "any") {
        if !conditions.is_empty() {
            return RuleKind::Aggregate {
                mode: AggregateMode::Any,
                conditions,
            };
        }
    }
    RuleKind::Tag
}

/// 提取 `name(...)` 形式的参数列表，不匹配时返回 None
fn call_arguments(text: &str, name: &str) -> Option<Vec<String>> {
    let rest = text.strip_prefix(name)?.trim_start();
    let inner = rest.strip_prefix('(')?.strip_suffix(')')?;

    let mut arguments = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in inner.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                arguments.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() || !arguments.is_empty() {
        arguments.push(current.trim().to_string());
    }
    Some(arguments)
}
