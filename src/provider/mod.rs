use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::piece::PersonaRef;

/// 角色调用状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentStatus {
    Success,
    Blocked,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Success => "success",
            AgentStatus::Blocked => "blocked",
            AgentStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 规则匹配方法
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchMethod {
    Phase1Tag,
    Phase3Tag,
    AiJudge,
    AiJudgeFallback,
    Aggregate,
}

/// 角色调用结果
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentResponse {
    pub persona: String,
    pub status: AgentStatus,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// 匹配到的规则下标（0 基）及产生它的方法
    #[serde(default)]
    pub matched_rule_index: Option<usize>,
    #[serde(default)]
    pub match_method: Option<MatchMethod>,
}

impl AgentResponse {
    pub fn new(persona: impl Into<String>, status: AgentStatus, content: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
            status,
            content: content.into(),
            timestamp: Utc::now(),
            session_id: None,
            error: None,
            matched_rule_index: None,
            match_method: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_match(mut self, index: usize, method: MatchMethod) -> Self {
        self.matched_rule_index = Some(index);
        self.match_method = Some(method);
        self
    }
}

/// 调用能力
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    /// 常规工具访问
    Tools,
    /// 编辑工具
    Edit,
    /// 写出报告工件
    Report,
}

/// 角色调用选项
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    pub workdir: Option<PathBuf>,
    /// 续接的会话 id
    pub resume: Option<String>,
    pub model: Option<String>,
    pub capabilities: Vec<Capability>,
    pub cancel: CancellationToken,
}

/// 角色调用 trait：引擎唯一依赖的 provider 契约
#[async_trait]
pub trait Provider: Send + Sync {
    async fn call(
        &self,
        persona: &PersonaRef,
        prompt: &str,
        options: CallOptions,
    ) -> Result<AgentResponse>;
}

pub type DynProvider = Arc<dyn Provider>;

/// 回显 provider，用于示例和测试
#[derive(Default, Clone)]
pub struct EchoProvider;

#[async_trait]
impl Provider for EchoProvider {
    async fn call(
        &self,
        persona: &PersonaRef,
        prompt: &str,
        _options: CallOptions,
    ) -> Result<AgentResponse> {
        Ok(
            AgentResponse::new(persona.spec.clone(), AgentStatus::Success, prompt)
                .with_session("echo-session"),
        )
    }
}
