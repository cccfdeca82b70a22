use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::provider::AgentResponse;

/// 运行状态管理

/// 运行状态枚举
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Completed,
    Aborted,
}

/// 单次运行的可变状态，由其 Engine 独占
#[derive(Clone, Debug)]
pub struct RunState {
    pub current: String,
    /// 全局迭代计数，每个 tick 恰好加一
    pub iteration: u32,
    pub movement_iterations: HashMap<String, u32>,
    pub last_responses: HashMap<String, AgentResponse>,
    /// 最近一次响应，用于“传入上一轮输出”注入
    pub previous_response: Option<AgentResponse>,
    pub extra_inputs: Vec<String>,
    /// 角色键 → 会话 id；运行结束后唯一存续的状态
    pub sessions: HashMap<String, String>,
    pub status: RunStatus,
}

impl RunState {
    pub fn new(initial: impl Into<String>, sessions: HashMap<String, String>) -> Self {
        Self {
            current: initial.into(),
            iteration: 0,
            movement_iterations: HashMap::new(),
            last_responses: HashMap::new(),
            previous_response: None,
            extra_inputs: Vec::new(),
            sessions,
            status: RunStatus::Running,
        }
    }

    /// 递增乐章自身的迭代计数并返回新值
    pub fn bump_movement_iteration(&mut self, movement: &str) -> u32 {
        let counter = self
            .movement_iterations
            .entry(movement.to_string())
            .or_insert(0);
        *counter += 1;
        *counter
    }

    pub fn record_response(&mut self, movement: &str, response: AgentResponse) {
        self.previous_response = Some(response.clone());
        self.last_responses.insert(movement.to_string(), response);
    }

    pub fn session(&self, key: &str) -> Option<&String> {
        self.sessions.get(key)
    }

    pub fn set_session(&mut self, key: impl Into<String>, session_id: impl Into<String>) {
        self.sessions.insert(key.into(), session_id.into());
    }
}
