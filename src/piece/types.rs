use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{MaestroError, Result};
use crate::piece::rules::Rule;

/// 曲目核心类型定义

/// 角色引用：配置中的 spec 字符串加上已解析的文件路径
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersonaRef {
    pub spec: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl PersonaRef {
    pub fn new(spec: impl Into<String>) -> Self {
        Self {
            spec: spec.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// 输出契约：乐章必须产出的报告工件
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputContract {
    pub name: String,
    pub path: String,
}

impl OutputContract {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// 已解析的策略 / 知识片段内容
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snippet {
    pub name: String,
    pub content: String,
}

impl Snippet {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// 乐章主体：叶子乐章或一层并行组
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum MovementBody {
    Leaf,
    ParallelGroup { children: Vec<Movement> },
}

/// 乐章：曲目中的一步
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Movement {
    pub name: String,
    pub persona: PersonaRef,
    pub instruction: String,
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub output_contracts: Vec<OutputContract>,
    pub body: MovementBody,
    /// 是否允许编辑工具
    #[serde(default)]
    pub allow_edit: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub policies: Vec<Snippet>,
    #[serde(default)]
    pub knowledge: Vec<Snippet>,
}

impl Movement {
    pub fn new(
        name: impl Into<String>,
        persona: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            persona: PersonaRef::new(persona),
            instruction: instruction.into(),
            rules: Vec::new(),
            output_contracts: Vec::new(),
            body: MovementBody::Leaf,
            allow_edit: false,
            model: None,
            policies: Vec::new(),
            knowledge: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_rules(mut self, rules: impl IntoIterator<Item = Rule>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn with_output_contract(mut self, contract: OutputContract) -> Self {
        self.output_contracts.push(contract);
        self
    }

    pub fn with_edit(mut self) -> Self {
        self.allow_edit = true;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_policy(mut self, snippet: Snippet) -> Self {
        self.policies.push(snippet);
        self
    }

    pub fn with_knowledge(mut self, snippet: Snippet) -> Self {
        self.knowledge.push(snippet);
        self
    }

    /// 声明为并行组；子乐章只允许一层嵌套
    pub fn with_children(mut self, children: Vec<Movement>) -> Result<Self> {
        for child in &children {
            if !matches!(child.body, MovementBody::Leaf) {
                return Err(MaestroError::NestedParallelGroup(child.name.clone()));
            }
        }
        self.body = MovementBody::ParallelGroup { children };
        Ok(self)
    }

    pub fn children(&self) -> Option<&[Movement]> {
        match &self.body {
            MovementBody::ParallelGroup { children } => Some(children.as_slice()),
            MovementBody::Leaf => None,
        }
    }

    /// 角色会话键：乐章名 + 角色 spec，并行子乐章天然互不相交
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.name, self.persona.spec)
    }
}

/// 循环检测动作
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopAction {
    Abort,
    Warn,
    Ignore,
}

/// 循环检测策略
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoopPolicy {
    pub max_consecutive_same_step: u32,
    pub action: LoopAction,
}

impl Default for LoopPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_same_step: 10,
            action: LoopAction::Warn,
        }
    }
}

/// 曲目配置（每次运行加载一次，之后不可变）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PieceConfig {
    pub name: String,
    pub movements: Vec<Movement>,
    pub initial: String,
    pub max_iterations: u32,
    #[serde(default)]
    pub loop_policy: Option<LoopPolicy>,
    /// 自动回答澄清提问的角色
    #[serde(default)]
    pub answer_persona: Option<PersonaRef>,
}

impl PieceConfig {
    pub fn new(name: impl Into<String>, initial: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            movements: Vec::new(),
            initial: initial.into(),
            max_iterations: 50,
            loop_policy: None,
            answer_persona: None,
        }
    }

    pub fn with_movement(mut self, movement: Movement) -> Self {
        self.movements.push(movement);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_loop_policy(mut self, policy: LoopPolicy) -> Self {
        self.loop_policy = Some(policy);
        self
    }

    pub fn with_answer_persona(mut self, persona: PersonaRef) -> Self {
        self.answer_persona = Some(persona);
        self
    }

    pub fn movement(&self, name: &str) -> Option<&Movement> {
        self.movements.iter().find(|m| m.name == name)
    }
}
