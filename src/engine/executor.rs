use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::engine::evaluator::{find_tag, RuleEvaluator};
use crate::engine::events::{EngineEvent, ObserverRegistry, Phase};
use crate::engine::instruction::write_context_snapshot;
use crate::error::{MaestroError, Result};
use crate::provider::{AgentResponse, AgentStatus, CallOptions, Capability, DynProvider};

use crate::piece::Movement;

/// 乐章执行器：把单个（非并行）乐章跑到一个路由决定
///
/// 三阶段协议：
/// - 阶段一（执行）：完整工具访问；声明了输出契约时扣下写报告能力
/// - 阶段二（报告，可选）：续接同一会话，只带写报告能力
/// - 阶段三（状态判定，可选）：全新会话、无工具，只负责给出规则决定
#[derive(Clone)]
pub struct MovementExecutor {
    provider: DynProvider,
    evaluator: RuleEvaluator,
    observers: ObserverRegistry,
    workdir: Option<PathBuf>,
    context_dir: Option<PathBuf>,
}

/// 一次乐章执行的输入快照
#[derive(Clone, Debug)]
pub struct ExecInput {
    pub instruction: String,
    /// 续接的会话 id（来自 RunState 的会话表）
    pub resume: Option<String>,
    pub movement_iteration: u32,
    pub cancel: CancellationToken,
}

/// 乐章执行结果；普通乐章与并行组返回同一形状，
/// 引擎的 tick 循环不感知走的是哪条路径
#[derive(Clone, Debug)]
pub struct MovementOutcome {
    pub response: AgentResponse,
    pub instruction: String,
}

impl MovementExecutor {
    pub fn new(provider: DynProvider, evaluator: RuleEvaluator) -> Self {
        Self {
            provider,
            evaluator,
            observers: ObserverRegistry::new(),
            workdir: None,
            context_dir: None,
        }
    }

    pub fn with_observers(mut self, observers: ObserverRegistry) -> Self {
        self.observers = observers;
        self
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    pub fn with_context_dir(mut self, context_dir: impl Into<PathBuf>) -> Self {
        self.context_dir = Some(context_dir.into());
        self
    }

    pub async fn execute(&self, movement: &Movement, input: ExecInput) -> Result<MovementOutcome> {
        if let Some(dir) = &self.context_dir {
            write_context_snapshot(
                dir,
                &movement.name,
                input.movement_iteration,
                &input.instruction,
            )
            .await;
        }

        // 阶段一：执行
        let mut main_session = input.resume.clone();
        let phase1 = self
            .call_phase(
                movement,
                Phase::Execute,
                &input.instruction,
                main_session.clone(),
                phase1_capabilities(movement),
                &input.cancel,
            )
            .await?;
        if phase1.session_id.is_some() {
            main_session = phase1.session_id.clone();
        }

        if phase1.status == AgentStatus::Blocked {
            return Ok(MovementOutcome {
                response: phase1,
                instruction: input.instruction,
            });
        }

        // 阶段二：报告，仅在声明了输出契约时运行
        if !movement.output_contracts.is_empty() {
            let report_prompt = report_prompt(movement);
            let phase2 = self
                .call_phase(
                    movement,
                    Phase::Report,
                    &report_prompt,
                    main_session.clone(),
                    vec![Capability::Report],
                    &input.cancel,
                )
                .await?;
            if phase2.session_id.is_some() {
                main_session = phase2.session_id.clone();
            }
            // 报告阶段被阻塞时短路：阻塞结果即乐章最终结果，跳过阶段三
            if phase2.status == AgentStatus::Blocked {
                return Ok(MovementOutcome {
                    response: phase2,
                    instruction: input.instruction,
                });
            }
        }

        let mut response = phase1;
        response.session_id = main_session;

        // 阶段三：状态判定，阶段一没给出标签且声明了输出契约时运行；
        // 一旦运行，它的决定直接生效
        let phase1_tag = find_tag(&response.content, &movement.name, movement.rules.len());
        if phase1_tag.is_none()
            && !movement.output_contracts.is_empty()
            && !movement.rules.is_empty()
        {
            let judgment_prompt = status_judgment_prompt(movement, &response.content);
            let phase3 = self
                .call_phase(
                    movement,
                    Phase::StatusJudgment,
                    &judgment_prompt,
                    None,
                    Vec::new(),
                    &input.cancel,
                )
                .await?;
            if let Some(matched) = self
                .evaluator
                .resolve_phase3(movement, &phase3.content, &input.cancel)
                .await?
            {
                response.matched_rule_index = Some(matched.index);
                response.match_method = Some(matched.method);
            }
        } else if let Some(matched) = self
            .evaluator
            .evaluate(movement, &response.content, &input.cancel)
            .await?
        {
            response.matched_rule_index = Some(matched.index);
            response.match_method = Some(matched.method);
        }

        Ok(MovementOutcome {
            response,
            instruction: input.instruction,
        })
    }

    async fn call_phase(
        &self,
        movement: &Movement,
        phase: Phase,
        prompt: &str,
        resume: Option<String>,
        capabilities: Vec<Capability>,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse> {
        self.observers.emit(&EngineEvent::PhaseStart {
            movement: movement.name.clone(),
            phase,
        });

        let options = CallOptions {
            workdir: self.workdir.clone(),
            resume,
            model: movement.model.clone(),
            capabilities,
            cancel: cancel.clone(),
        };
        let result = self.provider.call(&movement.persona, prompt, options).await;

        let response = match result {
            Ok(response) => response,
            Err(_) if cancel.is_cancelled() => return Err(MaestroError::Interrupted),
            Err(e) => return Err(e),
        };

        self.observers.emit(&EngineEvent::PhaseComplete {
            movement: movement.name.clone(),
            phase,
            status: response.status,
        });
        Ok(response)
    }
}

fn phase1_capabilities(movement: &Movement) -> Vec<Capability> {
    let mut capabilities = vec![Capability::Tools];
    if movement.allow_edit {
        capabilities.push(Capability::Edit);
    }
    // 声明了输出契约时，写报告归阶段二所有
    if movement.output_contracts.is_empty() {
        capabilities.push(Capability::Report);
    }
    capabilities
}

fn report_prompt(movement: &Movement) -> String {
    let mut prompt =
        String::from("Write the declared report artifacts for the work you just finished:\n");
    for contract in &movement.output_contracts {
        prompt.push_str(&format!("- {} -> {}\n", contract.name, contract.path));
    }
    prompt
}

fn status_judgment_prompt(movement: &Movement, content: &str) -> String {
    let mut prompt = format!(
        "Decide which rule matches the movement output below. Reply with exactly one tag of the form [{}:N].\n\nRules:\n",
        movement.name.to_uppercase()
    );
    for (position, rule) in movement.rules.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", position + 1, rule.condition_text()));
    }
    prompt.push_str(&format!("\nMovement output:\n{}\n", content));
    prompt
}
