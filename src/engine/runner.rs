use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::engine::evaluator::RuleEvaluator;
use crate::engine::events::{EngineEvent, EngineObserver, ObserverRegistry};
use crate::engine::executor::{ExecInput, MovementExecutor};
use crate::engine::hooks::{BlockedContext, EngineHooks, UserInputRequest};
use crate::engine::instruction::build_instruction;
use crate::engine::loop_detector::{LoopDecision, LoopDetector};
use crate::engine::parallel::ParallelRunner;
use crate::engine::state::{RunState, RunStatus};
use crate::error::MaestroError;
use crate::piece::{Movement, PersonaRef, PieceConfig, Rule, RuleTarget};
use crate::provider::{AgentResponse, AgentStatus, CallOptions, DynProvider};
use crate::sessions::{DynSessionStore, MemorySessionStore};

/// 运行终态；run() 从不向外抛错，调用方总会拿到一个终态
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub reason: Option<String>,
    pub iterations: u32,
    pub last_response: Option<AgentResponse>,
}

/// 乐章编排引擎（状态机）
///
/// 持有运行状态，驱动 tick 循环：每个 tick 把当前乐章交给
/// 乐章执行器或并行执行器，套用循环检测、迭代预算协商、
/// 阻塞恢复，直到进入 completed / aborted 终态。
pub struct Engine {
    piece: Arc<PieceConfig>,
    provider: DynProvider,
    store: DynSessionStore,
    hooks: EngineHooks,
    observers: ObserverRegistry,
    workdir: Option<PathBuf>,
    context_dir: Option<PathBuf>,
    cancel: CancellationToken,
    judge_persona: Option<PersonaRef>,
}

impl Engine {
    pub fn new(piece: PieceConfig, provider: DynProvider) -> Self {
        Self {
            piece: Arc::new(piece),
            provider,
            store: Arc::new(MemorySessionStore::new()),
            hooks: EngineHooks::default(),
            observers: ObserverRegistry::new(),
            workdir: None,
            context_dir: None,
            cancel: CancellationToken::new(),
            judge_persona: None,
        }
    }

    pub fn with_session_store(mut self, store: DynSessionStore) -> Self {
        self.store = store;
        self
    }

    pub fn with_hooks(mut self, hooks: EngineHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn subscribe(mut self, observer: Arc<dyn EngineObserver>) -> Self {
        self.observers.subscribe(observer);
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

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_judge_persona(mut self, persona: PersonaRef) -> Self {
        self.judge_persona = Some(persona);
        self
    }

    /// 外部中止信号，每个 tick 开头检查，也贯穿到进行中的角色调用
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self) -> RunOutcome {
        let sessions = match self.store.load_all().await {
            Ok(sessions) => sessions,
            Err(e) => {
                let reason = format!("session store unavailable: {e}");
                self.observers.emit(&EngineEvent::RunAbort {
                    piece: self.piece.name.clone(),
                    reason: reason.clone(),
                });
                return RunOutcome {
                    status: RunStatus::Aborted,
                    reason: Some(reason),
                    iterations: 0,
                    last_response: None,
                };
            }
        };
        let mut state = RunState::new(self.piece.initial.clone(), sessions);
        let mut detector = LoopDetector::new(self.piece.loop_policy.clone());
        let mut max_iterations = self.piece.max_iterations;

        let mut evaluator = RuleEvaluator::new(Arc::clone(&self.provider));
        if let Some(persona) = &self.judge_persona {
            evaluator = evaluator.with_judge_persona(persona.clone());
        }
        let mut executor = MovementExecutor::new(Arc::clone(&self.provider), evaluator)
            .with_observers(self.observers.clone());
        if let Some(workdir) = &self.workdir {
            executor = executor.with_workdir(workdir.clone());
        }
        if let Some(context_dir) = &self.context_dir {
            executor = executor.with_context_dir(context_dir.clone());
        }
        let parallel = ParallelRunner::new(executor.clone());

        loop {
            // 1. 外部中止请求
            if self.cancel.is_cancelled() {
                return self.abort(&mut state, "interrupted".to_string());
            }

            // 2. 迭代预算检查与协商
            if state.iteration >= max_iterations {
                self.observers.emit(&EngineEvent::IterationLimit {
                    iteration: state.iteration,
                    max_iterations,
                });
                let extension = match &self.hooks.extend_budget {
                    Some(hook) => hook(state.iteration).await,
                    None => None,
                };
                match extension {
                    Some(extra) if extra > 0 => {
                        // 扩展在下一次预算检查前原子生效，tick 重新开始
                        max_iterations += extra;
                        continue;
                    }
                    _ => return self.abort(&mut state, "max movements reached".to_string()),
                }
            }

            // 3. 解析当前乐章并咨询循环检测
            let movement = match self.piece.movement(&state.current) {
                Some(movement) => movement.clone(),
                None => {
                    let reason = format!("unknown movement `{}` in piece", state.current);
                    return self.abort(&mut state, reason);
                }
            };
            match detector.observe(&movement.name) {
                LoopDecision::Abort { count } => {
                    let reason = format!(
                        "Loop detected: movement `{}` repeated {} consecutive times",
                        movement.name, count
                    );
                    return self.abort(&mut state, reason);
                }
                LoopDecision::Warn { count } => {
                    self.observers.emit(&EngineEvent::LoopWarning {
                        movement: movement.name.clone(),
                        count,
                    });
                }
                LoopDecision::Continue => {}
            }

            // 4. 计数并在派发前构建指令文本
            state.iteration += 1;
            let instruction = build_instruction(&movement, &state);
            self.observers.emit(&EngineEvent::MovementStart {
                movement: movement.name.clone(),
                iteration: state.iteration,
            });

            // 5. 派发执行；并行组整组算一个 tick
            let executed = if movement.children().is_some() {
                parallel
                    .run(&movement, instruction, &mut state, &self.store, &self.cancel)
                    .await
            } else {
                let movement_iteration = state.bump_movement_iteration(&movement.name);
                let input = ExecInput {
                    instruction,
                    resume: state.session(&movement.session_key()).cloned(),
                    movement_iteration,
                    cancel: self.cancel.clone(),
                };
                executor.execute(&movement, input).await
            };
            let outcome = match executed {
                Ok(outcome) => outcome,
                Err(MaestroError::Interrupted) => {
                    return self.abort(&mut state, "interrupted".to_string());
                }
                Err(_) if self.cancel.is_cancelled() => {
                    return self.abort(&mut state, "interrupted".to_string());
                }
                Err(e) => return self.abort(&mut state, format!("execution failed: {e}")),
            };
            let response = outcome.response;

            if movement.children().is_none() {
                if let Some(session_id) = &response.session_id {
                    state.set_session(movement.session_key(), session_id.clone());
                    if let Err(e) = self.store.save(&movement.session_key(), session_id).await {
                        warn!(movement = %movement.name, error = %e, "failed to persist session");
                    }
                }
            }
            state.record_response(&movement.name, response.clone());

            // 6. 阻塞恢复
            if response.status == AgentStatus::Blocked {
                self.observers.emit(&EngineEvent::MovementBlocked {
                    movement: movement.name.clone(),
                });
                match self.recover_blocked(&movement, &response).await {
                    Some(input) => {
                        state.extra_inputs.push(input);
                        continue;
                    }
                    None => {
                        let reason = format!("movement `{}` blocked", movement.name);
                        return self.abort(&mut state, reason);
                    }
                }
            }
            self.observers.emit(&EngineEvent::MovementComplete {
                movement: movement.name.clone(),
                status: response.status,
            });

            // 7. 通过匹配到的规则解析下一个乐章
            let Some(index) = response.matched_rule_index else {
                let reason = format!(
                    "no matching rule for movement `{}` (status {})",
                    movement.name, response.status
                );
                return self.abort(&mut state, reason);
            };
            let Some(rule) = movement.rules.get(index) else {
                let reason = format!(
                    "matched rule index {} out of range for movement `{}`",
                    index, movement.name
                );
                return self.abort(&mut state, reason);
            };
            if rule.requires_user_input || rule.interactive_only {
                match self.solicit_user_input(&movement, rule).await {
                    Some(input) => {
                        state.extra_inputs.push(input);
                        continue;
                    }
                    None => {
                        let reason =
                            format!("user input unavailable for movement `{}`", movement.name);
                        return self.abort(&mut state, reason);
                    }
                }
            }

            // 8. 哨兵或下一乐章
            match &rule.target {
                None => {
                    let reason = format!(
                        "matched rule for movement `{}` has no target",
                        movement.name
                    );
                    return self.abort(&mut state, reason);
                }
                Some(RuleTarget::Complete) => {
                    state.status = RunStatus::Completed;
                    self.observers.emit(&EngineEvent::RunComplete {
                        piece: self.piece.name.clone(),
                        iterations: state.iteration,
                    });
                    return RunOutcome {
                        status: RunStatus::Completed,
                        reason: None,
                        iterations: state.iteration,
                        last_response: Some(response),
                    };
                }
                Some(RuleTarget::Abort) => {
                    let reason = format!(
                        "aborted by rule `{}` of movement `{}`",
                        rule.condition, movement.name
                    );
                    return self.abort(&mut state, reason);
                }
                Some(RuleTarget::Movement(next)) => {
                    state.current = next.clone();
                }
            }
        }
    }

    /// 阻塞恢复：优先外部处理器，否则尝试自动回答角色
    async fn recover_blocked(
        &self,
        movement: &Movement,
        response: &AgentResponse,
    ) -> Option<String> {
        if let Some(hook) = &self.hooks.blocked {
            return hook(BlockedContext {
                movement: movement.name.clone(),
                content: response.content.clone(),
            })
            .await;
        }
        let answer_persona = self.piece.answer_persona.as_ref()?;
        let prompt = format!(
            "An agent working on movement `{}` is blocked and asked for clarification:\n\n{}\n\nAnswer the question so the agent can continue.",
            movement.name, response.content
        );
        let options = CallOptions {
            workdir: self.workdir.clone(),
            cancel: self.cancel.clone(),
            ..Default::default()
        };
        match self.provider.call(answer_persona, &prompt, options).await {
            Ok(answer) if answer.status == AgentStatus::Success && !answer.content.is_empty() => {
                Some(answer.content)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(movement = %movement.name, error = %e, "answer persona failed");
                None
            }
        }
    }

    async fn solicit_user_input(&self, movement: &Movement, rule: &Rule) -> Option<String> {
        self.observers.emit(&EngineEvent::MovementUserInput {
            movement: movement.name.clone(),
            condition: rule.condition.clone(),
        });
        let hook = self.hooks.user_input.as_ref()?;
        hook(UserInputRequest {
            movement: movement.name.clone(),
            condition: rule.condition.clone(),
        })
        .await
    }

    fn abort(&self, state: &mut RunState, reason: String) -> RunOutcome {
        state.status = RunStatus::Aborted;
        self.observers.emit(&EngineEvent::RunAbort {
            piece: self.piece.name.clone(),
            reason: reason.clone(),
        });
        RunOutcome {
            status: RunStatus::Aborted,
            reason: Some(reason),
            iterations: state.iteration,
            last_response: state.previous_response.clone(),
        }
    }
}
