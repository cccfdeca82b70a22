use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::engine::evaluator::aggregate_match;
use crate::engine::executor::{ExecInput, MovementExecutor, MovementOutcome};
use crate::engine::instruction::build_instruction;
use crate::engine::state::RunState;
use crate::error::Result;
use crate::piece::Movement;
use crate::provider::{AgentResponse, AgentStatus};
use crate::sessions::DynSessionStore;

/// 并行执行器
///
/// 把父乐章声明的子乐章全部并发跑完（join 语义，不是 race），
/// 再对收集到的子结果求父乐章的聚合规则。单个子乐章的失败
/// 只表现为聚合比较中的不匹配，从不波及兄弟。
#[derive(Clone)]
pub struct ParallelRunner {
    executor: MovementExecutor,
}

impl ParallelRunner {
    pub fn new(executor: MovementExecutor) -> Self {
        Self { executor }
    }

    pub async fn run(
        &self,
        parent: &Movement,
        parent_instruction: String,
        state: &mut RunState,
        store: &DynSessionStore,
        cancel: &CancellationToken,
    ) -> Result<MovementOutcome> {
        let children: Vec<Movement> = parent.children().unwrap_or_default().to_vec();

        let mut join_set = JoinSet::new();
        for (ordinal, child) in children.iter().enumerate() {
            let movement_iteration = state.bump_movement_iteration(&child.name);
            let input = ExecInput {
                instruction: build_instruction(child, state),
                resume: state.session(&child.session_key()).cloned(),
                movement_iteration,
                cancel: cancel.clone(),
            };
            let executor = self.executor.clone();
            let child = child.clone();
            join_set.spawn(async move {
                let result = executor.execute(&child, input).await;
                (ordinal, child, result)
            });
        }

        // 所有子乐章都要等到，子结果按序号落位；会话在结果到达时
        // 逐个持久化，运行中途被打断也不丢已完成子乐章的会话
        let mut conditions: Vec<Option<String>> = vec![None; children.len()];
        let mut summaries: Vec<String> = (0..children.len())
            .map(|ordinal| format!("{}#{}: (no result)", children[ordinal].name, ordinal))
            .collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((ordinal, child, Ok(outcome))) => {
                    let response = outcome.response;
                    let label = format!("{}#{}", child.name, ordinal);
                    if let Some(session_id) = &response.session_id {
                        state.set_session(child.session_key(), session_id.clone());
                        if let Err(e) = store.save(&child.session_key(), session_id).await {
                            warn!(child = %label, error = %e, "failed to persist child session");
                        }
                    }
                    let condition = response
                        .matched_rule_index
                        .and_then(|index| child.rules.get(index))
                        .map(|rule| rule.condition_text().to_string());
                    summaries[ordinal] = format!(
                        "{}: {} -> {}",
                        label,
                        response.status,
                        condition.as_deref().unwrap_or("(no result)")
                    );
                    conditions[ordinal] = condition;
                    state.last_responses.insert(child.name.clone(), response);
                }
                Ok((ordinal, child, Err(e))) => {
                    let label = format!("{}#{}", child.name, ordinal);
                    warn!(child = %label, error = %e, "parallel child failed");
                    summaries[ordinal] = format!("{}: error -> (no result)", label);
                    let response =
                        AgentResponse::new(child.persona.spec.clone(), AgentStatus::Error, "")
                            .with_error(e.to_string());
                    state.last_responses.insert(child.name.clone(), response);
                }
                Err(join_error) => {
                    warn!(parent = %parent.name, error = %join_error, "parallel child panicked");
                }
            }
        }

        let mut response = AgentResponse::new(
            parent.persona.spec.clone(),
            AgentStatus::Success,
            summaries.join("\n"),
        );
        if let Some(matched) = aggregate_match(parent, &conditions) {
            response = response.with_match(matched.index, matched.method);
        }

        Ok(MovementOutcome {
            response,
            instruction: parent_instruction,
        })
    }
}
