use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::warn;

use crate::engine::state::RunState;
use crate::piece::Movement;

/// 指令拼装
///
/// 在派发前构建发给角色的完整提示词，观察者可以记录
/// 将要发送的确切内容。

pub fn build_instruction(movement: &Movement, state: &RunState) -> String {
    let mut instruction = movement.instruction.clone();

    if !movement.policies.is_empty() {
        instruction.push_str("\n\n## Policies\n");
        for snippet in &movement.policies {
            instruction.push_str(&format!("\n### {}\n{}\n", snippet.name, snippet.content));
        }
    }

    if !movement.knowledge.is_empty() {
        instruction.push_str("\n\n## Knowledge\n");
        for snippet in &movement.knowledge {
            instruction.push_str(&format!("\n### {}\n{}\n", snippet.name, snippet.content));
        }
    }

    if let Some(previous) = &state.previous_response {
        instruction.push_str(&format!(
            "\n\n## Previous response ({})\n{}\n",
            previous.persona, previous.content
        ));
    }

    if !state.extra_inputs.is_empty() {
        instruction.push_str("\n\n## Additional user input\n");
        for input in &state.extra_inputs {
            instruction.push_str(&format!("- {}\n", input));
        }
    }

    instruction
}

/// 把指令输入快照写入运行上下文目录，键为
/// `{movement}.{movement-iteration}.{timestamp}`，用于事后审计
pub async fn write_context_snapshot(
    dir: &Path,
    movement: &str,
    movement_iteration: u32,
    instruction: &str,
) -> Option<PathBuf> {
    let timestamp = Utc::now().format("%Y%m%d-%H%M%S%.3f");
    let path = dir.join(format!("{movement}.{movement_iteration}.{timestamp}.md"));

    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        warn!(movement, error = %e, "failed to create context directory");
        return None;
    }
    if let Err(e) = tokio::fs::write(&path, instruction).await {
        warn!(movement, error = %e, "failed to write context snapshot");
        return None;
    }
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::piece::Snippet;
    use crate::provider::{AgentResponse, AgentStatus};
    use std::collections::HashMap;

    #[test]
    fn test_sections_in_order() {
        let movement = Movement::new("plan", "planner", "Make a plan.")
            .with_policy(Snippet::new("style", "keep it short"))
            .with_knowledge(Snippet::new("repo", "rust crate"));
        let mut state = RunState::new("plan", HashMap::new());
        state.previous_response = Some(AgentResponse::new(
            "coder",
            AgentStatus::Success,
            "done earlier",
        ));
        state.extra_inputs.push("prefer option B".to_string());

        let instruction = build_instruction(&movement, &state);
        let policies = instruction.find("## Policies").unwrap();
        let knowledge = instruction.find("## Knowledge").unwrap();
        let previous = instruction.find("## Previous response").unwrap();
        let extra = instruction.find("## Additional user input").unwrap();
        assert!(instruction.starts_with("Make a plan."));
        assert!(policies < knowledge && knowledge < previous && previous < extra);
        assert!(instruction.contains("done earlier"));
        assert!(instruction.contains("prefer option B"));
    }

    #[tokio::test]
    async fn test_snapshot_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_context_snapshot(dir.path(), "plan", 2, "instruction body")
            .await
            .unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("plan.2."));
        assert!(name.ends_with(".md"));
        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written, "instruction body");
    }
}
