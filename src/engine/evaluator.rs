use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::piece::{AggregateMode, Movement, PersonaRef, RuleKind};
use crate::provider::{CallOptions, DynProvider, MatchMethod};

/// 规则求值器
///
/// 按优先级从代理输出中解析匹配到的规则：
/// 标签解析 → ai(...) 判定 → 判定兜底；并行父乐章走聚合匹配。

/// 一次匹配结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuleMatch {
    pub index: usize,
    pub method: MatchMethod,
}

/// 在内容中查找 `[NAME:N]` 形式的标签
///
/// 乐章名不区分大小写；出现多次时最后一个生效（模型可能在输出
/// 中途自我纠正）；N 为 1 基，非数字、≤0 或越界都视为无匹配。
pub fn find_tag(content: &str, movement: &str, rule_count: usize) -> Option<usize> {
    let haystack = content.to_lowercase();
    let needle = format!("[{}:", movement.to_lowercase());

    let mut last: Option<u64> = None;
    for (position, _) in haystack.match_indices(&needle) {
        let rest = &haystack[position + needle.len()..];
        let Some(end) = rest.find(']') else { continue };
        let digits = &rest[..end];
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        // 数字串长到溢出的同样按畸形标签跳过
        let Ok(number) = digits.parse::<u64>() else {
            continue;
        };
        last = Some(number);
    }

    let number = last?;
    if number == 0 {
        return None;
    }
    let index = (number - 1) as usize;
    (index < rule_count).then_some(index)
}

/// 从判定回复中提取选择的条件编号（1 基）
fn parse_judge_choice(reply: &str, count: usize) -> Option<usize> {
    let mut digits = String::new();
    for ch in reply.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
        } else if !digits.is_empty() {
            break;
        }
    }
    let number: usize = digits.parse().ok()?;
    (number >= 1 && number <= count).then(|| number - 1)
}

/// 对并行子结果做 all/any 聚合匹配
///
/// 出错或无法解析条件的子乐章对 all 和 any 都按不匹配处理。
pub fn aggregate_match(parent: &Movement, child_conditions: &[Option<String>]) -> Option<RuleMatch> {
    if child_conditions.is_empty() {
        return None;
    }

    for (index, rule) in parent.rules.iter().enumerate() {
        let Some((mode, conditions)) = rule.aggregate() else {
            continue;
        };
        // 单个文本为所有子乐章共享，多个按序号逐一对应
        let expected: Vec<&str> = if conditions.len() == 1 {
            vec![conditions[0].as_str(); child_conditions.len()]
        } else if conditions.len() == child_conditions.len() {
            conditions.iter().map(|c| c.as_str()).collect()
        } else {
            continue;
        };

        let matches = |i: usize| child_conditions[i].as_deref() == Some(expected[i]);
        let matched = match mode {
            AggregateMode::All => (0..child_conditions.len()).all(matches),
            AggregateMode::Any => (0..child_conditions.len()).any(matches),
        };
        if matched {
            return Some(RuleMatch {
                index,
                method: MatchMethod::Aggregate,
            });
        }
    }
    None
}

/// 规则求值器
#[derive(Clone)]
pub struct RuleEvaluator {
    provider: DynProvider,
    judge_persona: PersonaRef,
}

impl RuleEvaluator {
    pub fn new(provider: DynProvider) -> Self {
        Self {
            provider,
            judge_persona: PersonaRef::new("judge"),
        }
    }

    pub fn with_judge_persona(mut self, persona: PersonaRef) -> Self {
        self.judge_persona = persona;
        self
    }

    /// 对阶段一内容求值
    pub async fn evaluate(
        &self,
        movement: &Movement,
        content: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<RuleMatch>> {
        if let Some(index) = find_tag(content, &movement.name, movement.rules.len()) {
            return Ok(Some(RuleMatch {
                index,
                method: MatchMethod::Phase1Tag,
            }));
        }

        let has_ai_rule = movement.rules.iter().any(|r| r.is_ai_judge());
        if has_ai_rule {
            return self
                .judge(movement, content, MatchMethod::AiJudge, cancel)
                .await;
        }

        // 兜底：没有标签也没有显式 ai() 规则时，仍交给判定避免
        // 含混的纯文本输出直接中止运行
        let judgeable = movement
            .rules
            .iter()
            .any(|r| !matches!(r.kind, RuleKind::Aggregate { .. }));
        if judgeable {
            return self
                .judge(movement, content, MatchMethod::AiJudgeFallback, cancel)
                .await;
        }
        Ok(None)
    }

    /// 对阶段三输出求值；阶段三一旦运行，它的决定就是最终结果
    pub async fn resolve_phase3(
        &self,
        movement: &Movement,
        phase3_content: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<RuleMatch>> {
        if let Some(index) = find_tag(phase3_content, &movement.name, movement.rules.len()) {
            return Ok(Some(RuleMatch {
                index,
                method: MatchMethod::Phase3Tag,
            }));
        }
        if movement.rules.iter().any(|r| r.is_ai_judge()) {
            return self
                .judge(movement, phase3_content, MatchMethod::AiJudge, cancel)
                .await;
        }
        Ok(None)
    }

    /// 调用判定角色，在枚举出的条件中挑选最匹配的一条
    async fn judge(
        &self,
        movement: &Movement,
        content: &str,
        method: MatchMethod,
        cancel: &CancellationToken,
    ) -> Result<Option<RuleMatch>> {
        let candidates: Vec<(usize, &str)> = movement
            .rules
            .iter()
            .enumerate()
            .filter(|(_, r)| !matches!(r.kind, RuleKind::Aggregate { .. }))
            .map(|(i, r)| (i, r.condition_text()))
            .collect();
        if candidates.is_empty() {
            return Ok(None);
        }

        let mut prompt = String::from(
            "You are judging which outcome condition best matches an agent's output.\n\nConditions:\n",
        );
        for (position, (_, text)) in candidates.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", position + 1, text));
        }
        prompt.push_str(&format!(
            "\nAgent output:\n{}\n\nReply with the single number of the best matching condition, or 0 if none match.\n",
            content
        ));

        let options = CallOptions {
            capabilities: Vec::new(),
            cancel: cancel.clone(),
            ..Default::default()
        };
        let response = self.provider.call(&self.judge_persona, &prompt, options).await?;
        let choice = parse_judge_choice(&response.content, candidates.len());

        Ok(choice.map(|position| RuleMatch {
            index: candidates[position].0,
            method,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::piece::Rule;

    fn tag_movement(rule_count: usize) -> Movement {
        let mut movement = Movement::new("step", "coder", "do the work");
        for i in 0..rule_count {
            movement = movement.with_rule(Rule::new(format!("condition {i}"), "COMPLETE"));
        }
        movement
    }

    #[test]
    fn test_tag_match_basic() {
        assert_eq!(find_tag("[STEP:2]\n\nDone.", "step", 2), Some(1));
    }

    #[test]
    fn test_tag_case_insensitive() {
        assert_eq!(find_tag("[Step:1] done", "STEP", 2), Some(0));
    }

    #[test]
    fn test_last_tag_wins() {
        assert_eq!(find_tag("first [STEP:1] then [STEP:2]", "step", 2), Some(1));
    }

    #[test]
    fn test_out_of_range_tag() {
        assert_eq!(find_tag("[STEP:99]", "step", 2), None);
    }

    #[test]
    fn test_zero_and_garbage_tags() {
        assert_eq!(find_tag("[STEP:0]", "step", 2), None);
        assert_eq!(find_tag("[STEP:abc]", "step", 2), None);
        assert_eq!(find_tag("[STEP:]", "step", 2), None);
    }

    #[test]
    fn test_overflowing_tag_digits_are_skipped() {
        // 溢出 u64 的尾部标签不得吞掉前面格式良好的标签
        let content = "[STEP:2] then [STEP:99999999999999999999999999]";
        assert_eq!(find_tag(content, "step", 2), Some(1));
    }

    #[test]
    fn test_judge_choice_parsing() {
        assert_eq!(parse_judge_choice("2", 3), Some(1));
        assert_eq!(parse_judge_choice("Condition 3 matches best", 3), Some(2));
        assert_eq!(parse_judge_choice("0", 3), None);
        assert_eq!(parse_judge_choice("none", 3), None);
        assert_eq!(parse_judge_choice("7", 3), None);
    }

    #[test]
    fn test_aggregate_all() {
        let parent = Movement::new("reviewers", "lead", "review")
            .with_rule(Rule::new(r#"all("approved")"#, "supervise"));
        let all_approved = vec![
            Some("approved".to_string()),
            Some("approved".to_string()),
            Some("approved".to_string()),
        ];
        assert_eq!(
            aggregate_match(&parent, &all_approved),
            Some(RuleMatch {
                index: 0,
                method: MatchMethod::Aggregate
            })
        );

        let one_error = vec![
            Some("approved".to_string()),
            None,
            Some("approved".to_string()),
        ];
        assert_eq!(aggregate_match(&parent, &one_error), None);
    }

    #[test]
    fn test_aggregate_any() {
        let parent = Movement::new("reviewers", "lead", "review")
            .with_rule(Rule::new(r#"any("needs_fix")"#, "fix"));
        let one_match = vec![
            Some("approved".to_string()),
            Some("needs_fix".to_string()),
            None,
        ];
        assert_eq!(
            aggregate_match(&parent, &one_match),
            Some(RuleMatch {
                index: 0,
                method: MatchMethod::Aggregate
            })
        );
        let no_match = vec![Some("approved".to_string()), None];
        assert_eq!(aggregate_match(&parent, &no_match), None);
    }

    #[test]
    fn test_aggregate_per_child_conditions() {
        let parent = Movement::new("pair", "lead", "review")
            .with_rule(Rule::new(r#"all("built", "tested")"#, "COMPLETE"));
        let matching = vec![Some("built".to_string()), Some("tested".to_string())];
        assert!(aggregate_match(&parent, &matching).is_some());

        let swapped = vec![Some("tested".to_string()), Some("built".to_string())];
        assert!(aggregate_match(&parent, &swapped).is_none());
    }

    #[tokio::test]
    async fn test_phase1_tag_beats_judge() {
        use crate::provider::EchoProvider;
        use std::sync::Arc;

        let evaluator = RuleEvaluator::new(Arc::new(EchoProvider));
        let movement = tag_movement(2);
        let matched = evaluator
            .evaluate(&movement, "[STEP:2] done", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            matched,
            Some(RuleMatch {
                index: 1,
                method: MatchMethod::Phase1Tag
            })
        );
    }
}
