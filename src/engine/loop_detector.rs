use crate::piece::{LoopAction, LoopPolicy};

/// 循环检测器：跟踪同一乐章的连续派发次数
///
/// 独立于绝对迭代预算，用来发现在乐章之间来回震荡、
/// 没有实际进展的运行。
pub struct LoopDetector {
    policy: LoopPolicy,
    last_movement: Option<String>,
    consecutive: u32,
}

/// 单次派发的检测结论
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoopDecision {
    Continue,
    Warn { count: u32 },
    Abort { count: u32 },
}

impl LoopDetector {
    pub fn new(policy: Option<LoopPolicy>) -> Self {
        Self {
            policy: policy.unwrap_or_default(),
            last_movement: None,
            consecutive: 0,
        }
    }

    /// 每次派发调用一次
    pub fn observe(&mut self, movement: &str) -> LoopDecision {
        if self.last_movement.as_deref() == Some(movement) {
            self.consecutive += 1;
        } else {
            self.last_movement = Some(movement.to_string());
            self.consecutive = 1;
        }

        if self.consecutive >= self.policy.max_consecutive_same_step {
            return match self.policy.action {
                LoopAction::Abort => LoopDecision::Abort {
                    count: self.consecutive,
                },
                LoopAction::Warn => LoopDecision::Warn {
                    count: self.consecutive,
                },
                LoopAction::Ignore => LoopDecision::Continue,
            };
        }
        LoopDecision::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max: u32, action: LoopAction) -> LoopPolicy {
        LoopPolicy {
            max_consecutive_same_step: max,
            action,
        }
    }

    #[test]
    fn test_abort_after_threshold() {
        let mut detector = LoopDetector::new(Some(policy(3, LoopAction::Abort)));
        assert_eq!(detector.observe("loop-step"), LoopDecision::Continue);
        assert_eq!(detector.observe("loop-step"), LoopDecision::Continue);
        assert_eq!(
            detector.observe("loop-step"),
            LoopDecision::Abort { count: 3 }
        );
    }

    #[test]
    fn test_counter_resets_on_new_movement() {
        let mut detector = LoopDetector::new(Some(policy(2, LoopAction::Abort)));
        assert_eq!(detector.observe("plan"), LoopDecision::Continue);
        assert_eq!(detector.observe("review"), LoopDecision::Continue);
        assert_eq!(detector.observe("review"), LoopDecision::Abort { count: 2 });
    }

    #[test]
    fn test_warn_action_keeps_running() {
        let mut detector = LoopDetector::new(Some(policy(2, LoopAction::Warn)));
        detector.observe("plan");
        assert_eq!(detector.observe("plan"), LoopDecision::Warn { count: 2 });
        assert_eq!(detector.observe("plan"), LoopDecision::Warn { count: 3 });
    }

    #[test]
    fn test_ignore_action() {
        let mut detector = LoopDetector::new(Some(policy(1, LoopAction::Ignore)));
        assert_eq!(detector.observe("plan"), LoopDecision::Continue);
        assert_eq!(detector.observe("plan"), LoopDecision::Continue);
    }
}
