use std::sync::Arc;

use futures::future::BoxFuture;

/// 引擎外部回调类型定义
///
/// 与阻塞恢复、预算协商、用户输入交互的外部处理器，
/// 引擎只依赖这些别名，不关心背后是 CLI 还是别的宿主。

/// 迭代预算扩展回调：返回正数表示追加的预算，None/0 表示放弃
pub type ExtendBudgetHook =
    Arc<dyn Fn(u32) -> BoxFuture<'static, Option<u32>> + Send + Sync>;

/// 阻塞场景上下文
#[derive(Clone, Debug)]
pub struct BlockedContext {
    pub movement: String,
    pub content: String,
}

/// 阻塞恢复回调：返回补充输入则重试当前乐章，None 表示中止
pub type BlockedHook =
    Arc<dyn Fn(BlockedContext) -> BoxFuture<'static, Option<String>> + Send + Sync>;

/// 用户输入请求
#[derive(Clone, Debug)]
pub struct UserInputRequest {
    pub movement: String,
    pub condition: String,
}

/// 用户输入回调：不可用或取消时返回 None
pub type UserInputHook =
    Arc<dyn Fn(UserInputRequest) -> BoxFuture<'static, Option<String>> + Send + Sync>;

/// 从同步函数创建预算扩展回调
pub fn extend_budget_from_fn<F>(func: F) -> ExtendBudgetHook
where
    F: Fn(u32) -> Option<u32> + Send + Sync + 'static,
{
    let func = Arc::new(func);
    Arc::new(move |iteration| {
        let func = Arc::clone(&func);
        Box::pin(async move { func(iteration) })
    })
}

/// 从同步函数创建阻塞恢复回调
pub fn blocked_from_fn<F>(func: F) -> BlockedHook
where
    F: Fn(BlockedContext) -> Option<String> + Send + Sync + 'static,
{
    let func = Arc::new(func);
    Arc::new(move |ctx| {
        let func = Arc::clone(&func);
        Box::pin(async move { func(ctx) })
    })
}

/// 从同步函数创建用户输入回调
pub fn user_input_from_fn<F>(func: F) -> UserInputHook
where
    F: Fn(UserInputRequest) -> Option<String> + Send + Sync + 'static,
{
    let func = Arc::new(func);
    Arc::new(move |request| {
        let func = Arc::clone(&func);
        Box::pin(async move { func(request) })
    })
}

/// 引擎外部回调集合
#[derive(Clone, Default)]
pub struct EngineHooks {
    pub extend_budget: Option<ExtendBudgetHook>,
    pub blocked: Option<BlockedHook>,
    pub user_input: Option<UserInputHook>,
}

impl EngineHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extend_budget(mut self, hook: ExtendBudgetHook) -> Self {
        self.extend_budget = Some(hook);
        self
    }

    pub fn with_blocked(mut self, hook: BlockedHook) -> Self {
        self.blocked = Some(hook);
        self
    }

    pub fn with_user_input(mut self, hook: UserInputHook) -> Self {
        self.user_input = Some(hook);
        self
    }
}
