use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::Result;

/// 工作池：并发运行 N 个相互独立的引擎实例
///
/// 除了在单个任务完成时领取新任务，还按固定间隔轮询任务源，
/// 避免新入队的工作被进行中的慢任务饿死。

/// 任务源 trait
#[async_trait]
pub trait TaskSource<T: Send>: Send + Sync {
    async fn claim_next_tasks(&self, limit: usize) -> Result<Vec<T>>;
}

/// 工作池运行结果
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolOutcome {
    pub success: usize,
    pub fail: usize,
}

/// 以有界并发运行任务直到任务源耗尽或被取消
///
/// 取消是优雅的：不再领取新工作，进行中的任务通过自己的
/// 取消信号结束或自然跑完。
pub async fn run_with_worker_pool<T, F, Fut>(
    initial_tasks: Vec<T>,
    source: Arc<dyn TaskSource<T>>,
    concurrency: usize,
    execute_one: F,
    poll_interval: Duration,
    cancel: CancellationToken,
) -> PoolOutcome
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let concurrency = concurrency.max(1);
    let mut queue: VecDeque<T> = initial_tasks.into();
    let mut join_set: JoinSet<Result<()>> = JoinSet::new();
    let mut inflight = 0usize;
    let mut outcome = PoolOutcome::default();
    let mut draining = cancel.is_cancelled();
    let mut poll = tokio::time::interval(poll_interval);
    // interval 的首个 tick 立即就绪，重置后轮询才按配置节奏进行
    poll.reset();

    loop {
        while !draining && inflight < concurrency {
            let Some(task) = queue.pop_front() else { break };
            let execute = execute_one.clone();
            join_set.spawn(async move { execute(task).await });
            inflight += 1;
        }

        if inflight == 0 {
            if draining {
                break;
            }
            // 空转：先向任务源要一批，真没有了才退出
            match source.claim_next_tasks(concurrency).await {
                Ok(tasks) if !tasks.is_empty() => {
                    queue.extend(tasks);
                    continue;
                }
                Ok(_) => break,
                Err(e) => {
                    warn!(error = %e, "task source claim failed");
                    break;
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled(), if !draining => {
                draining = true;
                queue.clear();
            }
            Some(result) = join_set.join_next(), if inflight > 0 => {
                inflight -= 1;
                match result {
                    Ok(Ok(())) => outcome.success += 1,
                    Ok(Err(e)) => {
                        warn!(error = %e, "pool task failed");
                        outcome.fail += 1;
                    }
                    Err(join_error) => {
                        warn!(error = %join_error, "pool task panicked");
                        outcome.fail += 1;
                    }
                }
                if !draining && queue.is_empty() && inflight < concurrency {
                    match source.claim_next_tasks(concurrency - inflight).await {
                        Ok(tasks) => queue.extend(tasks),
                        Err(e) => warn!(error = %e, "task source claim failed"),
                    }
                }
            }
            _ = poll.tick(), if !draining => {
                if queue.is_empty() && inflight < concurrency {
                    match source.claim_next_tasks(concurrency - inflight).await {
                        Ok(tasks) => queue.extend(tasks),
                        Err(e) => warn!(error = %e, "task source poll failed"),
                    }
                }
            }
        }
    }

    outcome
}
