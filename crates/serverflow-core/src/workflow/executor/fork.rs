//! `fork`: concurrent branches on a `JoinSet`.
//!
//! Without `compete` every branch must succeed and the output is the list of
//! branch outputs in declaration order. With `compete` the first branch to
//! succeed wins and the rest are aborted; the fork fails only when every
//! branch failed, with the last failure.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinSet;
use tracing::debug;

use super::{TaskExecutor, TaskOutcome};
use crate::workflow::context::{Scope, TaskContext, WorkflowContext};
use crate::workflow::error::{TaskError, TaskErrorKind};

#[derive(Debug)]
pub struct ForkExecutor {
    branches: Vec<Arc<TaskExecutor>>,
    compete: bool,
}

impl ForkExecutor {
    pub fn new(branches: Vec<Arc<TaskExecutor>>, compete: bool) -> Self {
        Self { branches, compete }
    }

    pub fn branches(&self) -> &[Arc<TaskExecutor>] {
        &self.branches
    }

    pub async fn run(
        &self,
        wf: &Arc<WorkflowContext>,
        scope: &Scope,
        task: &mut TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        // Dropping the set (timeout, losing compete) aborts any branch still running.
        let mut set = JoinSet::new();
        for (index, branch) in self.branches.iter().enumerate() {
            let branch = Arc::clone(branch);
            let wf = Arc::clone(wf);
            let scope = scope.clone();
            let input = task.input().clone();
            set.spawn(async move { (index, branch.execute(&wf, &scope, input).await) });
        }

        if self.compete {
            self.race(wf, task, set).await
        } else {
            self.join_all(task, set).await
        }
    }

    async fn join_all(
        &self,
        task: &TaskContext,
        mut set: JoinSet<(usize, Result<TaskOutcome, TaskError>)>,
    ) -> Result<TaskOutcome, TaskError> {
        let mut outputs = vec![Value::Null; self.branches.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, Ok(outcome))) => outputs[index] = outcome.output,
                Ok((_, Err(err))) => {
                    set.abort_all();
                    return Err(err);
                }
                Err(join_error) => {
                    set.abort_all();
                    return Err(task.error_at(TaskErrorKind::runtime(format!(
                        "fork branch did not complete: {join_error}"
                    ))));
                }
            }
        }
        Ok(TaskOutcome::next(Value::Array(outputs)))
    }

    async fn race(
        &self,
        wf: &WorkflowContext,
        task: &TaskContext,
        mut set: JoinSet<(usize, Result<TaskOutcome, TaskError>)>,
    ) -> Result<TaskOutcome, TaskError> {
        let mut last_error = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, Ok(outcome))) => {
                    set.abort_all();
                    debug!(
                        instance_id = %wf.instance_id(),
                        position = %task.position(),
                        branch = index,
                        "fork branch won"
                    );
                    return Ok(TaskOutcome::next(outcome.output));
                }
                Ok((_, Err(err))) => last_error = Some(err),
                Err(join_error) => {
                    last_error = Some(task.error_at(TaskErrorKind::runtime(format!(
                        "fork branch did not complete: {join_error}"
                    ))));
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| task.error_at(TaskErrorKind::Validation("fork has no branches".to_string()))))
    }
}
