//! Turns definitions into executor trees.
//!
//! Building walks the definition once, assigning every node its position,
//! pre-parsing filters and retry policies, and rejecting structural problems
//! (duplicate sibling names, unknown jump targets, empty listens or forks).
//! It has no side effects and can be repeated freely.

use std::collections::HashSet;
use std::sync::Arc;

use serverflow_types::workflow::{
    DurationSpec, FlowDirective, TaskConfig, TaskDefinition, WorkflowDefinition,
};

use super::{
    CallExecutor, CommonConfig, EmitExecutor, ExecutorKind, ForExecutor, ForkExecutor,
    ListenExecutor, RaiseExecutor, SequenceExecutor, SetExecutor, SwitchExecutor, TaskExecutor,
    TryExecutor, WaitExecutor,
};
use crate::workflow::error::BuildError;
use crate::workflow::position::WorkflowPosition;
use crate::workflow::retry::RetryPolicy;

pub struct ExecutorBuilder;

impl ExecutorBuilder {
    /// Build the root executor of a workflow: a sequence over `do` carrying
    /// the workflow-level input/output filters and timeout.
    pub fn build_workflow(definition: &WorkflowDefinition) -> Result<Arc<TaskExecutor>, BuildError> {
        let root = WorkflowPosition::root();
        let body = Self::sequence(&definition.tasks, &root, "do")?;
        let common = CommonConfig {
            input: definition.input.as_ref().map(|filter| filter.from.clone()),
            output: definition.output.as_ref().map(|filter| filter.as_.clone()),
            timeout: definition.timeout.as_ref().map(DurationSpec::to_duration),
            ..CommonConfig::default()
        };
        Ok(Arc::new(TaskExecutor::new(
            definition.document.name.clone(),
            root,
            common,
            ExecutorKind::Sequence(body),
        )))
    }

    /// Build the executor for one task at `position`.
    pub fn build(
        definition: &TaskDefinition,
        position: WorkflowPosition,
    ) -> Result<Arc<TaskExecutor>, BuildError> {
        let kind = match &definition.config {
            TaskConfig::Do(tasks) => ExecutorKind::Sequence(Self::sequence(tasks, &position, "do")?),
            TaskConfig::Set(fields) => ExecutorKind::Set(SetExecutor::new(fields.clone())),
            TaskConfig::Call(call) => ExecutorKind::Call(CallExecutor::new(call.clone())),
            TaskConfig::Listen(listen) => {
                if listen.to.filters().is_empty() {
                    return Err(BuildError::EmptyListen {
                        position: position.to_string(),
                    });
                }
                let foreach = listen
                    .foreach
                    .as_ref()
                    .map(|foreach| Self::sequence(&foreach.tasks, &position, "foreach"))
                    .transpose()?;
                ExecutorKind::Listen(ListenExecutor::new(listen, foreach))
            }
            TaskConfig::Try(guarded) => {
                let body = Self::sequence(&guarded.tasks, &position, "try")?;
                let retry = guarded
                    .catch
                    .retry
                    .as_ref()
                    .map(RetryPolicy::from_definition)
                    .transpose()
                    .map_err(|reason| BuildError::InvalidRetry {
                        position: position.to_string(),
                        reason,
                    })?;
                let handler = guarded
                    .catch
                    .tasks
                    .as_ref()
                    .map(|tasks| Self::sequence(tasks, &position.child("catch"), "do"))
                    .transpose()?;
                ExecutorKind::Try(TryExecutor::new(body, &guarded.catch, retry, handler))
            }
            TaskConfig::Switch(cases) => ExecutorKind::Switch(SwitchExecutor::new(cases.clone())),
            TaskConfig::For(each) => {
                let body = Self::sequence(&each.tasks, &position.child("for"), "do")?;
                ExecutorKind::For(ForExecutor::new(each, body))
            }
            TaskConfig::Emit(emit) => ExecutorKind::Emit(EmitExecutor::new(emit.event.clone())),
            TaskConfig::Raise(raise) => ExecutorKind::Raise(RaiseExecutor::new(raise.error.clone())),
            TaskConfig::Fork(fork) => {
                if fork.branches.is_empty() {
                    return Err(BuildError::EmptyFork {
                        position: position.to_string(),
                    });
                }
                let fork_position = position.child("fork");
                unique_names(&fork.branches, &fork_position)?;
                let branches = fork
                    .branches
                    .iter()
                    .enumerate()
                    .map(|(i, branch)| {
                        Self::build(branch, fork_position.item("branches", i, &branch.name))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                ExecutorKind::Fork(ForkExecutor::new(branches, fork.compete))
            }
            TaskConfig::Wait(duration) => ExecutorKind::Wait(WaitExecutor::new(duration.to_duration())),
        };

        let common = CommonConfig {
            condition: definition.condition.clone(),
            input: definition.input.as_ref().map(|filter| filter.from.clone()),
            output: definition.output.as_ref().map(|filter| filter.as_.clone()),
            export: definition.export.as_ref().map(|filter| filter.as_.clone()),
            then: definition.then.clone(),
            timeout: definition.timeout.as_ref().map(DurationSpec::to_duration),
        };
        let executor = TaskExecutor::new(definition.name.clone(), position, common, kind);

        if !executor.accepts(definition.kind()) {
            return Err(BuildError::Routing {
                position: executor.position().to_string(),
                kind: definition.kind().to_string(),
            });
        }
        Ok(Arc::new(executor))
    }

    /// Build a task list under `parent/key`, checking sibling names and jump targets.
    fn sequence(
        tasks: &[TaskDefinition],
        parent: &WorkflowPosition,
        key: &str,
    ) -> Result<SequenceExecutor, BuildError> {
        let parent_position = parent.child(key);
        let names = unique_names(tasks, &parent_position)?;

        let mut built = Vec::with_capacity(tasks.len());
        for (i, task) in tasks.iter().enumerate() {
            let executor = Self::build(task, parent.item(key, i, &task.name))?;

            let mut targets: Vec<&FlowDirective> = task.then.iter().collect();
            if let TaskConfig::Switch(cases) = &task.config {
                targets.extend(cases.iter().map(|case| &case.then));
            }
            for target in targets {
                if let FlowDirective::Goto(name) = target {
                    if !names.contains(name.as_str()) {
                        return Err(BuildError::UnknownFlowTarget {
                            position: executor.position().to_string(),
                            target: name.clone(),
                        });
                    }
                }
            }

            built.push(executor);
        }
        Ok(SequenceExecutor::new(built))
    }
}

fn unique_names<'a>(
    tasks: &'a [TaskDefinition],
    position: &WorkflowPosition,
) -> Result<HashSet<&'a str>, BuildError> {
    let mut names = HashSet::with_capacity(tasks.len());
    for task in tasks {
        if !names.insert(task.name.as_str()) {
            return Err(BuildError::DuplicateTaskName {
                position: position.to_string(),
                name: task.name.clone(),
            });
        }
    }
    Ok(names)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
