//! `do` sequences: children run strictly in order, threading output to input.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use serverflow_types::workflow::FlowDirective;

use super::{TaskExecutor, TaskOutcome};
use crate::workflow::context::{Scope, WorkflowContext};
use crate::workflow::error::{TaskError, TaskErrorKind};

#[derive(Debug)]
pub struct SequenceExecutor {
    tasks: Vec<Arc<TaskExecutor>>,
    /// Sibling name -> index, for `then: <name>` jumps.
    index: HashMap<String, usize>,
}

impl SequenceExecutor {
    pub fn new(tasks: Vec<Arc<TaskExecutor>>) -> Self {
        let index = tasks
            .iter()
            .enumerate()
            .map(|(i, task)| (task.name().to_string(), i))
            .collect();
        Self { tasks, index }
    }

    pub fn tasks(&self) -> &[Arc<TaskExecutor>] {
        &self.tasks
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run the children in order. `exit` leaves this sequence normally;
    /// `end` is handed up so enclosing sequences stop as well.
    pub async fn run(
        &self,
        wf: &Arc<WorkflowContext>,
        scope: &Scope,
        input: Value,
    ) -> Result<TaskOutcome, TaskError> {
        let mut output = input;
        let mut cursor = 0;

        while let Some(task) = self.tasks.get(cursor) {
            let outcome = task.execute(wf, scope, output).await?;
            output = outcome.output;
            match outcome.flow {
                FlowDirective::Continue => cursor += 1,
                FlowDirective::Exit => break,
                FlowDirective::End => return Ok(TaskOutcome::with_flow(output, FlowDirective::End)),
                FlowDirective::Goto(target) => match self.index.get(&target) {
                    Some(&next) => cursor = next,
                    None => {
                        return Err(TaskError::new(
                            TaskErrorKind::Validation(format!("unknown flow target '{target}'")),
                            task.position(),
                        ));
                    }
                },
            }
        }

        Ok(TaskOutcome::next(output))
    }
}
