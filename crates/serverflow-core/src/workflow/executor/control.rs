//! Branching and iteration: `switch` and `for`.

use std::sync::Arc;

use serde_json::{json, Value};
use serverflow_types::workflow::{FlowDirective, ForDefinition, SwitchCase};
use tracing::debug;

use super::sequence::SequenceExecutor;
use super::TaskOutcome;
use crate::workflow::context::{Scope, TaskContext, WorkflowContext};
use crate::workflow::error::{TaskError, TaskErrorKind};

// ---------------------------------------------------------------------------
// switch
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SwitchExecutor {
    cases: Vec<SwitchCase>,
}

impl SwitchExecutor {
    pub fn new(cases: Vec<SwitchCase>) -> Self {
        Self { cases }
    }

    pub fn cases(&self) -> &[SwitchCase] {
        &self.cases
    }

    /// The first case whose `when` holds decides the flow; a case without
    /// `when` is the default. No match continues with the next sibling.
    pub fn run(
        &self,
        wf: &Arc<WorkflowContext>,
        scope: &Scope,
        task: &mut TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        let ctx = wf.expression_context(task.input(), scope, task);
        let mut default = None;

        for case in &self.cases {
            let Some(when) = &case.when else {
                default.get_or_insert(case);
                continue;
            };
            let matched = wf
                .evaluator()
                .evaluate_bool(when, &ctx)
                .map_err(|e| task.error_at(TaskErrorKind::Evaluation(e.to_string())))?;
            if matched {
                debug!(
                    instance_id = %wf.instance_id(),
                    position = %task.position(),
                    case = %case.name,
                    "switch case matched"
                );
                return Ok(TaskOutcome::with_flow(task.input().clone(), case.then.clone()));
            }
        }

        let input = task.input().clone();
        Ok(match default {
            Some(case) => TaskOutcome::with_flow(input, case.then.clone()),
            None => TaskOutcome::next(input),
        })
    }
}

// ---------------------------------------------------------------------------
// for
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ForExecutor {
    each: String,
    collection: String,
    at: String,
    while_: Option<String>,
    body: SequenceExecutor,
}

impl ForExecutor {
    pub fn new(definition: &ForDefinition, body: SequenceExecutor) -> Self {
        Self {
            each: definition.each.each.clone(),
            collection: definition.each.in_.clone(),
            at: definition.each.at.clone(),
            while_: definition.while_.clone(),
            body,
        }
    }

    pub fn body(&self) -> &SequenceExecutor {
        &self.body
    }

    /// Run the body once per item, threading the output across iterations.
    /// `while` is checked before every iteration against the current output.
    pub async fn run(
        &self,
        wf: &Arc<WorkflowContext>,
        scope: &Scope,
        task: &mut TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        let evaluator = *wf.evaluator();
        let evaluation = |task: &TaskContext, e: crate::workflow::expression::ExpressionError| {
            task.error_at(TaskErrorKind::Evaluation(e.to_string()))
        };

        let ctx = wf.expression_context(task.input(), scope, task);
        let items = match evaluator
            .evaluate_value(&self.collection, &ctx)
            .map_err(|e| evaluation(task, e))?
        {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => {
                return Err(task.error_at(TaskErrorKind::Validation(format!(
                    "'{}' must evaluate to an array, got {other}",
                    self.collection
                ))));
            }
        };

        let mut output = task.input().clone();
        for (index, item) in items.into_iter().enumerate() {
            if wf.is_cancelled() {
                return Err(task.error_at(TaskErrorKind::Cancelled));
            }
            let iteration = scope
                .with(self.each.as_str(), item)
                .with(self.at.as_str(), json!(index));

            if let Some(condition) = &self.while_ {
                let ctx = wf.expression_context(&output, &iteration, task);
                let proceed = evaluator
                    .evaluate_bool(condition, &ctx)
                    .map_err(|e| evaluation(task, e))?;
                if !proceed {
                    break;
                }
            }

            let outcome = self.body.run(wf, &iteration, output).await?;
            output = outcome.output;
            if outcome.flow == FlowDirective::End {
                return Ok(TaskOutcome::with_flow(output, FlowDirective::End));
            }
        }

        Ok(TaskOutcome::next(output))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::workflow::test_support::{run_task, services};

    // -------------------------------------------------------------------
    // switch
    // -------------------------------------------------------------------

    const ROUTER: &str = r#"
name: route
do:
  - name: decide
    switch:
      - name: large
        when: "${ amount > 100 }"
        then: approveManually
      - name: fallback
        then: approveAutomatically
  - name: approveAutomatically
    set: { approval: auto }
    then: end
  - name: approveManually
    set: { approval: manual }
"#;

    #[tokio::test]
    async fn switch_routes_to_first_matching_case() {
        let (_, result) = run_task(ROUTER, services(), json!({ "amount": 500 })).await;
        assert_eq!(result.unwrap().output["approval"], "manual");
    }

    #[tokio::test]
    async fn switch_falls_back_to_default_case() {
        let (wf, result) = run_task(ROUTER, services(), json!({ "amount": 5 })).await;
        assert_eq!(result.unwrap().output["approval"], "auto");
        assert!(wf.record_at("/do/0/route/do/2/approveManually").is_none());
    }

    #[tokio::test]
    async fn switch_without_match_continues() {
        let yaml = r#"
name: route
do:
  - name: decide
    switch:
      - name: never
        when: "${ false }"
        then: end
  - name: next
    set: { reached: true }
"#;
        let (_, result) = run_task(yaml, services(), json!({})).await;
        assert_eq!(result.unwrap().output, json!({ "reached": true }));
    }

    // -------------------------------------------------------------------
    // for
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn for_threads_output_across_items() {
        let yaml = r#"
name: sum
for:
  for:
    each: n
    in: "${ numbers }"
  do:
    - name: add
      set: { total: "${ total + n }", last_index: "${ index }" }
"#;
        let (_, result) = run_task(yaml, services(), json!({ "numbers": [1, 2, 3], "total": 0 })).await;
        let output = result.unwrap().output;
        assert_eq!(output["total"], 6);
        assert_eq!(output["last_index"], 2);
    }

    #[tokio::test]
    async fn for_stops_when_while_is_false() {
        let yaml = r#"
name: capped
for:
  for: { in: "${ items }" }
  while: "${ count < 2 }"
  do:
    - name: bump
      set: { count: "${ count + 1 }" }
"#;
        let (_, result) = run_task(yaml, services(), json!({ "items": ["a", "b", "c", "d"], "count": 0 })).await;
        assert_eq!(result.unwrap().output["count"], 2);
    }

    #[tokio::test]
    async fn for_over_null_is_empty_and_over_scalar_fails() {
        let yaml = r#"
name: loop
for:
  for: { in: "${ missing }" }
  do:
    - name: touch
      set: { touched: true }
"#;
        let (_, result) = run_task(yaml, services(), json!({ "a": 1 })).await;
        assert_eq!(result.unwrap().output, json!({ "a": 1 }));

        let (_, result) = run_task(yaml, services(), json!({ "missing": 3 })).await;
        assert_eq!(result.unwrap_err().type_name(), "validation");
    }
}
