//! Structural positions of task nodes within a definition tree.

use std::fmt;

/// Path from the definition root to a task node, rendered like a JSON
/// pointer (`/do/1/setY`). Assigned once when the executor tree is built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct WorkflowPosition {
    segments: Vec<String>,
}

impl WorkflowPosition {
    pub fn root() -> Self {
        Self::default()
    }

    /// A new position one segment below this one.
    pub fn child(&self, segment: impl fmt::Display) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Self { segments }
    }

    /// Position of the `index`-th task named `name` in the list under `key`.
    pub fn item(&self, key: &str, index: usize, name: &str) -> Self {
        self.child(key).child(index).child(name)
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }
}

impl fmt::Display for WorkflowPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}
