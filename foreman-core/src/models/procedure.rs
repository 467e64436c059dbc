use serde::{Deserialize, Serialize};

/// A single guided step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub index: usize,
    pub instruction: String,
    #[serde(default)]
    pub safety_flags: Vec<String>,
    pub estimated_minutes: u32,
}

impl Step {
    pub fn is_safety_critical(&self) -> bool {
        !self.safety_flags.is_empty()
    }
}

/// Read-only procedure template. Sessions hold only a cursor into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Procedure {
    pub id: String,
    pub title: String,
    pub estimated_minutes: u32,
    pub steps: Vec<Step>,
}

impl Procedure {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }
}
