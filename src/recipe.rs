//! Recipe steps and the step cursor driven by voice intents

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::voice::Intent;
use crate::{Error, Result};

/// Description shown when the upstream recipe has no steps
const EMPTY_STEP_DESC: &str = "레시피 정보가 없습니다.";

/// One step of a recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeStep {
    /// 1-based step number as shown to the user
    #[serde(default)]
    pub no: u32,

    /// Instruction text
    #[serde(default)]
    pub desc: String,
}

/// A generated recipe handed over by the recipe flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    /// Recipe title
    #[serde(default = "default_name")]
    pub name: String,

    /// Ordered steps; never empty after loading
    #[serde(default)]
    pub steps: Vec<RecipeStep>,
}

fn default_name() -> String {
    "레시피 없음".to_string()
}

impl Recipe {
    /// Build a recipe, substituting a placeholder step if `steps` is empty
    /// and numbering any step without a number by position
    #[must_use]
    pub fn new(name: impl Into<String>, steps: Vec<RecipeStep>) -> Self {
        let mut recipe = Self {
            name: name.into(),
            steps,
        };
        recipe.normalize();
        recipe
    }

    /// Load a recipe from a JSON file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is not a recipe
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Recipe(format!("failed to read {}: {e}", path.display())))?;
        Self::from_json(&content)
    }

    /// Parse a recipe from JSON
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is not a recipe
    pub fn from_json(json: &str) -> Result<Self> {
        let mut recipe: Self = serde_json::from_str(json)?;
        recipe.normalize();
        tracing::debug!(name = %recipe.name, steps = recipe.steps.len(), "recipe loaded");
        Ok(recipe)
    }

    fn normalize(&mut self) {
        if self.steps.is_empty() {
            self.steps.push(RecipeStep {
                no: 1,
                desc: EMPTY_STEP_DESC.to_string(),
            });
        }

        for (i, step) in self.steps.iter_mut().enumerate() {
            if step.no == 0 {
                step.no = u32::try_from(i + 1).unwrap_or(u32::MAX);
            }
        }
    }

    /// Description of the step at `index`, empty if out of range
    #[must_use]
    pub fn step_desc(&self, index: usize) -> &str {
        self.steps.get(index).map_or("", |s| s.desc.as_str())
    }
}

/// Position within an immutable step list
///
/// Only moves one step at a time and never leaves `0..len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepCursor {
    index: usize,
    len: usize,
}

impl StepCursor {
    /// Create a cursor over `len` steps, clamping `index` into range
    #[must_use]
    pub fn new(index: usize, len: usize) -> Self {
        let len = len.max(1);
        Self {
            index: index.min(len - 1),
            len,
        }
    }

    /// Current step index
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Index of the last step
    #[must_use]
    pub const fn last(&self) -> usize {
        self.len - 1
    }

    /// Move according to an intent, returning true if the index changed
    pub fn apply(&mut self, intent: &Intent) -> bool {
        let old = self.index;
        self.index = match intent.step_delta() {
            1 => (old + 1).min(self.last()),
            -1 => old.saturating_sub(1),
            _ => old,
        };

        if self.index != old {
            tracing::info!(from = old, to = self.index, "step changed");
        }
        self.index != old
    }
}
