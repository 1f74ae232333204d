//! Step model.
//!
//! A [`KeyStep`] is one position in an automation sequence. Every step
//! keeps the fields of all three modes so an editor can switch modes
//! without losing what was typed; only the fields belonging to the active
//! [`StepMode`] are consulted at dispatch time.

use serde::{Deserialize, Serialize};

use crate::error::{PksError, Result};

/// Maximum number of text characters shown in a step label.
const LABEL_TEXT_LIMIT: usize = 24;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepMode {
    #[default]
    Key,
    Text,
    Combo,
}

/// One unit of the automation sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyStep {
    pub mode: StepMode,

    // Key mode
    pub key_name: String,
    pub command: bool,
    pub shift: bool,
    pub option: bool,
    pub control: bool,

    // Text mode (text_content is shared with combo mode)
    pub text_content: String,
    pub append_enter: bool,

    // Combo mode
    pub has_prefix_key: bool,
    pub prefix_key_name: String,
    pub has_suffix_key: bool,
    pub suffix_key_name: String,
}

impl Default for KeyStep {
    fn default() -> Self {
        Self {
            mode: StepMode::Key,
            key_name: "Return".to_string(),
            command: false,
            shift: false,
            option: false,
            control: false,
            text_content: String::new(),
            append_enter: false,
            has_prefix_key: false,
            prefix_key_name: "Return".to_string(),
            has_suffix_key: false,
            suffix_key_name: "Return".to_string(),
        }
    }
}

impl KeyStep {
    /// A plain key press without modifiers.
    pub fn key(name: impl Into<String>) -> Self {
        Self {
            mode: StepMode::Key,
            key_name: name.into(),
            ..Self::default()
        }
    }

    /// A text payload, optionally followed by Enter.
    pub fn text(content: impl Into<String>, append_enter: bool) -> Self {
        Self {
            mode: StepMode::Text,
            text_content: content.into(),
            append_enter,
            ..Self::default()
        }
    }

    /// Optional prefix key, then text, then optional suffix key.
    pub fn combo(prefix: Option<&str>, content: impl Into<String>, suffix: Option<&str>) -> Self {
        let mut step = Self {
            mode: StepMode::Combo,
            text_content: content.into(),
            ..Self::default()
        };
        if let Some(prefix) = prefix {
            step.has_prefix_key = true;
            step.prefix_key_name = prefix.to_string();
        }
        if let Some(suffix) = suffix {
            step.has_suffix_key = true;
            step.suffix_key_name = suffix.to_string();
        }
        step
    }

    pub fn with_modifiers(mut self, command: bool, shift: bool, option: bool, control: bool) -> Self {
        self.command = command;
        self.shift = shift;
        self.option = option;
        self.control = control;
        self
    }

    /// Human-readable description derived from the active mode's fields.
    pub fn label(&self) -> String {
        match self.mode {
            StepMode::Key => {
                let mut label = String::new();
                for (enabled, name) in [
                    (self.command, "cmd"),
                    (self.control, "ctrl"),
                    (self.option, "opt"),
                    (self.shift, "shift"),
                ] {
                    if enabled {
                        label.push_str(name);
                        label.push('+');
                    }
                }
                label.push_str(&self.key_name);
                label
            }
            StepMode::Text => {
                let mut label = quoted(&self.text_content);
                if self.append_enter {
                    label.push_str(" + Enter");
                }
                label
            }
            StepMode::Combo => {
                let mut parts = Vec::with_capacity(3);
                if self.has_prefix_key {
                    parts.push(format!("[{}]", self.prefix_key_name));
                }
                parts.push(quoted(&self.text_content));
                if self.has_suffix_key {
                    parts.push(format!("[{}]", self.suffix_key_name));
                }
                parts.join(" + ")
            }
        }
    }
}

fn quoted(text: &str) -> String {
    if text.chars().count() > LABEL_TEXT_LIMIT {
        let head: String = text.chars().take(LABEL_TEXT_LIMIT).collect();
        format!("\"{head}…\"")
    } else {
        format!("\"{text}\"")
    }
}

/// Ordered, editable list of steps.
///
/// The scheduler copies the steps out at start, so edits made here while a
/// run is in progress only affect the next run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepSequence {
    steps: Vec<KeyStep>,
}

impl StepSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> &[KeyStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut KeyStep> {
        self.steps.get_mut(index)
    }

    pub fn push(&mut self, step: KeyStep) {
        self.steps.push(step);
    }

    /// Insert at `index`; `index == len` appends.
    pub fn insert(&mut self, index: usize, step: KeyStep) -> Result<()> {
        if index > self.steps.len() {
            return Err(self.out_of_range(index));
        }
        self.steps.insert(index, step);
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<KeyStep> {
        if index >= self.steps.len() {
            return Err(self.out_of_range(index));
        }
        Ok(self.steps.remove(index))
    }

    /// Move the step at `from` so that it ends up at position `to`.
    pub fn move_step(&mut self, from: usize, to: usize) -> Result<()> {
        for index in [from, to] {
            if index >= self.steps.len() {
                return Err(self.out_of_range(index));
            }
        }
        let step = self.steps.remove(from);
        self.steps.insert(to, step);
        Ok(())
    }

    fn out_of_range(&self, index: usize) -> PksError {
        PksError::IndexOutOfRange {
            index,
            len: self.steps.len(),
        }
    }
}

impl From<Vec<KeyStep>> for StepSequence {
    fn from(steps: Vec<KeyStep>) -> Self {
        Self { steps }
    }
}
