//! Event poster contract.
//!
//! The scheduler never synthesizes input itself. It resolves a step into a
//! [`Dispatch`] and hands that to an [`EventPoster`], which performs the
//! OS-level injection and reports a boolean outcome.

use async_trait::async_trait;

use crate::error::{PksError, Result};
use crate::keymap::{lookup_key, modifiers_from_flags, KeyCode, Modifiers};
use crate::step::{KeyStep, StepMode};

/// Injects synthetic keyboard input into a process.
///
/// `Ok(false)` and `Err(_)` are both treated as a per-tick failure by the
/// scheduler; neither stops a run.
#[async_trait]
pub trait EventPoster: Send + Sync {
    async fn post_key(&self, pid: u32, key: KeyCode, modifiers: Modifiers) -> Result<bool>;

    async fn post_text(&self, pid: u32, text: &str, append_enter: bool) -> Result<bool>;

    async fn post_combo(
        &self,
        pid: u32,
        text: &str,
        prefix: Option<KeyCode>,
        suffix: Option<KeyCode>,
    ) -> Result<bool>;
}

/// A step with its key names resolved, ready to hand to a poster.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Key {
        key: KeyCode,
        modifiers: Modifiers,
    },
    Text {
        text: String,
        append_enter: bool,
    },
    Combo {
        text: String,
        prefix: Option<KeyCode>,
        suffix: Option<KeyCode>,
    },
}

impl Dispatch {
    /// Resolve the active mode's fields of the step at `index`.
    pub fn from_step(step: &KeyStep, index: usize) -> Result<Self> {
        match step.mode {
            StepMode::Key => {
                let key = lookup_key(&step.key_name)
                    .ok_or_else(|| PksError::unknown_key(&step.key_name))?;
                Ok(Self::Key {
                    key,
                    modifiers: modifiers_from_flags(step.command, step.shift, step.option, step.control),
                })
            }
            StepMode::Text => {
                if step.text_content.is_empty() {
                    return Err(PksError::EmptyContent { index });
                }
                Ok(Self::Text {
                    text: step.text_content.clone(),
                    append_enter: step.append_enter,
                })
            }
            StepMode::Combo => {
                if step.text_content.is_empty() {
                    return Err(PksError::EmptyContent { index });
                }
                let prefix = optional_key(step.has_prefix_key, &step.prefix_key_name)?;
                let suffix = optional_key(step.has_suffix_key, &step.suffix_key_name)?;
                Ok(Self::Combo {
                    text: step.text_content.clone(),
                    prefix,
                    suffix,
                })
            }
        }
    }

    pub async fn post(&self, poster: &dyn EventPoster, pid: u32) -> Result<bool> {
        match self {
            Self::Key { key, modifiers } => poster.post_key(pid, *key, *modifiers).await,
            Self::Text { text, append_enter } => poster.post_text(pid, text, *append_enter).await,
            Self::Combo {
                text,
                prefix,
                suffix,
            } => poster.post_combo(pid, text, *prefix, *suffix).await,
        }
    }
}

fn optional_key(enabled: bool, name: &str) -> Result<Option<KeyCode>> {
    if !enabled {
        return Ok(None);
    }
    lookup_key(name)
        .map(Some)
        .ok_or_else(|| PksError::unknown_key(name))
}
