use std::collections::HashMap;

use thiserror::Error;

use super::{FormId, StepDefinition, Target, Transition};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Duplicate step '{step}' in {form}")]
    DuplicateStep { form: FormId, step: &'static str },

    #[error("Step '{step}' in {form} points at missing step '{target}'")]
    UnknownTarget {
        form: FormId,
        step: &'static str,
        target: &'static str,
    },

    #[error("Last step '{step}' of {form} has no next step")]
    NoNextStep { form: FormId, step: &'static str },

    #[error("Unknown state key: {0}")]
    UnknownKey(String),
}

/// A step located in its form. Only the registry hands these out, so the
/// index is always in bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepRef {
    form: FormId,
    index: usize,
}

impl StepRef {
    pub fn form(&self) -> FormId {
        self.form
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn definition(&self) -> &'static StepDefinition {
        &self.form.steps()[self.index]
    }

    pub fn state_key(&self) -> String {
        format!("{}:{}:{}", self.form.name(), self.index, self.definition().name)
    }

    /// The step a target names, or `None` for completion.
    pub fn follow(&self, target: Target) -> Result<Option<StepRef>, RegistryError> {
        match target {
            Target::Complete => Ok(None),
            Target::Next => {
                let index = self.index + 1;
                if index >= self.form.steps().len() {
                    return Err(RegistryError::NoNextStep {
                        form: self.form,
                        step: self.definition().name,
                    });
                }
                Ok(Some(StepRef {
                    form: self.form,
                    index,
                }))
            }
            Target::Step(name) => self
                .form
                .steps()
                .iter()
                .position(|s| s.name == name)
                .map(|index| {
                    Some(StepRef {
                        form: self.form,
                        index,
                    })
                })
                .ok_or(RegistryError::UnknownTarget {
                    form: self.form,
                    step: self.definition().name,
                    target: name,
                }),
        }
    }
}

/// Every step of every form, indexed by state key. Built once at startup.
#[derive(Debug, Clone)]
pub struct StateRegistry {
    by_key: HashMap<String, StepRef>,
    keys: Vec<String>,
    entries: HashMap<FormId, StepRef>,
}

impl StateRegistry {
    pub fn build() -> Result<Self, RegistryError> {
        let mut by_key = HashMap::new();
        let mut keys = Vec::new();
        let mut entries = HashMap::new();

        for form in FormId::ALL {
            let steps = form.steps();
            for (index, step) in steps.iter().enumerate() {
                if steps[..index].iter().any(|s| s.name == step.name) {
                    return Err(RegistryError::DuplicateStep {
                        form,
                        step: step.name,
                    });
                }
                let step_ref = StepRef { form, index };
                for target in targets(&step.transition) {
                    step_ref.follow(target)?;
                }
                let key = step_ref.state_key();
                keys.push(key.clone());
                by_key.insert(key, step_ref);
            }
            if !steps.is_empty() {
                entries.insert(form, StepRef { form, index: 0 });
            }
        }

        Ok(Self {
            by_key,
            keys,
            entries,
        })
    }

    pub fn resolve(&self, state_key: &str) -> Result<StepRef, RegistryError> {
        self.by_key
            .get(state_key)
            .copied()
            .ok_or_else(|| RegistryError::UnknownKey(state_key.to_string()))
    }

    /// Keys in declaration order, used to seed empty member sets.
    pub fn all_state_keys(&self) -> &[String] {
        &self.keys
    }

    pub fn entry_step(&self, form: FormId) -> Option<StepRef> {
        self.entries.get(&form).copied()
    }
}

fn targets(transition: &Transition) -> Vec<Target> {
    match *transition {
        Transition::Go(t) => vec![t],
        Transition::Branch { yes, no } => vec![yes, no],
        Transition::Collect { done } => vec![done],
        Transition::PickOrSkip { pick, skip } => vec![pick, skip],
    }
}
