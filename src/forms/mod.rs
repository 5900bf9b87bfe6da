//! Conversational forms: static step tables, the registry that indexes
//! them by state key, and the engine that walks users through them.

mod engine;
mod input;
mod registry;
mod render;
mod session;
mod steps;

pub use engine::*;
pub use input::*;
pub use registry::*;
pub use render::*;
pub use session::*;
pub use steps::*;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FormId {
    PainCase,
    DrugUse,
    AddDrug,
    Pressure,
}

impl FormId {
    pub const ALL: [FormId; 4] = [
        FormId::PainCase,
        FormId::DrugUse,
        FormId::AddDrug,
        FormId::Pressure,
    ];

    /// Form name as it appears in state keys.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PainCase => "ReportPainCaseForm",
            Self::DrugUse => "ReportDrugUseForm",
            Self::AddDrug => "AddDrugForm",
            Self::Pressure => "ReportPressureForm",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    /// Suffix of the per-form idle timeout variable.
    pub fn env_suffix(&self) -> &'static str {
        match self {
            Self::PainCase => "PAIN_CASE",
            Self::DrugUse => "DRUG_USE",
            Self::AddDrug => "ADD_DRUG",
            Self::Pressure => "PRESSURE",
        }
    }

    /// Chat command that opens the form.
    pub fn command(&self) -> &'static str {
        match self {
            Self::PainCase => "pain",
            Self::DrugUse => "druguse",
            Self::AddDrug => "add_drug",
            Self::Pressure => "pressure",
        }
    }

    pub fn from_command(command: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.command() == command)
    }

    pub fn steps(&self) -> &'static [StepDefinition] {
        match self {
            Self::PainCase => PAIN_CASE_STEPS,
            Self::DrugUse => DRUG_USE_STEPS,
            Self::AddDrug => ADD_DRUG_STEPS,
            Self::Pressure => PRESSURE_STEPS,
        }
    }

    /// `FormName:index:step` for the step at `index`.
    pub fn state_key(&self, index: usize) -> Option<String> {
        self.steps()
            .get(index)
            .map(|step| format!("{}:{}:{}", self.name(), index, step.name))
    }
}

impl std::fmt::Display for FormId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_commands_round_trip() {
        for form in FormId::ALL {
            assert_eq!(FormId::from_name(form.name()), Some(form));
            assert_eq!(FormId::from_command(form.command()), Some(form));
        }
        assert_eq!(FormId::from_name("DonateForm"), None);
    }

    #[test]
    fn state_key_format() {
        assert_eq!(
            FormId::AddDrug.state_key(0).as_deref(),
            Some("AddDrugForm:0:name")
        );
        assert_eq!(
            FormId::PainCase.state_key(9).as_deref(),
            Some("ReportPainCaseForm:9:amount")
        );
        assert_eq!(FormId::Pressure.state_key(3), None);
    }
}
