use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use thiserror::Error;

use super::{FormId, StepDefinition, StepKind, StepRef};
use crate::models::{
    MedicationIntake, NewDrug, NewDrugUse, NewPainCase, NewPressure, NewRecord, UserId,
};
use crate::transport::MessageRef;

/// Answer slot holding the medications collected during a pain report.
pub const MEDICATIONS: &str = "medications";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Answer {
    Date(NaiveDate),
    Int(i64),
    Flag(bool),
    Text(String),
    List(Vec<String>),
    Medications(Vec<MedicationIntake>),
    /// Explicitly skipped ("none", "I don't know").
    Empty,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("{form} is missing answer '{field}'")]
    MissingAnswer { form: FormId, field: &'static str },

    #[error("{form} answer '{field}' has the wrong shape")]
    WrongShape { form: FormId, field: &'static str },
}

/// Transient answers and cursor for one user's form.
#[derive(Debug, Clone)]
pub struct ConversationSession {
    pub user_id: UserId,
    pub step: StepRef,
    pub answers: HashMap<&'static str, Answer>,
    /// The last prompt sent, edited in place by picker refinements.
    pub prompt: Option<MessageRef>,
}

impl ConversationSession {
    pub fn new(user_id: UserId, step: StepRef) -> Self {
        Self {
            user_id,
            step,
            answers: HashMap::new(),
            prompt: None,
        }
    }

    pub fn form(&self) -> FormId {
        self.step.form()
    }

    pub fn state_key(&self) -> String {
        self.step.state_key()
    }

    /// Options already picked on a repeatable step, derived from the answers.
    pub fn chosen(&self, step: &StepDefinition) -> Vec<String> {
        match step.kind {
            StepKind::MultiSelect(_) => match self.answers.get(step.name) {
                Some(Answer::List(items)) => items.clone(),
                _ => Vec::new(),
            },
            StepKind::DrugName => self
                .medications()
                .iter()
                .map(|m| m.drug_name.clone())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Append a pick to a list answer. Returns false for a repeat pick.
    pub fn push_choice(&mut self, field: &'static str, value: String) -> bool {
        let entry = self
            .answers
            .entry(field)
            .or_insert_with(|| Answer::List(Vec::new()));
        match entry {
            Answer::List(items) => {
                if items.iter().any(|i| i.eq_ignore_ascii_case(&value) || *i == value) {
                    return false;
                }
                items.push(value);
                true
            }
            other => {
                *other = Answer::List(vec![value]);
                true
            }
        }
    }

    pub fn medications(&self) -> &[MedicationIntake] {
        match self.answers.get(MEDICATIONS) {
            Some(Answer::Medications(items)) => items,
            _ => &[],
        }
    }

    /// Pair `amount` with the drug picked on `drug_field`.
    pub fn push_medication(
        &mut self,
        drug_field: &'static str,
        amount: String,
    ) -> Result<(), SessionError> {
        let drug_name = self.text(drug_field)?.to_string();
        let entry = self
            .answers
            .entry(MEDICATIONS)
            .or_insert_with(|| Answer::Medications(Vec::new()));
        if let Answer::Medications(items) = entry {
            items.push(MedicationIntake { drug_name, amount });
        }
        Ok(())
    }

    fn get(&self, field: &'static str) -> Result<&Answer, SessionError> {
        self.answers.get(field).ok_or(SessionError::MissingAnswer {
            form: self.form(),
            field,
        })
    }

    fn wrong(&self, field: &'static str) -> SessionError {
        SessionError::WrongShape {
            form: self.form(),
            field,
        }
    }

    fn date(&self, field: &'static str) -> Result<NaiveDate, SessionError> {
        match self.get(field)? {
            Answer::Date(d) => Ok(*d),
            _ => Err(self.wrong(field)),
        }
    }

    fn int(&self, field: &'static str) -> Result<i64, SessionError> {
        match self.get(field)? {
            Answer::Int(n) => Ok(*n),
            _ => Err(self.wrong(field)),
        }
    }

    fn small_int(&self, field: &'static str) -> Result<i32, SessionError> {
        i32::try_from(self.int(field)?).map_err(|_| self.wrong(field))
    }

    fn optional_int(&self, field: &'static str) -> Result<Option<i32>, SessionError> {
        match self.get(field)? {
            Answer::Empty => Ok(None),
            Answer::Int(_) => self.small_int(field).map(Some),
            _ => Err(self.wrong(field)),
        }
    }

    fn flag(&self, field: &'static str) -> Result<bool, SessionError> {
        match self.get(field)? {
            Answer::Flag(b) => Ok(*b),
            _ => Err(self.wrong(field)),
        }
    }

    fn text(&self, field: &'static str) -> Result<&str, SessionError> {
        match self.get(field)? {
            Answer::Text(s) => Ok(s),
            _ => Err(self.wrong(field)),
        }
    }

    fn optional_text(&self, field: &'static str) -> Result<Option<String>, SessionError> {
        match self.answers.get(field) {
            None | Some(Answer::Empty) => Ok(None),
            Some(Answer::Text(s)) => Ok(Some(s.clone())),
            Some(_) => Err(self.wrong(field)),
        }
    }

    fn list(&self, field: &'static str) -> Vec<String> {
        match self.answers.get(field) {
            Some(Answer::List(items)) => items.clone(),
            _ => Vec::new(),
        }
    }

    /// Assemble the record this form produces.
    pub fn to_record(&self, now: NaiveDateTime) -> Result<NewRecord, SessionError> {
        let owner_id = self.user_id;
        let record = match self.form() {
            FormId::PainCase => NewRecord::PainCase(NewPainCase {
                owner_id,
                date: self.date("date")?,
                durability_hours: self.small_int("durability")?,
                intensity: self.small_int("intensity")?,
                aura: self.flag("aura")?,
                provocateurs: self.list("provocateurs"),
                symptoms: self.list("symptoms"),
                description: self.optional_text("description")?,
                medications: self.medications().to_vec(),
            }),
            FormId::DrugUse => NewRecord::DrugUse(NewDrugUse {
                owner_id,
                date: self.date("date")?,
                drug_name: self.text("drugname")?.to_string(),
                amount: self.text("amount")?.to_string(),
            }),
            FormId::AddDrug => NewRecord::Drug(NewDrug {
                owner_id,
                name: self.text("name")?.to_string(),
                daily_max_mg: self.int("daily_max")?,
                is_painkiller: self.flag("is_painkiller")?,
                is_temp_reducer: self.flag("is_temp_reducer")?,
            }),
            FormId::Pressure => NewRecord::Pressure(NewPressure {
                owner_id,
                measured_at: now,
                systolic: self.small_int("systolic")?,
                diastolic: self.small_int("diastolic")?,
                pulse: self.optional_int("pulse")?,
            }),
        };
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::StateRegistry;

    fn session(key: &str) -> ConversationSession {
        let registry = StateRegistry::build().unwrap();
        ConversationSession::new(5, registry.resolve(key).unwrap())
    }

    #[test]
    fn exclusion_derived_from_answers() {
        let mut s = session("ReportPainCaseForm:4:provocateurs");
        let step = *s.step.definition();
        assert!(s.push_choice("provocateurs", "Stress".into()));
        assert!(s.push_choice("provocateurs", "Coffee".into()));
        assert!(!s.push_choice("provocateurs", "Coffee".into()));
        assert_eq!(s.chosen(&step), vec!["Stress", "Coffee"]);
    }

    #[test]
    fn medications_pair_with_picked_drug() {
        let mut s = session("ReportPainCaseForm:9:amount");
        s.answers.insert("drugname", Answer::Text("A".into()));
        s.push_medication("drugname", "200".into()).unwrap();
        s.answers.insert("drugname", Answer::Text("B".into()));
        s.push_medication("drugname", "1 pill".into()).unwrap();
        let names: Vec<_> = s.medications().iter().map(|m| m.drug_name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn missing_answer_reported() {
        let s = session("AddDrugForm:0:name");
        let err = s.to_record(chrono::Utc::now().naive_utc()).unwrap_err();
        assert_eq!(
            err,
            SessionError::MissingAnswer {
                form: FormId::AddDrug,
                field: "name"
            }
        );
    }

    #[test]
    fn pressure_record_with_unknown_pulse() {
        let mut s = session("ReportPressureForm:2:pulse");
        s.answers.insert("systolic", Answer::Int(125));
        s.answers.insert("diastolic", Answer::Int(82));
        s.answers.insert("pulse", Answer::Empty);
        match s.to_record(chrono::Utc::now().naive_utc()).unwrap() {
            NewRecord::Pressure(p) => {
                assert_eq!((p.systolic, p.diastolic, p.pulse), (125, 82, None));
            }
            other => panic!("unexpected record {other:?}"),
        }
    }
}
