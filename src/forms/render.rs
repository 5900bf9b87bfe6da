use chrono::{Days, NaiveDate};

use super::input::*;
use super::{ConversationSession, StepKind, StepRef, Transition};
use crate::transport::Prompt;

const AMOUNT_CHOICES: &[&str] = &["50", "100", "200", "400", "800", "1000", "1200", "2000"];
const ADD_MORE_TEXT: &str = "You can add more or press \"Next question\".";

/// Prompt for `step`, withholding options the session already holds.
/// `drugs` is the user's medication catalogue, used by drug steps.
pub fn render_step(
    step: StepRef,
    session: &ConversationSession,
    drugs: &[String],
    today: NaiveDate,
    repeat: bool,
) -> Prompt {
    let definition = step.definition();
    let chosen = session.chosen(definition);
    let not_chosen = |option: &str| !chosen.iter().any(|c| c.eq_ignore_ascii_case(option));

    let mut choices: Vec<String> = match definition.kind {
        StepKind::Date => {
            let mut days = vec![
                LABEL_TODAY.to_string(),
                LABEL_YESTERDAY.to_string(),
                LABEL_DAY_BEFORE.to_string(),
            ];
            days.extend((3..=5).filter_map(|back| {
                today
                    .checked_sub_days(Days::new(back))
                    .map(|d| d.format("%d.%m.%Y").to_string())
            }));
            days
        }
        StepKind::Clamped { min, max, all_day } => {
            let mut values: Vec<String> =
                (min..=max.min(min + 9)).map(|n| n.to_string()).collect();
            if all_day.is_some() {
                values.push(LABEL_ALL_DAY.to_string());
            }
            values
        }
        StepKind::YesNo => vec![LABEL_YES.to_string(), LABEL_NO.to_string()],
        StepKind::MultiSelect(catalogue) => {
            let mut options: Vec<String> = catalogue
                .options()
                .iter()
                .filter(|o| not_chosen(**o))
                .map(|o| o.to_string())
                .collect();
            options.push(LABEL_NEXT.to_string());
            options
        }
        StepKind::DrugName => {
            let mut options: Vec<String> = drugs
                .iter()
                .filter(|d| not_chosen(d.as_str()))
                .cloned()
                .collect();
            if matches!(definition.transition, Transition::PickOrSkip { .. }) {
                options.push(LABEL_NEXT.to_string());
            }
            options
        }
        StepKind::Amount | StepKind::MedicationAmount | StepKind::Bounded { .. } => {
            AMOUNT_CHOICES.iter().map(|s| s.to_string()).collect()
        }
        StepKind::Description => vec![LABEL_NONE.to_string()],
        StepKind::Text { .. } => Vec::new(),
        StepKind::Picker {
            tens_from,
            tens_to,
            allow_unknown,
            ..
        } => {
            let mut values: Vec<String> = (tens_from..=tens_to)
                .step_by(10)
                .map(|n| format!("{n}{TENS_SUFFIX}"))
                .collect();
            if allow_unknown {
                values.push(LABEL_UNKNOWN.to_string());
            }
            values
        }
    };
    choices.push(LABEL_CANCEL.to_string());

    let text = if repeat && is_repeatable(definition.kind) {
        ADD_MORE_TEXT
    } else {
        definition.prompt
    };
    Prompt::new(text, choices)
}

fn is_repeatable(kind: StepKind) -> bool {
    matches!(kind, StepKind::MultiSelect(_) | StepKind::DrugName)
}

/// Picker prompt narrowed to `base..base+9`, clipped to the step bounds.
pub fn render_refined(step: StepRef, base: i64) -> Prompt {
    let definition = step.definition();
    let mut choices = Vec::new();
    if let StepKind::Picker {
        min,
        max,
        allow_unknown,
        ..
    } = definition.kind
    {
        choices.extend(
            (base.max(min)..=(base + 9).min(max)).map(|n| n.to_string()),
        );
        if allow_unknown {
            choices.push(LABEL_UNKNOWN.to_string());
        }
    }
    choices.push(LABEL_CANCEL.to_string());
    Prompt::new(definition.prompt, choices)
}

/// Same step again, with the validation message first.
pub fn render_rejection(reason: &str, mut prompt: Prompt) -> Prompt {
    prompt.text = format!("{reason}\n{}", prompt.text);
    prompt
}
