//! Reply vocabulary and per-step validation. Words are matched
//! case-insensitively in English and Russian.

use std::sync::OnceLock;

use chrono::{Days, NaiveDate};
use regex::Regex;

use super::{Answer, StepKind};

const CANCEL_WORDS: &[&str] = &["cancel", "/cancel", "отмена"];
const NEXT_WORDS: &[&str] = &["next question", "следующий вопрос", "next", "далее"];
const ADD_MORE_WORDS: &[&str] = &["add more", "добавить ещё", "добавить еще"];
const YES_WORDS: &[&str] = &["yes", "y", "да"];
const NO_WORDS: &[&str] = &["no", "n", "нет"];
const TODAY_WORDS: &[&str] = &["today", "сегодня"];
const YESTERDAY_WORDS: &[&str] = &["yesterday", "вчера"];
const DAY_BEFORE_WORDS: &[&str] = &["day before yesterday", "позавчера"];
const ALL_DAY_WORDS: &[&str] = &["all day", "весь день"];
const NONE_WORDS: &[&str] = &["none", "no notes", "не имеются", "нет", "-"];
const UNKNOWN_WORDS: &[&str] = &["i don't know", "i dont know", "idk", "не знаю"];

/// Labels used on buttons; each is also part of the vocabulary above.
pub const LABEL_CANCEL: &str = "Cancel";
pub const LABEL_NEXT: &str = "Next question";
pub const LABEL_YES: &str = "Yes";
pub const LABEL_NO: &str = "No";
pub const LABEL_TODAY: &str = "Today";
pub const LABEL_YESTERDAY: &str = "Yesterday";
pub const LABEL_DAY_BEFORE: &str = "Day before yesterday";
pub const LABEL_ALL_DAY: &str = "All day";
pub const LABEL_NONE: &str = "None";
pub const LABEL_UNKNOWN: &str = "I don't know";
pub const TENS_SUFFIX: &str = "..";

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

fn matches_any(text: &str, words: &[&str]) -> bool {
    let normalized = normalize(text);
    words.iter().any(|w| *w == normalized)
}

pub fn is_cancel(text: &str) -> bool {
    matches_any(text, CANCEL_WORDS)
}

pub fn is_next_question(text: &str) -> bool {
    matches_any(text, NEXT_WORDS)
}

pub fn is_add_more(text: &str) -> bool {
    matches_any(text, ADD_MORE_WORDS)
}

pub fn parse_yes_no(text: &str) -> Option<bool> {
    if matches_any(text, YES_WORDS) {
        Some(true)
    } else if matches_any(text, NO_WORDS) {
        Some(false)
    } else {
        None
    }
}

/// Relative words or an explicit `dd.mm.yyyy` / `yyyy-mm-dd` date, never in the future.
pub fn parse_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let back = |days: u64| today.checked_sub_days(Days::new(days));
    if matches_any(text, TODAY_WORDS) {
        return Some(today);
    }
    if matches_any(text, YESTERDAY_WORDS) {
        return back(1);
    }
    if matches_any(text, DAY_BEFORE_WORDS) {
        return back(2);
    }
    let trimmed = text.trim();
    NaiveDate::parse_from_str(trimmed, "%d.%m.%Y")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d"))
        .ok()
        .filter(|d| *d <= today)
}

/// A whole number, optionally followed by a unit (`400 mg`, `3 h`, `72 bpm`).
pub fn parse_integer(text: &str) -> Option<i64> {
    static NUMBER: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = NUMBER
        .get_or_init(|| {
            Regex::new(r"^(-?\d{1,7})\s*(?:mg|мг|h|hours?|ч|час(?:а|ов)?|bpm|уд)?\.?$").ok()
        })
        .as_ref()?;
    let lowered = text.trim().to_lowercase();
    let captures = pattern.captures(&lowered)?;
    captures.get(1)?.as_str().parse().ok()
}

/// What a reply means for the step it answers.
#[derive(Debug, Clone, PartialEq)]
pub enum Interpretation {
    Value(Answer),
    /// "Next question".
    Done,
    /// Explicit request to pick another item; changes nothing.
    AddMore,
    /// A tens choice on a picker, e.g. `120..`.
    Refine(i64),
    Invalid(&'static str),
}

/// Validate `text` against a step kind. Clamped kinds correct the value
/// instead of rejecting it; non-numeric input is still invalid.
pub fn interpret(kind: &StepKind, text: &str, today: NaiveDate) -> Interpretation {
    use Interpretation::*;

    let trimmed = text.trim();
    match *kind {
        StepKind::Date => match parse_date(trimmed, today) {
            Some(date) => Value(Answer::Date(date)),
            None => Invalid("Invalid date format. Please try again."),
        },
        StepKind::Clamped { min, max, all_day } => {
            if let Some(hours) = all_day.filter(|_| matches_any(trimmed, ALL_DAY_WORDS)) {
                return Value(Answer::Int(hours));
            }
            match parse_integer(trimmed) {
                Some(n) => Value(Answer::Int(n.clamp(min, max))),
                None => Invalid("Please answer with a number."),
            }
        }
        StepKind::YesNo => match parse_yes_no(trimmed) {
            Some(flag) => Value(Answer::Flag(flag)),
            None => Invalid("Please answer yes or no."),
        },
        StepKind::MultiSelect(catalogue) => {
            if is_next_question(trimmed) {
                return Done;
            }
            if trimmed.is_empty() {
                return Invalid("Pick an option or press \"Next question\".");
            }
            let normalized = normalize(trimmed);
            let canonical = catalogue
                .options()
                .iter()
                .find(|o| o.to_lowercase() == normalized)
                .map(|o| o.to_string())
                .unwrap_or_else(|| trimmed.to_string());
            Value(Answer::Text(canonical))
        }
        StepKind::DrugName => {
            if is_next_question(trimmed) {
                return Done;
            }
            if is_add_more(trimmed) {
                return AddMore;
            }
            if trimmed.is_empty() {
                return Invalid("The name cannot be empty.");
            }
            Value(Answer::Text(trimmed.to_string()))
        }
        StepKind::Amount | StepKind::MedicationAmount => {
            if trimmed.is_empty() {
                return Invalid("The answer cannot be empty.");
            }
            Value(Answer::Text(trimmed.to_string()))
        }
        StepKind::Text { max_bytes } => {
            if trimmed.is_empty() {
                return Invalid("The answer cannot be empty.");
            }
            if trimmed.len() > max_bytes {
                return Invalid("That is too long, please shorten it.");
            }
            Value(Answer::Text(trimmed.to_string()))
        }
        StepKind::Description => {
            if trimmed.is_empty() || matches_any(trimmed, NONE_WORDS) {
                Value(Answer::Empty)
            } else {
                Value(Answer::Text(trimmed.to_string()))
            }
        }
        StepKind::Bounded { min, max } => match parse_integer(trimmed) {
            Some(n) if (min..=max).contains(&n) => Value(Answer::Int(n)),
            Some(_) => Invalid("That value is out of range."),
            None => Invalid("Please answer with a number."),
        },
        StepKind::Picker {
            min,
            max,
            allow_unknown,
            ..
        } => {
            if allow_unknown && matches_any(trimmed, UNKNOWN_WORDS) {
                return Value(Answer::Empty);
            }
            if let Some(base) = trimmed
                .strip_suffix(TENS_SUFFIX)
                .or_else(|| trimmed.strip_suffix('…'))
                .and_then(parse_integer)
            {
                return if base + 9 >= min && base <= max {
                    Refine(base)
                } else {
                    Invalid("That value is out of range.")
                };
            }
            match parse_integer(trimmed) {
                Some(n) if (min..=max).contains(&n) => Value(Answer::Int(n)),
                Some(_) => Invalid("That value is out of range."),
                None => Invalid("Please pick a value."),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::Catalogue;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    const DURABILITY: StepKind = StepKind::Clamped { min: 1, max: 168, all_day: Some(24) };
    const INTENSITY: StepKind = StepKind::Clamped { min: 1, max: 10, all_day: None };
    const PULSE: StepKind = StepKind::Picker {
        min: 30,
        max: 220,
        tens_from: 40,
        tens_to: 110,
        allow_unknown: true,
    };

    #[test]
    fn vocabulary_is_case_insensitive_and_bilingual() {
        assert!(is_cancel("CANCEL"));
        assert!(is_cancel(" Отмена "));
        assert!(is_next_question("Next Question"));
        assert!(is_next_question("Следующий вопрос"));
        assert_eq!(parse_yes_no("Да"), Some(true));
        assert_eq!(parse_yes_no("no"), Some(false));
        assert_eq!(parse_yes_no("maybe"), None);
    }

    #[test]
    fn relative_and_explicit_dates() {
        assert_eq!(parse_date("today", today()), Some(today()));
        assert_eq!(parse_date("Вчера", today()), NaiveDate::from_ymd_opt(2024, 6, 14));
        assert_eq!(
            parse_date("day before yesterday", today()),
            NaiveDate::from_ymd_opt(2024, 6, 13)
        );
        assert_eq!(parse_date("01.06.2024", today()), NaiveDate::from_ymd_opt(2024, 6, 1));
        assert_eq!(parse_date("2024-06-02", today()), NaiveDate::from_ymd_opt(2024, 6, 2));
        assert_eq!(parse_date("31.02.2024", today()), None);
        assert_eq!(parse_date("16.06.2024", today()), None);
    }

    #[test]
    fn numbers_accept_units() {
        assert_eq!(parse_integer(" 400 mg "), Some(400));
        assert_eq!(parse_integer("3ч"), Some(3));
        assert_eq!(parse_integer("5 часов"), Some(5));
        assert_eq!(parse_integer("72 BPM"), Some(72));
        assert_eq!(parse_integer("-2"), Some(-2));
        assert_eq!(parse_integer("12 apples"), None);
        assert_eq!(parse_integer("1.5"), None);
    }

    #[test]
    fn intensity_clamped_not_rejected() {
        assert_eq!(interpret(&INTENSITY, "15", today()), Interpretation::Value(Answer::Int(10)));
        assert_eq!(interpret(&INTENSITY, "0", today()), Interpretation::Value(Answer::Int(1)));
        assert!(matches!(interpret(&INTENSITY, "bad", today()), Interpretation::Invalid(_)));
    }

    #[test]
    fn durability_clamped_with_all_day_word() {
        assert_eq!(interpret(&DURABILITY, "0", today()), Interpretation::Value(Answer::Int(1)));
        assert_eq!(interpret(&DURABILITY, "500", today()), Interpretation::Value(Answer::Int(168)));
        assert_eq!(interpret(&DURABILITY, "весь день", today()), Interpretation::Value(Answer::Int(24)));
        assert_eq!(interpret(&DURABILITY, "All day", today()), Interpretation::Value(Answer::Int(24)));
        // The all-day word only applies where the step declares it.
        assert!(matches!(interpret(&INTENSITY, "all day", today()), Interpretation::Invalid(_)));
    }

    #[test]
    fn multiselect_canonicalizes_catalogue_options() {
        let kind = StepKind::MultiSelect(Catalogue::Triggers);
        assert_eq!(
            interpret(&kind, "coffee", today()),
            Interpretation::Value(Answer::Text("Coffee".into()))
        );
        assert_eq!(interpret(&kind, "next question", today()), Interpretation::Done);
    }

    #[test]
    fn picker_refines_then_accepts() {
        assert_eq!(interpret(&PULSE, "70..", today()), Interpretation::Refine(70));
        assert_eq!(interpret(&PULSE, "72", today()), Interpretation::Value(Answer::Int(72)));
        assert_eq!(interpret(&PULSE, "I don't know", today()), Interpretation::Value(Answer::Empty));
        assert!(matches!(interpret(&PULSE, "400", today()), Interpretation::Invalid(_)));
        assert!(matches!(interpret(&PULSE, "900..", today()), Interpretation::Invalid(_)));
    }

    #[test]
    fn unknown_only_where_allowed() {
        let systolic = StepKind::Picker {
            min: 50,
            max: 260,
            tens_from: 80,
            tens_to: 170,
            allow_unknown: false,
        };
        assert!(matches!(interpret(&systolic, "idk", today()), Interpretation::Invalid(_)));
    }

    #[test]
    fn description_none_words() {
        assert_eq!(interpret(&StepKind::Description, "none", today()), Interpretation::Value(Answer::Empty));
        assert_eq!(
            interpret(&StepKind::Description, "after lunch", today()),
            Interpretation::Value(Answer::Text("after lunch".into()))
        );
    }

    #[test]
    fn bounded_rejects_out_of_range() {
        let kind = StepKind::Bounded { min: 1, max: 100 };
        assert!(matches!(interpret(&kind, "0", today()), Interpretation::Invalid(_)));
        assert_eq!(interpret(&kind, "50", today()), Interpretation::Value(Answer::Int(50)));
    }

    #[test]
    fn names_must_fit_a_button() {
        let kind = StepKind::Text { max_bytes: 64 };
        let fits = "Ибупрофен".repeat(3);
        assert_eq!(
            interpret(&kind, &fits, today()),
            Interpretation::Value(Answer::Text(fits.clone()))
        );
        let long = "Ибупрофен ".repeat(4);
        assert!(matches!(interpret(&kind, &long, today()), Interpretation::Invalid(_)));
        assert!(matches!(interpret(&kind, "  ", today()), Interpretation::Invalid(_)));
    }

}
