use crate::transport::MAX_CHOICE_BYTES;

/// Fixed option lists offered by multi-select steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Catalogue {
    Triggers,
    Symptoms,
}

impl Catalogue {
    pub fn options(&self) -> &'static [&'static str] {
        match self {
            Self::Triggers => &[
                "Stress",
                "Stress relief",
                "Skipped meal",
                "Lack of sleep",
                "Oversleeping",
                "Alcohol",
                "Bright light",
                "Chocolate",
                "Cheese",
                "Coffee",
                "Strong smells",
                "Weather",
                "Hormones",
                "Physical exertion",
            ],
            Self::Symptoms => &[
                "Nausea",
                "Vomiting",
                "Neck pain",
                "Photosensitivity",
                "Sound sensitivity",
            ],
        }
    }
}

/// What a step accepts and how it validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Relative words or `dd.mm.yyyy`.
    Date,
    /// Integer corrected into `[min, max]`; `all_day` maps the all-day word.
    Clamped { min: i64, max: i64, all_day: Option<i64> },
    YesNo,
    /// Zero or more picks, already chosen options are withheld.
    MultiSelect(Catalogue),
    /// A drug from the user's catalogue, or typed.
    DrugName,
    /// Free-text amount for a stand-alone drug use.
    Amount,
    /// Amount for the drug just picked; appends a medication intake.
    MedicationAmount,
    /// Optional note, the "none" word clears it.
    Description,
    /// Non-empty free text of at most `max_bytes`.
    Text { max_bytes: usize },
    /// Integer rejected outside `[min, max]`.
    Bounded { min: i64, max: i64 },
    /// Two-stage numeric picker: a tens choice narrows the offered values.
    Picker {
        min: i64,
        max: i64,
        tens_from: i64,
        tens_to: i64,
        allow_unknown: bool,
    },
}

/// Where a transition leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The step declared right after this one.
    Next,
    Step(&'static str),
    /// Persist the collected record.
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Go(Target),
    /// On a yes/no answer.
    Branch { yes: Target, no: Target },
    /// Each pick re-renders this step; "next question" moves to `done`.
    Collect { done: Target },
    /// A pick moves to `pick`; "next question" moves to `skip`.
    PickOrSkip { pick: Target, skip: Target },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepDefinition {
    pub name: &'static str,
    pub prompt: &'static str,
    pub kind: StepKind,
    pub transition: Transition,
}

const fn step(
    name: &'static str,
    prompt: &'static str,
    kind: StepKind,
    transition: Transition,
) -> StepDefinition {
    StepDefinition {
        name,
        prompt,
        kind,
        transition,
    }
}

// ═══════════════════════════════════════════
// Form tables
// ═══════════════════════════════════════════

pub const PAIN_CASE_STEPS: &[StepDefinition] = &[
    step(
        "date",
        "When did it happen? (dd.mm.yyyy)",
        StepKind::Date,
        Transition::Go(Target::Next),
    ),
    step(
        "durability",
        "How many hours did it last?",
        StepKind::Clamped { min: 1, max: 24 * 7, all_day: Some(24) },
        Transition::Go(Target::Next),
    ),
    step(
        "intensity",
        "Intensity from 1 to 10:",
        StepKind::Clamped { min: 1, max: 10, all_day: None },
        Transition::Go(Target::Next),
    ),
    step(
        "aura",
        "Was there an aura?",
        StepKind::YesNo,
        Transition::Go(Target::Next),
    ),
    step(
        "provocateurs",
        "Pick the triggers, if any:",
        StepKind::MultiSelect(Catalogue::Triggers),
        Transition::Collect { done: Target::Next },
    ),
    step(
        "symptoms",
        "Were there any of these symptoms?",
        StepKind::MultiSelect(Catalogue::Symptoms),
        Transition::Collect { done: Target::Next },
    ),
    step(
        "was_medicine_taken",
        "Did you take any medicine?",
        StepKind::YesNo,
        Transition::Branch {
            yes: Target::Step("drugname"),
            no: Target::Step("description"),
        },
    ),
    step(
        "description",
        "Any notes?",
        StepKind::Description,
        Transition::Go(Target::Complete),
    ),
    step(
        "drugname",
        "Which medicine?",
        StepKind::DrugName,
        Transition::PickOrSkip {
            pick: Target::Step("amount"),
            skip: Target::Step("description"),
        },
    ),
    step(
        "amount",
        "How much did you take, in mg? (you can type it)",
        StepKind::MedicationAmount,
        Transition::Go(Target::Step("drugname")),
    ),
];

pub const DRUG_USE_STEPS: &[StepDefinition] = &[
    step(
        "date",
        "When did you take it? (dd.mm.yyyy)",
        StepKind::Date,
        Transition::Go(Target::Next),
    ),
    step(
        "drugname",
        "Which medicine?",
        StepKind::DrugName,
        Transition::Go(Target::Next),
    ),
    step(
        "amount",
        "How much, in mg? (you can type it)",
        StepKind::Amount,
        Transition::Go(Target::Complete),
    ),
];

pub const ADD_DRUG_STEPS: &[StepDefinition] = &[
    step(
        "name",
        "Name of the medicine:",
        // Catalogue names come back later as button data.
        StepKind::Text { max_bytes: MAX_CHOICE_BYTES },
        Transition::Go(Target::Next),
    ),
    step(
        "daily_max",
        "Maximum daily dose, in mg?",
        StepKind::Bounded { min: 1, max: 100_000 },
        Transition::Go(Target::Next),
    ),
    step(
        "is_painkiller",
        "Is it a painkiller?",
        StepKind::YesNo,
        Transition::Go(Target::Next),
    ),
    step(
        "is_temp_reducer",
        "Does it reduce fever?",
        StepKind::YesNo,
        Transition::Go(Target::Complete),
    ),
];

pub const PRESSURE_STEPS: &[StepDefinition] = &[
    step(
        "systolic",
        "Systolic pressure (upper value):",
        StepKind::Picker { min: 50, max: 260, tens_from: 80, tens_to: 170, allow_unknown: false },
        Transition::Go(Target::Next),
    ),
    step(
        "diastolic",
        "Diastolic pressure (lower value):",
        StepKind::Picker { min: 30, max: 160, tens_from: 40, tens_to: 110, allow_unknown: false },
        Transition::Go(Target::Next),
    ),
    step(
        "pulse",
        "Your pulse?",
        StepKind::Picker { min: 30, max: 220, tens_from: 40, tens_to: 110, allow_unknown: true },
        Transition::Go(Target::Complete),
    ),
];
