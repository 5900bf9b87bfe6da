//! Read-back of stored entries: one day of the diary, or the user's own
//! medicines. Each listing offers numbered delete choices; picking one
//! deletes the entry and replaces the listing message with a fresh one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::NaiveDate;
use uuid::Uuid;

use crate::db::{DatabaseError, RecordStore};
use crate::models::{Drug, DrugUse, PainCase, Pressure, Record, RecordFilter, RecordKind, UserId};
use crate::transport::{ChatTransport, MessageRef, Prompt};

/// Choice text is this prefix followed by the 1-based entry number.
pub const DELETE_PREFIX: &str = "Delete ";

const DISPLAY_DATE: &str = "%d.%m.%Y";
const DELETED_TEXT: &str = "Deleted.";
const NO_SUCH_ENTRY_TEXT: &str = "There is no entry with that number.";
const LOAD_FAILED_TEXT: &str = "Could not load your entries right now, please try again later.";
const DELETE_FAILED_TEXT: &str = "Could not delete that right now, please try again later.";
const NO_MEDICINES_TEXT: &str = "You have not added any medicines yet. Send /add_drug to add one.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiaryView {
    /// Headaches, stand-alone medicine intakes and pressure readings of a day.
    Day(NaiveDate),
    /// Medicines the user added; the shared catalogue is not listed.
    Medicines,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiaryOutcome {
    Listed { view: DiaryView, entries: usize },
    Deleted { kind: RecordKind, id: Uuid },
    NoSuchEntry,
    Failed,
}

struct Listing {
    view: DiaryView,
    entries: Vec<(RecordKind, Uuid)>,
    prompt: Option<MessageRef>,
}

struct Page {
    text: String,
    entries: Vec<(RecordKind, Uuid)>,
}

/// Per-user listings. Only the latest listing of a user accepts deletes.
pub struct DiaryBrowser {
    records: Arc<dyn RecordStore>,
    transport: Arc<dyn ChatTransport>,
    listings: Mutex<HashMap<UserId, Listing>>,
}

impl DiaryBrowser {
    pub fn new(records: Arc<dyn RecordStore>, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            records,
            transport,
            listings: Mutex::new(HashMap::new()),
        }
    }

    fn listings(&self) -> MutexGuard<'_, HashMap<UserId, Listing>> {
        self.listings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget the user's listing; its delete choices stop working.
    pub fn close(&self, user_id: UserId) {
        self.listings().remove(&user_id);
    }

    pub async fn show(&self, user_id: UserId, view: DiaryView) -> DiaryOutcome {
        self.publish(user_id, view, None).await
    }

    /// Handle a delete choice. `None` when `text` is not one, or the user
    /// has no open listing.
    pub async fn handle_reply(&self, user_id: UserId, text: &str) -> Option<DiaryOutcome> {
        let number = parse_delete_choice(text)?;
        let (view, target) = {
            let listings = self.listings();
            let listing = listings.get(&user_id)?;
            let target = number
                .checked_sub(1)
                .and_then(|i| listing.entries.get(i))
                .copied();
            (listing.view, target)
        };

        let Some((kind, id)) = target else {
            self.say(user_id, NO_SUCH_ENTRY_TEXT).await;
            return Some(DiaryOutcome::NoSuchEntry);
        };
        match self.records.delete_record(kind, &id) {
            // Already gone, e.g. deleted from an older listing.
            Ok(()) | Err(DatabaseError::NotFound { .. }) => {}
            Err(e) => {
                tracing::error!(user_id, kind = %kind, id = %id, error = %e, "Failed to delete entry");
                self.say(user_id, DELETE_FAILED_TEXT).await;
                return Some(DiaryOutcome::Failed);
            }
        }
        tracing::info!(user_id, kind = %kind, id = %id, "Entry deleted");
        self.publish(user_id, view, Some(DELETED_TEXT)).await;
        Some(DiaryOutcome::Deleted { kind, id })
    }

    // ═══════════════════════════════════════════
    // Listing
    // ═══════════════════════════════════════════

    async fn publish(&self, user_id: UserId, view: DiaryView, notice: Option<&str>) -> DiaryOutcome {
        let page = match self.load(user_id, view) {
            Ok(page) => page,
            Err(e) => {
                tracing::error!(user_id, view = ?view, error = %e, "Failed to load entries");
                self.say(user_id, LOAD_FAILED_TEXT).await;
                return DiaryOutcome::Failed;
            }
        };

        let previous = self.listings().remove(&user_id).and_then(|l| l.prompt);
        if let Some(message) = previous {
            if let Err(e) = self.transport.delete_message(message).await {
                tracing::debug!(user_id, error = %e, "Failed to remove old listing");
            }
        }

        let text = match notice {
            Some(notice) => format!("{notice}\n\n{}", page.text),
            None => page.text,
        };
        let choices = (1..=page.entries.len())
            .map(|n| format!("{DELETE_PREFIX}{n}"))
            .collect();
        let prompt = match self.transport.send_prompt(user_id, &Prompt::new(text, choices)).await {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to send listing");
                None
            }
        };

        let entries = page.entries.len();
        self.listings().insert(
            user_id,
            Listing {
                view,
                entries: page.entries,
                prompt,
            },
        );
        DiaryOutcome::Listed { view, entries }
    }

    fn load(&self, user_id: UserId, view: DiaryView) -> Result<Page, DatabaseError> {
        match view {
            DiaryView::Day(date) => self.load_day(user_id, date),
            DiaryView::Medicines => self.load_medicines(user_id),
        }
    }

    fn load_day(&self, user_id: UserId, date: NaiveDate) -> Result<Page, DatabaseError> {
        let filter = RecordFilter::On { date };
        let fetch = |kind| self.records.get_records_for_owner(user_id, kind, &filter);

        let pains: Vec<PainCase> = fetch(RecordKind::PainCase)?
            .into_iter()
            .filter_map(|r| match r {
                Record::PainCase(p) => Some(p),
                _ => None,
            })
            .collect();
        let uses: Vec<DrugUse> = fetch(RecordKind::DrugUse)?
            .into_iter()
            .filter_map(|r| match r {
                Record::DrugUse(u) => Some(u),
                _ => None,
            })
            .collect();
        let pressures: Vec<Pressure> = fetch(RecordKind::Pressure)?
            .into_iter()
            .filter_map(|r| match r {
                Record::Pressure(p) => Some(p),
                _ => None,
            })
            .collect();

        let day = date.format(DISPLAY_DATE);
        let mut lines = Vec::new();
        let mut entries = Vec::new();
        for pain in &pains {
            let taken: Vec<&DrugUse> = uses
                .iter()
                .filter(|u| u.pain_case_id == Some(pain.id))
                .collect();
            lines.push(describe_pain(pain, &taken));
            entries.push((RecordKind::PainCase, pain.id));
        }
        // Intakes belonging to a headache go with it.
        for intake in uses.iter().filter(|u| u.pain_case_id.is_none()) {
            lines.push(format!("Medicine: {} {}", intake.amount, intake.drug_name));
            entries.push((RecordKind::DrugUse, intake.id));
        }
        for reading in &pressures {
            lines.push(describe_pressure(reading));
            entries.push((RecordKind::Pressure, reading.id));
        }

        let text = if lines.is_empty() {
            format!("No entries on {day}.")
        } else {
            numbered(&format!("Entries for {day}:"), &lines)
        };
        Ok(Page { text, entries })
    }

    fn load_medicines(&self, user_id: UserId) -> Result<Page, DatabaseError> {
        let own: Vec<Drug> = self
            .records
            .get_records_for_owner(user_id, RecordKind::Drug, &RecordFilter::All)?
            .into_iter()
            .filter_map(|r| match r {
                Record::Drug(d) if d.owner_id == user_id => Some(d),
                _ => None,
            })
            .collect();
        if own.is_empty() {
            return Ok(Page {
                text: NO_MEDICINES_TEXT.to_string(),
                entries: Vec::new(),
            });
        }

        let lines: Vec<String> = own
            .iter()
            .map(|d| format!("{} (up to {} mg a day)", d.name, d.daily_max_mg))
            .collect();
        Ok(Page {
            text: numbered("Your medicines:", &lines),
            entries: own.iter().map(|d| (RecordKind::Drug, d.id)).collect(),
        })
    }

    async fn say(&self, user_id: UserId, text: &str) {
        if let Err(e) = self.transport.send_prompt(user_id, &Prompt::text(text)).await {
            tracing::warn!(user_id, error = %e, "Failed to send message");
        }
    }
}

/// `"Delete 3"` -> 3, case-insensitive.
pub fn parse_delete_choice(text: &str) -> Option<usize> {
    let text = text.trim();
    let head = text.get(..DELETE_PREFIX.len())?;
    if !head.eq_ignore_ascii_case(DELETE_PREFIX) {
        return None;
    }
    text[DELETE_PREFIX.len()..].trim().parse().ok()
}

fn numbered(title: &str, lines: &[String]) -> String {
    let mut text = title.to_string();
    for (i, line) in lines.iter().enumerate() {
        text.push_str(&format!("\n{}. {line}", i + 1));
    }
    text
}

fn describe_pain(pain: &PainCase, taken: &[&DrugUse]) -> String {
    let medicine = match taken {
        [] => "no medicine".to_string(),
        [one] => format!("+ {}", one.drug_name),
        many => format!("{} medicines taken", many.len()),
    };
    format!(
        "Headache: {} h | {} of 10 | {medicine}",
        pain.durability_hours, pain.intensity
    )
}

fn describe_pressure(reading: &Pressure) -> String {
    let mut line = format!(
        "Pressure: {}/{} at {}",
        reading.systolic,
        reading.diastolic,
        reading.measured_at.format("%H:%M")
    );
    if let Some(pulse) = reading.pulse {
        line.push_str(&format!(", pulse {pulse}"));
    }
    line
}
