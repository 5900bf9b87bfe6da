//! Update dispatcher and long-polling loop.
//!
//! Updates are handled one at a time, in arrival order. Commands are
//! recognised here; everything else is a reply routed to the engine with
//! the state of the user's live session attached.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Timelike;

use crate::core_state::CoreState;
use crate::db::{set_notification_schedule, upsert_user, DatabaseError};
use crate::diary::{DiaryBrowser, DiaryOutcome, DiaryView};
use crate::forms::{is_cancel, parse_date, FormId, Inbound, Outcome};
use crate::models::{NewUser, UserId, NOTIFY_DISABLED};
use crate::transport::{IncomingUpdate, Prompt, TelegramClient};

/// Long-poll window for `getUpdates`.
const POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Back-off after a failed poll.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

const DEFAULT_LANGUAGE: &str = "en";

const WELCOME_TEXT: &str = "Hi! I keep a diary of your headaches, medicines and blood pressure.";

const HELP_TEXT: &str = "/pain - report a headache\n\
/druguse - report a medicine taken\n\
/pressure - report blood pressure\n\
/add_drug - add a medicine to your list\n\
/drugs - list or delete your medicines\n\
/calendar [date] - list or delete the entries of a day\n\
/notify <days> [hour] - remind me every <days> days at <hour> UTC\n\
/notify off - stop reminders\n\
/cancel - leave the current form";

const HINT_TEXT: &str = "I did not understand that. Send /help to see what I can do.";

const NOTIFY_USAGE_TEXT: &str = "Usage: /notify <days> [hour 0-23] or /notify off";

const CALENDAR_USAGE_TEXT: &str = "Usage: /calendar [today | yesterday | dd.mm.yyyy]";

const NOTIFY_OFF_TEXT: &str = "Reminders are off.";

const STORAGE_ERROR_TEXT: &str = "Could not save that right now, please try again later.";

/// A recognised slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Form(FormId),
    Cancel,
    Notify(NotifyRequest),
    /// Day view; the raw date argument, if any.
    Calendar(Option<String>),
    Medicines,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyRequest {
    Off,
    Every { days: i32, hour_utc: Option<u32> },
    Invalid,
}

/// Parse `text` as a command. `None` means it is not one.
///
/// A `@botname` suffix on the command word is ignored.
pub fn parse_command(text: &str) -> Option<Command> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;
    let mut words = rest.split_whitespace();
    let word = words.next()?;
    let name = word.split('@').next().unwrap_or(word).to_lowercase();

    let command = match name.as_str() {
        "start" => Command::Start,
        "help" => Command::Help,
        "cancel" => Command::Cancel,
        "notify" => Command::Notify(parse_notify(words.collect())),
        "calendar" => {
            let arg = words.collect::<Vec<_>>().join(" ");
            Command::Calendar((!arg.is_empty()).then_some(arg))
        }
        "drugs" | "medications" => Command::Medicines,
        other => Command::Form(FormId::from_command(other)?),
    };
    Some(command)
}

fn parse_notify(args: Vec<&str>) -> NotifyRequest {
    match args.as_slice() {
        [off] if off.eq_ignore_ascii_case("off") => NotifyRequest::Off,
        [days] => match days.parse::<i32>() {
            Ok(days) if days > 0 => NotifyRequest::Every { days, hour_utc: None },
            _ => NotifyRequest::Invalid,
        },
        [days, hour] => match (days.parse::<i32>(), hour.parse::<u32>()) {
            (Ok(days), Ok(hour)) if days > 0 && hour <= 23 => NotifyRequest::Every {
                days,
                hour_utc: Some(hour),
            },
            _ => NotifyRequest::Invalid,
        },
        _ => NotifyRequest::Invalid,
    }
}

/// What the dispatcher did with an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    Welcomed,
    Helped,
    NotifyUpdated,
    Engine(Outcome),
    Diary(DiaryOutcome),
    Hinted,
    Failed,
}

pub struct Dispatcher {
    core: Arc<CoreState>,
    diary: DiaryBrowser,
}

impl Dispatcher {
    pub fn new(core: Arc<CoreState>) -> Self {
        let diary = DiaryBrowser::new(core.records.clone(), core.transport.clone());
        Self { core, diary }
    }

    pub async fn handle_update(&self, update: &IncomingUpdate) -> Handled {
        let user_id = update.user_id;
        let Some(command) = parse_command(&update.text) else {
            return self.route_reply(update).await;
        };
        tracing::debug!(user_id, command = ?command, "Command received");

        if matches!(command, Command::Cancel) {
            self.diary.close(user_id);
            return Handled::Engine(self.core.engine.cancel(user_id).await);
        }
        if let Err(e) = self.register(update) {
            tracing::error!(user_id, error = %e, "Failed to register user");
            self.say(user_id, STORAGE_ERROR_TEXT).await;
            return Handled::Failed;
        }

        match command {
            Command::Start => {
                self.say(user_id, &format!("{WELCOME_TEXT}\n\n{HELP_TEXT}")).await;
                Handled::Welcomed
            }
            Command::Help => {
                self.say(user_id, HELP_TEXT).await;
                Handled::Helped
            }
            Command::Form(form) => {
                self.diary.close(user_id);
                Handled::Engine(self.core.engine.start_form(user_id, form).await)
            }
            Command::Notify(request) => self.update_notifications(user_id, request).await,
            Command::Cancel => Handled::Engine(self.core.engine.cancel(user_id).await),
            Command::Calendar(arg) => {
                let today = chrono::Local::now().date_naive();
                let date = match arg {
                    None => Some(today),
                    Some(arg) => parse_date(&arg, today),
                };
                let Some(date) = date else {
                    self.say(user_id, CALENDAR_USAGE_TEXT).await;
                    return Handled::Helped;
                };
                self.browse(user_id, DiaryView::Day(date)).await
            }
            Command::Medicines => self.browse(user_id, DiaryView::Medicines).await,
        }
    }

    /// Listings replace any running form.
    async fn browse(&self, user_id: UserId, view: DiaryView) -> Handled {
        self.core.engine.cancel(user_id).await;
        Handled::Diary(self.diary.show(user_id, view).await)
    }

    async fn route_reply(&self, update: &IncomingUpdate) -> Handled {
        let user_id = update.user_id;
        if self.core.engine.declared_state(user_id).is_none() {
            if let Some(outcome) = self.diary.handle_reply(user_id, &update.text).await {
                return Handled::Diary(outcome);
            }
        }
        let outcome = self
            .core
            .engine
            .handle_reply(Inbound {
                user_id,
                declared_state: self.core.engine.declared_state(user_id),
                text: update.text.clone(),
            })
            .await;
        if outcome == Outcome::Ignored && !is_cancel(&update.text) {
            self.say(user_id, HINT_TEXT).await;
            return Handled::Hinted;
        }
        Handled::Engine(outcome)
    }

    fn register(&self, update: &IncomingUpdate) -> Result<(), DatabaseError> {
        let user = NewUser {
            telegram_id: update.user_id,
            first_name: update.first_name.clone(),
            user_name: update.user_name.clone(),
            language: update
                .language
                .clone()
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
        };
        self.core.with_conn(|conn| upsert_user(conn, &user).map(|_| ()))
    }

    async fn update_notifications(&self, user_id: UserId, request: NotifyRequest) -> Handled {
        let (every_days, hour_utc, reply) = match request {
            NotifyRequest::Invalid => {
                self.say(user_id, NOTIFY_USAGE_TEXT).await;
                return Handled::Helped;
            }
            NotifyRequest::Off => (NOTIFY_DISABLED, None, NOTIFY_OFF_TEXT.to_string()),
            NotifyRequest::Every { days, hour_utc } => {
                let hour = hour_utc.unwrap_or_else(|| chrono::Utc::now().hour());
                (
                    days,
                    Some(hour),
                    format!("I will ask you every {days} day(s) at {hour}:00 UTC."),
                )
            }
        };

        let result = self
            .core
            .with_conn(|conn| set_notification_schedule(conn, user_id, every_days, hour_utc));
        match result {
            Ok(()) => {
                tracing::info!(user_id, every_days, hour_utc = ?hour_utc, "Notification schedule updated");
                self.say(user_id, &reply).await;
                Handled::NotifyUpdated
            }
            Err(e) => {
                tracing::error!(user_id, error = %e, "Failed to update notification schedule");
                self.say(user_id, STORAGE_ERROR_TEXT).await;
                Handled::Failed
            }
        }
    }

    async fn say(&self, user_id: UserId, text: &str) {
        if let Err(e) = self.core.transport.send_prompt(user_id, &Prompt::text(text)).await {
            tracing::warn!(user_id, error = %e, "Failed to send message");
        }
    }

    /// Poll for updates until `shutdown` resolves.
    pub async fn run_polling(&self, client: &TelegramClient, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let mut offset: Option<i64> = None;
        tracing::info!("Polling for updates");

        loop {
            let batch = tokio::select! {
                batch = client.get_updates(offset, POLL_TIMEOUT) => batch,
                _ = &mut shutdown => break,
            };
            let batch = match batch {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::warn!(error = %e, "Polling failed, retrying");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            for update in &batch.updates {
                if let Some(callback_id) = &update.callback_id {
                    if let Err(e) = client.answer_callback(callback_id).await {
                        tracing::debug!(error = %e, "Failed to acknowledge button press");
                    }
                }
                self.handle_update(update).await;
            }
            if let Some(last) = batch.last_update_id {
                offset = Some(last + 1);
            }
        }
        tracing::info!("Polling stopped");
    }
}
