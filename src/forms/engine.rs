//! The conversation state machine.
//!
//! Every reply is checked against the user's stored state before it is
//! applied. Validation failures re-prompt the same step, persistence
//! failures keep the session so the user can retry, and registry defects
//! force the form closed. Cancel is always processed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use uuid::Uuid;

use super::{
    interpret, is_cancel, render_refined, render_rejection, render_step, Answer,
    ConversationSession, FormId, Interpretation, RegistryError, SessionError, StateRegistry,
    StepKind, StepRef, Target, Transition,
};
use crate::db::{DatabaseError, RecordStore};
use crate::models::{Record, RecordFilter, RecordKind, UserId};
use crate::states::{StateError, UserStateStore};
use crate::transport::{ChatTransport, MessageRef, Prompt, TransportError};

const SAVED_TEXT: &str = "Saved!";
const CANCELLED_TEXT: &str = "Cancelled.";
const RETRY_TEXT: &str = "Could not save right now, please try again in a moment.";
const EXPIRED_TEXT: &str = "The form was closed after a period of inactivity. Start it again any time.";
const LOST_TEXT: &str = "This form is no longer active. Please start it again.";
const DEFECT_TEXT: &str = "Something went wrong and the form was cancelled. Please start again.";
const NOT_HERE_TEXT: &str = "Please answer the question.";
const ALREADY_LISTED_TEXT: &str = "That medicine is already on the list.";

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Registry defect: {0}")]
    Registry(#[from] RegistryError),

    #[error("Session defect: {0}")]
    Session(#[from] SessionError),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] DatabaseError),

    #[error("State store failed: {0}")]
    State(#[from] StateError),
}

/// A user reply, tagged with the state the conversation believes it is in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub user_id: UserId,
    pub declared_state: Option<String>,
    pub text: String,
}

/// What a call into the engine did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Started { state_key: String },
    Advanced { state_key: String },
    /// Same step again after an accepted pick.
    Repeated { state_key: String },
    /// Picker narrowed in place; no state change.
    Refined { state_key: String },
    Rejected { state_key: String },
    Completed { form: FormId, record_id: Uuid },
    Cancelled,
    /// Stale or orphaned reply, dropped.
    Discarded,
    /// Nothing to act on.
    Ignored,
    /// Storage failed; the session is kept for a retry.
    Retry { state_key: String },
    /// Internal defect; the form was force-cancelled.
    Aborted,
}

enum Destination {
    Stay,
    Go(Target),
}

pub struct ConversationEngine {
    registry: Arc<StateRegistry>,
    states: Arc<UserStateStore>,
    records: Arc<dyn RecordStore>,
    transport: Arc<dyn ChatTransport>,
    sessions: Mutex<HashMap<UserId, ConversationSession>>,
}

impl ConversationEngine {
    pub fn new(
        registry: Arc<StateRegistry>,
        states: Arc<UserStateStore>,
        records: Arc<dyn RecordStore>,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        Self {
            registry,
            states,
            records,
            transport,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &StateRegistry {
        &self.registry
    }

    pub fn states(&self) -> &UserStateStore {
        &self.states
    }

    /// State key of the user's live session, if any.
    pub fn declared_state(&self, user_id: UserId) -> Option<String> {
        self.sessions().get(&user_id).map(|s| s.state_key())
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions().len()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<UserId, ConversationSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_session(&self, user_id: UserId) -> Option<ConversationSession> {
        self.sessions().remove(&user_id)
    }

    /// Park `session` again, unless its state was cleared while it was out
    /// (the reaper or a cancel got there first). The map stays locked across
    /// the check so a concurrent `expire` removes whatever is parked here.
    fn put_session(&self, session: ConversationSession) -> bool {
        let mut sessions = self.sessions();
        let user_id = session.user_id;
        let state_key = session.state_key();
        match self.states.current(user_id) {
            Ok(current) if current.as_deref() != Some(state_key.as_str()) => {
                tracing::info!(user_id, state_key = %state_key, "Session closed while in flight");
                false
            }
            Ok(_) => {
                sessions.insert(user_id, session);
                true
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to confirm user state, keeping session");
                sessions.insert(user_id, session);
                true
            }
        }
    }

    // ═══════════════════════════════════════════
    // Entry points
    // ═══════════════════════════════════════════

    /// Open `form` at its entry step, replacing any form the user is in.
    pub async fn start_form(&self, user_id: UserId, form: FormId) -> Outcome {
        let Some(step) = self.registry.entry_step(form) else {
            tracing::error!(user_id, form = %form, "Form has no entry step");
            return Outcome::Aborted;
        };
        let state_key = step.state_key();
        if let Err(e) = self.states.enter(user_id, &state_key) {
            tracing::error!(user_id, state_key = %state_key, error = %e, "Failed to enter form");
            self.notify(user_id, RETRY_TEXT).await;
            return Outcome::Retry { state_key };
        }
        self.take_session(user_id);

        let mut session = ConversationSession::new(user_id, step);
        let prompt = self.render(step, &session, false);
        session.prompt = self.send(user_id, &prompt).await;
        self.put_session(session);
        tracing::info!(user_id, form = %form, "Form started");
        Outcome::Started { state_key }
    }

    pub async fn handle_reply(&self, inbound: Inbound) -> Outcome {
        let user_id = inbound.user_id;
        if is_cancel(&inbound.text) {
            return self.cancel(user_id).await;
        }
        let Some(declared) = inbound.declared_state else {
            return Outcome::Ignored;
        };

        let current = match self.states.current(user_id) {
            Ok(current) => current,
            Err(e) => {
                tracing::error!(user_id, error = %e, "Failed to read user state");
                self.notify(user_id, RETRY_TEXT).await;
                return Outcome::Retry { state_key: declared };
            }
        };
        if current.is_none() && self.take_session(user_id).is_some() {
            tracing::info!(user_id, declared = %declared, "Orphaned session dropped");
            self.notify(user_id, LOST_TEXT).await;
            return Outcome::Discarded;
        }
        if current.as_deref() != Some(declared.as_str()) {
            tracing::debug!(
                user_id,
                declared = %declared,
                current = ?current,
                "Stale reply discarded"
            );
            return Outcome::Discarded;
        }

        let step = match self.registry.resolve(&declared) {
            Ok(step) => step,
            Err(e) => {
                tracing::error!(user_id, error = %e, "Reply for unregistered state");
                self.force_cancel(user_id).await;
                return Outcome::Aborted;
            }
        };

        let Some(session) = self.take_session(user_id) else {
            // The store outlived the session, e.g. across a restart.
            if let Err(e) = self.states.leave_if(user_id, &declared) {
                tracing::warn!(user_id, error = %e, "Failed to clear orphaned state");
            }
            self.notify(user_id, LOST_TEXT).await;
            return Outcome::Discarded;
        };
        if session.step != step {
            self.put_session(session);
            return Outcome::Discarded;
        }

        match self.apply(session, step, &inbound.text).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(user_id, state_key = %declared, error = %e, "Form defect");
                self.force_cancel(user_id).await;
                Outcome::Aborted
            }
        }
    }

    /// Leave any form. Silent no-op when the user has nothing to cancel.
    pub async fn cancel(&self, user_id: UserId) -> Outcome {
        let had_session = self.take_session(user_id).is_some();
        let had_state = match self.states.leave(user_id) {
            Ok(removed) => removed.is_some(),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to clear state on cancel");
                false
            }
        };
        if !had_session && !had_state {
            return Outcome::Ignored;
        }
        self.notify(user_id, CANCELLED_TEXT).await;
        tracing::info!(user_id, "Form cancelled");
        Outcome::Cancelled
    }

    /// Close an idle form if the user is still in `state_key`.
    pub async fn expire(&self, user_id: UserId, state_key: &str) -> Result<bool, EngineError> {
        if !self.states.leave_if(user_id, state_key)? {
            return Ok(false);
        }
        self.take_session(user_id);
        self.notify(user_id, EXPIRED_TEXT).await;
        tracing::info!(user_id, state_key, "Idle form expired");
        Ok(true)
    }

    async fn force_cancel(&self, user_id: UserId) {
        self.take_session(user_id);
        if let Err(e) = self.states.leave(user_id) {
            tracing::error!(user_id, error = %e, "Failed to clear state after defect");
        }
        self.notify(user_id, DEFECT_TEXT).await;
    }

    // ═══════════════════════════════════════════
    // Transitions
    // ═══════════════════════════════════════════

    async fn apply(
        &self,
        mut session: ConversationSession,
        step: StepRef,
        text: &str,
    ) -> Result<Outcome, EngineError> {
        let user_id = session.user_id;
        let definition = step.definition();
        let today = chrono::Local::now().date_naive();

        let mut updated = session.clone();
        let destination = match interpret(&definition.kind, text, today) {
            Interpretation::Invalid(reason) => {
                return Ok(self.reject(session, step, reason).await);
            }
            Interpretation::Refine(base) => {
                let prompt = render_refined(step, base);
                let existing = session.prompt;
                match existing {
                    Some(message) => self.edit(message, &prompt).await,
                    None => session.prompt = self.send(user_id, &prompt).await,
                }
                self.put_session(session);
                return Ok(Outcome::Refined {
                    state_key: step.state_key(),
                });
            }
            Interpretation::AddMore => Destination::Stay,
            Interpretation::Done => match definition.transition {
                Transition::Collect { done } => Destination::Go(done),
                Transition::PickOrSkip { skip, .. } => Destination::Go(skip),
                _ => return Ok(self.reject(session, step, NOT_HERE_TEXT).await),
            },
            Interpretation::Value(answer) => {
                let flag = if let Answer::Flag(b) = &answer {
                    Some(*b)
                } else {
                    None
                };
                match (definition.kind, answer) {
                    (StepKind::MultiSelect(_), Answer::Text(pick)) => {
                        updated.push_choice(definition.name, pick);
                    }
                    (StepKind::DrugName, Answer::Text(name))
                        if session
                            .chosen(definition)
                            .iter()
                            .any(|c| c.to_lowercase() == name.to_lowercase()) =>
                    {
                        return Ok(self.reject(session, step, ALREADY_LISTED_TEXT).await);
                    }
                    (StepKind::MedicationAmount, Answer::Text(amount)) => {
                        updated.push_medication("drugname", amount)?;
                    }
                    (_, answer) => {
                        updated.answers.insert(definition.name, answer);
                    }
                }
                match definition.transition {
                    Transition::Go(target) => Destination::Go(target),
                    Transition::Branch { yes, no } => match flag {
                        Some(true) => Destination::Go(yes),
                        Some(false) => Destination::Go(no),
                        None => return Ok(self.reject(session, step, NOT_HERE_TEXT).await),
                    },
                    Transition::Collect { .. } => Destination::Stay,
                    Transition::PickOrSkip { pick, .. } => Destination::Go(pick),
                }
            }
        };

        let next = match destination {
            Destination::Stay => Some(step),
            Destination::Go(target) => step.follow(target)?,
        };
        match next {
            Some(next) => Ok(self.move_to(session, updated, step, next).await),
            None => Ok(self.complete(session, updated).await),
        }
    }

    async fn move_to(
        &self,
        original: ConversationSession,
        mut updated: ConversationSession,
        from: StepRef,
        to: StepRef,
    ) -> Outcome {
        let user_id = updated.user_id;
        let state_key = to.state_key();
        if let Err(e) = self.states.enter(user_id, &state_key) {
            tracing::error!(user_id, state_key = %state_key, error = %e, "Failed to record transition");
            self.put_session(original);
            self.notify(user_id, RETRY_TEXT).await;
            return Outcome::Retry {
                state_key: from.state_key(),
            };
        }

        let repeat = from == to;
        updated.step = to;
        let prompt = self.render(to, &updated, repeat);
        updated.prompt = self.send(user_id, &prompt).await;
        self.put_session(updated);
        tracing::debug!(user_id, state_key = %state_key, "Step transition");
        if repeat {
            Outcome::Repeated { state_key }
        } else {
            Outcome::Advanced { state_key }
        }
    }

    async fn complete(
        &self,
        original: ConversationSession,
        updated: ConversationSession,
    ) -> Outcome {
        let user_id = updated.user_id;
        let form = updated.form();
        let record = match updated.to_record(chrono::Local::now().naive_local()) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(user_id, form = %form, error = %e, "Incomplete form reached its end");
                self.force_cancel(user_id).await;
                return Outcome::Aborted;
            }
        };

        match self.records.create_record(record) {
            Ok(record_id) => {
                if let Err(e) = self.states.leave(user_id) {
                    tracing::warn!(user_id, error = %e, "Failed to clear state after completion");
                }
                self.notify(user_id, SAVED_TEXT).await;
                tracing::info!(user_id, form = %form, record_id = %record_id, "Form completed");
                Outcome::Completed { form, record_id }
            }
            Err(e) => {
                tracing::error!(user_id, form = %form, error = %e, "Failed to persist form");
                let step = original.step;
                let prompt = render_rejection(RETRY_TEXT, self.render(step, &original, false));
                self.put_session(original);
                self.send(user_id, &prompt).await;
                Outcome::Retry {
                    state_key: step.state_key(),
                }
            }
        }
    }

    async fn reject(
        &self,
        mut session: ConversationSession,
        step: StepRef,
        reason: &str,
    ) -> Outcome {
        let prompt = render_rejection(reason, self.render(step, &session, false));
        session.prompt = self.send(session.user_id, &prompt).await;
        self.put_session(session);
        Outcome::Rejected {
            state_key: step.state_key(),
        }
    }

    // ═══════════════════════════════════════════
    // Rendering and transport
    // ═══════════════════════════════════════════

    fn render(&self, step: StepRef, session: &ConversationSession, repeat: bool) -> Prompt {
        let drugs = if matches!(step.definition().kind, StepKind::DrugName) {
            self.drug_names(session.user_id)
        } else {
            Vec::new()
        };
        render_step(step, session, &drugs, chrono::Local::now().date_naive(), repeat)
    }

    fn drug_names(&self, user_id: UserId) -> Vec<String> {
        match self
            .records
            .get_records_for_owner(user_id, RecordKind::Drug, &RecordFilter::All)
        {
            Ok(records) => records
                .into_iter()
                .filter_map(|r| match r {
                    Record::Drug(d) => Some(d.name),
                    _ => None,
                })
                .collect(),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to load drug catalogue");
                Vec::new()
            }
        }
    }

    async fn send(&self, user_id: UserId, prompt: &Prompt) -> Option<MessageRef> {
        match self.transport.send_prompt(user_id, prompt).await {
            Ok(message) => Some(message),
            Err(TransportError::Blocked(_)) => {
                tracing::info!(user_id, "User blocked the bot");
                None
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to send prompt");
                None
            }
        }
    }

    async fn edit(&self, message: MessageRef, prompt: &Prompt) {
        if let Err(e) = self.transport.edit_prompt(message, prompt).await {
            tracing::warn!(message_id = message.message_id, error = %e, "Failed to edit prompt");
        }
    }

    async fn notify(&self, user_id: UserId, text: &str) {
        self.send(user_id, &Prompt::text(text)).await;
    }
}
