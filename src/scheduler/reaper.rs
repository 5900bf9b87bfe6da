use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::config::IdleTimeouts;
use crate::forms::ConversationEngine;

/// Force-expires forms whose user went quiet for longer than the form's
/// idle window.
pub struct IdleReaper {
    engine: Arc<ConversationEngine>,
    timeouts: IdleTimeouts,
}

impl IdleReaper {
    pub fn new(engine: Arc<ConversationEngine>, timeouts: IdleTimeouts) -> Self {
        Self { engine, timeouts }
    }

    /// One pass over the state store at `now` (UTC). Returns how many forms
    /// were expired. Errors skip the entry, or the whole pass when the store
    /// cannot be read.
    pub async fn sweep(&self, now: NaiveDateTime) -> usize {
        let entries = match self.engine.states().entries() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "Reaper could not read state entries");
                return 0;
            }
        };

        let mut expired = 0;
        for entry in entries {
            let window = match self.engine.registry().resolve(&entry.state_key) {
                Ok(step) => self.timeouts.for_form(step.form()),
                Err(_) => self.timeouts.fallback(),
            };
            let idle = match (now - entry.entered_at).to_std() {
                Ok(idle) => idle,
                // Entered after `now`, clock skew between writer and sweep.
                Err(_) => continue,
            };
            if idle < window {
                continue;
            }
            match self.engine.expire(entry.user_id, &entry.state_key).await {
                Ok(true) => expired += 1,
                Ok(false) => {
                    tracing::debug!(user_id = entry.user_id, "User moved on before expiry");
                }
                Err(e) => {
                    tracing::warn!(
                        user_id = entry.user_id,
                        state_key = %entry.state_key,
                        error = %e,
                        "Reaper failed to expire form"
                    );
                }
            }
        }
        if expired > 0 {
            tracing::info!(expired, "Idle forms expired");
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use rusqlite::Connection;

    use crate::db::{
        get_drug_uses_for_owner, get_pain_cases_for_owner, open_memory_database, SqliteRecordStore,
    };
    use crate::forms::{FormId, Inbound, Outcome, StateRegistry};
    use crate::models::{NewUser, RecordFilter};
    use crate::db::DatabaseError;
    use crate::states::{SqliteStateBackend, StateBackend, StateEntry, StateError, UserStateStore};
    use crate::transport::testing::RecordingTransport;

    const USER: i64 = 777;

    struct Fixture {
        engine: Arc<ConversationEngine>,
        conn: Arc<Mutex<Connection>>,
        transport: Arc<RecordingTransport>,
    }

    /// SQLite backend that can be told to fail reads of entries and removals.
    struct FlakyBackend {
        inner: SqliteStateBackend,
        entries_fail: AtomicBool,
        clear_fails: AtomicBool,
    }

    impl FlakyBackend {
        fn outage() -> StateError {
            StateError::Storage(DatabaseError::LockPoisoned)
        }
    }

    impl StateBackend for FlakyBackend {
        fn replace_user_state(
            &self,
            user_id: i64,
            state_key: &str,
            at: NaiveDateTime,
        ) -> Result<Option<String>, StateError> {
            self.inner.replace_user_state(user_id, state_key, at)
        }

        fn clear_user_state(
            &self,
            user_id: i64,
            expected: Option<&str>,
        ) -> Result<Option<String>, StateError> {
            if self.clear_fails.load(Ordering::SeqCst) {
                return Err(Self::outage());
            }
            self.inner.clear_user_state(user_id, expected)
        }

        fn user_state(&self, user_id: i64) -> Result<Option<String>, StateError> {
            self.inner.user_state(user_id)
        }

        fn members(&self, state_key: &str) -> Result<Vec<i64>, StateError> {
            self.inner.members(state_key)
        }

        fn ensure_states(&self, state_keys: &[String]) -> Result<(), StateError> {
            self.inner.ensure_states(state_keys)
        }

        fn state_keys(&self) -> Result<Vec<String>, StateError> {
            self.inner.state_keys()
        }

        fn entries(&self) -> Result<Vec<StateEntry>, StateError> {
            if self.entries_fail.load(Ordering::SeqCst) {
                return Err(Self::outage());
            }
            self.inner.entries()
        }

        fn read_counter(&self) -> Result<Option<i64>, StateError> {
            self.inner.read_counter()
        }

        fn write_counter(&self, value: i64) -> Result<(), StateError> {
            self.inner.write_counter(value)
        }
    }

    fn fixture() -> Fixture {
        fixture_on(|conn| Arc::new(SqliteStateBackend::new(conn)) as Arc<dyn StateBackend>)
    }

    fn fixture_on(
        backend: impl FnOnce(Arc<Mutex<Connection>>) -> Arc<dyn StateBackend>,
    ) -> Fixture {
        let conn = Arc::new(Mutex::new(open_memory_database().unwrap()));
        crate::db::upsert_user(
            &conn.lock().unwrap(),
            &NewUser {
                telegram_id: USER,
                first_name: None,
                user_name: None,
                language: "en".into(),
            },
        )
        .unwrap();
        let registry = Arc::new(StateRegistry::build().unwrap());
        let states = Arc::new(UserStateStore::new(backend(conn.clone())));
        states.reseed(registry.all_state_keys()).unwrap();
        let transport = Arc::new(RecordingTransport::new());
        let engine = Arc::new(ConversationEngine::new(
            registry,
            states,
            Arc::new(SqliteRecordStore::new(conn.clone())),
            transport.clone(),
        ));
        Fixture {
            engine,
            conn,
            transport,
        }
    }

    fn later(minutes: i64) -> NaiveDateTime {
        chrono::Utc::now().naive_utc() + chrono::Duration::minutes(minutes)
    }

    fn reaper(engine: &Arc<ConversationEngine>) -> IdleReaper {
        IdleReaper::new(engine.clone(), IdleTimeouts::new(Duration::from_secs(600)))
    }

    #[tokio::test]
    async fn abandoned_form_expires_without_partial_record() {
        let fx = fixture();
        fx.engine.start_form(USER, FormId::PainCase).await;
        let declared = fx.engine.declared_state(USER);
        fx.engine
            .handle_reply(Inbound {
                user_id: USER,
                declared_state: declared,
                text: "today".into(),
            })
            .await;
        assert!(fx.engine.states().current(USER).unwrap().is_some());

        let expired = reaper(&fx.engine).sweep(later(11)).await;

        assert_eq!(expired, 1);
        assert_eq!(fx.engine.states().current(USER).unwrap(), None);
        assert_eq!(fx.engine.declared_state(USER), None);
        let conn = fx.conn.lock().unwrap();
        let today = chrono::Local::now().date_naive();
        assert!(get_pain_cases_for_owner(&conn, USER, &RecordFilter::All, today)
            .unwrap()
            .is_empty());
        assert!(get_drug_uses_for_owner(&conn, USER, &RecordFilter::All, today)
            .unwrap()
            .is_empty());
        let last = fx.transport.last_prompt().unwrap();
        assert!(last.text.contains("inactivity"));
    }

    #[tokio::test]
    async fn active_form_survives_sweep() {
        let fx = fixture();
        fx.engine.start_form(USER, FormId::Pressure).await;

        assert_eq!(reaper(&fx.engine).sweep(later(5)).await, 0);
        assert!(fx.engine.states().current(USER).unwrap().is_some());
        assert!(fx.engine.declared_state(USER).is_some());
    }

    #[tokio::test]
    async fn per_form_window_applies() {
        let fx = fixture();
        fx.engine.start_form(USER, FormId::Pressure).await;
        let timeouts = IdleTimeouts::new(Duration::from_secs(600))
            .with_override(FormId::Pressure, Duration::from_secs(60));

        let expired = IdleReaper::new(fx.engine.clone(), timeouts)
            .sweep(later(2))
            .await;

        assert_eq!(expired, 1);
        assert_eq!(fx.engine.states().current(USER).unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_state_uses_fallback_window() {
        let fx = fixture();
        fx.engine.states().enter(USER, "RetiredForm:0:step").unwrap();

        assert_eq!(reaper(&fx.engine).sweep(later(5)).await, 0);
        assert_eq!(reaper(&fx.engine).sweep(later(11)).await, 1);
        assert_eq!(fx.engine.states().current(USER).unwrap(), None);
    }

    #[tokio::test]
    async fn sweep_emits_one_unset_per_expiry() {
        let fx = fixture();
        fx.engine.start_form(USER, FormId::AddDrug).await;
        let mut rx = fx.engine.states().subscribe();

        reaper(&fx.engine).sweep(later(11)).await;
        reaper(&fx.engine).sweep(later(22)).await;

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.user_id, USER);
        assert_eq!(msg.action, crate::states::StateAction::Unset);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reply_after_expiry_is_discarded() {
        let fx = fixture();
        fx.engine.start_form(USER, FormId::DrugUse).await;
        let declared = fx.engine.declared_state(USER);

        reaper(&fx.engine).sweep(later(11)).await;
        let outcome = fx
            .engine
            .handle_reply(Inbound {
                user_id: USER,
                declared_state: declared,
                text: "today".into(),
            })
            .await;

        assert_eq!(outcome, Outcome::Discarded);
        assert_eq!(fx.engine.states().current(USER).unwrap(), None);
    }

    #[tokio::test]
    async fn storage_errors_skip_the_cycle() {
        let mut flaky = None;
        let fx = fixture_on(|conn| {
            let backend = Arc::new(FlakyBackend {
                inner: SqliteStateBackend::new(conn),
                entries_fail: AtomicBool::new(false),
                clear_fails: AtomicBool::new(false),
            });
            flaky = Some(backend.clone());
            backend as Arc<dyn StateBackend>
        });
        let flaky = flaky.unwrap();
        fx.engine.start_form(USER, FormId::AddDrug).await;
        let reaper = reaper(&fx.engine);

        flaky.entries_fail.store(true, Ordering::SeqCst);
        assert_eq!(reaper.sweep(later(11)).await, 0);

        flaky.entries_fail.store(false, Ordering::SeqCst);
        flaky.clear_fails.store(true, Ordering::SeqCst);
        assert_eq!(reaper.sweep(later(11)).await, 0);
        assert!(fx.engine.states().current(USER).unwrap().is_some());
        assert_eq!(fx.engine.active_sessions(), 1);

        flaky.clear_fails.store(false, Ordering::SeqCst);
        assert_eq!(reaper.sweep(later(11)).await, 1);
        assert_eq!(fx.engine.states().current(USER).unwrap(), None);
        assert_eq!(fx.engine.active_sessions(), 0);
    }
}
