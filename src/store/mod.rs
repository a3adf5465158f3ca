//! Progress aggregation for a planning session
//!
//! [`SessionState`] is a plain value folded by reducer methods, one event at
//! a time. [`TripStore`] owns the current state, publishes every change to
//! subscribers over a `watch` channel, and keeps the last submitted form in
//! sync with durable [`Storage`].

pub mod storage;

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::api::TripFormData;
use crate::stream::{AgentId, AgentProgress, AgentStatus, StreamEvent, TripPlan};

pub use storage::{Storage, StorageError};

pub const DEFAULT_ERROR_MESSAGE: &str = "An unknown error occurred";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub is_requesting: bool,
    pub current_request_id: Option<String>,
    pub trip_plan: Option<TripPlan>,
    pub error: Option<String>,
    pub progress: BTreeMap<AgentId, AgentProgress>,
    pub partial_data: BTreeMap<AgentId, Vec<Value>>,
    pub form_data: Option<TripFormData>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            is_requesting: false,
            current_request_id: None,
            trip_plan: None,
            error: None,
            progress: pending_progress(),
            partial_data: empty_partial_data(),
            form_data: None,
        }
    }
}

fn pending_progress() -> BTreeMap<AgentId, AgentProgress> {
    AgentId::ALL
        .into_iter()
        .map(|agent| (agent, AgentProgress::pending(agent)))
        .collect()
}

fn empty_partial_data() -> BTreeMap<AgentId, Vec<Value>> {
    AgentId::ALL
        .into_iter()
        .map(|agent| (agent, Vec::new()))
        .collect()
}

impl SessionState {
    /// Reset progress for a new request. Calling it twice with the same id
    /// yields the same state.
    ///
    /// The previous plan is kept until the new session produces one, so the
    /// last result stays visible while the next is computed.
    pub fn start_request(&mut self, request_id: &str) {
        self.is_requesting = true;
        self.current_request_id = Some(request_id.to_string());
        self.error = None;
        self.progress = pending_progress();
        self.partial_data = empty_partial_data();
    }

    /// Fold one stream event into the state.
    pub fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Start { .. } => {}
            StreamEvent::Progress(update) => {
                self.progress.insert(update.agent, update.clone());
            }
            StreamEvent::Data { agent, payload } => {
                self.partial_data.insert(*agent, payload.clone());
            }
            StreamEvent::Complete {
                plan: Some(plan), ..
            } => {
                self.trip_plan = Some(plan.clone());
                self.error = None;
                for progress in self.progress.values_mut() {
                    if progress.status != AgentStatus::Completed {
                        progress.status = AgentStatus::Completed;
                        progress.progress = 100;
                    }
                }
            }
            StreamEvent::Complete { plan: None, .. } => {
                tracing::debug!("Ignoring complete event without a plan");
            }
            StreamEvent::Error { message } => {
                self.error = Some(
                    message
                        .clone()
                        .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string()),
                );
                self.trip_plan = None;
                for progress in self.progress.values_mut() {
                    if progress.status == AgentStatus::Running {
                        progress.status = AgentStatus::Failed;
                    }
                }
            }
        }
    }

    /// Mark the request as no longer in flight. Results stay readable.
    pub fn finish_request(&mut self) {
        self.is_requesting = false;
        self.current_request_id = None;
    }

    pub fn set_trip_plan(&mut self, plan: TripPlan) {
        self.trip_plan = Some(plan);
        self.error = None;
    }

    pub fn set_error(&mut self, message: &str) {
        self.error = Some(message.to_string());
        self.trip_plan = None;
        self.is_requesting = false;
    }

    /// Mean of the four agent percentages, rounded half away from zero.
    pub fn overall_progress(&self) -> u8 {
        let total: u32 = self.progress.values().map(|p| p.progress as u32).sum();
        let count = self.progress.len().max(1) as u32;
        ((total * 2 + count) / (count * 2)) as u8
    }

    pub fn is_all_completed(&self) -> bool {
        self.progress
            .values()
            .all(|p| p.status == AgentStatus::Completed)
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
            || self
                .progress
                .values()
                .any(|p| p.status == AgentStatus::Failed)
    }

    pub fn agent(&self, agent: AgentId) -> &AgentProgress {
        &self.progress[&agent]
    }

    pub fn partial(&self, agent: AgentId) -> &[Value] {
        &self.partial_data[&agent]
    }
}

/// Observable holder of the current [`SessionState`].
///
/// All mutation goes through the reducer methods below; each one publishes
/// the new state to every receiver returned by [`TripStore::subscribe`].
pub struct TripStore {
    state: watch::Sender<SessionState>,
    storage: Storage,
}

impl TripStore {
    pub fn new(storage: Storage) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self { state, storage }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Clone of the current state.
    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn start_request(&self, request_id: &str) {
        self.state.send_modify(|s| s.start_request(request_id));
    }

    pub fn update_progress(&self, event: &StreamEvent) {
        self.state.send_modify(|s| s.apply(event));
    }

    pub fn finish_request(&self) {
        self.state.send_modify(SessionState::finish_request);
    }

    pub fn set_trip_plan(&self, plan: TripPlan) {
        self.state.send_modify(|s| s.set_trip_plan(plan));
    }

    pub fn set_error(&self, message: &str) {
        self.state.send_modify(|s| s.set_error(message));
    }

    /// Fold `event` only while `request_id` is still the current request, so
    /// a superseded session can no longer touch the state.
    pub fn update_progress_for(&self, request_id: &str, event: &StreamEvent) -> bool {
        self.modify_if_current(request_id, |s| s.apply(event))
    }

    pub fn finish_request_for(&self, request_id: &str) -> bool {
        self.modify_if_current(request_id, SessionState::finish_request)
    }

    pub fn set_error_for(&self, request_id: &str, message: &str) -> bool {
        self.modify_if_current(request_id, |s| s.set_error(message))
    }

    /// Record `message` unless the request already carries an error, such as
    /// one reported by the stream itself.
    pub fn report_error_for(&self, request_id: &str, message: &str) -> bool {
        self.modify_if_current(request_id, |s| {
            if s.error.is_none() {
                s.set_error(message);
            }
        })
    }

    pub fn set_trip_plan_for(&self, request_id: &str, plan: TripPlan) -> bool {
        self.modify_if_current(request_id, |s| s.set_trip_plan(plan))
    }

    fn modify_if_current(&self, request_id: &str, f: impl FnOnce(&mut SessionState)) -> bool {
        self.state.send_if_modified(|s| {
            if s.current_request_id.as_deref() == Some(request_id) {
                f(s);
                true
            } else {
                false
            }
        })
    }

    /// Return to the initial state, discarding the saved form everywhere.
    pub fn reset(&self) {
        self.state.send_replace(SessionState::default());
        if let Err(e) = self.storage.clear_form_data() {
            tracing::warn!("Failed to clear saved form data: {}", e);
        }
    }

    pub fn overall_progress(&self) -> u8 {
        self.state.borrow().overall_progress()
    }

    pub fn is_all_completed(&self) -> bool {
        self.state.borrow().is_all_completed()
    }

    pub fn has_error(&self) -> bool {
        self.state.borrow().has_error()
    }

    /// Remember the form in memory and write it through to storage.
    pub fn save_form_data(&self, form: &TripFormData) -> storage::Result<()> {
        self.state
            .send_modify(|s| s.form_data = Some(form.clone()));
        self.storage.set_form_data(form)
    }

    /// The in-memory form if present, otherwise the durable copy.
    pub fn form_data(&self) -> Option<TripFormData> {
        if let Some(form) = self.state.borrow().form_data.clone() {
            return Some(form);
        }
        self.storage.form_data()
    }

    pub fn clear_form_data(&self) -> storage::Result<()> {
        self.state.send_modify(|s| s.form_data = None);
        self.storage.clear_form_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn progress(agent: AgentId, status: AgentStatus, pct: u8) -> StreamEvent {
        StreamEvent::Progress(AgentProgress {
            agent,
            status,
            progress: pct,
            message: format!("{} {}", agent, status),
        })
    }

    fn complete(plan: Value) -> StreamEvent {
        StreamEvent::Complete {
            plan: Some(TripPlan(plan)),
            message: None,
            requires_login: false,
        }
    }

    fn form() -> TripFormData {
        TripFormData {
            city: "Xi'an".to_string(),
            start_date: "2026-04-10".to_string(),
            end_date: "2026-04-12".to_string(),
            travel_days: 3,
            transportation: "metro".to_string(),
            accommodation: "hotel".to_string(),
            preferences: vec![],
            free_text_input: None,
        }
    }

    #[test]
    fn test_default_has_all_agents_pending() {
        let state = SessionState::default();
        assert_eq!(state.progress.len(), 4);
        assert_eq!(state.partial_data.len(), 4);
        for agent in AgentId::ALL {
            assert_eq!(state.agent(agent), &AgentProgress::pending(agent));
            assert!(state.partial(agent).is_empty());
        }
        assert_eq!(state.overall_progress(), 0);
        assert!(!state.is_all_completed());
        assert!(!state.has_error());
    }

    #[test]
    fn test_start_request_is_idempotent() {
        let mut state = SessionState::default();
        state.apply(&progress(AgentId::Weather, AgentStatus::Running, 40));
        state.apply(&StreamEvent::Error {
            message: Some("boom".to_string()),
        });

        state.start_request("req-1");
        let first = state.clone();
        state.start_request("req-1");
        assert_eq!(state, first);

        assert!(state.is_requesting);
        assert_eq!(state.current_request_id.as_deref(), Some("req-1"));
        assert_eq!(state.error, None);
        assert_eq!(state.agent(AgentId::Weather).status, AgentStatus::Pending);
    }

    #[test]
    fn test_progress_last_write_wins() {
        let mut state = SessionState::default();
        state.apply(&progress(AgentId::Hotels, AgentStatus::Running, 10));
        state.apply(&progress(AgentId::Hotels, AgentStatus::Running, 60));
        state.apply(&StreamEvent::Progress(AgentProgress {
            agent: AgentId::Hotels,
            status: AgentStatus::Running,
            progress: 30,
            message: "re-ranking".to_string(),
        }));

        let hotels = state.agent(AgentId::Hotels);
        assert_eq!(hotels.progress, 30);
        assert_eq!(hotels.message, "re-ranking");
    }

    #[test]
    fn test_data_replaces_wholesale() {
        let mut state = SessionState::default();
        state.apply(&StreamEvent::Data {
            agent: AgentId::Attractions,
            payload: vec![json!({"name": "A"}), json!({"name": "B"})],
        });
        state.apply(&StreamEvent::Data {
            agent: AgentId::Attractions,
            payload: vec![json!({"name": "C"})],
        });
        assert_eq!(state.partial(AgentId::Attractions), &[json!({"name": "C"})]);
        assert!(state.partial(AgentId::Weather).is_empty());
    }

    #[test]
    fn test_overall_progress_rounds_half_up() {
        let mut state = SessionState::default();
        state.apply(&progress(AgentId::Attractions, AgentStatus::Completed, 100));
        state.apply(&progress(AgentId::Weather, AgentStatus::Running, 50));
        assert_eq!(state.overall_progress(), 38);

        state.apply(&progress(AgentId::Hotels, AgentStatus::Running, 1));
        // 151 / 4 = 37.75
        assert_eq!(state.overall_progress(), 38);

        state.apply(&progress(AgentId::Hotels, AgentStatus::Running, 0));
        state.apply(&progress(AgentId::Weather, AgentStatus::Running, 49));
        // 149 / 4 = 37.25
        assert_eq!(state.overall_progress(), 37);
    }

    #[test]
    fn test_complete_closes_every_agent() {
        let mut state = SessionState::default();
        state.apply(&progress(AgentId::Attractions, AgentStatus::Running, 50));
        state.apply(&progress(AgentId::Attractions, AgentStatus::Completed, 100));
        state.apply(&progress(AgentId::Weather, AgentStatus::Failed, 20));
        state.apply(&complete(json!({"days": [{"day": 1}]})));

        assert!(state.is_all_completed());
        assert_eq!(state.overall_progress(), 100);
        assert_eq!(state.agent(AgentId::Attractions).message, "attractions completed");
        assert_eq!(state.agent(AgentId::Weather).progress, 100);
        assert_eq!(state.agent(AgentId::Planning).status, AgentStatus::Completed);
        assert_eq!(
            state.trip_plan,
            Some(TripPlan(json!({"days": [{"day": 1}]})))
        );
        assert_eq!(state.error, None);
    }

    #[test]
    fn test_complete_without_plan_is_noop() {
        let mut state = SessionState::default();
        state.apply(&progress(AgentId::Planning, AgentStatus::Running, 50));
        let before = state.clone();

        state.apply(&StreamEvent::Complete {
            plan: None,
            message: Some("done".to_string()),
            requires_login: false,
        });
        assert_eq!(state, before);
    }

    #[test]
    fn test_error_fails_only_running_agents() {
        let mut state = SessionState::default();
        state.apply(&progress(AgentId::Attractions, AgentStatus::Completed, 100));
        state.apply(&progress(AgentId::Weather, AgentStatus::Running, 10));
        state.apply(&progress(AgentId::Hotels, AgentStatus::Running, 70));
        state.apply(&StreamEvent::Error { message: None });

        assert_eq!(state.error.as_deref(), Some(DEFAULT_ERROR_MESSAGE));
        assert_eq!(state.agent(AgentId::Attractions).status, AgentStatus::Completed);
        assert_eq!(state.agent(AgentId::Weather).status, AgentStatus::Failed);
        assert_eq!(state.agent(AgentId::Hotels).status, AgentStatus::Failed);
        assert_eq!(state.agent(AgentId::Hotels).progress, 70);
        assert_eq!(state.agent(AgentId::Planning).status, AgentStatus::Pending);
        assert!(state.has_error());
    }

    #[test]
    fn test_plan_and_error_never_both_set() {
        let mut state = SessionState::default();
        state.apply(&complete(json!({"days": []})));
        state.apply(&StreamEvent::Error {
            message: Some("late failure".to_string()),
        });
        assert!(state.trip_plan.is_none());
        assert!(state.error.is_some());

        state.apply(&complete(json!({"days": []})));
        assert!(state.trip_plan.is_some());
        assert!(state.error.is_none());
    }

    #[test]
    fn test_failed_agent_counts_as_error() {
        let mut state = SessionState::default();
        state.apply(&progress(AgentId::Hotels, AgentStatus::Failed, 0));
        assert!(state.error.is_none());
        assert!(state.has_error());
    }

    #[test]
    fn test_finish_request_keeps_results() {
        let mut state = SessionState::default();
        state.start_request("req-9");
        state.apply(&complete(json!({"days": []})));
        state.finish_request();

        assert!(!state.is_requesting);
        assert_eq!(state.current_request_id, None);
        assert!(state.trip_plan.is_some());
        assert!(state.is_all_completed());
    }

    #[test]
    fn test_store_publishes_changes() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = TripStore::new(Storage::at(temp.path(), "default"));
        let mut rx = store.subscribe();
        assert!(!rx.has_changed().unwrap());

        store.start_request("req-2");
        assert!(rx.has_changed().unwrap());
        assert_eq!(
            rx.borrow_and_update().current_request_id.as_deref(),
            Some("req-2")
        );

        store.update_progress(&progress(AgentId::Weather, AgentStatus::Running, 80));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().agent(AgentId::Weather).progress, 80);
        assert_eq!(store.overall_progress(), 20);
    }

    #[test]
    fn test_store_form_data_write_through() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = TripStore::new(Storage::at(temp.path(), "default"));
        assert_eq!(store.form_data(), None);

        store.save_form_data(&form()).unwrap();
        assert_eq!(store.form_data(), Some(form()));
        assert_eq!(store.snapshot().form_data, Some(form()));

        // A new store over the same storage falls back to the durable copy
        let reloaded = TripStore::new(Storage::at(temp.path(), "default"));
        assert_eq!(reloaded.snapshot().form_data, None);
        assert_eq!(reloaded.form_data(), Some(form()));

        store.clear_form_data().unwrap();
        assert_eq!(store.form_data(), None);
        assert_eq!(reloaded.form_data(), None);
    }

    #[test]
    fn test_store_reset_discards_everything() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = TripStore::new(Storage::at(temp.path(), "default"));
        store.save_form_data(&form()).unwrap();
        store.start_request("req-3");
        store.update_progress(&complete(json!({"days": []})));

        store.reset();

        assert_eq!(store.snapshot(), SessionState::default());
        assert_eq!(store.form_data(), None);
        assert_eq!(store.storage().form_data(), None);
    }

    #[test]
    fn test_store_ignores_superseded_request() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = TripStore::new(Storage::at(temp.path(), "default"));
        store.start_request("old");
        assert!(store.update_progress_for(
            "old",
            &progress(AgentId::Weather, AgentStatus::Running, 30)
        ));

        store.start_request("new");
        assert!(!store.update_progress_for(
            "old",
            &progress(AgentId::Weather, AgentStatus::Running, 90)
        ));
        assert!(!store.set_error_for("old", "Request cancelled"));
        assert!(!store.report_error_for("old", "Request cancelled"));
        assert!(!store.set_trip_plan_for("old", TripPlan(json!({"days": [1]}))));
        assert!(!store.finish_request_for("old"));

        let state = store.snapshot();
        assert!(state.is_requesting);
        assert_eq!(state.current_request_id.as_deref(), Some("new"));
        assert_eq!(state.agent(AgentId::Weather).progress, 0);
        assert_eq!(state.error, None);
        assert_eq!(state.trip_plan, None);

        assert!(store.set_trip_plan_for("new", TripPlan(json!({"days": [2]}))));
        assert_eq!(
            store.snapshot().trip_plan,
            Some(TripPlan(json!({"days": [2]})))
        );
        assert!(store.finish_request_for("new"));
        assert!(!store.snapshot().is_requesting);
    }

    #[test]
    fn test_store_set_error_stops_request() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = TripStore::new(Storage::at(temp.path(), "default"));
        store.start_request("req-4");
        store.set_error("Connection interrupted");

        let state = store.snapshot();
        assert!(!state.is_requesting);
        assert_eq!(state.error.as_deref(), Some("Connection interrupted"));
        assert!(store.has_error());
        assert!(!store.is_all_completed());
    }

    #[test]
    fn test_report_error_keeps_stream_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = TripStore::new(Storage::at(temp.path(), "default"));
        store.start_request("req-5");
        store.update_progress_for(
            "req-5",
            &StreamEvent::Error {
                message: Some("planner offline".to_string()),
            },
        );

        assert!(store.report_error_for("req-5", "Connection interrupted"));
        assert_eq!(store.snapshot().error.as_deref(), Some("planner offline"));

        store.start_request("req-6");
        assert!(store.report_error_for("req-6", "Connection interrupted"));
        assert_eq!(
            store.snapshot().error.as_deref(),
            Some("Connection interrupted")
        );
    }
}
