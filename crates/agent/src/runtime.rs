use std::sync::Arc;
use std::time::Duration;

use cabbot_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink, NoopAuditSink};
use cabbot_core::config::LookupConfig;
use cabbot_core::domain::driver::{DriverPage, DriverQuery};
use cabbot_core::domain::session::{FilterSet, Session, SessionAction, UserId};
use cabbot_core::errors::ConversationError;
use cabbot_core::flows::{
    DriverSearchFlow, FlowContext, FlowEngine, FlowEvent, FlowState, FlowTransitionError,
};
use chrono::Utc;
use tracing::{info, warn};

use crate::conversation::{ExtractedIntent, IntentExtractor, Paging};
use crate::lookup::DriverLookup;
use crate::nearby::nearby_cities;
use crate::replies::Reply;
use crate::session::SessionStore;

const AUDIT_ACTOR: &str = "session-engine";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub page_size: u32,
    pub lookup_timeout: Duration,
    pub require_city: bool,
}

impl RuntimeSettings {
    pub fn from_config(config: &LookupConfig) -> Self {
        Self {
            page_size: config.page_size,
            lookup_timeout: config.timeout(),
            require_city: config.require_city,
        }
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self { page_size: 5, lookup_timeout: Duration::from_secs(20), require_city: true }
    }
}

/// Result of one processed turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnOutcome {
    pub reply: Reply,
    pub action: SessionAction,
    pub state: FlowState,
    pub filters: FilterSet,
    /// The structured request handed to the lookup this turn, if any.
    pub dispatched_query: Option<DriverQuery>,
}

/// The conversation session engine: extraction, per-user state and driver lookups.
pub struct AgentRuntime {
    extractor: IntentExtractor,
    sessions: Arc<SessionStore>,
    lookup: Arc<dyn DriverLookup>,
    flow: FlowEngine<DriverSearchFlow>,
    audit_sink: Arc<dyn AuditSink>,
    settings: RuntimeSettings,
}

impl AgentRuntime {
    pub fn new(
        sessions: Arc<SessionStore>,
        lookup: Arc<dyn DriverLookup>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            extractor: IntentExtractor::new(),
            sessions,
            lookup,
            flow: FlowEngine::default(),
            audit_sink: Arc::new(NoopAuditSink),
            settings,
        }
    }

    pub fn with_audit_sink(mut self, audit_sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = audit_sink;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Processes one inbound message. Turns for the same user run one at a time; every
    /// failure is turned into a reply, so this never errors.
    ///
    /// The turn works on a copy of the session. The stored session only changes at the
    /// checkpoint before the lookup and at the end, so a caller that drops this future
    /// mid-lookup leaves the user in `Collecting` with this turn's filters merged.
    pub async fn handle_turn(
        &self,
        user_id: &UserId,
        text: &str,
        correlation_id: &str,
    ) -> TurnOutcome {
        let intent = self.extractor.extract(text);
        let audit =
            AuditContext::new(Some(user_id.to_string()), None, correlation_id, AUDIT_ACTOR);

        let mut guard = self.sessions.lock(user_id).await;
        let before: Session = (*guard).clone();
        let mut session = before.clone();

        let planned = match session.validate() {
            Ok(()) => self.plan_turn(&mut session, &intent, &audit),
            Err(error) => Err(ConversationError::from(error)),
        };
        let result = match planned {
            Ok(TurnStep::Done(outcome)) => Ok(outcome),
            Ok(TurnStep::Lookup(query)) => {
                session.touch(Utc::now());
                *guard = session.clone();
                self.run_lookup(&mut session, query, &audit).await
            }
            Err(error) => Err(error),
        };
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) => self.recover(&mut session, &error, &audit),
        };

        if session != before {
            session.touch(Utc::now());
            *guard = session;
            self.sessions.commit(&guard).await;
        }

        info!(
            event_name = "session.turn.completed",
            correlation_id = %correlation_id,
            user_id = %user_id,
            action = outcome.action.as_str(),
            state = outcome.state.as_str(),
            filters = %outcome.filters.describe(),
            dispatched = outcome.dispatched_query.is_some(),
            reply = outcome.reply.kind(),
            "turn processed"
        );
        outcome
    }

    /// Applies everything up to the lookup; no awaits happen here.
    fn plan_turn(
        &self,
        session: &mut Session,
        intent: &ExtractedIntent,
        audit: &AuditContext,
    ) -> Result<TurnStep, ConversationError> {
        match intent.action {
            SessionAction::Unknown => Ok(TurnStep::Done(unchanged(session, SessionAction::Unknown))),
            SessionAction::Reset => {
                self.transition(session, FlowEvent::ResetRequested, audit)?;
                session.reset(Utc::now());
                session.turn_count += 1;
                Ok(TurnStep::Done(outcome(session, Reply::ResetDone, SessionAction::Reset, None)))
            }
            SessionAction::Query => self.plan_query(session, intent, audit),
        }
    }

    fn plan_query(
        &self,
        session: &mut Session,
        intent: &ExtractedIntent,
        audit: &AuditContext,
    ) -> Result<TurnStep, ConversationError> {
        if !intent.has_filters() && session.filters.is_empty() {
            // nothing to search for yet
            return Ok(TurnStep::Done(unchanged(session, SessionAction::Query)));
        }

        let cleared =
            intent.cleared.iter().fold(false, |changed, key| session.filters.remove(*key) || changed);
        let merged = session.filters.merge(intent.filters.iter().cloned());

        if session.filters.is_empty() {
            // the user dropped the only filter they had
            self.transition(session, FlowEvent::ResetRequested, audit)?;
            session.page = 1;
            session.last_action = Some(SessionAction::Query);
            session.turn_count += 1;
            return Ok(TurnStep::Done(outcome(
                session,
                Reply::NeedCity { filters: FilterSet::default() },
                SessionAction::Query,
                None,
            )));
        }

        if intent.has_filters() || cleared {
            self.transition(session, FlowEvent::FiltersMerged, audit)?;
        }
        if merged || cleared {
            session.page = 1;
        } else if intent.paging == Paging::Next {
            session.page += 1;
        }
        session.last_action = Some(SessionAction::Query);
        session.turn_count += 1;

        if self.settings.require_city && !session.filters.has_city() {
            return Ok(TurnStep::Done(outcome(
                session,
                Reply::NeedCity { filters: session.filters.clone() },
                SessionAction::Query,
                None,
            )));
        }

        Ok(TurnStep::Lookup(DriverQuery::from_filters(
            &session.filters,
            session.page,
            self.settings.page_size,
        )))
    }

    async fn run_lookup(
        &self,
        session: &mut Session,
        query: DriverQuery,
        audit: &AuditContext,
    ) -> Result<TurnOutcome, ConversationError> {
        self.transition(session, FlowEvent::LookupDispatched, audit)?;
        let result = self.dispatch(&query).await;

        let reply = match result {
            Ok(page) => {
                self.transition(session, FlowEvent::LookupCompleted, audit)?;
                self.emit_lookup_event(audit, &query, AuditOutcome::Success, page.drivers.len());
                self.page_reply(session, page)
            }
            Err(error) => {
                self.transition(session, FlowEvent::LookupFailed, audit)?;
                self.emit_lookup_event(audit, &query, AuditOutcome::Failed, 0);
                warn!(
                    event_name = "session.lookup.failed",
                    correlation_id = %audit.correlation_id,
                    user_id = %session.user_id,
                    retryable = error.is_retryable(),
                    error = %error,
                    "driver lookup failed"
                );
                Reply::LookupFailed(error)
            }
        };

        Ok(outcome(session, reply, SessionAction::Query, Some(query)))
    }

    async fn dispatch(&self, query: &DriverQuery) -> Result<DriverPage, ConversationError> {
        match tokio::time::timeout(self.settings.lookup_timeout, self.lookup.find_drivers(query))
            .await
        {
            Ok(result) => result.map_err(ConversationError::from),
            Err(_) => Err(ConversationError::LookupTimeout {
                timeout_secs: self.settings.lookup_timeout.as_secs(),
            }),
        }
    }

    fn page_reply(&self, session: &mut Session, page: DriverPage) -> Reply {
        if !page.is_empty() {
            return Reply::Drivers(page);
        }
        if session.page > 1 {
            // stay on the last page that had results
            session.page -= 1;
            return Reply::NoMoreDrivers { filters: session.filters.clone() };
        }
        let nearby = session.filters.city.as_deref().map(nearby_cities).unwrap_or_default();
        Reply::NoMatch { filters: session.filters.clone(), nearby }
    }

    fn transition(
        &self,
        session: &mut Session,
        event: FlowEvent,
        audit: &AuditContext,
    ) -> Result<(), FlowTransitionError> {
        let context = flow_context(session);
        let applied = self.flow.apply_with_audit(
            &session.state,
            &event,
            &context,
            self.audit_sink.as_ref(),
            audit,
        )?;
        session.state = applied.to;
        Ok(())
    }

    fn recover(
        &self,
        session: &mut Session,
        error: &ConversationError,
        audit: &AuditContext,
    ) -> TurnOutcome {
        warn!(
            event_name = "session.recovered",
            correlation_id = %audit.correlation_id,
            user_id = %session.user_id,
            state = session.state.as_str(),
            error = %error,
            "session was inconsistent; starting over"
        );
        self.audit_sink.emit(
            audit
                .event("session.recovered", AuditCategory::System, AuditOutcome::Failed)
                .with_metadata("error", error.to_string()),
        );
        session.reset(Utc::now());
        outcome(session, Reply::SessionRecovered, SessionAction::Reset, None)
    }

    fn emit_lookup_event(
        &self,
        audit: &AuditContext,
        query: &DriverQuery,
        result: AuditOutcome,
        count: usize,
    ) {
        self.audit_sink.emit(
            audit
                .event("lookup.dispatched", AuditCategory::Lookup, result)
                .with_metadata("query", query.cache_key())
                .with_metadata("count", count.to_string()),
        );
    }
}

enum TurnStep {
    Done(TurnOutcome),
    Lookup(DriverQuery),
}

fn flow_context(session: &Session) -> FlowContext {
    FlowContext { has_filters: !session.filters.is_empty() }
}

fn unchanged(session: &Session, action: SessionAction) -> TurnOutcome {
    outcome(session, Reply::NeedMoreInfo, action, None)
}

fn outcome(
    session: &Session,
    reply: Reply,
    action: SessionAction,
    dispatched_query: Option<DriverQuery>,
) -> TurnOutcome {
    TurnOutcome {
        reply,
        action,
        state: session.state,
        filters: session.filters.clone(),
        dispatched_query,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use cabbot_core::audit::{AuditContext, InMemoryAuditSink};
    use cabbot_core::domain::driver::{DriverPage, DriverQuery};
    use cabbot_core::domain::session::{Filter, FilterSet, Session, SessionAction, UserId};
    use cabbot_core::errors::ConversationError;
    use cabbot_core::flows::{FlowEvent, FlowState, FlowTransitionError};
    use chrono::Utc;

    use super::{AgentRuntime, RuntimeSettings};
    use crate::lookup::{DriverLookup, LookupError, StaticDriverLookup};
    use crate::replies::Reply;
    use crate::session::SessionStore;

    #[derive(Default)]
    struct RecordingLookup {
        queries: Mutex<Vec<DriverQuery>>,
        inner: StaticDriverLookup,
    }

    impl RecordingLookup {
        fn demo() -> Self {
            Self { queries: Mutex::new(Vec::new()), inner: StaticDriverLookup::demo() }
        }

        fn queries(&self) -> Vec<DriverQuery> {
            self.queries.lock().expect("queries lock").clone()
        }
    }

    #[async_trait]
    impl DriverLookup for RecordingLookup {
        async fn find_drivers(&self, query: &DriverQuery) -> Result<DriverPage, LookupError> {
            self.queries.lock().expect("queries lock").push(query.clone());
            self.inner.find_drivers(query).await
        }
    }

    struct SlowLookup;

    #[async_trait]
    impl DriverLookup for SlowLookup {
        async fn find_drivers(&self, query: &DriverQuery) -> Result<DriverPage, LookupError> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(DriverPage { query: query.clone(), drivers: Vec::new(), has_more: false })
        }
    }

    fn runtime_with(lookup: Arc<dyn DriverLookup>, settings: RuntimeSettings) -> AgentRuntime {
        let sessions = Arc::new(SessionStore::new(4, Duration::from_secs(1800)));
        AgentRuntime::new(sessions, lookup, settings)
    }

    fn settings() -> RuntimeSettings {
        RuntimeSettings { page_size: 2, ..RuntimeSettings::default() }
    }

    fn expected(city: Option<&str>, language: Option<&str>) -> FilterSet {
        let mut filters = FilterSet::default();
        filters.merge(city.and_then(Filter::city));
        filters.merge(language.and_then(Filter::language));
        filters
    }

    #[tokio::test]
    async fn jaipur_then_hindi_then_reset() {
        let lookup = Arc::new(RecordingLookup::demo());
        let runtime = runtime_with(lookup.clone(), settings());
        let user = UserId::new("U1");

        let first = runtime.handle_turn(&user, "I need drivers in Jaipur", "req-1").await;
        assert_eq!(first.action, SessionAction::Query);
        assert_eq!(first.filters, expected(Some("Jaipur"), None));
        assert_eq!(first.state, FlowState::Collecting);
        assert!(first.reply.is_driver_list());

        let second = runtime.handle_turn(&user, "Show me drivers who speak Hindi", "req-2").await;
        assert_eq!(second.filters, expected(Some("Jaipur"), Some("Hindi")));
        assert!(second.reply.is_driver_list());

        let third = runtime.handle_turn(&user, "reset", "req-3").await;
        assert_eq!(third.action, SessionAction::Reset);
        assert_eq!(third.state, FlowState::Idle);
        assert!(third.filters.is_empty());
        assert_eq!(third.reply, Reply::ResetDone);

        let queries = lookup.queries();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].city.as_deref(), Some("Jaipur"));
        assert_eq!(queries[0].language, None);
        assert_eq!(queries[1].city.as_deref(), Some("Jaipur"));
        assert_eq!(queries[1].language.as_deref(), Some("Hindi"));

        let session = runtime.sessions().get(&user).await;
        assert_eq!(session.turn_count, 3);
        assert!(session.validate().is_ok());
    }

    #[tokio::test]
    async fn filters_accumulate_with_later_values_winning() {
        let runtime = runtime_with(Arc::new(StaticDriverLookup::demo()), settings());
        let user = UserId::new("U2");

        runtime.handle_turn(&user, "drivers in Pune", "r1").await;
        runtime.handle_turn(&user, "who speak Marathi", "r2").await;
        let last = runtime.handle_turn(&user, "actually drivers in Chennai", "r3").await;

        assert_eq!(last.filters, expected(Some("Chennai"), Some("Marathi")));
    }

    #[tokio::test]
    async fn reset_in_any_case_clears_everything() {
        let runtime = runtime_with(Arc::new(StaticDriverLookup::demo()), settings());
        let user = UserId::new("U3");

        for text in ["RESET", "Reset", "  reset!  "] {
            runtime.handle_turn(&user, "Hindi speaking drivers in Delhi", "r").await;
            let outcome = runtime.handle_turn(&user, text, "r").await;
            assert_eq!(outcome.state, FlowState::Idle, "{text}");
            assert!(outcome.filters.is_empty(), "{text}");
        }
    }

    #[tokio::test]
    async fn unknown_turn_leaves_session_untouched() {
        let lookup = Arc::new(RecordingLookup::demo());
        let runtime = runtime_with(lookup.clone(), settings());
        let user = UserId::new("U4");

        runtime.handle_turn(&user, "drivers in Jaipur", "r1").await;
        let before = runtime.sessions().get(&user).await;

        let outcome = runtime.handle_turn(&user, "what's the weather like?", "r2").await;

        assert_eq!(outcome.action, SessionAction::Unknown);
        assert_eq!(outcome.reply, Reply::NeedMoreInfo);
        assert_eq!(outcome.dispatched_query, None);
        assert_eq!(runtime.sessions().get(&user).await, before);
        assert_eq!(lookup.queries().len(), 1);
    }

    #[tokio::test]
    async fn language_without_city_asks_for_the_city() {
        let lookup = Arc::new(RecordingLookup::demo());
        let runtime = runtime_with(lookup.clone(), settings());
        let user = UserId::new("U5");

        let outcome = runtime.handle_turn(&user, "drivers who speak Tamil", "r1").await;
        assert!(matches!(outcome.reply, Reply::NeedCity { .. }));
        assert_eq!(outcome.state, FlowState::Collecting);
        assert!(lookup.queries().is_empty());

        let followup = runtime.handle_turn(&user, "in Chennai", "r2").await;
        assert_eq!(followup.filters, expected(Some("Chennai"), Some("Tamil")));
        assert!(followup.reply.is_driver_list());
    }

    #[tokio::test]
    async fn more_pages_through_results_and_stops_at_the_end() {
        let lookup = Arc::new(RecordingLookup::demo());
        let runtime = runtime_with(lookup.clone(), settings());
        let user = UserId::new("U6");

        runtime.handle_turn(&user, "drivers in Jaipur", "r1").await;
        let second = runtime.handle_turn(&user, "more", "r2").await;
        let third = runtime.handle_turn(&user, "next page", "r3").await;

        let pages: Vec<u32> = lookup.queries().iter().map(|query| query.page).collect();
        assert_eq!(pages, vec![1, 2, 3]);
        assert!(second.reply.is_driver_list());
        assert!(matches!(third.reply, Reply::NoMoreDrivers { .. }));
        assert_eq!(runtime.sessions().get(&user).await.page, 2);

        runtime.handle_turn(&user, "Hindi speaking", "r4").await;
        assert_eq!(lookup.queries().last().map(|query| query.page), Some(1));
    }

    #[tokio::test]
    async fn unknown_city_reports_no_match() {
        let runtime = runtime_with(Arc::new(StaticDriverLookup::demo()), settings());
        let outcome = runtime.handle_turn(&UserId::new("U7"), "drivers in Kota", "r1").await;
        assert_eq!(
            outcome.reply,
            Reply::NoMatch {
                filters: expected(Some("Kota"), None),
                nearby: vec!["Bundi".to_string(), "Jaipur".to_string(), "Ajmer".to_string()],
            }
        );
        assert_eq!(outcome.state, FlowState::Collecting);
    }

    #[tokio::test]
    async fn no_match_suggests_neighbours_and_any_language_widens_the_search() {
        let lookup = Arc::new(RecordingLookup::demo());
        let runtime = runtime_with(lookup.clone(), settings());
        let user = UserId::new("U7b");

        let miss = runtime.handle_turn(&user, "drivers in Jaipur who speak Tamil", "r1").await;
        let Reply::NoMatch { filters, nearby } = &miss.reply else {
            panic!("expected no match, got {:?}", miss.reply)
        };
        assert_eq!(filters, &expected(Some("Jaipur"), Some("Tamil")));
        assert_eq!(nearby, &vec!["Ajmer".to_string(), "Alwar".to_string(), "Pushkar".to_string()]);
        assert!(miss.reply.text().contains("any language"));

        let widened = runtime.handle_turn(&user, "any language is fine", "r2").await;
        assert!(matches!(widened.reply, Reply::Drivers(_)), "got {:?}", widened.reply);
        assert_eq!(widened.filters, expected(Some("Jaipur"), None));
        assert_eq!(lookup.queries().last().map(|query| query.language.clone()), Some(None));
    }

    #[tokio::test]
    async fn dropping_the_only_filter_returns_to_idle() {
        let runtime = runtime_with(Arc::new(StaticDriverLookup::demo()), settings());
        let user = UserId::new("U7c");

        runtime.handle_turn(&user, "drivers who speak Tamil", "r1").await;
        let outcome = runtime.handle_turn(&user, "any language", "r2").await;

        assert_eq!(outcome.reply, Reply::NeedCity { filters: FilterSet::default() });
        assert_eq!(outcome.state, FlowState::Idle);
        assert!(runtime.sessions().get(&user).await.validate().is_ok());
    }

    #[tokio::test]
    async fn lookup_timeout_is_retryable_and_keeps_filters() {
        let runtime = runtime_with(
            Arc::new(SlowLookup),
            RuntimeSettings { lookup_timeout: Duration::from_millis(50), ..settings() },
        );
        let user = UserId::new("U8");

        let outcome = runtime.handle_turn(&user, "drivers in Pune", "r1").await;

        match &outcome.reply {
            Reply::LookupFailed(error) => {
                assert!(matches!(error, ConversationError::LookupTimeout { .. }));
                assert!(error.is_retryable());
            }
            other => panic!("expected lookup failure, got {other:?}"),
        }
        assert_eq!(outcome.state, FlowState::Collecting);
        assert_eq!(outcome.filters, expected(Some("Pune"), None));
        assert!(runtime.sessions().get(&user).await.validate().is_ok());
    }

    #[tokio::test]
    async fn turn_dropped_mid_lookup_keeps_merged_filters() {
        let runtime = runtime_with(Arc::new(SlowLookup), settings());
        let user = UserId::new("U8b");

        let dropped = tokio::time::timeout(
            Duration::from_millis(100),
            runtime.handle_turn(&user, "drivers in Jaipur", "r1"),
        )
        .await;
        assert!(dropped.is_err(), "turn should still be waiting on the lookup");

        let stored = runtime.sessions().snapshot(&user).await.expect("checkpointed session");
        assert_eq!(stored.state, FlowState::Collecting);
        assert_eq!(stored.filters, expected(Some("Jaipur"), None));
        assert!(stored.validate().is_ok());

        let runtime = AgentRuntime::new(
            runtime.sessions().clone(),
            Arc::new(StaticDriverLookup::demo()),
            settings(),
        );
        let outcome = runtime.handle_turn(&user, "who speak Hindi", "r2").await;

        assert_ne!(outcome.reply, Reply::SessionRecovered);
        assert_eq!(outcome.state, FlowState::Collecting);
        assert_eq!(outcome.filters, expected(Some("Jaipur"), Some("Hindi")));
    }

    #[test]
    fn merging_into_an_empty_session_is_rejected() {
        let runtime = runtime_with(Arc::new(StaticDriverLookup::demo()), settings());
        let mut session = Session::new(UserId::new("U8c"), Utc::now());
        let audit = AuditContext::new(None, None, "r1", "test");

        let error = runtime
            .transition(&mut session, FlowEvent::FiltersMerged, &audit)
            .expect_err("no filters to merge");
        assert!(matches!(error, FlowTransitionError::MissingFilters { state: FlowState::Idle }));

        session.filters.merge(Filter::city("Jaipur"));
        runtime.transition(&mut session, FlowEvent::FiltersMerged, &audit).expect("merge");
        assert_eq!(session.state, FlowState::Collecting);
    }

    #[tokio::test]
    async fn corrupt_session_is_reset_and_user_notified() {
        let sink = Arc::new(InMemoryAuditSink::default());
        let runtime = runtime_with(Arc::new(StaticDriverLookup::demo()), settings())
            .with_audit_sink(sink.clone());
        let user = UserId::new("U9");

        runtime.handle_turn(&user, "drivers in Jaipur", "r1").await;
        runtime.sessions().update(&user, |session| session.state = FlowState::AwaitingResult).await;

        let outcome = runtime.handle_turn(&user, "who speak Hindi", "r2").await;

        assert_eq!(outcome.reply, Reply::SessionRecovered);
        assert_eq!(outcome.state, FlowState::Idle);
        assert!(outcome.filters.is_empty());
        assert!(sink.events().iter().any(|event| event.event_type == "session.recovered"));
    }

    #[tokio::test]
    async fn transitions_are_audited_with_correlation_ids() {
        let sink = Arc::new(InMemoryAuditSink::default());
        let runtime = runtime_with(Arc::new(StaticDriverLookup::demo()), settings())
            .with_audit_sink(sink.clone());

        runtime.handle_turn(&UserId::new("U10"), "drivers in Jaipur", "corr-42").await;

        let events = sink.events();
        let transitions: Vec<_> =
            events.iter().filter(|event| event.event_type == "flow.transition_applied").collect();
        assert_eq!(transitions.len(), 3);
        assert!(events.iter().all(|event| event.correlation_id == "corr-42"));
        assert!(events.iter().any(|event| event.event_type == "lookup.dispatched"));
    }

    #[tokio::test]
    async fn concurrent_turns_for_one_user_are_serialized() {
        let runtime = Arc::new(runtime_with(Arc::new(StaticDriverLookup::demo()), settings()));
        let user = UserId::new("U11");

        let handles: Vec<_> = (0..32)
            .map(|index| {
                let runtime = runtime.clone();
                let user = user.clone();
                tokio::spawn(async move {
                    let text = if index % 2 == 0 { "drivers in Jaipur" } else { "who speak Hindi" };
                    runtime.handle_turn(&user, text, &format!("r{index}")).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.expect("turn task");
        }

        let session = runtime.sessions().get(&user).await;
        assert_eq!(session.turn_count, 32);
        assert_eq!(session.filters, expected(Some("Jaipur"), Some("Hindi")));
        assert_eq!(session.state, FlowState::Collecting);
    }

    #[tokio::test]
    async fn distinct_users_never_see_each_other() {
        let runtime = Arc::new(runtime_with(Arc::new(StaticDriverLookup::demo()), settings()));

        let handles: Vec<_> = ["Jaipur", "Pune", "Chennai", "Delhi"]
            .into_iter()
            .enumerate()
            .map(|(index, city)| {
                let runtime = runtime.clone();
                tokio::spawn(async move {
                    let user = UserId::new(format!("user-{index}"));
                    for _ in 0..5 {
                        let outcome =
                            runtime.handle_turn(&user, &format!("drivers in {city}"), "r").await;
                        assert_eq!(outcome.filters.city.as_deref(), Some(city));
                    }
                    runtime.sessions().get(&user).await
                })
            })
            .collect();

        for handle in handles {
            let session = handle.await.expect("user task");
            assert_eq!(session.turn_count, 5);
            assert_eq!(session.filters.language, None);
        }
    }
}
