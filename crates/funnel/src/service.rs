use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use clearview_core::audit::{AuditContext, AuditSink};
use clearview_core::config::SessionConfig;
use clearview_core::domain::quote::QuoteStatus;
use clearview_core::errors::{ApplicationError, DomainError};
use clearview_core::flows::{
    FlowEngine, FlowTransitionError, QuoteFunnelFlow, SessionAction, SessionEvent, SessionStep,
};
use clearview_core::pricing::{
    option_prices, DiscountPolicy, DisplayPrice, OptionPrice, PriceQuote,
};
use clearview_core::session::{FormPatch, PropertyEstimate, QuoteSession, SessionForm, SessionId};
use clearview_db::repositories::QuoteRepository;
use clearview_notify::Mailer;

use crate::catalog::{Catalog, CatalogCache};
use crate::lookup::PropertyLookup;
use crate::registry::{SessionEntry, SessionHandle, SessionRegistry};

const ACTOR: &str = "quote-funnel";

#[derive(Debug, Error)]
pub enum FunnelError {
    #[error("session `{0}` not found")]
    SessionNotFound(String),
    #[error(transparent)]
    Transition(#[from] FlowTransitionError),
}

impl From<FunnelError> for ApplicationError {
    fn from(value: FunnelError) -> Self {
        match value {
            FunnelError::SessionNotFound(_) => {
                ApplicationError::NotFound { resource: "Session".to_string() }
            }
            FunnelError::Transition(error) => {
                ApplicationError::Domain(DomainError::FlowTransition(error))
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct FunnelSettings {
    pub stalled_notice_after: Duration,
    pub idle_ttl: chrono::Duration,
}

impl FunnelSettings {
    pub fn from_config(config: &SessionConfig) -> Self {
        let idle_secs = i64::try_from(config.idle_ttl_secs).unwrap_or(i64::MAX);
        Self {
            stalled_notice_after: Duration::from_secs(config.stalled_notice_secs),
            idle_ttl: chrono::Duration::try_seconds(idle_secs)
                .unwrap_or_else(|| chrono::Duration::hours(1)),
        }
    }
}

impl Default for FunnelSettings {
    fn default() -> Self {
        Self { stalled_notice_after: Duration::from_secs(240), idle_ttl: chrono::Duration::hours(1) }
    }
}

/// Collaborators the session service drives.
#[derive(Clone)]
pub struct FunnelDeps {
    pub quotes: Arc<dyn QuoteRepository>,
    pub catalog: Arc<CatalogCache>,
    pub lookup: Arc<dyn PropertyLookup>,
    pub mailer: Arc<Mailer>,
    pub audit: Arc<dyn AuditSink>,
}

/// What the calculator needs to render the current step.
#[derive(Clone, Debug, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub step: SessionStep,
    pub step_number: u8,
    pub quote_id: Option<String>,
    pub form: SessionForm,
    pub property: Option<PropertyEstimate>,
    pub distance_miles: Option<Decimal>,
    pub price: PriceQuote,
    pub display_price: Option<DisplayPrice>,
    /// Listed price beside each service choice; empty until the square
    /// footage is known.
    pub options: Vec<OptionPrice>,
    pub estimate_needed: bool,
    pub needs_manual_square_footage: bool,
    pub notice: Option<String>,
}

impl SessionView {
    fn from_session(session: &QuoteSession, catalog: &Catalog) -> Self {
        Self {
            session_id: session.id.0.clone(),
            step: session.step,
            step_number: session.step.number(),
            quote_id: session.quote_id.as_ref().map(|id| id.0.clone()),
            form: session.form.clone(),
            property: session.property.clone(),
            distance_miles: session.distance_miles,
            price: session.price.clone(),
            display_price: session.display_price,
            options: session
                .square_footage()
                .map(|square_footage| {
                    option_prices(
                        &catalog.services,
                        square_footage,
                        session.form.stories.unwrap_or(1),
                        &catalog.settings,
                        &DiscountPolicy::from_settings(&catalog.settings),
                    )
                })
                .unwrap_or_default(),
            estimate_needed: session.estimate_needed(),
            needs_manual_square_footage: session.step == SessionStep::ManualSquareFootage,
            notice: (session.step == SessionStep::OutsideArea)
                .then(|| catalog.settings.outside_area_notice()),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SubmitReceipt {
    pub quote_id: Option<String>,
    pub message: String,
    pub final_price: Option<Decimal>,
    pub estimate_needed: bool,
}

/// Runs customer sessions through the funnel: applies edits, drives the flow
/// engine, and carries out the persistence, pricing, timer and email actions
/// each transition asks for.
pub struct QuoteSessionService {
    registry: SessionRegistry,
    engine: FlowEngine<QuoteFunnelFlow>,
    deps: FunnelDeps,
    stalled_notice_after: Duration,
}

impl QuoteSessionService {
    pub fn new(deps: FunnelDeps, settings: FunnelSettings) -> Self {
        Self {
            registry: SessionRegistry::new(settings.idle_ttl),
            engine: FlowEngine::default(),
            deps,
            stalled_notice_after: settings.stalled_notice_after,
        }
    }

    pub async fn start(&self) -> SessionView {
        let session = QuoteSession::new(SessionId::generate(), Utc::now());
        info!(
            event_name = "funnel.session.started",
            correlation_id = %session.id.0,
            "quote session started"
        );
        let catalog = self.catalog().await;
        let view = SessionView::from_session(&session, &catalog);
        self.registry.insert(session).await;
        view
    }

    pub async fn view(&self, id: &SessionId) -> Result<SessionView, FunnelError> {
        let handle = self.entry(id).await?;
        let entry = handle.lock().await;
        let catalog = self.catalog().await;
        Ok(SessionView::from_session(&entry.session, &catalog))
    }

    /// Applies a partial edit without changing step. Autosaves and reprices
    /// when the session is far enough along.
    pub async fn update_fields(
        &self,
        id: &SessionId,
        patch: FormPatch,
    ) -> Result<SessionView, FunnelError> {
        let handle = self.entry(id).await?;
        let mut entry = handle.lock().await;
        let catalog = self.catalog().await;
        entry.session.touch(Utc::now());

        let update = entry.session.update_fields(patch);
        self.run_actions(&handle, &mut entry, update.actions, &catalog).await;
        Ok(SessionView::from_session(&entry.session, &catalog))
    }

    /// Finishes step 1: looks up distance and square footage for the address
    /// and moves to service selection, the manual entry prompt, or the
    /// outside-area branch.
    pub async fn resolve_property(
        &self,
        id: &SessionId,
        patch: FormPatch,
    ) -> Result<SessionView, FunnelError> {
        let handle = self.entry(id).await?;
        let mut entry = handle.lock().await;
        let catalog = self.catalog().await;
        entry.session.touch(Utc::now());
        let mut actions = entry.session.update_fields(patch).actions;

        let ready = entry
            .session
            .flow_context(SessionEvent::PropertyResolved, &catalog.settings)
            .missing_required_fields
            .is_empty();
        if ready && entry.session.step == SessionStep::PropertyInfo {
            let address = entry.session.form.address.clone().unwrap_or_default();
            let (distance, estimate) = self.lookup_property(&entry.session.id, &address, &catalog).await;
            entry.session.resolve_property(distance, estimate);
        }

        let result = self.advance(&mut entry, SessionEvent::PropertyResolved, &catalog);
        if let Ok(outcome) = &result {
            actions.extend(outcome.actions.iter().cloned());
        }
        self.run_actions(&handle, &mut entry, actions, &catalog).await;
        result?;
        Ok(SessionView::from_session(&entry.session, &catalog))
    }

    pub async fn enter_square_footage(
        &self,
        id: &SessionId,
        raw: String,
    ) -> Result<SessionView, FunnelError> {
        let patch = FormPatch { square_footage: Some(raw), ..FormPatch::default() };
        self.patch_and_advance(id, patch, SessionEvent::ManualSquareFootageEntered).await
    }

    pub async fn select_service(
        &self,
        id: &SessionId,
        patch: FormPatch,
    ) -> Result<SessionView, FunnelError> {
        self.patch_and_advance(id, patch, SessionEvent::ServiceSelected).await
    }

    pub async fn back(&self, id: &SessionId) -> Result<SessionView, FunnelError> {
        self.patch_and_advance(id, FormPatch::default(), SessionEvent::BackRequested).await
    }

    /// Final acceptance. Persistence and email failures are logged and the
    /// customer still gets a receipt.
    pub async fn submit(
        &self,
        id: &SessionId,
        patch: FormPatch,
    ) -> Result<SubmitReceipt, FunnelError> {
        let (view, catalog) =
            self.patch_and_advance_with_catalog(id, patch, SessionEvent::SubmitRequested).await?;
        Ok(SubmitReceipt {
            quote_id: view.quote_id,
            message: format!(
                "Thank you for choosing {}. Someone from our team will contact you within 24 hours to schedule your service.",
                catalog.settings.display_business_name()
            ),
            final_price: view.display_price.map(|price| price.charged),
            estimate_needed: view.estimate_needed,
        })
    }

    pub async fn submit_outside_area(
        &self,
        id: &SessionId,
        patch: FormPatch,
    ) -> Result<SubmitReceipt, FunnelError> {
        let (view, catalog) = self
            .patch_and_advance_with_catalog(id, patch, SessionEvent::OutsideAreaContactSubmitted)
            .await?;
        Ok(SubmitReceipt {
            quote_id: view.quote_id,
            message: format!(
                "Thank you for choosing {}. Someone from our team will contact you within 24 hours to discuss availability and pricing.",
                catalog.settings.display_business_name()
            ),
            final_price: None,
            estimate_needed: false,
        })
    }

    /// Discards the session and any pending timer.
    pub async fn reset(&self, id: &SessionId) -> Result<(), FunnelError> {
        let handle =
            self.registry.remove(id).await.ok_or_else(|| FunnelError::SessionNotFound(id.0.clone()))?;
        let mut entry = handle.lock().await;
        entry.cancel_stalled_timer();
        info!(
            event_name = "funnel.session.reset",
            correlation_id = %id.0,
            quote_id = entry.session.quote_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unassigned"),
            "quote session discarded"
        );
        Ok(())
    }

    pub async fn evict_idle(&self) -> usize {
        let evicted = self.registry.evict_idle(Utc::now()).await;
        if evicted > 0 {
            info!(event_name = "funnel.session.evicted", evicted, "idle quote sessions evicted");
        }
        evicted
    }

    pub async fn live_sessions(&self) -> usize {
        self.registry.len().await
    }

    async fn patch_and_advance(
        &self,
        id: &SessionId,
        patch: FormPatch,
        event: SessionEvent,
    ) -> Result<SessionView, FunnelError> {
        self.patch_and_advance_with_catalog(id, patch, event).await.map(|(view, _)| view)
    }

    async fn patch_and_advance_with_catalog(
        &self,
        id: &SessionId,
        patch: FormPatch,
        event: SessionEvent,
    ) -> Result<(SessionView, Arc<Catalog>), FunnelError> {
        let handle = self.entry(id).await?;
        let mut entry = handle.lock().await;
        let catalog = self.catalog().await;
        entry.session.touch(Utc::now());

        let mut actions = entry.session.update_fields(patch).actions;
        let result = self.advance(&mut entry, event, &catalog);
        if let Ok(outcome) = &result {
            actions.extend(outcome.actions.iter().cloned());
        }
        self.run_actions(&handle, &mut entry, actions, &catalog).await;
        result?;
        let view = SessionView::from_session(&entry.session, &catalog);
        Ok((view, catalog))
    }

    fn advance(
        &self,
        entry: &mut SessionEntry,
        event: SessionEvent,
        catalog: &Catalog,
    ) -> Result<clearview_core::flows::TransitionOutcome, FlowTransitionError> {
        let audit = audit_context(&entry.session);
        let result = entry.session.advance(
            &self.engine,
            event,
            &catalog.settings,
            self.deps.audit.as_ref(),
            &audit,
        );
        match &result {
            Ok(outcome) => info!(
                event_name = "funnel.session.step_completed",
                correlation_id = %audit.correlation_id,
                quote_id = quote_label(&entry.session),
                from = ?outcome.from,
                to = ?outcome.to,
                event = ?event,
                "quote session advanced"
            ),
            Err(error) => info!(
                event_name = "funnel.session.step_rejected",
                correlation_id = %audit.correlation_id,
                quote_id = quote_label(&entry.session),
                event = ?event,
                error = %error,
                "quote session transition rejected"
            ),
        }
        result
    }

    async fn lookup_property(
        &self,
        session_id: &SessionId,
        address: &str,
        catalog: &Catalog,
    ) -> (Option<Decimal>, Option<PropertyEstimate>) {
        let distance = match self.deps.lookup.distance(address).await {
            Ok(distance) => Some(distance),
            Err(error) => {
                warn!(
                    event_name = "funnel.lookup.distance_failed",
                    correlation_id = %session_id.0,
                    error = %error,
                    "distance lookup failed; treating address as outside the service area"
                );
                None
            }
        };
        if distance.map_or(true, |distance| distance > catalog.settings.service_radius()) {
            return (distance, None);
        }

        let estimate = match self.deps.lookup.estimate(address).await {
            Ok(estimate) => estimate,
            Err(error) => {
                warn!(
                    event_name = "funnel.lookup.estimate_failed",
                    correlation_id = %session_id.0,
                    error = %error,
                    "square footage estimate failed; asking for manual entry"
                );
                None
            }
        };
        (distance, estimate)
    }

    async fn run_actions(
        &self,
        handle: &SessionHandle,
        entry: &mut SessionEntry,
        actions: Vec<SessionAction>,
        catalog: &Catalog,
    ) {
        for action in ordered(actions) {
            match action {
                SessionAction::RecomputePrice => {
                    entry.session.recompute(&catalog.services, &catalog.settings);
                }
                SessionAction::PersistDraft { step_completed } => {
                    self.persist(entry, QuoteStatus::Incomplete, step_completed).await;
                }
                SessionAction::PersistSubmitted => {
                    self.persist(entry, QuoteStatus::Submitted, 4).await;
                }
                SessionAction::PersistOutsideArea => {
                    self.persist(entry, QuoteStatus::OutsideArea, 4).await;
                }
                SessionAction::NotifySubmission => {
                    let now = Utc::now();
                    let fields = entry.session.quote_fields(QuoteStatus::Submitted, 4, now);
                    let report = self.deps.mailer.send_submission(&fields, &catalog.settings, now).await;
                    info!(
                        event_name = "funnel.submit.notified",
                        correlation_id = %entry.session.id.0,
                        quote_id = quote_label(&entry.session),
                        business_sent = report.business_sent,
                        customer_sent = report.customer_sent,
                        "submission emails attempted"
                    );
                }
                SessionAction::NotifyOutsideArea => {
                    let now = Utc::now();
                    let fields = entry.session.quote_fields(QuoteStatus::OutsideArea, 4, now);
                    if let Err(error) =
                        self.deps.mailer.send_outside_area(&fields, &catalog.settings, now).await
                    {
                        warn!(
                            event_name = "funnel.outside_area.notify_failed",
                            correlation_id = %entry.session.id.0,
                            quote_id = quote_label(&entry.session),
                            error = %error,
                            "outside-area notification failed"
                        );
                    }
                }
                SessionAction::ArmStalledTimer => self.arm_stalled_timer(handle, entry),
                SessionAction::CancelStalledTimer => {
                    entry.cancel_stalled_timer();
                }
                SessionAction::PromptManualSquareFootage | SessionAction::ShowOutsideAreaNotice => {}
            }
        }
    }

    async fn persist(&self, entry: &mut SessionEntry, status: QuoteStatus, step_completed: u8) {
        let now = Utc::now();
        let fields = entry.session.quote_fields(status, step_completed, now);
        match self.deps.quotes.save_draft(entry.session.quote_id.as_ref(), fields, now).await {
            Ok(outcome) => {
                entry.session.record_save(&outcome);
                info!(
                    event_name = "funnel.quote.saved",
                    correlation_id = %entry.session.id.0,
                    quote_id = %outcome.id.0,
                    status = status.as_str(),
                    step_completed,
                    action = ?outcome.action,
                    "quote persisted"
                );
            }
            Err(error) if status == QuoteStatus::Incomplete => warn!(
                event_name = "funnel.autosave.persist_failed",
                correlation_id = %entry.session.id.0,
                quote_id = quote_label(&entry.session),
                step_completed,
                error = %error,
                "draft autosave failed"
            ),
            Err(error) => tracing::error!(
                event_name = "funnel.submit.persist_failed",
                correlation_id = %entry.session.id.0,
                quote_id = quote_label(&entry.session),
                status = status.as_str(),
                error = %error,
                "final quote save failed; customer flow continues"
            ),
        }
    }

    fn arm_stalled_timer(&self, handle: &SessionHandle, entry: &mut SessionEntry) {
        let session = Arc::downgrade(handle);
        let mailer = self.deps.mailer.clone();
        let catalog = self.deps.catalog.clone();
        let delay = self.stalled_notice_after;

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(handle) = session.upgrade() else {
                return;
            };
            let mut entry = handle.lock().await;
            entry.clear_fired_timer();
            entry.session.stalled_timer_armed = false;
            if entry.session.step != SessionStep::AddonsAndSubmit
                || !entry.session.stalled_notice_ready()
            {
                return;
            }

            let settings = match catalog.current().await {
                Ok(catalog) => catalog.settings.clone(),
                Err(error) => {
                    warn!(
                        event_name = "funnel.stalled_notice.failed",
                        correlation_id = %entry.session.id.0,
                        error = %error,
                        "could not load settings for stalled notice"
                    );
                    return;
                }
            };
            let now = Utc::now();
            let fields = entry.session.quote_fields(QuoteStatus::Incomplete, 2, now);
            match mailer.send_stalled_notice(&fields, &settings, now).await {
                Ok(()) => {
                    entry.session.mark_stalled_notice_sent();
                    info!(
                        event_name = "funnel.stalled_notice.sent",
                        correlation_id = %entry.session.id.0,
                        quote_id = quote_label(&entry.session),
                        "customer idle on the final step; business notified"
                    );
                }
                Err(error) => warn!(
                    event_name = "funnel.stalled_notice.failed",
                    correlation_id = %entry.session.id.0,
                    quote_id = quote_label(&entry.session),
                    error = %error,
                    "stalled notice could not be delivered"
                ),
            }
        });
        entry.replace_stalled_timer(task);
    }

    async fn entry(&self, id: &SessionId) -> Result<SessionHandle, FunnelError> {
        self.registry.get(id).await.ok_or_else(|| FunnelError::SessionNotFound(id.0.clone()))
    }

    async fn catalog(&self) -> Arc<Catalog> {
        match self.deps.catalog.current().await {
            Ok(catalog) => catalog,
            Err(error) => {
                warn!(
                    event_name = "funnel.catalog.unavailable",
                    error = %error,
                    "catalog unavailable; falling back to default settings"
                );
                Arc::new(Catalog { services: Vec::new(), settings: Default::default() })
            }
        }
    }
}

/// Merges the actions of a field edit and a transition into execution order:
/// price first, then at most one save, then email, then timers.
fn ordered(actions: Vec<SessionAction>) -> Vec<SessionAction> {
    let mut merged: Vec<SessionAction> = Vec::new();
    for action in actions {
        if is_persist(&action) {
            merged.retain(|existing| !is_persist(existing));
        }
        if action == SessionAction::CancelStalledTimer {
            merged.retain(|existing| *existing != SessionAction::ArmStalledTimer);
        }
        if !merged.contains(&action) {
            merged.push(action);
        }
    }
    merged.sort_by_key(phase);
    merged
}

fn is_persist(action: &SessionAction) -> bool {
    matches!(
        action,
        SessionAction::PersistDraft { .. }
            | SessionAction::PersistSubmitted
            | SessionAction::PersistOutsideArea
    )
}

fn phase(action: &SessionAction) -> u8 {
    match action {
        SessionAction::RecomputePrice => 0,
        SessionAction::PersistDraft { .. }
        | SessionAction::PersistSubmitted
        | SessionAction::PersistOutsideArea => 1,
        SessionAction::NotifySubmission | SessionAction::NotifyOutsideArea => 2,
        SessionAction::ArmStalledTimer | SessionAction::CancelStalledTimer => 3,
        SessionAction::PromptManualSquareFootage | SessionAction::ShowOutsideAreaNotice => 4,
    }
}

fn audit_context(session: &QuoteSession) -> AuditContext {
    AuditContext::new(session.quote_id.clone(), Some(session.id.0.clone()), session.id.0.clone(), ACTOR)
}

fn quote_label(session: &QuoteSession) -> &str {
    session.quote_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unassigned")
}
