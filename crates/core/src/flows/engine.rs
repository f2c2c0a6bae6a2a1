use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{
    FieldIssue, FlowContext, SessionAction, SessionEvent, SessionStep, TransitionOutcome,
};

pub trait FlowDefinition {
    fn initial_state(&self) -> SessionStep;
    fn transition(
        &self,
        current: &SessionStep,
        event: &SessionEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

#[derive(Clone, Debug, Default)]
pub struct QuoteFunnelFlow;

impl FlowDefinition for QuoteFunnelFlow {
    fn initial_state(&self) -> SessionStep {
        SessionStep::PropertyInfo
    }

    fn transition(
        &self,
        current: &SessionStep,
        event: &SessionEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_quote_funnel(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> SessionStep {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &SessionStep,
        event: &SessionEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &SessionStep,
        event: &SessionEvent,
        context: &FlowContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit.quote_id.clone(),
                        audit.session_id.clone(),
                        audit.correlation_id.clone(),
                        "flow.transition_applied",
                        AuditCategory::Flow,
                        audit.actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", format!("{:?}", outcome.from))
                    .with_metadata("to", format!("{:?}", outcome.to))
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit.quote_id.clone(),
                        audit.session_id.clone(),
                        audit.correlation_id.clone(),
                        "flow.transition_rejected",
                        AuditCategory::Flow,
                        audit.actor.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<QuoteFunnelFlow> {
    fn default() -> Self {
        Self::new(QuoteFunnelFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("missing required fields before leaving {state:?}: {missing_fields:?}")]
    MissingRequiredFields { state: SessionStep, missing_fields: Vec<String> },
    #[error("invalid {field}: {reason}")]
    InvalidField { state: SessionStep, field: String, reason: String },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: SessionStep, event: SessionEvent },
}

impl FlowTransitionError {
    /// Inline message for the customer-facing form.
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingRequiredFields { missing_fields, .. } => {
                let labels: Vec<&str> =
                    missing_fields.iter().map(|field| field_label(field)).collect();
                format!("Please fill in all required fields: {}", labels.join(", "))
            }
            Self::InvalidField { reason, .. } => reason.clone(),
            Self::InvalidTransition { .. } => {
                "This step is not available right now. Please refresh and try again.".to_string()
            }
        }
    }
}

fn field_label(field: &str) -> &str {
    match field {
        "customer_name" => "name",
        "customer_email" => "email",
        "customer_phone" => "phone",
        "address" => "address",
        "stories" => "number of stories",
        "service_type" => "service type",
        "square_footage" => "square footage",
        other => other,
    }
}

fn transition_quote_funnel(
    current: &SessionStep,
    event: &SessionEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use SessionAction::{
        ArmStalledTimer, CancelStalledTimer, NotifyOutsideArea, NotifySubmission, PersistDraft,
        PersistOutsideArea, PersistSubmitted, PromptManualSquareFootage, RecomputePrice,
        ShowOutsideAreaNotice,
    };
    use SessionEvent::{
        BackRequested, ManualSquareFootageEntered, OutsideAreaContactSubmitted, PropertyResolved,
        ServiceSelected, SubmitRequested,
    };
    use SessionStep::{
        AddonsAndSubmit, ManualSquareFootage, OutsideArea, OutsideAreaSubmitted, PropertyInfo,
        ServiceSelection, Submitted,
    };

    let (to, actions) = match (current, event) {
        (PropertyInfo, PropertyResolved) => {
            require_fields(current, context)?;
            if context.outside_service_area {
                (OutsideArea, vec![ShowOutsideAreaNotice])
            } else if !context.square_footage_known {
                (ManualSquareFootage, vec![PromptManualSquareFootage])
            } else {
                (ServiceSelection, vec![PersistDraft { step_completed: 1 }, RecomputePrice])
            }
        }
        (ManualSquareFootage, ManualSquareFootageEntered) => {
            require_fields(current, context)?;
            (ServiceSelection, vec![PersistDraft { step_completed: 1 }, RecomputePrice])
        }
        (ServiceSelection, ServiceSelected) => {
            require_fields(current, context)?;
            let mut actions = vec![PersistDraft { step_completed: 2 }, RecomputePrice];
            if context.stalled_notice_ready {
                actions.push(ArmStalledTimer);
            }
            (AddonsAndSubmit, actions)
        }
        (AddonsAndSubmit, SubmitRequested) => {
            require_fields(current, context)?;
            (Submitted, vec![CancelStalledTimer, RecomputePrice, PersistSubmitted, NotifySubmission])
        }
        (OutsideArea, OutsideAreaContactSubmitted) => {
            require_fields(current, context)?;
            (OutsideAreaSubmitted, vec![PersistOutsideArea, NotifyOutsideArea])
        }
        (AddonsAndSubmit, BackRequested) => (ServiceSelection, vec![CancelStalledTimer]),
        (ServiceSelection, BackRequested)
        | (ManualSquareFootage, BackRequested)
        | (OutsideArea, BackRequested) => (PropertyInfo, Vec::new()),
        _ => {
            return Err(FlowTransitionError::InvalidTransition { state: *current, event: *event });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: *event, actions })
}

fn require_fields(state: &SessionStep, context: &FlowContext) -> Result<(), FlowTransitionError> {
    if !context.missing_required_fields.is_empty() {
        return Err(FlowTransitionError::MissingRequiredFields {
            state: *state,
            missing_fields: context.missing_required_fields.clone(),
        });
    }
    if let Some(FieldIssue { field, reason }) = context.invalid_fields.first() {
        return Err(FlowTransitionError::InvalidField {
            state: *state,
            field: field.clone(),
            reason: reason.clone(),
        });
    }
    Ok(())
}
