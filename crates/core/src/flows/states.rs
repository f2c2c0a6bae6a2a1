use serde::{Deserialize, Serialize};

/// Where a customer is in the calculator funnel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStep {
    PropertyInfo,
    ManualSquareFootage,
    ServiceSelection,
    AddonsAndSubmit,
    OutsideArea,
    Submitted,
    OutsideAreaSubmitted,
}

impl SessionStep {
    /// The 1-based form step shown to the customer.
    pub fn number(&self) -> u8 {
        match self {
            Self::PropertyInfo | Self::ManualSquareFootage | Self::OutsideArea => 1,
            Self::ServiceSelection => 2,
            Self::AddonsAndSubmit => 3,
            Self::Submitted | Self::OutsideAreaSubmitted => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Submitted | Self::OutsideAreaSubmitted)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
    PropertyResolved,
    ManualSquareFootageEntered,
    ServiceSelected,
    SubmitRequested,
    OutsideAreaContactSubmitted,
    BackRequested,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    pub field: String,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlowContext {
    pub missing_required_fields: Vec<String>,
    pub invalid_fields: Vec<FieldIssue>,
    pub outside_service_area: bool,
    pub square_footage_known: bool,
    pub stalled_notice_ready: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum SessionAction {
    PersistDraft { step_completed: u8 },
    PersistSubmitted,
    PersistOutsideArea,
    RecomputePrice,
    PromptManualSquareFootage,
    ShowOutsideAreaNotice,
    ArmStalledTimer,
    CancelStalledTimer,
    NotifySubmission,
    NotifyOutsideArea,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: SessionStep,
    pub to: SessionStep,
    pub event: SessionEvent,
    pub actions: Vec<SessionAction>,
}
