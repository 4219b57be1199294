use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Init,
    Collecting,
    ReadyForExtraction,
    Extracting,
    Drafting,
    Complete,
    Blocked,
    Failed,
    Expired,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Collecting => "collecting",
            Self::ReadyForExtraction => "ready_for_extraction",
            Self::Extracting => "extracting",
            Self::Drafting => "drafting",
            Self::Complete => "complete",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    /// States on the main line from `Init` to `Drafting`.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Init | Self::Collecting | Self::ReadyForExtraction | Self::Extracting | Self::Drafting
        )
    }

    pub fn accepts_chat(&self) -> bool {
        matches!(self, Self::Collecting | Self::ReadyForExtraction)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
    CollectionStarted,
    ReadinessSignalled,
    ExtractionRequested,
    FieldsMissing,
    ExtractionSucceeded,
    ExtractionFailed,
    DraftAccepted,
    DraftRejected,
    DraftFailed,
    ViolationThresholdReached,
    TtlElapsed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlowContext {
    pub missing_required_fields: Vec<String>,
}

impl FlowContext {
    pub fn with_missing(missing_required_fields: Vec<String>) -> Self {
        Self { missing_required_fields }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowAction {
    PromptForMissingFields,
    RunExtraction,
    InvokeDrafter,
    DeliverDocument,
    RefuseFurtherChat,
    EvictSession,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: SessionState,
    pub to: SessionState,
    pub event: SessionEvent,
    pub actions: Vec<FlowAction>,
}
