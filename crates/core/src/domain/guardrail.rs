use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailClassification {
    Safe,
    AdviceRequest,
    InjectionAttempt,
}

impl GuardrailClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::AdviceRequest => "advice_request",
            Self::InjectionAttempt => "injection_attempt",
        }
    }

    pub fn is_safe(&self) -> bool {
        matches!(self, Self::Safe)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailVerdict {
    pub classification: GuardrailClassification,
    pub matched_rule_id: Option<String>,
    pub reason: String,
}

impl GuardrailVerdict {
    pub fn safe() -> Self {
        Self {
            classification: GuardrailClassification::Safe,
            matched_rule_id: None,
            reason: "no guardrail rule matched".to_string(),
        }
    }

    pub fn is_safe(&self) -> bool {
        self.classification.is_safe()
    }

    /// Message shown to the user in place of a reply.
    pub fn refusal_message(&self) -> Option<&'static str> {
        match self.classification {
            GuardrailClassification::Safe => None,
            GuardrailClassification::InjectionAttempt => Some(
                "I'm unable to process that request. I can only help you collect information for your legal document.",
            ),
            GuardrailClassification::AdviceRequest => Some(
                "I'm not able to provide legal advice. I can only help collect information for your document. Please consult a qualified solicitor for legal guidance.",
            ),
        }
    }
}
