use thiserror::Error;

use crate::flows::FlowTransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(DomainError::FlowTransition(_))
            | ApplicationError::Domain(DomainError::InvariantViolation(_)) => Self::BadRequest {
                message: "domain validation failed".to_owned(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}

/// Everything that can go wrong while answering one message.
///
/// None of these escape the router: each one becomes a reply turn.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TurnFailure {
    #[error("intent classification failed: {0}")]
    Classification(String),
    #[error("{action} extraction failed: {detail}")]
    Extraction { action: &'static str, detail: String },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("order submission failed: {0}")]
    Submission(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl TurnFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Classification(_) => "classification",
            Self::Extraction { .. } => "extraction",
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Submission(_) => "submission",
            Self::Storage(_) => "storage",
        }
    }

    /// Text sent back to the customer.
    pub fn user_message(&self) -> String {
        match self {
            Self::Classification(_) => NOT_UNDERSTOOD_MESSAGE.to_string(),
            Self::Extraction { action, .. } => format!(
                "I couldn't read your {action} request. Could you write it again with a bit more detail?"
            ),
            Self::Validation(message) | Self::NotFound(message) => message.clone(),
            Self::Submission(_) => "We couldn't place your order right now. Your order is still \
                                    pending: reply \"confirm\" to try again or \"cancel\" to discard it."
                .to_string(),
            Self::Storage(_) => {
                "Something went wrong on our side. Please try again in a moment.".to_string()
            }
        }
    }
}

pub const NOT_UNDERSTOOD_MESSAGE: &str = "Sorry, I didn't understand that. You can ask for our \
                                          prices, place an order, check your orders or register \
                                          as a client.";
