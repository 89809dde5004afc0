//! Structured refusal reasons carried in rejections, deletions and error responses.

use serde::{Deserialize, Serialize};

/// Well-known reason codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum ReasonCode {
    MissingOrInvalid = 1000,
    NoMatchingTopic = 1100,
    UnauthorizedTargetChain = 3000,
    UnauthorizedJsonRpcMethod = 3001,
    UnauthorizedNotificationType = 3002,
    UnauthorizedUpdateRequest = 3003,
    UnauthorizedUpgradeRequest = 3004,
    UnauthorizedMatchingController = 3005,
    NotApproved = 5000,
    UserDisconnected = 6000,
    Expired = 8000,
    UnknownJsonRpcMethod = 10001,
}

impl ReasonCode {
    pub fn default_message(self) -> &'static str {
        match self {
            Self::MissingOrInvalid => "Missing or invalid parameters",
            Self::NoMatchingTopic => "No matching sequence for topic",
            Self::UnauthorizedTargetChain => "Unauthorized target chain",
            Self::UnauthorizedJsonRpcMethod => "Unauthorized JSON-RPC method",
            Self::UnauthorizedNotificationType => "Unauthorized notification type",
            Self::UnauthorizedUpdateRequest => "Unauthorized update request",
            Self::UnauthorizedUpgradeRequest => "Unauthorized upgrade request",
            Self::UnauthorizedMatchingController => "Unauthorized: both peers claim the controller role",
            Self::NotApproved => "Proposal not approved",
            Self::UserDisconnected => "User disconnected",
            Self::Expired => "Sequence expired",
            Self::UnknownJsonRpcMethod => "Unknown JSON-RPC method",
        }
    }
}

/// Numeric code plus human readable message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    pub code: i64,
    pub message: String,
}

impl Reason {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn from_code(code: ReasonCode) -> Self {
        Self::new(code as i64, code.default_message())
    }

    /// Well-known code with a more specific message.
    pub fn with_message(code: ReasonCode, message: impl Into<String>) -> Self {
        Self::new(code as i64, message)
    }

    pub fn user_disconnected() -> Self {
        Self::from_code(ReasonCode::UserDisconnected)
    }

    pub fn not_approved() -> Self {
        Self::from_code(ReasonCode::NotApproved)
    }

    pub fn is(&self, code: ReasonCode) -> bool {
        self.code == code as i64
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ReasonCode::MissingOrInvalid as i64, 1000);
        assert_eq!(ReasonCode::UnauthorizedMatchingController as i64, 3005);
        assert_eq!(ReasonCode::UnknownJsonRpcMethod as i64, 10001);
    }

    #[test]
    fn reason_matches_code() {
        let reason = Reason::with_message(ReasonCode::Expired, "pairing expired");
        assert!(reason.is(ReasonCode::Expired));
        assert!(!reason.is(ReasonCode::NotApproved));
        assert_eq!(reason.to_string(), "pairing expired (8000)");
    }
}
