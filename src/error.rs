use std::fmt;

use thiserror::Error;

/// Upstream service a request was aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Live,
    Archive,
}

impl Service {
    pub fn label(self) -> &'static str {
        match self {
            Service::Live => "live",
            Service::Archive => "archive",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("request to {service} source never reached the network")]
    TransportBlocked {
        service: Service,
        help_url: Option<String>,
    },
    #[error("{service} source unavailable: {reason}")]
    ServiceUnavailable {
        service: Service,
        reason: String,
        transport: bool,
    },
    #[error("{service} source has no {what}")]
    NotFound { service: Service, what: String },
    #[error("{service} source denied access to {what}")]
    Forbidden { service: Service, what: String },
    #[error("{service} source quota exhausted")]
    QuotaExceeded {
        service: Service,
        /// Seconds until the server resets the quota, when it said so.
        reset_secs: Option<f64>,
    },
    #[error("{service} source returned an unreadable payload: {reason}")]
    Decode { service: Service, reason: String },
    #[error("operation cancelled")]
    Cancelled,
}

impl SourceError {
    pub fn unavailable(service: Service, reason: impl Into<String>) -> Self {
        SourceError::ServiceUnavailable {
            service,
            reason: reason.into(),
            transport: false,
        }
    }

    /// Errors worth another attempt after a cooldown.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SourceError::ServiceUnavailable { .. }
                | SourceError::QuotaExceeded { .. }
                | SourceError::Decode { .. }
        )
    }

    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SourceError::TransportBlocked { .. }
                | SourceError::ServiceUnavailable {
                    transport: true,
                    ..
                }
        )
    }

    pub fn help_url(&self) -> Option<&str> {
        match self {
            SourceError::TransportBlocked { help_url, .. } => help_url.as_deref(),
            _ => None,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            SourceError::TransportBlocked { .. } => ErrorCode::E101TransportBlocked,
            SourceError::ServiceUnavailable { .. } => ErrorCode::E102ServiceUnavailable,
            SourceError::NotFound { .. } => ErrorCode::E103NotFound,
            SourceError::Forbidden { .. } => ErrorCode::E104Forbidden,
            SourceError::QuotaExceeded { .. } => ErrorCode::E105QuotaExceeded,
            SourceError::Decode { .. } => ErrorCode::E106Decode,
            SourceError::Cancelled => ErrorCode::E107Cancelled,
        }
    }

    /// Message shown through the status sink.
    pub fn user_message(&self) -> String {
        match self {
            SourceError::TransportBlocked { service, .. } => format!(
                "Could not connect to the {service} source; \
                 the request was blocked before it left this machine"
            ),
            SourceError::ServiceUnavailable {
                service: Service::Archive,
                transport: true,
                ..
            } => "Could not get removed comments; the archive service may be down".to_string(),
            SourceError::ServiceUnavailable {
                service: Service::Archive,
                ..
            } => "Could not get removed comments".to_string(),
            SourceError::ServiceUnavailable {
                service: Service::Live,
                ..
            } => "Could not connect to the live source".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    E101TransportBlocked,
    E102ServiceUnavailable,
    E103NotFound,
    E104Forbidden,
    E105QuotaExceeded,
    E106Decode,
    E107Cancelled,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E101TransportBlocked => "E101_TRANSPORT_BLOCKED",
            Self::E102ServiceUnavailable => "E102_SERVICE_UNAVAILABLE",
            Self::E103NotFound => "E103_NOT_FOUND",
            Self::E104Forbidden => "E104_FORBIDDEN",
            Self::E105QuotaExceeded => "E105_QUOTA_EXCEEDED",
            Self::E106Decode => "E106_DECODE",
            Self::E107Cancelled => "E107_CANCELLED",
        }
    }
}
