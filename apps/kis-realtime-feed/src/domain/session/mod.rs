//! Feed Session Identity
//!
//! The caller identity handed to the supervisor when a feed session starts.
//! The approval key is issued by the venue's REST token endpoint, which is
//! outside this crate.

use std::fmt;
use std::str::FromStr;

/// Venue customer classification sent with every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CustomerType {
    /// Individual account (`P`).
    #[default]
    Personal,
    /// Corporate account (`B`).
    Corporate,
}

impl CustomerType {
    /// Wire code for the `custtype` header.
    #[must_use]
    pub const fn as_code(&self) -> &'static str {
        match self {
            Self::Personal => "P",
            Self::Corporate => "B",
        }
    }
}

/// Unknown customer type code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown customer type '{0}': expected P or B")]
pub struct CustomerTypeError(pub String);

impl FromStr for CustomerType {
    type Err = CustomerTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "P" => Ok(Self::Personal),
            "B" => Ok(Self::Corporate),
            _ => Err(CustomerTypeError(s.to_string())),
        }
    }
}

/// Identity of the user a feed session runs for.
#[derive(Clone, PartialEq, Eq)]
pub struct FeedPrincipal {
    /// Application user id, used for logging only.
    pub user_id: String,
    /// Venue-issued realtime approval key. Required to start a session.
    pub approval_key: Option<String>,
    /// Customer classification.
    pub customer_type: CustomerType,
    /// HTS account id. When set, execution notices for this account are
    /// subscribed alongside market data.
    pub hts_id: Option<String>,
    /// Whether the account is a demo (paper) account.
    pub demo: bool,
}

impl FeedPrincipal {
    /// Create a principal with no approval key.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            approval_key: None,
            customer_type: CustomerType::default(),
            hts_id: None,
            demo: false,
        }
    }

    /// Set the approval key.
    #[must_use]
    pub fn with_approval_key(mut self, key: impl Into<String>) -> Self {
        self.approval_key = Some(key.into());
        self
    }

    /// Set the HTS account id.
    #[must_use]
    pub fn with_hts_id(mut self, hts_id: impl Into<String>) -> Self {
        self.hts_id = Some(hts_id.into());
        self
    }

    /// Set the customer type.
    #[must_use]
    pub const fn with_customer_type(mut self, customer_type: CustomerType) -> Self {
        self.customer_type = customer_type;
        self
    }

    /// Mark the account as demo or real.
    #[must_use]
    pub const fn with_demo(mut self, demo: bool) -> Self {
        self.demo = demo;
        self
    }
}

impl fmt::Debug for FeedPrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedPrincipal")
            .field("user_id", &self.user_id)
            .field(
                "approval_key",
                &self.approval_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("customer_type", &self.customer_type)
            .field("hts_id", &self.hts_id)
            .field("demo", &self.demo)
            .finish()
    }
}
