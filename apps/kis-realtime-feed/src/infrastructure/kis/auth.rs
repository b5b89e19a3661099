//! KIS Session Authentication
//!
//! The realtime feed has no login handshake. Every outbound command carries
//! the approval key and customer type in its header, so the session only
//! needs to hold those two values.

use crate::domain::session::{CustomerType, FeedPrincipal};

/// Errors building session authentication.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The principal has no approval key, or it is blank.
    #[error("missing realtime approval key for user '{0}'")]
    MissingApprovalKey(String),

    /// A raw approval key was blank.
    #[error("realtime approval key is blank")]
    BlankApprovalKey,
}

/// Header values attached to every command of a feed session.
///
/// The `Debug` and `Display` implementations redact the approval key.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionAuth {
    approval_key: String,
    customer_type: CustomerType,
}

impl SessionAuth {
    /// Create session auth from raw values.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::BlankApprovalKey`] if the key is blank.
    pub fn new(
        approval_key: impl Into<String>,
        customer_type: CustomerType,
    ) -> Result<Self, AuthError> {
        let approval_key = approval_key.into();
        if approval_key.trim().is_empty() {
            return Err(AuthError::BlankApprovalKey);
        }
        Ok(Self {
            approval_key,
            customer_type,
        })
    }

    /// Build session auth for a principal.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingApprovalKey`] if the principal carries no
    /// usable approval key.
    pub fn from_principal(principal: &FeedPrincipal) -> Result<Self, AuthError> {
        match principal.approval_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(Self {
                approval_key: key.to_string(),
                customer_type: principal.customer_type,
            }),
            _ => Err(AuthError::MissingApprovalKey(principal.user_id.clone())),
        }
    }

    /// Get the approval key.
    #[must_use]
    pub fn approval_key(&self) -> &str {
        &self.approval_key
    }

    /// Get the `custtype` header code.
    #[must_use]
    pub const fn custtype(&self) -> &'static str {
        self.customer_type.as_code()
    }
}

impl std::fmt::Debug for SessionAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionAuth")
            .field("approval_key", &"[REDACTED]")
            .field("customer_type", &self.customer_type)
            .finish()
    }
}

impl std::fmt::Display for SessionAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionAuth(custtype={})", self.custtype())
    }
}
