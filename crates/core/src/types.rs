use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::phone;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifies one interactive operator session.
pub type SessionId = uuid::Uuid;

/// Identity of a WhatsApp-connected sending account.
///
/// The inner value is the normalized phone number of the account. It is the
/// only key used for locking, queueing and result partitioning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Build an account id from whatever the operator typed.
    ///
    /// The input is normalized with [`phone::normalize`]; only full
    /// international numbers (13 digits) are accepted.
    pub fn from_phone(raw: &str) -> Result<Self, CoreError> {
        let normalized = phone::normalize(raw);
        if normalized.len() != phone::ACCOUNT_ID_LEN {
            return Err(CoreError::Validation(format!(
                "Invalid account phone number: \"{raw}\""
            )));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
