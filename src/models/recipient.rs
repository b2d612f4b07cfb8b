use serde::{Deserialize, Serialize};

/// A resolved addressable recipient, as read from the recipient directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientCandidate {
    pub phone: String,
    pub name: Option<String>,
}

impl RecipientCandidate {
    pub fn new(phone: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            phone: phone.into(),
            name: name.map(str::to_string),
        }
    }
}
