use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub i64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub local_name: String,
    pub address: String,
    pub phone: String,
    pub sender_id: String,
    pub created_at: DateTime<Utc>,
}

/// Registration payload handed to the client store once every field is known.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewClient {
    pub name: String,
    pub local_name: String,
    pub address: String,
    pub phone: String,
    pub sender_id: String,
}

/// Channel-level identity of whoever sent a message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SenderIdentity {
    pub sender_id: String,
    pub phone_number: Option<String>,
}

impl SenderIdentity {
    pub fn new(sender_id: impl Into<String>, phone_number: Option<String>) -> Self {
        Self { sender_id: sender_id.into(), phone_number }
    }

    pub fn phone(&self) -> Option<&str> {
        self.phone_number.as_deref().map(str::trim).filter(|phone| !phone.is_empty())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientField {
    Name,
    LocalName,
    Address,
}

impl ClientField {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Name => "your name",
            Self::LocalName => "the name of your business",
            Self::Address => "the delivery address",
        }
    }
}

/// Partially collected registration data. Never persisted until complete.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDraft {
    pub name: Option<String>,
    pub local_name: Option<String>,
    pub address: Option<String>,
}

impl ClientDraft {
    pub fn new(name: Option<String>, local_name: Option<String>, address: Option<String>) -> Self {
        Self { name: clean(name), local_name: clean(local_name), address: clean(address) }
    }

    pub fn missing_fields(&self) -> Vec<ClientField> {
        let mut missing = Vec::new();
        if self.name.is_none() {
            missing.push(ClientField::Name);
        }
        if self.local_name.is_none() {
            missing.push(ClientField::LocalName);
        }
        if self.address.is_none() {
            missing.push(ClientField::Address);
        }
        missing
    }

    pub fn is_empty(&self) -> bool {
        self.missing_fields().len() == 3
    }

    /// Fields present in `self` win; gaps are filled from `earlier`.
    pub fn merged_over(&self, earlier: &ClientDraft) -> ClientDraft {
        ClientDraft {
            name: self.name.clone().or_else(|| earlier.name.clone()),
            local_name: self.local_name.clone().or_else(|| earlier.local_name.clone()),
            address: self.address.clone().or_else(|| earlier.address.clone()),
        }
    }

    pub fn complete(&self, identity: &SenderIdentity) -> Option<NewClient> {
        Some(NewClient {
            name: self.name.clone()?,
            local_name: self.local_name.clone()?,
            address: self.address.clone()?,
            phone: identity.phone()?.to_string(),
            sender_id: identity.sender_id.clone(),
        })
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::{ClientDraft, ClientField, SenderIdentity};

    #[test]
    fn blank_fields_count_as_missing() {
        let draft = ClientDraft::new(Some("  ".to_string()), Some("Bar Sol".to_string()), None);
        assert_eq!(draft.missing_fields(), vec![ClientField::Name, ClientField::Address]);
    }

    #[test]
    fn merge_keeps_fresh_values_and_fills_gaps() {
        let earlier = ClientDraft::new(Some("Ana".to_string()), Some("Old Name".to_string()), None);
        let fresh = ClientDraft::new(None, Some("Bar Sol".to_string()), Some("Main 12".to_string()));

        let merged = fresh.merged_over(&earlier);
        assert_eq!(merged.name.as_deref(), Some("Ana"));
        assert_eq!(merged.local_name.as_deref(), Some("Bar Sol"));
        assert_eq!(merged.address.as_deref(), Some("Main 12"));
        assert!(merged.missing_fields().is_empty());
    }

    #[test]
    fn completion_requires_phone_number() {
        let draft = ClientDraft::new(
            Some("Ana".to_string()),
            Some("Bar Sol".to_string()),
            Some("Main 12".to_string()),
        );

        assert!(draft.complete(&SenderIdentity::new("s-1", None)).is_none());
        let client = draft
            .complete(&SenderIdentity::new("s-1", Some("+5491100".to_string())))
            .expect("complete draft with phone");
        assert_eq!(client.phone, "+5491100");
        assert_eq!(client.sender_id, "s-1");
    }
}
