use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelEnvelope {
    pub envelope_id: String,
    pub event: ChannelEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    Message(InboundMessage),
    Unsupported { event_type: String },
}

impl ChannelEvent {
    pub fn event_type(&self) -> &str {
        match self {
            Self::Message(_) => "message",
            Self::Unsupported { event_type } => event_type,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    #[default]
    Direct,
    Group,
}

/// A text message as delivered by the messaging channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub chat: ChatKind,
    #[serde(default)]
    pub from_self: bool,
    pub text: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    GroupChat,
    SelfAuthored,
    EmptyText,
}

impl IgnoreReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GroupChat => "group_chat",
            Self::SelfAuthored => "self_authored",
            Self::EmptyText => "empty_text",
        }
    }
}

impl InboundMessage {
    /// Only direct, non-empty messages written by someone else reach the core.
    pub fn accept(&self) -> Result<(), IgnoreReason> {
        if self.from_self {
            return Err(IgnoreReason::SelfAuthored);
        }
        if self.chat == ChatKind::Group {
            return Err(IgnoreReason::GroupChat);
        }
        if self.text.trim().is_empty() {
            return Err(IgnoreReason::EmptyText);
        }
        Ok(())
    }

    /// Empty or whitespace-only phone numbers count as absent.
    pub fn phone(&self) -> Option<&str> {
        self.phone_number.as_deref().map(str::trim).filter(|phone| !phone.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelReply {
    pub recipient: String,
    pub text: String,
}

/// The conversational core as seen from the channel: one reply per message.
#[async_trait]
pub trait ConversationService: Send + Sync {
    async fn respond(&self, message: &InboundMessage, ctx: &EventContext) -> String;
}

#[cfg(test)]
mod tests {
    use super::{ChatKind, IgnoreReason, InboundMessage};

    fn message(text: &str) -> InboundMessage {
        InboundMessage {
            message_id: "wamid-1".to_owned(),
            sender_id: "5491155550000@s.whatsapp.net".to_owned(),
            phone_number: Some("5491155550000".to_owned()),
            chat: ChatKind::Direct,
            from_self: false,
            text: text.to_owned(),
        }
    }

    #[test]
    fn direct_messages_are_accepted() {
        assert_eq!(message("precios").accept(), Ok(()));
    }

    #[test]
    fn group_self_and_empty_messages_are_ignored() {
        let group = InboundMessage { chat: ChatKind::Group, ..message("precios") };
        let own = InboundMessage { from_self: true, ..message("precios") };

        assert_eq!(group.accept(), Err(IgnoreReason::GroupChat));
        assert_eq!(own.accept(), Err(IgnoreReason::SelfAuthored));
        assert_eq!(message("   ").accept(), Err(IgnoreReason::EmptyText));
    }

    #[test]
    fn webhook_payload_defaults_to_direct_chat() {
        let parsed: InboundMessage = serde_json::from_str(
            r#"{"message_id":"m1","sender_id":"s1","phone_number":" ","text":"hola"}"#,
        )
        .expect("payload parses");

        assert_eq!(parsed.chat, ChatKind::Direct);
        assert!(!parsed.from_self);
        assert_eq!(parsed.phone(), None);
    }
}
