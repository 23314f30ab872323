//! Chat messages flowing between tenants, the host and plugins.

use serde::{Deserialize, Serialize};

use crate::{ApiError, Result, TenantKey};

/// Where a message came from, and where a reply goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    /// Sender user id on the tenant.
    pub user_id: String,
    /// Channel id on the tenant.
    pub channel_id: String,
    /// Tenant that produced the message.
    pub tenant_key: TenantKey,
}

impl Address {
    /// Create an address.
    pub fn new(
        user_id: impl Into<String>,
        channel_id: impl Into<String>,
        tenant_key: TenantKey,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            channel_id: channel_id.into(),
            tenant_key,
        }
    }
}

/// Single key/value attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentProperty {
    pub key: String,
    pub value: String,
}

impl AttachmentProperty {
    pub fn with(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Rich attachment rendered by the tenant.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub properties: Vec<AttachmentProperty>,
}

/// A chat message on a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantMessage {
    /// Message text.
    pub text: String,
    /// Sender address. Replies go back here.
    pub address: Address,
    /// Optional attachments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl TenantMessage {
    /// Create a message. Empty text is rejected.
    pub fn new(text: impl Into<String>, address: Address) -> Result<Self> {
        let text = text.into();
        if text.is_empty() {
            return Err(ApiError::EmptyMessage);
        }
        Ok(Self {
            text,
            address,
            attachments: Vec::new(),
        })
    }

    /// Build a reply to the same address.
    ///
    /// Non-empty `properties` become a single attachment.
    pub fn create_reply(
        &self,
        text: impl Into<String>,
        properties: Vec<AttachmentProperty>,
    ) -> Result<Self> {
        let mut reply = Self::new(text, self.address.clone())?;
        if !properties.is_empty() {
            reply.attachments.push(Attachment { properties });
        }
        Ok(reply)
    }
}

/// Outcome of offering a message to a processing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessMessageResult {
    /// The stage took ownership of the message.
    Handled,
    /// The stage ignored the message; try the next one.
    Skipped,
}

impl ProcessMessageResult {
    pub fn is_handled(self) -> bool {
        matches!(self, Self::Handled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> Address {
        Address::new("u1", "c1", TenantKey::new("console"))
    }

    #[test]
    fn test_empty_text_rejected() {
        assert_eq!(
            TenantMessage::new("", address()),
            Err(ApiError::EmptyMessage)
        );
    }

    #[test]
    fn test_reply_keeps_address_and_wraps_properties() {
        let message = TenantMessage::new("ping hello", address()).unwrap();

        let plain = message.create_reply("pong", vec![]).unwrap();
        assert_eq!(plain.address, message.address);
        assert!(plain.attachments.is_empty());

        let rich = message
            .create_reply(
                "pong",
                vec![
                    AttachmentProperty::with("text", "ping hello"),
                    AttachmentProperty::with("color", "#333333"),
                ],
            )
            .unwrap();
        assert_eq!(rich.attachments.len(), 1);
        assert_eq!(rich.attachments[0].properties.len(), 2);
    }

    #[test]
    fn test_wire_shape() {
        let message = TenantMessage::new("help", address()).unwrap();
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["address"]["tenantKey"], "console");
        assert!(json.get("attachments").is_none());

        let back: TenantMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, message);
    }
}
