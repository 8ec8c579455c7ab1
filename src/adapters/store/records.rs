use crate::domain::message::Message;
use serde::{Deserialize, Serialize};

/// A message as persisted: one document per message, keyed by `_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessageRecord {
    #[serde(rename = "_id")]
    pub(crate) id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub(crate) rev: Option<String>,
    pub(crate) sender_id: String,
    pub(crate) sender_username: String,
    pub(crate) sender_device_id: i64,
    pub(crate) recipient_id: String,
    pub(crate) recipient_username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) recipient_device_id: Option<i64>,
    pub(crate) message_type: String,
    pub(crate) encrypted_payload: String,
    pub(crate) timestamp: i64,
    #[serde(default)]
    pub(crate) delivered: bool,
    #[serde(default)]
    pub(crate) delivered_at: Option<i64>,
    #[serde(default)]
    pub(crate) expires_at: i64,
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: record.id,
            sender_id: record.sender_id,
            sender_username: record.sender_username,
            sender_device_id: record.sender_device_id,
            recipient_id: record.recipient_id,
            recipient_username: record.recipient_username,
            recipient_device_id: record.recipient_device_id,
            message_type: record.message_type,
            encrypted_payload: record.encrypted_payload,
            timestamp: record.timestamp,
            delivered: record.delivered,
            delivered_at: record.delivered_at,
            expires_at: record.expires_at,
            revision: record.rev,
        }
    }
}

impl From<&Message> for MessageRecord {
    fn from(msg: &Message) -> Self {
        Self {
            id: msg.id.clone(),
            rev: msg.revision.clone(),
            sender_id: msg.sender_id.clone(),
            sender_username: msg.sender_username.clone(),
            sender_device_id: msg.sender_device_id,
            recipient_id: msg.recipient_id.clone(),
            recipient_username: msg.recipient_username.clone(),
            recipient_device_id: msg.recipient_device_id,
            message_type: msg.message_type.clone(),
            encrypted_payload: msg.encrypted_payload.clone(),
            timestamp: msg.timestamp,
            delivered: msg.delivered,
            delivered_at: msg.delivered_at,
            expires_at: msg.expires_at,
        }
    }
}
