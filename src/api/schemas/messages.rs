use crate::domain::message::Message;
use serde::{Deserialize, Serialize};

/// A submitted message. Missing attributes take their zero value.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessagePayload {
    pub id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub sender_device_id: i64,
    pub recipient_id: String,
    pub recipient_username: String,
    pub recipient_device_id: Option<i64>,
    pub message_type: String,
    pub encrypted_payload: String,
    pub timestamp: i64,
    pub delivered: bool,
    pub delivered_at: Option<i64>,
    pub expires_at: i64,
    #[serde(rename = "_rev")]
    pub revision: Option<String>,
}

impl From<MessagePayload> for Message {
    fn from(payload: MessagePayload) -> Self {
        Self {
            id: payload.id,
            sender_id: payload.sender_id,
            sender_username: payload.sender_username,
            sender_device_id: payload.sender_device_id,
            recipient_id: payload.recipient_id,
            recipient_username: payload.recipient_username,
            recipient_device_id: payload.recipient_device_id,
            message_type: payload.message_type,
            encrypted_payload: payload.encrypted_payload,
            timestamp: payload.timestamp,
            delivered: payload.delivered,
            delivered_at: payload.delivered_at,
            expires_at: payload.expires_at,
            revision: payload.revision.filter(|r| !r.is_empty()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub sender_device_id: i64,
    pub recipient_id: String,
    pub recipient_username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_device_id: Option<i64>,
    pub message_type: String,
    pub encrypted_payload: String,
    pub timestamp: i64,
    pub delivered: bool,
    pub delivered_at: Option<i64>,
    pub expires_at: i64,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

impl From<Message> for MessageResponse {
    fn from(msg: Message) -> Self {
        Self {
            id: msg.id,
            sender_id: msg.sender_id,
            sender_username: msg.sender_username,
            sender_device_id: msg.sender_device_id,
            recipient_id: msg.recipient_id,
            recipient_username: msg.recipient_username,
            recipient_device_id: msg.recipient_device_id,
            message_type: msg.message_type,
            encrypted_payload: msg.encrypted_payload,
            timestamp: msg.timestamp,
            delivered: msg.delivered,
            delivered_at: msg.delivered_at,
            expires_at: msg.expires_at,
            revision: msg.revision,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageListResponse {
    pub messages: Vec<MessageResponse>,
    pub count: usize,
}

impl From<Vec<Message>> for MessageListResponse {
    fn from(messages: Vec<Message>) -> Self {
        let messages: Vec<MessageResponse> = messages.into_iter().map(Into::into).collect();
        Self { count: messages.len(), messages }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub since: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RevisionParams {
    pub rev: Option<String>,
}
