use time::Duration;

/// Lifetime given to a message submitted without an expiry.
pub const DEFAULT_MESSAGE_TTL: Duration = Duration::days(30);

/// An encrypted message waiting for its recipient.
///
/// The payload is opaque to the node; only the routing and lifecycle
/// attributes are interpreted. Times are unix epoch seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
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
    /// Zero only on input, before a default has been assigned.
    pub expires_at: i64,
    /// Store-assigned concurrency token; changes on every write.
    pub revision: Option<String>,
}

impl Message {
    /// A message is live until the clock passes `expires_at`. An unset
    /// expiry never expires.
    #[must_use]
    pub const fn is_live_at(&self, now: i64) -> bool {
        self.expires_at == 0 || now <= self.expires_at
    }

    #[must_use]
    pub const fn is_expired_at(&self, now: i64) -> bool {
        !self.is_live_at(now)
    }

    /// Fills in the default expiry relative to `now` when none was given.
    pub const fn apply_default_expiry(&mut self, now: i64) {
        if self.expires_at == 0 {
            self.expires_at = now + DEFAULT_MESSAGE_TTL.whole_seconds();
        }
    }

    pub const fn mark_delivered(&mut self, now: i64) {
        self.delivered = true;
        self.delivered_at = Some(now);
    }
}
