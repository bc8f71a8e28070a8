use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::limits::MAX_MAILBOX_NOTICES;
use crate::model::Ms;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Created,
    Confirmed,
    Canceled,
    Missed,
}

impl NoticeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NoticeKind::Created => "created",
            NoticeKind::Confirmed => "confirmed",
            NoticeKind::Canceled => "canceled",
            NoticeKind::Missed => "missed",
        }
    }
}

/// Lifecycle event payload handed to the delivery collaborator. Transport
/// and formatting beyond `message` are the collaborator's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub appointment_id: Ulid,
    pub customer_id: Ulid,
    pub staff_id: Ulid,
    pub message: String,
    pub occurred_at: Ms,
}

/// Fan-out hub for lifecycle notices, keyed by recipient user id.
///
/// Each notice lands in a bounded retained mailbox (pollable through the
/// `notices` table) and on a broadcast channel for in-process subscribers.
/// Sending is fire-and-forget: a committed transition is never rolled back
/// because nobody was listening.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notice>>,
    mailboxes: DashMap<Ulid, Vec<Notice>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            mailboxes: DashMap::new(),
        }
    }

    /// Subscribe to notices for a recipient. Creates the channel if needed.
    pub fn subscribe(&self, recipient: Ulid) -> broadcast::Receiver<Notice> {
        let sender = self
            .channels
            .entry(recipient)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Deliver a notice to both affected parties. Never fails.
    pub fn send(&self, notice: &Notice) {
        self.deliver(notice.customer_id, notice);
        if notice.staff_id != notice.customer_id {
            self.deliver(notice.staff_id, notice);
        }
    }

    fn deliver(&self, recipient: Ulid, notice: &Notice) {
        let mut mailbox = self.mailboxes.entry(recipient).or_default();
        if mailbox.len() >= MAX_MAILBOX_NOTICES {
            mailbox.remove(0);
        }
        mailbox.push(notice.clone());
        drop(mailbox);

        if let Some(sender) = self.channels.get(&recipient) {
            // No subscribers is fine; delivery is best-effort.
            let _ = sender.send(notice.clone());
        }
    }

    /// Retained notices for a recipient, oldest first.
    pub fn mailbox(&self, recipient: &Ulid) -> Vec<Notice> {
        self.mailboxes
            .get(recipient)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(kind: NoticeKind, customer: Ulid, staff: Ulid) -> Notice {
        Notice {
            kind,
            appointment_id: Ulid::new(),
            customer_id: customer,
            staff_id: staff,
            message: "test".into(),
            occurred_at: 0,
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let customer = Ulid::new();
        let staff = Ulid::new();
        let mut rx = hub.subscribe(customer);

        let n = notice(NoticeKind::Created, customer, staff);
        hub.send(&n);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, n);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        // No subscriber — should not panic
        hub.send(&notice(NoticeKind::Canceled, Ulid::new(), Ulid::new()));
    }

    #[test]
    fn both_parties_get_a_mailbox_copy() {
        let hub = NotifyHub::new();
        let customer = Ulid::new();
        let staff = Ulid::new();
        hub.send(&notice(NoticeKind::Confirmed, customer, staff));

        assert_eq!(hub.mailbox(&customer).len(), 1);
        assert_eq!(hub.mailbox(&staff).len(), 1);
        assert!(hub.mailbox(&Ulid::new()).is_empty());
    }

    #[test]
    fn self_booking_staff_not_duplicated() {
        let hub = NotifyHub::new();
        let user = Ulid::new();
        hub.send(&notice(NoticeKind::Created, user, user));
        assert_eq!(hub.mailbox(&user).len(), 1);
    }

    #[test]
    fn mailbox_is_bounded() {
        let hub = NotifyHub::new();
        let customer = Ulid::new();
        let staff = Ulid::new();
        for _ in 0..(MAX_MAILBOX_NOTICES + 10) {
            hub.send(&notice(NoticeKind::Created, customer, staff));
        }
        assert_eq!(hub.mailbox(&customer).len(), MAX_MAILBOX_NOTICES);
    }

    #[test]
    fn notice_serializes_to_json() {
        let n = notice(NoticeKind::Missed, Ulid::new(), Ulid::new());
        let json = serde_json::to_string(&n).unwrap();
        assert!(json.contains("\"kind\":\"missed\""));
    }
}
