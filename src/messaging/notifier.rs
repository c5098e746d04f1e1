use crate::messaging::event::{Notification, NotificationVariant};
use log::{info, warn};
use tokio::sync::broadcast;

/// Sink for user-facing notifications
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Fans notifications out to every connected dashboard
#[derive(Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, notification: Notification) {
        match notification.variant {
            NotificationVariant::Destructive => warn!(
                "[{}] {}: {}",
                notification.routing_key(),
                notification.title,
                notification.description
            ),
            NotificationVariant::Default => info!(
                "[{}] {}: {}",
                notification.routing_key(),
                notification.title,
                notification.description
            ),
        }

        // No subscribers simply means nobody is looking at the dashboard
        let _ = self.sender.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::EventType;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_subscribers_receive_notifications() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();

        let camera_id = Uuid::new_v4();
        notifier.notify(
            Notification::new(EventType::AccidentDetected, "Accident Detected!", "cam")
                .destructive()
                .for_camera(camera_id),
        );

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type, EventType::AccidentDetected);
        assert_eq!(received.variant, NotificationVariant::Destructive);
        assert_eq!(
            received.routing_key(),
            format!("detection.accident.{}", camera_id)
        );
    }

    #[test]
    fn test_notify_without_subscribers_is_harmless() {
        let notifier = BroadcastNotifier::new(1);
        notifier.notify(Notification::new(EventType::MediaError, "t", "d"));
    }
}
