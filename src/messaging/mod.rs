pub mod event;
pub mod notifier;

pub use event::{EventType, Notification, NotificationVariant};
pub use notifier::{BroadcastNotifier, Notifier};
