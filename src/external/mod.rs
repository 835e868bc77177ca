mod notifications;
mod payments;

pub use notifications::{
    Event, HttpNotifier, LogNotifier, Notification, Notifier, Recipient, RecordingNotifier,
};
pub use payments::{HttpPaymentService, LocalPaymentService, PaymentService};
