pub mod email;
pub mod worker;

pub use email::{EmailNotifier, Notifier, NotifyError};
pub use worker::DeliveryWorker;
