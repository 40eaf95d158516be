pub mod dispatcher;
pub mod service;
pub mod store;

pub use dispatcher::{DispatchJob, EventDispatcher};
pub use service::{DeliveryOutcome, HttpTransport, WebhookService, WebhookTransport};
pub use store::WebhookStore;
