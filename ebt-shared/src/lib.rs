pub mod pii;
pub mod models;

pub use pii::{redact_text, redact_value};
pub use models::{BookingEvent, ProductType, Provider};
