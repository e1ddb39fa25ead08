pub mod events;
pub mod product;

pub use events::BookingEvent;
pub use product::{ProductType, Provider};
