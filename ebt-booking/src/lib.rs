pub mod cancellation;
pub mod events;
pub mod lifecycle;
pub mod memory;
pub mod models;
pub mod reconciliation;
pub mod repository;
pub mod settlement;

pub use cancellation::{CancellationAction, CancellationQueue, ProcessOutcome, ProcessRequest};
pub use lifecycle::{BookingDeps, BookingEngine, CancellationOutcome, PaymentIntentIssued};
pub use memory::{InMemoryBookingRepository, InMemoryCancellationRequests};
pub use models::{
    Booking, BookingStatus, CancellationRequest, CancellationRequestStatus, DisputeEvidence, DriverDetails,
    NewBooking, PaymentStatus, RefundStatus,
};
pub use reconciliation::ReconciliationScanner;
pub use repository::{BookingRepository, CancellationRequestRepository, PendingInsert};
pub use settlement::{ChargeDecision, ChargingStrategy, SettlementGateway};
