pub mod app_config;
pub mod booking_repo;
pub mod cancellation_repo;
pub mod database;
pub mod events;
pub mod markup_repo;
pub mod redis_repo;

pub use app_config::Config;
pub use booking_repo::PgBookingRepository;
pub use cancellation_repo::PgCancellationRequestRepository;
pub use database::DbClient;
pub use events::EventProducer;
pub use markup_repo::PgMarkupConfigRepository;
pub use redis_repo::RedisRateCache;
