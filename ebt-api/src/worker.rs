use ebt_booking::ReconciliationScanner;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

/// Periodically surfaces paid bookings that never got a provider order.
pub async fn start_reconciliation_worker(scanner: Arc<ReconciliationScanner>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Reconciliation worker started, scanning every {:?}", every);

    loop {
        ticker.tick().await;
        match scanner.scan().await {
            Ok(stuck) if !stuck.is_empty() => {
                error!("Reconciliation scan found {} unfulfilled paid bookings", stuck.len());
            }
            Ok(_) => {}
            Err(e) => error!("Reconciliation scan failed: {}", e),
        }
    }
}
