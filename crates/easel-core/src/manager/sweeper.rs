//! Lease sweeper: reclaims records whose worker died mid-dispatch.
//!
//! An `InProgress` record whose lease expired without a terminal transition
//! means the holding worker crashed (or the whole process did, between the
//! startup recovery pass and now). The sweep reverts such records to
//! `Pending` with attempts untouched; the attempt was already counted when
//! the dispatch began.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, warn};

use super::Shared;

pub(crate) async fn sweeper_loop(shared: Arc<Shared>, shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {}
            _ = tokio::time::sleep(shared.config.sweep_interval) => {}
        }
        if *shutdown_rx.borrow() {
            break;
        }

        let now = shared.clock.now();
        match shared.store.reclaim_expired(now).await {
            Ok(reclaimed) if !reclaimed.is_empty() => {
                for id in &reclaimed {
                    warn!(%id, "reclaimed expired lease");
                }
                // Reclaimed records are immediately eligible again.
                shared.wake.notify_one();
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "lease sweep failed"),
        }
    }
}
