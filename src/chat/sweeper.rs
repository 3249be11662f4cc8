use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;

use crate::{db::UserUpdate, error::ChatResult};

use super::{coordinator::Coordinator, events::{EndReason, ServerEvent}};

impl Coordinator {
    /// Evict connections silent for longer than `stale_after` and unwind the
    /// sessions they held. Returns how many identities were expired.
    pub async fn sweep(&self, stale_after: Duration) -> usize {
        let evicted = self.registry.evict_stale(stale_after).await;

        let mut expired = 0;
        for user_id in &evicted {
            match self.expire(user_id).await {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(user = %user_id, error = %err, "failed to expire stale user")
                }
            }
        }

        expired
    }

    async fn expire(&self, user_id: &str) -> ChatResult<bool> {
        // came back between eviction and now
        if self.registry.is_live(user_id).await {
            return Ok(false);
        }

        self.pool.remove(user_id).await;
        self.store.update_user(user_id, UserUpdate::offline()).await?;

        if let Some(partner) = self.unlink(user_id).await? {
            tracing::info!(user = user_id, partner = %partner, "session expired");
            let ended = ServerEvent::ChatEnded { reason: EndReason::PartnerTimedOut };
            self.registry.send_to_user(&partner, ended).await;
        }

        Ok(true)
    }
}

pub fn spawn_sweeper(
    coordinator: Arc<Coordinator>,
    interval: Duration,
    stale_after: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let connections = coordinator.registry().connection_count().await;
            tracing::debug!(connections, "sweeping");

            let expired = coordinator.sweep(stale_after).await;
            if expired > 0 {
                tracing::info!(expired, "expired stale users");
            }
        }
    })
}
