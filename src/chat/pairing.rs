//! Matching users from the waiting pool and maintaining the symmetric
//! partner link between them.

use crate::{
    db::{User, UserUpdate},
    error::{ChatError, ChatResult},
};

use super::{
    coordinator::Coordinator,
    events::{EndReason, ServerEvent},
};

impl Coordinator {
    /// Put `user_id` in front of a partner: the current one if the session is
    /// still intact, otherwise whoever the pool yields.
    pub async fn find_partner(&self, user_id: &str) -> ChatResult<()> {
        if let Some(partner) = self.linked_partner(user_id).await? {
            if self.registry.is_live(&partner.external_id).await {
                let messages =
                    self.store.query_messages_between(user_id, &partner.external_id).await?;
                let started = ServerEvent::chat_started(&partner.external_id, messages);
                self.registry.send_to_user(user_id, started).await;
                return Ok(());
            }

            // partner vanished without being swept yet; that session is over
            tracing::debug!(
                user = user_id,
                partner = %partner.external_id,
                "dropping link to inactive partner"
            );
            self.unlink(user_id).await?;
        }

        self.search(user_id).await
    }

    /// Leave the current partner and start searching again.
    pub async fn next_partner(&self, user_id: &str) -> ChatResult<()> {
        match self.unlink(user_id).await? {
            Some(former) => {
                tracing::info!(user = user_id, partner = %former, "left chat");
                let ended = ServerEvent::ChatEnded { reason: EndReason::PartnerLeft };
                self.registry.send_to_user(&former, ended).await;
            }
            None => return Err(ChatError::NoActiveSession),
        }

        self.search(user_id).await
    }

    async fn search(&self, user_id: &str) -> ChatResult<()> {
        self.pool.add(user_id).await;
        self.registry.send_to_user(user_id, ServerEvent::Searching).await;
        self.try_match(user_id).await
    }

    /// Draw candidates until one sticks, the pool runs dry, or the attempt
    /// budget is spent. A user left in the pool stays matchable by others.
    async fn try_match(&self, user_id: &str) -> ChatResult<()> {
        for _ in 0..self.match_attempts {
            let _links = self.links.lock().await;

            let Some(candidate) = self.pool.claim(user_id).await else {
                tracing::debug!(user = user_id, "no partner available, waiting");
                return Ok(());
            };

            // nothing is written until the history is in hand
            let messages = match self.store.query_messages_between(user_id, &candidate).await {
                Ok(messages) => messages,
                Err(err) => {
                    self.requeue(user_id).await;
                    self.requeue(&candidate).await;
                    return Err(err.into());
                }
            };

            self.establish(user_id, &candidate).await?;

            // either side may have dropped between the draw and the link write
            let requester_live = self.registry.is_live(user_id).await;
            let candidate_live = self.registry.is_live(&candidate).await;
            if requester_live && candidate_live {
                let to_requester = ServerEvent::chat_started(&candidate, messages.clone());
                self.registry.send_to_user(user_id, to_requester).await;
                let to_candidate = ServerEvent::chat_started(user_id, messages);
                self.registry.send_to_user(&candidate, to_candidate).await;
                tracing::info!(user = user_id, partner = %candidate, "chat started");
                return Ok(());
            }

            // a side whose clear fails is left one-sided and heals on its next read
            let requester_cleared = self.clear_link(user_id).await;
            if self.clear_link(&candidate).await.is_ok() {
                self.requeue(&candidate).await;
            }
            if !requester_live {
                return requester_cleared;
            }
            requester_cleared?;

            let unreachable = ChatError::PartnerUnreachable(candidate);
            tracing::warn!(user = user_id, "{unreachable}, rolled back");
            self.pool.add(user_id).await;
            self.registry.send_to_user(user_id, ServerEvent::Searching).await;
        }

        Ok(())
    }

    /// Write the link on both records. Whatever fails, both users end up
    /// back in the pool unless their record may still point at the other.
    async fn establish(&self, a: &str, b: &str) -> ChatResult<()> {
        if let Err(err) = self.store.update_user(a, UserUpdate::partner(Some(b.to_owned()))).await {
            self.requeue(a).await;
            self.requeue(b).await;
            return Err(err.into());
        }

        if let Err(err) = self.store.update_user(b, UserUpdate::partner(Some(a.to_owned()))).await {
            self.requeue(b).await;
            if self.clear_link(a).await.is_ok() {
                self.requeue(a).await;
            }
            return Err(err.into());
        }

        Ok(())
    }

    async fn clear_link(&self, user_id: &str) -> ChatResult<()> {
        let cleared = self.store.update_user(user_id, UserUpdate::partner(None)).await;
        if let Err(err) = &cleared {
            tracing::warn!(user = user_id, error = %err, "could not clear partner link");
        }
        Ok(cleared?)
    }

    async fn requeue(&self, user_id: &str) {
        if self.registry.is_live(user_id).await {
            self.pool.add(user_id).await;
        }
    }

    /// The partner record if the link is intact in both directions. A link
    /// that only points one way is cleared on the spot.
    pub async fn linked_partner(&self, user_id: &str) -> ChatResult<Option<User>> {
        let _links = self.links.lock().await;

        let user = self.load(user_id).await?;
        let Some(partner_id) = user.current_partner_id else {
            return Ok(None);
        };

        let partner = self.store.find_user_by_external_id(&partner_id).await?;
        match partner {
            Some(partner) if partner.current_partner_id.as_deref() == Some(user_id) => {
                Ok(Some(partner))
            }
            _ => {
                tracing::warn!(
                    user = user_id,
                    partner = %partner_id,
                    "healing one-sided partner link"
                );
                self.store.update_user(user_id, UserUpdate::partner(None)).await?;
                Ok(None)
            }
        }
    }

    /// Clear the link from both sides. Returns the former partner when the
    /// link was intact.
    pub(super) async fn unlink(&self, user_id: &str) -> ChatResult<Option<String>> {
        let _links = self.links.lock().await;

        let user = self.load(user_id).await?;
        let Some(partner_id) = user.current_partner_id else {
            return Ok(None);
        };

        self.store.update_user(user_id, UserUpdate::partner(None)).await?;

        let partner = self.store.find_user_by_external_id(&partner_id).await?;
        if partner.is_some_and(|p| p.current_partner_id.as_deref() == Some(user_id)) {
            self.store.update_user(&partner_id, UserUpdate::partner(None)).await?;
            return Ok(Some(partner_id));
        }

        Ok(None)
    }
}
