use crate::{db::Message, error::{ChatError, ChatResult}};

use super::{coordinator::Coordinator, events::ServerEvent};

impl Coordinator {
    /// Persist `content` and push it to both ends of the session. An offline
    /// partner gets it later through history replay.
    pub async fn send_message(&self, sender_id: &str, content: &str) -> ChatResult<Message> {
        if content.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let Some(partner) = self.linked_partner(sender_id).await? else {
            return Err(ChatError::NoActiveSession);
        };

        let message =
            self.store.insert_message(sender_id, &partner.external_id, content).await?;

        self.registry.send_to_user(sender_id, ServerEvent::Message {
            message: message.clone(),
            is_own: true,
        }).await;

        let delivered = self.registry.send_to_user(&partner.external_id, ServerEvent::Message {
            message: message.clone(),
            is_own: false,
        }).await;
        if !delivered {
            tracing::debug!(
                user = sender_id,
                partner = %partner.external_id,
                id = message.id,
                "partner offline, message kept for replay"
            );
        }

        Ok(message)
    }

    pub async fn history(&self, a: &str, b: &str) -> ChatResult<Vec<Message>> {
        Ok(self.store.query_messages_between(a, b).await?)
    }

    /// Send the caller the full history with their current partner.
    pub async fn replay(&self, user_id: &str) -> ChatResult<()> {
        let Some(partner) = self.linked_partner(user_id).await? else {
            return Err(ChatError::NoActiveSession);
        };

        let messages = self.history(user_id, &partner.external_id).await?;
        self.registry.send_to_user(user_id, ServerEvent::Messages { messages }).await;
        Ok(())
    }
}
