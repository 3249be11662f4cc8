//! Per-user lifecycle: registration, liveness and the command gate.

use crate::{
    db::UserUpdate,
    error::{ChatError, ChatResult},
};

use super::{
    coordinator::Coordinator,
    events::{ClientCommand, Partner, ServerEvent},
    registry::ConnectionId,
};

/// Where a user stands. Derived from pool membership and the partner link,
/// never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Searching,
    Paired,
}

impl SessionState {
    /// Commands that only make sense inside a session are refused elsewhere.
    pub fn accepts(self, command: &ClientCommand) -> ChatResult<()> {
        match (self, command) {
            (SessionState::Paired, _) => Ok(()),
            (
                _,
                ClientCommand::SendMessage { .. }
                | ClientCommand::NextPartner
                | ClientCommand::GetMessages,
            ) => Err(ChatError::NoActiveSession),
            _ => Ok(()),
        }
    }
}

impl Coordinator {
    pub async fn session_state(&self, user_id: &str) -> ChatResult<SessionState> {
        if self.pool.contains(user_id).await {
            return Ok(SessionState::Searching);
        }

        Ok(match self.linked_partner(user_id).await? {
            Some(_) => SessionState::Paired,
            None => SessionState::Idle,
        })
    }

    /// Route one inbound command from `handle`.
    pub async fn dispatch(&self, handle: ConnectionId, command: ClientCommand) -> ChatResult<()> {
        if let ClientCommand::Register { identity } = &command {
            return self.register(handle, identity).await;
        }

        let user_id = self.registry.touch(handle).await.ok_or(ChatError::NotRegistered)?;
        self.session_state(&user_id).await?.accepts(&command)?;

        match command {
            ClientCommand::FindPartner => self.find_partner(&user_id).await,
            ClientCommand::NextPartner => self.next_partner(&user_id).await,
            ClientCommand::SendMessage { content } => {
                self.send_message(&user_id, &content).await.map(|_| ())
            }
            ClientCommand::GetMessages => self.replay(&user_id).await,
            ClientCommand::Heartbeat => self.heartbeat(&user_id).await,
            // handled above
            ClientCommand::Register { .. } => Ok(()),
        }
    }

    /// Bind `identity` to `handle`, creating the user on first sight. A user
    /// still holding an intact link gets the session and its history back.
    pub async fn register(&self, handle: ConnectionId, identity: &str) -> ChatResult<()> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(ChatError::MissingIdentity);
        }

        if let Some(previous) = self.registry.resolve(handle).await {
            if previous != identity {
                if let Some(released) = self.registry.release(handle).await {
                    self.went_offline(&released).await?;
                }
            }
        }

        // bound before the store write so a late close of an older socket
        // sees the identity as taken
        let superseded = self
            .registry
            .bind(handle, identity)
            .await
            .ok_or(ChatError::NotRegistered)?;
        if let Err(err) = self.mark_online(handle, identity).await {
            self.registry.release(handle).await;
            return Err(err);
        }

        match superseded {
            Some(superseded) => {
                tracing::info!(user = identity, %handle, %superseded, "connection superseded");
            }
            None => tracing::info!(user = identity, %handle, "registered"),
        }

        let user = self.load(identity).await?;
        self.registry.send_to(handle, ServerEvent::Registered { user }).await;

        if let Some(partner) = self.linked_partner(identity).await? {
            let messages = self.history(identity, &partner.external_id).await?;
            let started = ServerEvent::chat_started(&partner.external_id, messages);
            self.registry.send_to(handle, started).await;
            let reconnected = ServerEvent::PartnerReconnected {
                partner: Partner { external_id: identity.to_owned() },
            };
            self.registry.send_to_user(&partner.external_id, reconnected).await;
            tracing::info!(user = identity, partner = %partner.external_id, "session resumed");
        }

        Ok(())
    }

    async fn mark_online(&self, handle: ConnectionId, identity: &str) -> ChatResult<()> {
        let handle = handle.to_string();
        if self.store.find_user_by_external_id(identity).await?.is_some() {
            self.store.update_user(identity, UserUpdate::online(handle)).await?;
        } else {
            self.store.create_user(identity, &handle).await?;
        }
        Ok(())
    }

    pub async fn heartbeat(&self, user_id: &str) -> ChatResult<()> {
        self.store.update_user(user_id, UserUpdate {
            last_active_at: Some(crate::db::now_millis()),
            ..UserUpdate::default()
        }).await?;
        Ok(())
    }

    /// Transport for `handle` is gone. The stored user survives; only its
    /// liveness and pool membership are dropped.
    pub async fn disconnect(&self, handle: ConnectionId) -> ChatResult<()> {
        let Some(user_id) = self.registry.unbind(handle).await else {
            return Ok(());
        };

        tracing::info!(user = %user_id, %handle, "disconnected");
        self.went_offline(&user_id).await
    }

    pub(super) async fn went_offline(&self, user_id: &str) -> ChatResult<()> {
        // a newer socket already took the identity over
        if self.registry.is_live(user_id).await {
            return Ok(());
        }

        self.pool.remove(user_id).await;
        self.store.update_user(user_id, UserUpdate::offline()).await?;

        if let Some(handle) = self.registry.handle_of(user_id).await {
            // came back while the write was in flight
            self.store.update_user(user_id, UserUpdate::online(handle.to_string())).await?;
            return Ok(());
        }

        if let Some(partner) = self.linked_partner(user_id).await? {
            let notice = ServerEvent::PartnerDisconnected;
            self.registry.send_to_user(&partner.external_id, notice).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_commands_need_a_partner() {
        let send = ClientCommand::SendMessage { content: "hi".to_owned() };

        for state in [SessionState::Idle, SessionState::Searching] {
            assert!(matches!(state.accepts(&send), Err(ChatError::NoActiveSession)));
            assert!(matches!(
                state.accepts(&ClientCommand::NextPartner),
                Err(ChatError::NoActiveSession)
            ));
            assert!(matches!(
                state.accepts(&ClientCommand::GetMessages),
                Err(ChatError::NoActiveSession)
            ));
            assert!(state.accepts(&ClientCommand::FindPartner).is_ok());
            assert!(state.accepts(&ClientCommand::Heartbeat).is_ok());
        }

        assert!(SessionState::Paired.accepts(&send).is_ok());
        assert!(SessionState::Paired.accepts(&ClientCommand::NextPartner).is_ok());
    }
}
