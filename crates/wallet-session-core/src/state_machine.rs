use alloy::primitives::Address;

use crate::domain::{ChainId, ConnectedIdentity, ConnectionStatus, ProviderKind, Session};
use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    BeginConnect,
    CompleteConnect,
    FailConnect,
    AccountsChanged,
    ChainChanged,
    RemoteDisconnect,
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub from: ConnectionStatus,
    pub to: ConnectionStatus,
    pub action: SessionAction,
}

/// Transition table. There is no edge from `Disconnected` to `Connected`.
pub fn session_transition(
    from: ConnectionStatus,
    action: SessionAction,
) -> Result<StateTransition, SessionError> {
    use ConnectionStatus::*;
    use SessionAction::*;

    let to = match (from, action) {
        (Disconnected | Erroring, BeginConnect) => Connecting,
        (Connecting, BeginConnect) => return Err(SessionError::AlreadyConnecting),
        (Connecting, CompleteConnect) => Connected,
        (Connecting, FailConnect) => Disconnected,
        (Connected, AccountsChanged) => Connected,
        (Connected, ChainChanged) => Connected,
        (_, RemoteDisconnect) | (_, Disconnect) => Disconnected,
        (from, action) => return Err(SessionError::IllegalTransition { from, action }),
    };
    Ok(StateTransition { from, to, action })
}

/// Proof of a specific connect attempt. A ticket goes stale as soon as the
/// attempt is resolved, abandoned or overtaken by a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectTicket {
    epoch: u64,
}

impl ConnectTicket {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountsOutcome {
    Updated(StateTransition),
    Unchanged,
    /// The wallet reported no accounts; the session was torn down.
    Disconnected(StateTransition),
}

/// Holder of the authoritative session. Every mutation goes through the
/// transition table; the epoch changes whenever a session ends or a new
/// attempt starts so that late completions and events can be recognized.
#[derive(Debug, Clone, Default)]
pub struct SessionStateMachine {
    session: Session,
    epoch: u64,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn status(&self) -> ConnectionStatus {
        self.session.status()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn begin_connect(
        &mut self,
        requested: Option<ProviderKind>,
    ) -> Result<(ConnectTicket, StateTransition), SessionError> {
        let transition = session_transition(self.status(), SessionAction::BeginConnect)?;
        self.epoch = self.epoch.saturating_add(1);
        self.session = Session::connecting(requested);
        Ok((ConnectTicket { epoch: self.epoch }, transition))
    }

    /// `Ok(None)` means the ticket is stale and the completion was ignored.
    pub fn complete_connect(
        &mut self,
        ticket: ConnectTicket,
        identity: ConnectedIdentity,
    ) -> Result<Option<StateTransition>, SessionError> {
        if ticket.epoch != self.epoch {
            return Ok(None);
        }
        let transition = session_transition(self.status(), SessionAction::CompleteConnect)?;
        self.session = Session::connected(identity);
        Ok(Some(transition))
    }

    /// Resolves a pending attempt back to `Disconnected`. Stale tickets are a
    /// no-op.
    pub fn fail_connect(&mut self, ticket: ConnectTicket) -> Option<StateTransition> {
        if ticket.epoch != self.epoch || self.status() != ConnectionStatus::Connecting {
            return None;
        }
        let transition = session_transition(self.status(), SessionAction::FailConnect).ok()?;
        self.reset();
        Some(transition)
    }

    pub fn apply_accounts_changed(
        &mut self,
        accounts: &[Address],
    ) -> Result<AccountsOutcome, SessionError> {
        let transition = session_transition(self.status(), SessionAction::AccountsChanged)?;
        let Some(first) = accounts.first().copied() else {
            let transition = session_transition(self.status(), SessionAction::Disconnect)?;
            self.reset();
            return Ok(AccountsOutcome::Disconnected(transition));
        };
        if self.session.address() == Some(first) {
            return Ok(AccountsOutcome::Unchanged);
        }
        self.session.set_address(first);
        Ok(AccountsOutcome::Updated(transition))
    }

    pub fn apply_chain_changed(
        &mut self,
        chain_id: ChainId,
    ) -> Result<StateTransition, SessionError> {
        let transition = session_transition(self.status(), SessionAction::ChainChanged)?;
        self.session.set_chain_id(chain_id);
        Ok(transition)
    }

    pub fn apply_remote_disconnect(&mut self) -> Option<StateTransition> {
        self.end(SessionAction::RemoteDisconnect)
    }

    /// Always lands in `Disconnected`; `None` when there was nothing to end.
    pub fn disconnect(&mut self) -> Option<StateTransition> {
        self.end(SessionAction::Disconnect)
    }

    fn end(&mut self, action: SessionAction) -> Option<StateTransition> {
        if self.status() == ConnectionStatus::Disconnected {
            return None;
        }
        let transition = session_transition(self.status(), action).ok()?;
        self.reset();
        Some(transition)
    }

    fn reset(&mut self) {
        self.epoch = self.epoch.saturating_add(1);
        self.session = Session::disconnected();
    }
}
