use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::domain::{LoginChallenge, Session, TimestampMs};
use crate::error::SessionError;
use crate::ports::{ClockPort, ProviderAdapter};

/// Produces signed login challenges through the active adapter's signer.
/// Holds no session state of its own.
#[derive(Clone)]
pub struct SigningService {
    clock: Arc<dyn ClockPort>,
}

impl SigningService {
    pub fn new(clock: Arc<dyn ClockPort>) -> Self {
        Self { clock }
    }

    /// `Login request @ 2025-02-17T00:00:00.000Z`
    pub fn challenge_message(&self) -> Result<(String, TimestampMs), SessionError> {
        let now = self.clock.now_ms()?;
        let issued = i64::try_from(now)
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(|| SessionError::Transport(format!("clock out of range: {now}")))?;
        let message = format!(
            "Login request @ {}",
            issued.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
        Ok((message, TimestampMs(now)))
    }

    pub async fn sign_login_challenge(
        &self,
        session: &Session,
        adapter: Option<&dyn ProviderAdapter>,
    ) -> Result<LoginChallenge, SessionError> {
        if !session.is_connected() {
            return Err(SessionError::NoActiveSession);
        }
        let (Some(address), Some(chain_id), Some(adapter)) =
            (session.address(), session.chain_id(), adapter)
        else {
            return Err(SessionError::NoActiveSession);
        };

        let (message, issued_at_ms) = self.challenge_message()?;
        let signature = adapter
            .sign_message(address, &message)
            .await
            .map_err(|e| match e {
                SessionError::SigningRejected(_) => e,
                other => SessionError::SigningRejected(other.to_string()),
            })?;

        Ok(LoginChallenge {
            address,
            chain_id: chain_id.clone(),
            message,
            signature,
            issued_at_ms,
        })
    }
}
