use async_trait::async_trait;

use wallet_session_core::{ChooserPort, ProviderDescriptor, ProviderKind, SessionError};

/// Chooser with a preset answer, for headless runs. Picks nothing when the
/// preset kind is not among the offered descriptors.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedChooser {
    pick: Option<ProviderKind>,
}

impl FixedChooser {
    pub fn new(pick: Option<ProviderKind>) -> Self {
        Self { pick }
    }
}

#[async_trait]
impl ChooserPort for FixedChooser {
    async fn choose(
        &self,
        options: &[ProviderDescriptor],
    ) -> Result<Option<ProviderKind>, SessionError> {
        Ok(self
            .pick
            .filter(|kind| options.iter().any(|d| d.kind == *kind)))
    }
}
