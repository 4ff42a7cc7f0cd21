//! Non-interactive confirmation gates.

use async_trait::async_trait;
use transfer::{CollectionPath, ConfirmationGate, Decision, MappedBatch};

/// A gate that always returns the same decision.
///
/// Used for unattended runs and in tests; the CLI uses an interactive prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDecision(pub Decision);

#[async_trait]
impl ConfirmationGate for FixedDecision {
    async fn confirm(
        &self,
        _collection: &CollectionPath,
        _plan: &MappedBatch,
        _existing: Option<u64>,
    ) -> Decision {
        self.0
    }
}
