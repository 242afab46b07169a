use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of event kinds the harvester derives from beacon
/// blocks. Each kind is walked by its own deriver with an independent
/// coordinator cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    AttesterSlashing,
    ProposerSlashing,
    VoluntaryExit,
    Deposit,
    BlsToExecutionChange,
    ExecutionTransaction,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::AttesterSlashing,
        EventKind::ProposerSlashing,
        EventKind::VoluntaryExit,
        EventKind::Deposit,
        EventKind::BlsToExecutionChange,
        EventKind::ExecutionTransaction,
    ];

    /// Stable lowercase label used for metrics and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AttesterSlashing => "attester_slashing",
            EventKind::ProposerSlashing => "proposer_slashing",
            EventKind::VoluntaryExit => "voluntary_exit",
            EventKind::Deposit => "deposit",
            EventKind::BlsToExecutionChange => "bls_to_execution_change",
            EventKind::ExecutionTransaction => "execution_transaction",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
