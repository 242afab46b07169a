//! Per-kind block traversal. Extractors are pure: two invocations over
//! the same block yield the same event list in the same order.

use crate::beacon::block::BeaconBlock;
use crate::event::kind::EventKind;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// A sub-event lifted out of a block, before decoration. `index` is the
/// event's position within the block's own list, preserved so sinks can
/// order events inside one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedEvent {
    pub index: u64,
    pub data: serde_json::Value,
}

/// A block field that could not be turned into events. The driver logs
/// it, counts it, and advances past the block so one malformed field
/// cannot wedge the walk.
#[derive(Debug, Error)]
#[error("malformed {field} in block {block_root}: {reason}")]
pub struct ExtractError {
    pub field: &'static str,
    pub block_root: String,
    pub reason: String,
}

/// Maps blocks to the sub-events of a single kind.
pub trait Extractor: Send + Sync + 'static {
    /// Human-readable deriver name.
    fn name(&self) -> &'static str;

    fn kind(&self) -> EventKind;

    fn extract(&self, block: &BeaconBlock) -> Result<Vec<ExtractedEvent>, ExtractError>;
}

fn indexed<T: Serialize>(
    items: &[T],
    field: &'static str,
    block: &BeaconBlock,
) -> Result<Vec<ExtractedEvent>, ExtractError> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let data = serde_json::to_value(item).map_err(|err| ExtractError {
                field,
                block_root: block.root.clone(),
                reason: err.to_string(),
            })?;
            Ok(ExtractedEvent {
                index: index as u64,
                data,
            })
        })
        .collect()
}

/// One event per attester slashing in the block body.
#[derive(Debug, Default, Clone, Copy)]
pub struct AttesterSlashingExtractor;

impl Extractor for AttesterSlashingExtractor {
    fn name(&self) -> &'static str {
        "attester slashing"
    }

    fn kind(&self) -> EventKind {
        EventKind::AttesterSlashing
    }

    fn extract(&self, block: &BeaconBlock) -> Result<Vec<ExtractedEvent>, ExtractError> {
        indexed(&block.body.attester_slashings, "attester_slashings", block)
    }
}

/// One event per proposer slashing in the block body.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProposerSlashingExtractor;

impl Extractor for ProposerSlashingExtractor {
    fn name(&self) -> &'static str {
        "proposer slashing"
    }

    fn kind(&self) -> EventKind {
        EventKind::ProposerSlashing
    }

    fn extract(&self, block: &BeaconBlock) -> Result<Vec<ExtractedEvent>, ExtractError> {
        indexed(&block.body.proposer_slashings, "proposer_slashings", block)
    }
}

/// One event per voluntary exit in the block body.
#[derive(Debug, Default, Clone, Copy)]
pub struct VoluntaryExitExtractor;

impl Extractor for VoluntaryExitExtractor {
    fn name(&self) -> &'static str {
        "voluntary exit"
    }

    fn kind(&self) -> EventKind {
        EventKind::VoluntaryExit
    }

    fn extract(&self, block: &BeaconBlock) -> Result<Vec<ExtractedEvent>, ExtractError> {
        indexed(&block.body.voluntary_exits, "voluntary_exits", block)
    }
}

/// One event per deposit in the block body.
#[derive(Debug, Default, Clone, Copy)]
pub struct DepositExtractor;

impl Extractor for DepositExtractor {
    fn name(&self) -> &'static str {
        "deposit"
    }

    fn kind(&self) -> EventKind {
        EventKind::Deposit
    }

    fn extract(&self, block: &BeaconBlock) -> Result<Vec<ExtractedEvent>, ExtractError> {
        indexed(&block.body.deposits, "deposits", block)
    }
}

/// One event per BLS-to-execution credential change in the block body.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlsToExecutionChangeExtractor;

impl Extractor for BlsToExecutionChangeExtractor {
    fn name(&self) -> &'static str {
        "bls to execution change"
    }

    fn kind(&self) -> EventKind {
        EventKind::BlsToExecutionChange
    }

    fn extract(&self, block: &BeaconBlock) -> Result<Vec<ExtractedEvent>, ExtractError> {
        indexed(
            &block.body.bls_to_execution_changes,
            "bls_to_execution_changes",
            block,
        )
    }
}

/// One event per transaction in the execution payload, payload order
/// preserved. Pre-merge blocks without a payload yield no events.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecutionTransactionExtractor;

impl Extractor for ExecutionTransactionExtractor {
    fn name(&self) -> &'static str {
        "execution transaction"
    }

    fn kind(&self) -> EventKind {
        EventKind::ExecutionTransaction
    }

    fn extract(&self, block: &BeaconBlock) -> Result<Vec<ExtractedEvent>, ExtractError> {
        let Some(payload) = &block.body.execution_payload else {
            return Ok(Vec::new());
        };

        Ok(payload
            .transactions
            .iter()
            .enumerate()
            .map(|(index, transaction)| ExtractedEvent {
                index: index as u64,
                data: json!({
                    "index": index as u64,
                    "transaction": transaction,
                    "block_hash": payload.block_hash,
                    "block_number": payload.block_number,
                }),
            })
            .collect())
    }
}
