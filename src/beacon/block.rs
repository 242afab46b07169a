//! Minimal beacon block shape consumed by the derivers. Only the body
//! fields that sub-events are extracted from are modelled; everything
//! else stays with the transport.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconBlock {
    pub slot: u64,
    pub proposer_index: u64,
    pub root: String,
    pub parent_root: String,
    pub state_root: String,
    pub body: BlockBody,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBody {
    #[serde(default)]
    pub attester_slashings: Vec<AttesterSlashing>,
    #[serde(default)]
    pub proposer_slashings: Vec<ProposerSlashing>,
    #[serde(default)]
    pub voluntary_exits: Vec<SignedVoluntaryExit>,
    #[serde(default)]
    pub deposits: Vec<Deposit>,
    #[serde(default)]
    pub bls_to_execution_changes: Vec<SignedBlsToExecutionChange>,
    /// Absent on pre-merge blocks.
    #[serde(default)]
    pub execution_payload: Option<ExecutionPayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedAttestation {
    pub attesting_indices: Vec<u64>,
    pub slot: u64,
    pub index: u64,
    pub beacon_block_root: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttesterSlashing {
    pub attestation_1: IndexedAttestation,
    pub attestation_2: IndexedAttestation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconBlockHeader {
    pub slot: u64,
    pub proposer_index: u64,
    pub parent_root: String,
    pub state_root: String,
    pub body_root: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedBeaconBlockHeader {
    pub message: BeaconBlockHeader,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposerSlashing {
    pub signed_header_1: SignedBeaconBlockHeader,
    pub signed_header_2: SignedBeaconBlockHeader,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedVoluntaryExit {
    pub epoch: u64,
    pub validator_index: u64,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub pubkey: String,
    pub withdrawal_credentials: String,
    pub amount: u64,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedBlsToExecutionChange {
    pub validator_index: u64,
    pub from_bls_pubkey: String,
    pub to_execution_address: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPayload {
    pub block_hash: String,
    pub block_number: u64,
    /// Raw signed transactions, hex-encoded, in payload order.
    pub transactions: Vec<String>,
}
