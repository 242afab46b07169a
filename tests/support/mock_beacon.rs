use async_trait::async_trait;
use beacontap::beacon::block::{
    BeaconBlock, BlockBody, Deposit, ExecutionPayload, SignedVoluntaryExit,
};
use beacontap::{BeaconError, BeaconFacade, NetworkIdentity, NodeMetadata, Position, Wallclock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;

pub const SLOTS_PER_EPOCH: u64 = 32;

/// Scripted beacon façade: a fixed map of blocks, a settable finalized
/// checkpoint, a latching readiness signal, and per-slot failure
/// injection (transient errors and stalls).
pub struct ScriptedBeacon {
    blocks: RwLock<HashMap<u64, Arc<BeaconBlock>>>,
    finalized: RwLock<Option<Position>>,
    transient_slots: RwLock<HashSet<u64>>,
    stalled_slots: RwLock<HashSet<u64>>,
    fetches: AtomicU64,
    ready: watch::Sender<bool>,
    network: NetworkIdentity,
}

impl ScriptedBeacon {
    pub fn new() -> Arc<Self> {
        let (ready, _) = watch::channel(false);
        Arc::new(Self {
            blocks: RwLock::new(HashMap::new()),
            finalized: RwLock::new(None),
            transient_slots: RwLock::new(HashSet::new()),
            stalled_slots: RwLock::new(HashSet::new()),
            fetches: AtomicU64::new(0),
            ready,
            network: NetworkIdentity {
                name: "testnet".into(),
                id: 9,
            },
        })
    }

    pub fn insert_block(&self, block: BeaconBlock) {
        self.blocks
            .write()
            .expect("blocks poisoned")
            .insert(block.slot, Arc::new(block));
    }

    /// Fills `0..=last_slot` with empty blocks, skipping any slot in
    /// `missing`.
    pub fn fill_empty_chain(&self, last_slot: u64, missing: &[u64]) {
        for slot in 0..=last_slot {
            if missing.contains(&slot) {
                continue;
            }
            self.insert_block(empty_block(slot));
        }
    }

    pub fn set_finalized(&self, position: Position) {
        *self.finalized.write().expect("finalized poisoned") = Some(position);
    }

    /// Latches the readiness signal. Safe to call more than once.
    pub fn set_ready(&self) {
        let _ = self.ready.send(true);
    }

    pub fn fail_slot_transiently(&self, slot: u64) {
        self.transient_slots
            .write()
            .expect("transient poisoned")
            .insert(slot);
    }

    pub fn heal_slot(&self, slot: u64) {
        self.transient_slots
            .write()
            .expect("transient poisoned")
            .remove(&slot);
        self.stalled_slots
            .write()
            .expect("stalled poisoned")
            .remove(&slot);
    }

    /// Fetches for this slot hang until `heal_slot` is called. Used to
    /// exercise cancellation mid-fetch.
    pub fn stall_slot(&self, slot: u64) {
        self.stalled_slots
            .write()
            .expect("stalled poisoned")
            .insert(slot);
    }

    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BeaconFacade for ScriptedBeacon {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            network: self.network.clone(),
            client: "scripted".into(),
            version: "0.0.0".into(),
        }
    }

    fn wallclock(&self) -> Wallclock {
        Wallclock::new(
            SystemTime::UNIX_EPOCH,
            Duration::from_secs(12),
            SLOTS_PER_EPOCH,
        )
    }

    fn finalized_checkpoint(&self) -> Option<Position> {
        *self.finalized.read().expect("finalized poisoned")
    }

    async fn fetch_block(
        &self,
        position: Position,
    ) -> Result<Option<Arc<BeaconBlock>>, BeaconError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let Some(slot) = position.slot() else {
            return Err(BeaconError::Transient(
                "epoch-granular fetch is not scripted".into(),
            ));
        };

        loop {
            let stalled = self
                .stalled_slots
                .read()
                .expect("stalled poisoned")
                .contains(&slot);
            if !stalled {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        if self
            .transient_slots
            .read()
            .expect("transient poisoned")
            .contains(&slot)
        {
            return Err(BeaconError::Transient(format!("slot {slot} unreachable")));
        }

        Ok(self.blocks.read().expect("blocks poisoned").get(&slot).cloned())
    }

    fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }
}

pub fn empty_block(slot: u64) -> BeaconBlock {
    BeaconBlock {
        slot,
        proposer_index: slot % 64,
        root: format!("0xblock{slot:08x}"),
        parent_root: format!("0xblock{:08x}", slot.saturating_sub(1)),
        state_root: format!("0xstate{slot:08x}"),
        body: BlockBody::default(),
    }
}

pub fn block_with_deposits(slot: u64, count: usize) -> BeaconBlock {
    let mut block = empty_block(slot);
    block.body.deposits = (0..count)
        .map(|i| Deposit {
            pubkey: format!("0xpub{slot}_{i}"),
            withdrawal_credentials: "0x0100".into(),
            amount: 32_000_000_000,
            signature: format!("0xsig{slot}_{i}"),
        })
        .collect();
    block
}

pub fn block_with_exits(slot: u64, count: usize) -> BeaconBlock {
    let mut block = empty_block(slot);
    block.body.voluntary_exits = (0..count)
        .map(|i| SignedVoluntaryExit {
            epoch: slot / SLOTS_PER_EPOCH,
            validator_index: i as u64,
            signature: format!("0xsig{slot}_{i}"),
        })
        .collect();
    block
}

pub fn block_with_transactions(slot: u64, count: usize) -> BeaconBlock {
    let mut block = empty_block(slot);
    block.body.execution_payload = Some(ExecutionPayload {
        block_hash: format!("0xexec{slot:08x}"),
        block_number: slot,
        transactions: (0..count).map(|i| format!("0xtx{slot}_{i}")).collect(),
    });
    block
}
