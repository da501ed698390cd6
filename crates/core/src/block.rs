//! Block and block header structures.

use crate::crypto::{verify, Address, PublicKey, Signature, Wallet};
use crate::hash::{hash, Hash};
use crate::merkle::merkle_root;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// How a block's right to extend the chain is proven.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Seal {
    /// Proof of work: `Hash(header)` meets the difficulty target.
    Work { nonce: u64 },
    /// Proof of stake: the validator signs the header hash.
    Stake { validator: PublicKey, stake: u64 },
}

/// Which proof a block carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposerKind {
    Work,
    Stake,
}

impl fmt::Display for ProposerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProposerKind::Work => f.write_str("PoW"),
            ProposerKind::Stake => f.write_str("PoS"),
        }
    }
}

/// The hashed part of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block height (0 for genesis).
    pub index: u64,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Hash of the previous block.
    pub previous_hash: Hash,
    /// Merkle root of transaction ids, in execution order.
    pub transactions_root: Hash,
    /// Root of the ledger state after applying this block.
    pub state_root: Hash,
    /// Difficulty (leading zero bits) in force at this height.
    pub difficulty: u32,
    /// Receives fees and the block reward.
    pub beneficiary: Address,
    /// Proposer proof.
    pub seal: Seal,
}

impl BlockHeader {
    /// Calculate the hash of this block header.
    pub fn hash(&self) -> Hash {
        let encoded = bincode::serialize(self).expect("serialization should not fail");
        hash(&encoded)
    }

    pub fn proposer_kind(&self) -> ProposerKind {
        match self.seal {
            Seal::Work { .. } => ProposerKind::Work,
            Seal::Stake { .. } => ProposerKind::Stake,
        }
    }

    /// Fork-choice weight: difficulty for PoW, committed stake for PoS.
    pub fn weight(&self) -> u64 {
        match &self.seal {
            Seal::Work { .. } => self.difficulty as u64,
            Seal::Stake { stake, .. } => *stake,
        }
    }

    /// Get the current Unix timestamp.
    pub fn current_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }
}

/// A complete block: header, ordered transactions, optional validator
/// signature and the cached header hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    /// Present iff the seal is [`Seal::Stake`].
    pub validator_signature: Option<Signature>,
    /// `Hash(header)`, stored so readers can detect tampering.
    pub hash: Hash,
}

impl Block {
    /// Assemble a block, computing its hash from the header.
    pub fn from_parts(
        header: BlockHeader,
        transactions: Vec<Transaction>,
        validator_signature: Option<Signature>,
    ) -> Self {
        let hash = header.hash();
        Self {
            header,
            transactions,
            validator_signature,
            hash,
        }
    }

    /// Assemble a PoS block and sign its header hash with `validator`.
    pub fn signed_by(header: BlockHeader, transactions: Vec<Transaction>, validator: &Wallet) -> Self {
        let mut block = Self::from_parts(header, transactions, None);
        block.validator_signature = Some(validator.sign_hash(&block.hash));
        block
    }

    /// Create the genesis block over the given initial state.
    pub fn genesis(timestamp: u64, state_root: Hash, difficulty: u32) -> Self {
        let header = BlockHeader {
            index: 0,
            timestamp,
            previous_hash: Hash::ZERO,
            transactions_root: Hash::ZERO,
            state_root,
            difficulty,
            beneficiary: Address::ZERO,
            seal: Seal::Work { nonce: 0 },
        };
        Self::from_parts(header, Vec::new(), None)
    }

    /// Merkle root of the ids of `transactions`.
    pub fn compute_transactions_root(transactions: &[Transaction]) -> Hash {
        let ids: Vec<Hash> = transactions.iter().map(Transaction::id).collect();
        merkle_root(&ids)
    }

    pub fn index(&self) -> u64 {
        self.header.index
    }

    pub fn is_genesis(&self) -> bool {
        self.header.index == 0 && self.header.previous_hash == Hash::ZERO
    }

    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn proposer_kind(&self) -> ProposerKind {
        self.header.proposer_kind()
    }

    /// The PoW nonce, if this is a PoW block.
    pub fn nonce(&self) -> Option<u64> {
        match self.header.seal {
            Seal::Work { nonce } => Some(nonce),
            Seal::Stake { .. } => None,
        }
    }

    /// Recomputing the header hash reproduces the stored hash.
    pub fn verify_hash(&self) -> bool {
        self.header.hash() == self.hash
    }

    /// The header's transactions root matches the transaction list.
    pub fn verify_transactions_root(&self) -> bool {
        Self::compute_transactions_root(&self.transactions) == self.header.transactions_root
    }

    /// A signature is present exactly when the seal is proof of stake.
    pub fn seal_is_well_formed(&self) -> bool {
        matches!(
            (&self.header.seal, &self.validator_signature),
            (Seal::Work { .. }, None) | (Seal::Stake { .. }, Some(_))
        )
    }

    /// Check the validator signature over the header hash.
    pub fn verify_validator_signature(&self) -> bool {
        match (&self.header.seal, &self.validator_signature) {
            (Seal::Stake { validator, .. }, Some(signature)) => {
                verify(validator, self.header.hash().as_bytes(), signature)
            }
            _ => false,
        }
    }

    /// Size of the encoded block in bytes.
    pub fn encoded_len(&self) -> usize {
        bincode::serialized_size(self).expect("serialization should not fail") as usize
    }
}
