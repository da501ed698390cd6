//! Block validity rules that need no transaction execution.
//!
//! State-root checks require re-executing the block and live with the
//! executor; everything else a candidate must satisfy is checked here.

use crate::error::ConsensusViolation;
use crate::pos::{select_validator, stake_of};
use crate::schedule::ConsensusPolicy;
use hodl_core::{Address, Block, Seal, Transaction};
use std::collections::HashSet;

pub type Result<T> = std::result::Result<T, ConsensusViolation>;

/// What a candidate is checked against: its parent and the committed
/// state at the parent.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    pub parent: &'a Block,
    /// Difficulty the candidate must carry.
    pub expected_difficulty: u32,
    /// Committed stakers, ordered by address.
    pub stakers: &'a [(Address, u64)],
    pub policy: ConsensusPolicy,
    /// Local clock, Unix seconds.
    pub now: u64,
    pub max_clock_drift: u64,
}

/// The address a block's proposer is held accountable under. Only a PoS
/// seal names its proposer; a PoW beneficiary is whatever the miner wrote
/// and proves nothing about who mined.
pub fn proposer_of(block: &Block) -> Option<Address> {
    match &block.header.seal {
        Seal::Work { .. } => None,
        Seal::Stake { validator, .. } => Some(validator.to_address()),
    }
}

/// Per-transaction format and signature checks.
pub struct TransactionValidator;

impl TransactionValidator {
    /// Signature and sender-key checks; balances and nonces are checked
    /// by the executor against state.
    pub fn validate(tx: &Transaction) -> Result<()> {
        tx.verify()
            .map_err(|err| ConsensusViolation::InvalidTransaction {
                id: tx.id(),
                reason: err.to_string(),
            })
    }
}

/// Block validator.
pub struct BlockValidator;

impl BlockValidator {
    /// Validate block structure and contents.
    pub fn validate_structure(block: &Block) -> Result<()> {
        if !block.verify_hash() {
            return Err(ConsensusViolation::HashMismatch);
        }
        if !block.seal_is_well_formed() {
            return Err(ConsensusViolation::MalformedSeal);
        }
        if !block.verify_transactions_root() {
            return Err(ConsensusViolation::TransactionsRootMismatch);
        }

        let mut seen = HashSet::new();
        for tx in &block.transactions {
            let id = tx.id();
            if !seen.insert(id) {
                return Err(ConsensusViolation::DuplicateTransaction(id));
            }
            TransactionValidator::validate(tx)?;
        }
        Ok(())
    }

    /// Validate block extends the parent correctly.
    pub fn validate_extends_parent(block: &Block, parent: &Block) -> Result<()> {
        let expected = parent.index() + 1;
        if block.index() != expected {
            return Err(ConsensusViolation::HeightMismatch {
                expected,
                got: block.index(),
            });
        }
        if block.header.previous_hash != parent.hash {
            return Err(ConsensusViolation::BadLinkage {
                expected: parent.hash,
                got: block.header.previous_hash,
            });
        }
        Ok(())
    }

    /// Strictly after the parent and no further ahead of `now` than
    /// `max_clock_drift`.
    pub fn validate_timestamp(block: &Block, parent: &Block, now: u64, max_clock_drift: u64) -> Result<()> {
        let timestamp = block.header.timestamp;
        if timestamp <= parent.header.timestamp {
            return Err(ConsensusViolation::TimestampTooEarly {
                timestamp,
                parent: parent.header.timestamp,
            });
        }
        if timestamp > now.saturating_add(max_clock_drift) {
            return Err(ConsensusViolation::TimestampTooFuture { timestamp, now });
        }
        Ok(())
    }

    /// Check the seal: eligibility under the policy, difficulty, and the
    /// PoW target or the PoS signature, stake and selection.
    pub fn validate_proof(block: &Block, ctx: &ValidationContext<'_>) -> Result<()> {
        let header = &block.header;
        let kind = header.proposer_kind();
        if !ctx.policy.allows(kind, header.index) {
            return Err(ConsensusViolation::KindNotEligible {
                kind,
                height: header.index,
            });
        }
        if header.difficulty != ctx.expected_difficulty {
            return Err(ConsensusViolation::WrongDifficulty {
                expected: ctx.expected_difficulty,
                got: header.difficulty,
            });
        }

        match &header.seal {
            Seal::Work { .. } => {
                if !block.hash.meets_difficulty(header.difficulty) {
                    return Err(ConsensusViolation::InsufficientWork {
                        difficulty: header.difficulty,
                    });
                }
            }
            Seal::Stake { validator, stake } => {
                if !block.verify_validator_signature() {
                    return Err(ConsensusViolation::BadValidatorSignature);
                }
                let address = validator.to_address();
                if header.beneficiary != address {
                    return Err(ConsensusViolation::BeneficiaryMismatch(address));
                }
                let actual = stake_of(ctx.stakers, &address);
                if actual == 0 {
                    return Err(ConsensusViolation::ZeroStake(address));
                }
                if *stake != actual {
                    return Err(ConsensusViolation::WrongStakeClaim {
                        claimed: *stake,
                        actual,
                    });
                }
                match select_validator(ctx.stakers, &ctx.parent.hash, header.index) {
                    Some(expected) if expected == address => {}
                    Some(expected) => {
                        return Err(ConsensusViolation::WrongProposer {
                            expected,
                            got: address,
                        })
                    }
                    None => return Err(ConsensusViolation::ZeroStake(address)),
                }
            }
        }
        Ok(())
    }

    /// Every stateless rule, in order.
    pub fn validate_full(block: &Block, ctx: &ValidationContext<'_>) -> Result<()> {
        Self::validate_structure(block)?;
        Self::validate_extends_parent(block, ctx.parent)?;
        Self::validate_timestamp(block, ctx.parent, ctx.now, ctx.max_clock_drift)?;
        Self::validate_proof(block, ctx)?;
        Ok(())
    }
}

/// Proposers that lost their turn at a height by submitting an invalid
/// candidate.
#[derive(Debug, Default)]
pub struct Forfeits {
    entries: HashSet<(u64, Address)>,
}

impl Forfeits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, height: u64, proposer: Address) {
        self.entries.insert((height, proposer));
    }

    pub fn is_forfeited(&self, height: u64, proposer: &Address) -> bool {
        self.entries.contains(&(height, *proposer))
    }

    /// Fail if `block`'s proposer already forfeited its height.
    pub fn check(&self, block: &Block) -> Result<()> {
        let Some(proposer) = proposer_of(block) else {
            return Ok(());
        };
        if self.is_forfeited(block.index(), &proposer) {
            return Err(ConsensusViolation::ForfeitedProposer {
                proposer,
                height: block.index(),
            });
        }
        Ok(())
    }

    /// Drop records for heights that are already committed.
    pub fn prune_through(&mut self, height: u64) {
        self.entries.retain(|(h, _)| *h > height);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pow::{CancelToken, Miner};
    use hodl_core::{generate_keypair, BlockHeader, Hash, Wallet};

    const NOW: u64 = 1_700_000_000;

    fn genesis() -> Block {
        Block::genesis(NOW - 100, Hash::ZERO, 2)
    }

    fn header(parent: &Block, seal: Seal, beneficiary: Address) -> BlockHeader {
        BlockHeader {
            index: parent.index() + 1,
            timestamp: parent.header.timestamp + 10,
            previous_hash: parent.hash,
            transactions_root: Hash::ZERO,
            state_root: Hash::ZERO,
            difficulty: 2,
            beneficiary,
            seal,
        }
    }

    fn mined(parent: &Block) -> Block {
        let template = header(parent, Seal::Work { nonce: 0 }, Address([9; 20]));
        let sealed = Miner::mine(template, 2, &CancelToken::new()).unwrap();
        Block::from_parts(sealed, vec![], None)
    }

    fn staked(parent: &Block, wallet: &Wallet, stake: u64) -> Block {
        let seal = Seal::Stake {
            validator: wallet.public_key.clone(),
            stake,
        };
        Block::signed_by(header(parent, seal, wallet.address()), vec![], wallet)
    }

    fn ctx<'a>(parent: &'a Block, stakers: &'a [(Address, u64)], policy: ConsensusPolicy) -> ValidationContext<'a> {
        ValidationContext {
            parent,
            expected_difficulty: 2,
            stakers,
            policy,
            now: NOW,
            max_clock_drift: 30,
        }
    }

    #[test]
    fn test_valid_pow_block() {
        let parent = genesis();
        let block = mined(&parent);
        let ctx = ctx(&parent, &[], ConsensusPolicy::PowOnly);
        assert!(BlockValidator::validate_full(&block, &ctx).is_ok());
    }

    #[test]
    fn test_tampered_hash_rejected() {
        let parent = genesis();
        let mut block = mined(&parent);
        block.header.timestamp += 1;
        assert_eq!(
            BlockValidator::validate_structure(&block),
            Err(ConsensusViolation::HashMismatch)
        );
    }

    #[test]
    fn test_bad_linkage_and_height() {
        let parent = genesis();
        let block = mined(&parent);
        let other = Block::genesis(NOW - 50, hodl_core::hash(b"other"), 2);
        assert!(matches!(
            BlockValidator::validate_extends_parent(&block, &other),
            Err(ConsensusViolation::BadLinkage { .. })
        ));
        assert!(matches!(
            BlockValidator::validate_extends_parent(&block, &block),
            Err(ConsensusViolation::HeightMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn test_timestamp_bounds() {
        let parent = genesis();
        let block = mined(&parent);
        assert!(BlockValidator::validate_timestamp(&block, &parent, NOW, 30).is_ok());
        assert!(matches!(
            BlockValidator::validate_timestamp(&block, &block, NOW, 30),
            Err(ConsensusViolation::TimestampTooEarly { .. })
        ));
        assert!(matches!(
            BlockValidator::validate_timestamp(&block, &parent, NOW - 200, 30),
            Err(ConsensusViolation::TimestampTooFuture { .. })
        ));
    }

    #[test]
    fn test_insufficient_work() {
        let parent = genesis();
        let mut nonce = 0;
        // find a header that misses the target
        let block = loop {
            let h = header(&parent, Seal::Work { nonce }, Address([9; 20]));
            if !h.hash().meets_difficulty(2) {
                break Block::from_parts(h, vec![], None);
            }
            nonce += 1;
        };
        let ctx = ctx(&parent, &[], ConsensusPolicy::PowOnly);
        assert_eq!(
            BlockValidator::validate_proof(&block, &ctx),
            Err(ConsensusViolation::InsufficientWork { difficulty: 2 })
        );
    }

    #[test]
    fn test_wrong_difficulty() {
        let parent = genesis();
        let block = mined(&parent);
        let mut ctx = ctx(&parent, &[], ConsensusPolicy::PowOnly);
        ctx.expected_difficulty = 3;
        assert_eq!(
            BlockValidator::validate_proof(&block, &ctx),
            Err(ConsensusViolation::WrongDifficulty { expected: 3, got: 2 })
        );
    }

    #[test]
    fn test_kind_not_eligible() {
        let parent = genesis();
        let block = mined(&parent);
        let ctx = ctx(&parent, &[], ConsensusPolicy::PosOnly);
        assert!(matches!(
            BlockValidator::validate_proof(&block, &ctx),
            Err(ConsensusViolation::KindNotEligible { .. })
        ));
    }

    #[test]
    fn test_valid_pos_block() {
        let parent = genesis();
        let validator = generate_keypair();
        let stakers = [(validator.address(), 40)];
        let block = staked(&parent, &validator, 40);
        let ctx = ctx(&parent, &stakers, ConsensusPolicy::PosOnly);
        assert!(BlockValidator::validate_full(&block, &ctx).is_ok());
    }

    #[test]
    fn test_pos_rejections() {
        let parent = genesis();
        let validator = generate_keypair();
        let stakers = [(validator.address(), 40)];
        let ctx = ctx(&parent, &stakers, ConsensusPolicy::PosOnly);

        let wrong_claim = staked(&parent, &validator, 41);
        assert_eq!(
            BlockValidator::validate_proof(&wrong_claim, &ctx),
            Err(ConsensusViolation::WrongStakeClaim {
                claimed: 41,
                actual: 40
            })
        );

        let outsider = generate_keypair();
        let unstaked = staked(&parent, &outsider, 40);
        assert_eq!(
            BlockValidator::validate_proof(&unstaked, &ctx),
            Err(ConsensusViolation::ZeroStake(outsider.address()))
        );

        let mut forged = staked(&parent, &validator, 40);
        forged.validator_signature = Some(outsider.sign_hash(&forged.hash));
        assert_eq!(
            BlockValidator::validate_proof(&forged, &ctx),
            Err(ConsensusViolation::BadValidatorSignature)
        );
    }

    #[test]
    fn test_pos_wrong_proposer() {
        let parent = genesis();
        let a = generate_keypair();
        let b = generate_keypair();
        let mut stakers = vec![(a.address(), 50), (b.address(), 50)];
        stakers.sort();
        let selected = select_validator(&stakers, &parent.hash, 1).unwrap();
        let (chosen, other) = if selected == a.address() { (&a, &b) } else { (&b, &a) };

        let ctx = ctx(&parent, &stakers, ConsensusPolicy::PosOnly);
        assert!(BlockValidator::validate_proof(&staked(&parent, chosen, 50), &ctx).is_ok());
        assert_eq!(
            BlockValidator::validate_proof(&staked(&parent, other, 50), &ctx),
            Err(ConsensusViolation::WrongProposer {
                expected: chosen.address(),
                got: other.address()
            })
        );
    }

    #[test]
    fn test_duplicate_and_unsigned_transactions() {
        let parent = genesis();
        let alice = generate_keypair();
        let tx = Transaction::transfer(&alice, Address([2; 20]), 1, 0, 1).signed(&alice);

        let mut h = header(&parent, Seal::Work { nonce: 0 }, Address([9; 20]));
        let txs = vec![tx.clone(), tx.clone()];
        h.transactions_root = Block::compute_transactions_root(&txs);
        let block = Block::from_parts(h.clone(), txs, None);
        assert_eq!(
            BlockValidator::validate_structure(&block),
            Err(ConsensusViolation::DuplicateTransaction(tx.id()))
        );

        let mut unsigned = tx;
        unsigned.amount = 2;
        let txs = vec![unsigned];
        h.transactions_root = Block::compute_transactions_root(&txs);
        let block = Block::from_parts(h, txs, None);
        assert!(matches!(
            BlockValidator::validate_structure(&block),
            Err(ConsensusViolation::InvalidTransaction { .. })
        ));
    }

    #[test]
    fn test_malformed_seal() {
        let parent = genesis();
        let mut block = mined(&parent);
        block.validator_signature = Some(Default::default());
        assert_eq!(
            BlockValidator::validate_structure(&block),
            Err(ConsensusViolation::MalformedSeal)
        );
    }

    #[test]
    fn test_forfeits() {
        let parent = genesis();
        let wallet = generate_keypair();
        let block = staked(&parent, &wallet, 10);
        let mut forfeits = Forfeits::new();
        assert!(forfeits.check(&block).is_ok());
        forfeits.record(1, wallet.address());
        assert!(matches!(
            forfeits.check(&block),
            Err(ConsensusViolation::ForfeitedProposer { height: 1, .. })
        ));
        forfeits.prune_through(1);
        assert!(forfeits.is_empty());
    }

    #[test]
    fn test_pow_blocks_name_no_proposer() {
        let parent = genesis();
        let block = mined(&parent);
        assert_eq!(proposer_of(&block), None);

        let mut forfeits = Forfeits::new();
        forfeits.record(1, block.header.beneficiary);
        assert!(forfeits.check(&block).is_ok());
    }
}
