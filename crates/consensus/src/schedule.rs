//! Hybrid schedule: which proof kinds may extend the chain at a height,
//! and the phases a height goes through.

use hodl_core::ProposerKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How proof of work and proof of stake share block production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusPolicy {
    /// Only mined blocks.
    PowOnly,
    /// Only validator-signed blocks.
    PosOnly,
    /// Epochs of `epoch_length` blocks; even epochs are PoW, odd are PoS.
    Alternating { epoch_length: u64 },
    /// Either kind at any height; fork choice settles competition.
    Simultaneous,
}

impl Default for ConsensusPolicy {
    fn default() -> Self {
        ConsensusPolicy::Alternating { epoch_length: 10 }
    }
}

impl ConsensusPolicy {
    /// Proof kinds eligible for the block at `height`.
    pub fn eligible(&self, height: u64) -> &'static [ProposerKind] {
        const WORK: &[ProposerKind] = &[ProposerKind::Work];
        const STAKE: &[ProposerKind] = &[ProposerKind::Stake];
        const BOTH: &[ProposerKind] = &[ProposerKind::Work, ProposerKind::Stake];

        match self {
            ConsensusPolicy::PowOnly => WORK,
            ConsensusPolicy::PosOnly => STAKE,
            ConsensusPolicy::Simultaneous => BOTH,
            ConsensusPolicy::Alternating { epoch_length } => {
                let epoch = height / (*epoch_length).max(1);
                if epoch % 2 == 0 {
                    WORK
                } else {
                    STAKE
                }
            }
        }
    }

    pub fn allows(&self, kind: ProposerKind, height: u64) -> bool {
        self.eligible(height).contains(&kind)
    }

    /// Human-readable consensus label.
    pub fn label(&self) -> &'static str {
        match self {
            ConsensusPolicy::PowOnly => "PoW",
            ConsensusPolicy::PosOnly => "PoS",
            ConsensusPolicy::Alternating { .. } | ConsensusPolicy::Simultaneous => "PoW + PoS Hybrid",
        }
    }
}

impl fmt::Display for ConsensusPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusPolicy::PowOnly => f.write_str("pow-only"),
            ConsensusPolicy::PosOnly => f.write_str("pos-only"),
            ConsensusPolicy::Alternating { epoch_length } => {
                write!(f, "alternating (epoch {epoch_length})")
            }
            ConsensusPolicy::Simultaneous => f.write_str("simultaneous"),
        }
    }
}

/// Stages a height passes through while a block is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    ProposerSelection,
    CandidateAssembly,
    Validation,
    Commit,
}

impl Phase {
    /// The following phase; `None` after commit.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::ProposerSelection => Some(Phase::CandidateAssembly),
            Phase::CandidateAssembly => Some(Phase::Validation),
            Phase::Validation => Some(Phase::Commit),
            Phase::Commit => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::ProposerSelection => "proposer-selection",
            Phase::CandidateAssembly => "candidate-assembly",
            Phase::Validation => "validation",
            Phase::Commit => "commit",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alternating_epochs() {
        let policy = ConsensusPolicy::Alternating { epoch_length: 5 };
        assert!(policy.allows(ProposerKind::Work, 0));
        assert!(policy.allows(ProposerKind::Work, 4));
        assert!(!policy.allows(ProposerKind::Stake, 4));
        assert!(policy.allows(ProposerKind::Stake, 5));
        assert!(policy.allows(ProposerKind::Stake, 9));
        assert!(policy.allows(ProposerKind::Work, 10));
    }

    #[test]
    fn test_zero_epoch_length_alternates_every_block() {
        let policy = ConsensusPolicy::Alternating { epoch_length: 0 };
        assert_eq!(policy.eligible(2), &[ProposerKind::Work]);
        assert_eq!(policy.eligible(3), &[ProposerKind::Stake]);
    }

    #[test]
    fn test_single_kind_policies() {
        assert!(!ConsensusPolicy::PowOnly.allows(ProposerKind::Stake, 3));
        assert!(!ConsensusPolicy::PosOnly.allows(ProposerKind::Work, 3));
        assert_eq!(ConsensusPolicy::Simultaneous.eligible(3).len(), 2);
    }

    #[test]
    fn test_policy_serde() {
        let json = serde_json::to_string(&ConsensusPolicy::PowOnly).unwrap();
        assert_eq!(json, "\"pow_only\"");
        let policy: ConsensusPolicy =
            serde_json::from_str(r#"{"alternating":{"epoch_length":3}}"#).unwrap();
        assert_eq!(policy, ConsensusPolicy::Alternating { epoch_length: 3 });
    }

    #[test]
    fn test_phase_order() {
        let mut phases = vec![Phase::ProposerSelection];
        while let Some(next) = phases.last().and_then(|p| p.next()) {
            phases.push(next);
        }
        assert_eq!(
            phases,
            vec![
                Phase::ProposerSelection,
                Phase::CandidateAssembly,
                Phase::Validation,
                Phase::Commit
            ]
        );
    }
}
