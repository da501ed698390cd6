//! Transaction types and signing.

use crate::crypto::{Address, PublicKey, Signature, Wallet};
use crate::hash::{hash, Hash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during transaction checks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("sender address does not match the sender key")]
    SenderKeyMismatch,
}

/// What a transaction asks the ledger to do beyond a plain transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Create a contract from sandbox bytecode.
    Deploy { code: Vec<u8> },
    /// Invoke the contract at `recipient` with the given arguments.
    Call { args: Vec<u64> },
    /// Lock `amount` of the sender's balance as stake.
    Stake,
    /// Release `amount` of the sender's stake back to its balance.
    Unstake,
}

/// A transaction on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender's address.
    pub sender: Address,
    /// Sender's public key; the sender address is derived from it.
    pub sender_key: PublicKey,
    /// Recipient's address (the contract for calls, ignored for deploys).
    pub recipient: Address,
    /// Value to transfer.
    pub amount: u64,
    /// Fee paid to the block beneficiary.
    pub fee: u64,
    /// Sender's sequence number; the first transaction carries 1.
    pub nonce: u64,
    /// Computation budget for contract payloads.
    pub gas_limit: u64,
    /// Optional contract or staking payload.
    pub payload: Option<Payload>,
    /// Signature over every other field.
    pub signature: Signature,
}

/// Unsigned transaction data (for hashing and signing).
#[derive(Serialize)]
struct UnsignedTransaction<'a> {
    sender: &'a Address,
    sender_key: &'a PublicKey,
    recipient: &'a Address,
    amount: u64,
    fee: u64,
    nonce: u64,
    gas_limit: u64,
    payload: &'a Option<Payload>,
}

impl Transaction {
    /// Create a plain transfer from `wallet`; call [`Transaction::signed`]
    /// before submitting.
    pub fn transfer(wallet: &Wallet, recipient: Address, amount: u64, fee: u64, nonce: u64) -> Self {
        Self {
            sender: wallet.address(),
            sender_key: wallet.public_key.clone(),
            recipient,
            amount,
            fee,
            nonce,
            gas_limit: 0,
            payload: None,
            signature: Signature::default(),
        }
    }

    /// Create a contract deployment.
    pub fn deploy(wallet: &Wallet, code: Vec<u8>, fee: u64, nonce: u64, gas_limit: u64) -> Self {
        let mut tx = Self::transfer(wallet, Address::ZERO, 0, fee, nonce);
        tx.gas_limit = gas_limit;
        tx.payload = Some(Payload::Deploy { code });
        tx
    }

    /// Create a contract call.
    pub fn call(
        wallet: &Wallet,
        contract: Address,
        args: Vec<u64>,
        fee: u64,
        nonce: u64,
        gas_limit: u64,
    ) -> Self {
        let mut tx = Self::transfer(wallet, contract, 0, fee, nonce);
        tx.gas_limit = gas_limit;
        tx.payload = Some(Payload::Call { args });
        tx
    }

    /// Create a stake (`bond == true`) or unstake transaction.
    pub fn stake(wallet: &Wallet, amount: u64, bond: bool, fee: u64, nonce: u64) -> Self {
        let mut tx = Self::transfer(wallet, wallet.address(), amount, fee, nonce);
        tx.payload = Some(if bond { Payload::Stake } else { Payload::Unstake });
        tx
    }

    /// Hash of everything except the signature.
    pub fn signing_hash(&self) -> Hash {
        let unsigned = UnsignedTransaction {
            sender: &self.sender,
            sender_key: &self.sender_key,
            recipient: &self.recipient,
            amount: self.amount,
            fee: self.fee,
            nonce: self.nonce,
            gas_limit: self.gas_limit,
            payload: &self.payload,
        };
        let encoded = bincode::serialize(&unsigned).expect("serialization should not fail");
        hash(&encoded)
    }

    /// Transaction id: hash of the full signed encoding.
    pub fn id(&self) -> Hash {
        let encoded = bincode::serialize(self).expect("serialization should not fail");
        hash(&encoded)
    }

    /// Size of the encoded transaction in bytes.
    pub fn encoded_len(&self) -> usize {
        bincode::serialized_size(self).expect("serialization should not fail") as usize
    }

    /// Sign the transaction with the given wallet.
    pub fn sign(&mut self, wallet: &Wallet) {
        let hash = self.signing_hash();
        self.signature = wallet.sign_hash(&hash);
    }

    /// Create a signed transaction.
    pub fn signed(mut self, wallet: &Wallet) -> Self {
        self.sign(wallet);
        self
    }

    /// Check the sender key matches the sender address and signed the
    /// transaction.
    pub fn verify(&self) -> Result<(), TransactionError> {
        if self.sender_key.to_address() != self.sender {
            return Err(TransactionError::SenderKeyMismatch);
        }
        self.sender_key
            .verify(self.signing_hash().as_bytes(), &self.signature)
            .map_err(|_| TransactionError::VerificationFailed)
    }

    /// Balance the sender needs up front. Unstaking draws on stake, so
    /// only the fee is paid from balance.
    pub fn total_cost(&self) -> u64 {
        match self.payload {
            Some(Payload::Unstake) => self.fee,
            _ => self.amount.saturating_add(self.fee),
        }
    }

    pub fn is_deploy(&self) -> bool {
        matches!(self.payload, Some(Payload::Deploy { .. }))
    }

    pub fn is_call(&self) -> bool {
        matches!(self.payload, Some(Payload::Call { .. }))
    }

    /// Contract address for a deployment: first 20 bytes of
    /// `hash(sender || nonce)`.
    pub fn contract_address(&self) -> Option<Address> {
        if !self.is_deploy() {
            return None;
        }
        let mut data = Vec::with_capacity(28);
        data.extend_from_slice(&self.sender.0);
        data.extend_from_slice(&self.nonce.to_le_bytes());
        Some(Address::from_hash(&hash(&data)))
    }
}
