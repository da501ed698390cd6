//! Transaction mempool for pending transactions.
//!
//! Admission is serialized per sender (one lock per address) so nonce and
//! balance projections stay consistent, while different senders submit in
//! parallel. A single global index orders everything by descending fee,
//! then arrival, for block selection.
//!
//! Lock order is always sender queue, then global index.

use crate::config::MempoolConfig;
use crate::error::PoolError;
use crate::executor::check_admission;
use hodl_core::{Account, Address, Block, Hash, Transaction};
use parking_lot::{Mutex, RwLock};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub type Result<T> = std::result::Result<T, PoolError>;

/// Selection order: highest fee first, then earliest arrival.
type OrderKey = (Reverse<u64>, u64, Hash);

struct PooledTx {
    tx: Arc<Transaction>,
    key: OrderKey,
    arrived: Instant,
}

/// Pending transactions of one sender, keyed by nonce.
#[derive(Default)]
struct SenderQueue {
    /// Last committed nonce known for the sender.
    committed: u64,
    by_nonce: BTreeMap<u64, PooledTx>,
}

impl SenderQueue {
    /// Balance already promised to pooled transactions.
    fn pending_spend(&self) -> u64 {
        self.by_nonce
            .values()
            .fold(0u64, |acc, p| acc.saturating_add(p.tx.total_cost()))
    }
}

#[derive(Default)]
struct GlobalIndex {
    ordering: BTreeMap<OrderKey, Arc<Transaction>>,
    by_id: HashMap<Hash, OrderKey>,
}

/// Transaction mempool.
pub struct Mempool {
    config: MempoolConfig,
    max_gas_per_tx: u64,
    senders: RwLock<HashMap<Address, Arc<Mutex<SenderQueue>>>>,
    global: Mutex<GlobalIndex>,
    next_seq: AtomicU64,
}

impl Mempool {
    /// Create a new mempool with the given configuration.
    pub fn new(config: MempoolConfig, max_gas_per_tx: u64) -> Self {
        Self {
            config,
            max_gas_per_tx,
            senders: RwLock::new(HashMap::new()),
            global: Mutex::new(GlobalIndex::default()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Get the number of transactions in the mempool.
    pub fn len(&self) -> usize {
        self.global.lock().ordering.len()
    }

    /// Check if the mempool is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if a transaction is in the mempool.
    pub fn contains(&self, id: &Hash) -> bool {
        self.global.lock().by_id.contains_key(id)
    }

    /// Get a transaction from the mempool.
    pub fn get(&self, id: &Hash) -> Option<Transaction> {
        let global = self.global.lock();
        let key = global.by_id.get(id)?;
        global.ordering.get(key).map(|tx| Transaction::clone(tx))
    }

    fn queue(&self, sender: &Address) -> Arc<Mutex<SenderQueue>> {
        if let Some(queue) = self.senders.read().get(sender) {
            return Arc::clone(queue);
        }
        Arc::clone(self.senders.write().entry(*sender).or_default())
    }

    /// Validate `tx` against the sender's committed account and the
    /// sender's already-pooled transactions, then pool it.
    pub fn submit(&self, tx: Transaction, committed: Account) -> Result<Hash> {
        let id = tx.id();
        let queue = self.queue(&tx.sender);
        let mut queue = queue.lock();

        queue.committed = queue.committed.max(committed.nonce);
        self.drop_stale(&mut queue);

        if queue.by_nonce.values().any(|p| p.key.2 == id) {
            return Err(PoolError::Duplicate(id));
        }
        let pending = queue.by_nonce.len() as u64;
        let available = committed.balance.saturating_sub(queue.pending_spend());
        check_admission(&tx, queue.committed + pending, available, self.max_gas_per_tx)?;

        if queue.by_nonce.len() >= self.config.max_per_sender {
            return Err(PoolError::Full(self.config.max_per_sender));
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let key = (Reverse(tx.fee), seq, id);
        let tx = Arc::new(tx);
        {
            let mut global = self.global.lock();
            if global.ordering.len() >= self.config.max_transactions {
                return Err(PoolError::Full(self.config.max_transactions));
            }
            global.ordering.insert(key, Arc::clone(&tx));
            global.by_id.insert(id, key);
        }
        debug!(%id, sender = %tx.sender, nonce = tx.nonce, fee = tx.fee, "transaction pooled");
        queue.by_nonce.insert(
            tx.nonce,
            PooledTx {
                tx,
                key,
                arrived: Instant::now(),
            },
        );
        Ok(id)
    }

    /// Remove entries whose nonce the chain has already used.
    fn drop_stale(&self, queue: &mut SenderQueue) {
        let fresh = queue.by_nonce.split_off(&(queue.committed + 1));
        let stale = std::mem::replace(&mut queue.by_nonce, fresh);
        if stale.is_empty() {
            return;
        }
        let mut global = self.global.lock();
        for pooled in stale.values() {
            global.ordering.remove(&pooled.key);
            global.by_id.remove(&pooled.key.2);
            trace!(id = %pooled.key.2, "evicted transaction with used nonce");
        }
    }

    /// Pick transactions for the next block: highest fee first, each
    /// sender's transactions in nonce order, within `max_count` and
    /// `max_bytes` of encoded transactions. Expired and nonce-invalidated
    /// entries are purged first.
    pub fn select_for_block(&self, max_count: usize, max_bytes: usize) -> Vec<Transaction> {
        self.evict_expired(Duration::from_secs(self.config.ttl_secs));

        let candidates: Vec<Arc<Transaction>> = self.global.lock().ordering.values().cloned().collect();
        let mut next_nonce: HashMap<Address, u64> = HashMap::new();
        for tx in &candidates {
            if !next_nonce.contains_key(&tx.sender) {
                let committed = self.queue(&tx.sender).lock().committed;
                next_nonce.insert(tx.sender, committed + 1);
            }
        }

        let mut selected = Vec::new();
        let mut bytes = 0usize;
        let mut remaining = candidates;
        // a cheap later nonce can unblock a pricier one, so sweep until stable
        loop {
            let mut progressed = false;
            let mut deferred = Vec::new();
            for tx in remaining {
                if selected.len() >= max_count {
                    break;
                }
                let expected = next_nonce.entry(tx.sender).or_insert(1);
                let size = tx.encoded_len();
                if tx.nonce == *expected && bytes + size <= max_bytes {
                    *expected += 1;
                    bytes += size;
                    selected.push(Transaction::clone(&tx));
                    progressed = true;
                } else {
                    deferred.push(tx);
                }
            }
            if !progressed || deferred.is_empty() || selected.len() >= max_count {
                break;
            }
            remaining = deferred;
        }
        debug!(count = selected.len(), bytes, "selected transactions for block");
        selected
    }

    /// Remove the given transactions, if pooled.
    pub fn remove(&self, ids: &[Hash]) {
        for id in ids {
            let entry = {
                let global = self.global.lock();
                global
                    .by_id
                    .get(id)
                    .and_then(|key| global.ordering.get(key))
                    .map(|tx| (tx.sender, tx.nonce))
            };
            let Some((sender, nonce)) = entry else { continue };

            let queue = self.queue(&sender);
            let mut queue = queue.lock();
            if queue.by_nonce.get(&nonce).is_some_and(|p| p.key.2 == *id) {
                if let Some(pooled) = queue.by_nonce.remove(&nonce) {
                    let mut global = self.global.lock();
                    global.ordering.remove(&pooled.key);
                    global.by_id.remove(id);
                }
            }
        }
    }

    /// Forget a committed block's transactions and advance the committed
    /// nonce of their senders, so conflicting entries are purged.
    pub fn on_block_committed(&self, block: &Block) {
        let ids: Vec<Hash> = block.transactions.iter().map(Transaction::id).collect();
        self.remove(&ids);
        for tx in &block.transactions {
            let queue = self.queue(&tx.sender);
            let mut queue = queue.lock();
            queue.committed = queue.committed.max(tx.nonce);
        }
    }

    /// Pool a transaction again after its block left the chain. The
    /// sender's committed nonce is reset to `committed`, which may be lower
    /// than what the departed block had advanced it to.
    pub fn reinstate(&self, tx: Transaction, committed: Account) -> Result<Hash> {
        self.queue(&tx.sender).lock().committed = committed.nonce;
        self.submit(tx, committed)
    }

    /// Drop transactions pooled longer than `ttl` and those whose nonce has
    /// been used on chain. Returns how many were removed.
    pub fn evict_expired(&self, ttl: Duration) -> usize {
        let queues: Vec<Arc<Mutex<SenderQueue>>> = self.senders.read().values().cloned().collect();
        let mut evicted = 0;
        for queue in queues {
            let mut queue = queue.lock();
            let before = queue.by_nonce.len();
            self.drop_stale(&mut queue);

            // removing one nonce strands every later one from that sender
            let expired_from = queue
                .by_nonce
                .iter()
                .find(|(_, p)| p.arrived.elapsed() >= ttl)
                .map(|(nonce, _)| *nonce);
            if let Some(from) = expired_from {
                let expired = queue.by_nonce.split_off(&from);
                let mut global = self.global.lock();
                for pooled in expired.values() {
                    global.ordering.remove(&pooled.key);
                    global.by_id.remove(&pooled.key.2);
                }
            }
            evicted += before - queue.by_nonce.len();
        }

        self.senders
            .write()
            .retain(|_, queue| Arc::strong_count(queue) > 1 || !queue.lock().by_nonce.is_empty());
        if evicted > 0 {
            debug!(evicted, "evicted transactions from mempool");
        }
        evicted
    }

    /// Pooled transactions from `sender`, in nonce order.
    pub fn pending_for(&self, sender: &Address) -> Vec<Transaction> {
        let Some(queue) = self.senders.read().get(sender).cloned() else {
            return Vec::new();
        };
        let queue = queue.lock();
        queue
            .by_nonce
            .values()
            .map(|p| Transaction::clone(&p.tx))
            .collect()
    }

    /// Get mempool statistics.
    pub fn stats(&self) -> MempoolStats {
        MempoolStats {
            total_transactions: self.len(),
            unique_senders: self
                .senders
                .read()
                .values()
                .filter(|queue| !queue.lock().by_nonce.is_empty())
                .count(),
            capacity: self.config.max_transactions,
        }
    }
}

/// Mempool statistics.
#[derive(Debug, Clone)]
pub struct MempoolStats {
    /// Total number of transactions.
    pub total_transactions: usize,
    /// Number of unique senders.
    pub unique_senders: usize,
    /// Mempool capacity.
    pub capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvalidTxReason;
    use hodl_core::{generate_keypair, BlockHeader, Seal, Wallet};
    use std::thread;

    fn pool() -> Mempool {
        Mempool::new(MempoolConfig::default(), 1_000_000)
    }

    fn rich() -> Account {
        Account::with_balance(1_000)
    }

    fn send(wallet: &Wallet, amount: u64, fee: u64, nonce: u64) -> Transaction {
        Transaction::transfer(wallet, Address([2; 20]), amount, fee, nonce).signed(wallet)
    }

    #[test]
    fn test_mempool_submit_and_get() {
        let mempool = pool();
        let alice = generate_keypair();
        let tx = send(&alice, 10, 1, 1);

        let id = mempool.submit(tx.clone(), rich()).unwrap();
        assert_eq!(mempool.len(), 1);
        assert!(mempool.contains(&id));
        assert_eq!(mempool.get(&id).unwrap(), tx);
    }

    #[test]
    fn test_mempool_duplicate_rejected() {
        let mempool = pool();
        let alice = generate_keypair();
        let tx = send(&alice, 10, 1, 1);

        mempool.submit(tx.clone(), rich()).unwrap();
        assert_eq!(mempool.submit(tx.clone(), rich()), Err(PoolError::Duplicate(tx.id())));
    }

    #[test]
    fn test_reused_nonce_rejected() {
        let mempool = pool();
        let alice = generate_keypair();
        mempool.submit(send(&alice, 10, 1, 1), rich()).unwrap();

        // same nonce, different body
        assert_eq!(
            mempool.submit(send(&alice, 11, 1, 1), rich()),
            Err(PoolError::InvalidTransaction(InvalidTxReason::BadNonce {
                expected: 2,
                got: 1
            }))
        );

        // nonce already committed on chain
        let committed = Account {
            nonce: 5,
            balance: 1_000,
            stake: 0,
        };
        let bob = generate_keypair();
        assert!(matches!(
            mempool.submit(send(&bob, 1, 1, 5), committed),
            Err(PoolError::InvalidTransaction(InvalidTxReason::BadNonce { expected: 6, got: 5 }))
        ));
    }

    #[test]
    fn test_nonce_gap_rejected() {
        let mempool = pool();
        let alice = generate_keypair();
        assert!(matches!(
            mempool.submit(send(&alice, 10, 1, 2), rich()),
            Err(PoolError::InvalidTransaction(InvalidTxReason::BadNonce { expected: 1, got: 2 }))
        ));
    }

    #[test]
    fn test_projected_balance() {
        let mempool = pool();
        let alice = generate_keypair();
        let account = Account::with_balance(100);
        mempool.submit(send(&alice, 60, 5, 1), account).unwrap();
        assert_eq!(
            mempool.submit(send(&alice, 40, 5, 2), account),
            Err(PoolError::InvalidTransaction(
                InvalidTxReason::InsufficientBalance {
                    required: 45,
                    available: 35
                }
            ))
        );
        mempool.submit(send(&alice, 30, 5, 2), account).unwrap();
    }

    #[test]
    fn test_bad_signature_and_gas() {
        let mempool = pool();
        let alice = generate_keypair();
        let mut tx = send(&alice, 10, 1, 1);
        tx.amount = 11;
        assert_eq!(
            mempool.submit(tx, rich()),
            Err(PoolError::InvalidTransaction(InvalidTxReason::BadSignature))
        );

        let greedy = Transaction::call(&alice, Address([3; 20]), vec![], 1, 1, 2_000_000).signed(&alice);
        assert!(matches!(
            mempool.submit(greedy, rich()),
            Err(PoolError::InvalidTransaction(InvalidTxReason::GasLimitTooHigh { .. }))
        ));

        let empty = Transaction::deploy(&alice, vec![], 1, 1, 100).signed(&alice);
        assert_eq!(
            mempool.submit(empty, rich()),
            Err(PoolError::InvalidTransaction(InvalidTxReason::EmptyDeployCode))
        );
    }

    #[test]
    fn test_select_orders_by_fee_then_arrival() {
        let mempool = pool();
        let a = generate_keypair();
        let b = generate_keypair();
        let c = generate_keypair();
        let low = send(&a, 1, 1, 1);
        let high = send(&b, 1, 9, 1);
        let tie = send(&c, 1, 1, 1);
        mempool.submit(low.clone(), rich()).unwrap();
        mempool.submit(high.clone(), rich()).unwrap();
        mempool.submit(tie.clone(), rich()).unwrap();

        assert_eq!(mempool.select_for_block(10, usize::MAX), vec![high, low, tie]);
    }

    #[test]
    fn test_select_respects_sender_nonce_order() {
        let mempool = pool();
        let alice = generate_keypair();
        let first = send(&alice, 1, 1, 1);
        let second = send(&alice, 1, 50, 2);
        mempool.submit(first.clone(), rich()).unwrap();
        mempool.submit(second.clone(), rich()).unwrap();

        assert_eq!(mempool.select_for_block(10, usize::MAX), vec![first, second]);
    }

    #[test]
    fn test_select_limits() {
        let mempool = pool();
        let alice = generate_keypair();
        let txs: Vec<_> = (1..=3).map(|n| send(&alice, 1, 1, n)).collect();
        for tx in &txs {
            mempool.submit(tx.clone(), rich()).unwrap();
        }
        assert_eq!(mempool.select_for_block(2, usize::MAX).len(), 2);
        let one = txs[0].encoded_len();
        assert_eq!(mempool.select_for_block(10, one).len(), 1);
        assert!(mempool.select_for_block(10, one - 1).is_empty());
    }

    #[test]
    fn test_capacity_limits() {
        let config = MempoolConfig {
            max_transactions: 2,
            max_per_sender: 10,
            ttl_secs: 60,
        };
        let mempool = Mempool::new(config, 1_000);
        let alice = generate_keypair();
        mempool.submit(send(&alice, 1, 1, 1), rich()).unwrap();
        mempool.submit(send(&alice, 1, 1, 2), rich()).unwrap();
        assert_eq!(mempool.submit(send(&alice, 1, 1, 3), rich()), Err(PoolError::Full(2)));
    }

    #[test]
    fn test_commit_purges_conflicting_nonces() {
        let mempool = pool();
        let alice = generate_keypair();
        let pooled = send(&alice, 10, 1, 1);
        mempool.submit(pooled.clone(), rich()).unwrap();

        // a different transaction with the same nonce made it on chain
        let winner = send(&alice, 20, 1, 1);
        let header = BlockHeader {
            index: 1,
            timestamp: 1,
            previous_hash: Hash::ZERO,
            transactions_root: Block::compute_transactions_root(std::slice::from_ref(&winner)),
            state_root: Hash::ZERO,
            difficulty: 0,
            beneficiary: Address::ZERO,
            seal: Seal::Work { nonce: 0 },
        };
        mempool.on_block_committed(&Block::from_parts(header, vec![winner.clone()], None));

        assert!(mempool.select_for_block(10, usize::MAX).is_empty());
        assert!(!mempool.contains(&pooled.id()));

        // the block was replaced, so the chain is back at nonce 0
        assert!(mempool.submit(winner.clone(), rich()).is_err());
        mempool.reinstate(winner.clone(), rich()).unwrap();
        assert_eq!(mempool.select_for_block(10, usize::MAX), vec![winner]);
    }

    #[test]
    fn test_remove_and_expire() {
        let mempool = pool();
        let alice = generate_keypair();
        let bob = generate_keypair();
        let a = mempool.submit(send(&alice, 1, 1, 1), rich()).unwrap();
        mempool.submit(send(&bob, 1, 1, 1), rich()).unwrap();

        mempool.remove(&[a, Hash::ZERO]);
        assert_eq!(mempool.len(), 1);
        assert_eq!(mempool.evict_expired(Duration::ZERO), 1);
        assert!(mempool.is_empty());
        assert_eq!(mempool.stats().unique_senders, 0);
    }

    #[test]
    fn test_concurrent_submissions() {
        let mempool = Arc::new(pool());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let mempool = Arc::clone(&mempool);
                thread::spawn(move || {
                    let wallet = generate_keypair();
                    for nonce in 1..=10 {
                        mempool.submit(send(&wallet, 1, nonce, nonce), rich()).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(mempool.len(), 40);
        assert_eq!(mempool.stats().unique_senders, 4);
        assert_eq!(mempool.select_for_block(100, usize::MAX).len(), 40);
    }
}
