//! Queues and cancellation flags connecting the independently running units.
//!
//! The queues are the only state shared between the bridge, the router, the
//! update sessions and the CLI sink. Every unit also owns exactly one
//! [`CancelFlag`], checked at its loop boundaries.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crossbeam_channel::{bounded, Receiver, Sender};

/// Encoded frame bytes as they travel between the bridge and the router.
pub type RawFrame = Vec<u8>;

/// One side of a queue pair: what this side sends and what it receives.
#[derive(Debug)]
pub struct Endpoint<T> {
    pub tx: Sender<T>,
    pub rx: Receiver<T>,
}

/// Create two bounded queues of `capacity` elements, crossed so that what one
/// endpoint sends is received by the other.
pub fn queue_pair<T>(capacity: usize) -> (Endpoint<T>, Endpoint<T>) {
    let (a_tx, b_rx) = bounded(capacity);
    let (b_tx, a_rx) = bounded(capacity);
    (Endpoint { tx: a_tx, rx: a_rx }, Endpoint { tx: b_tx, rx: b_rx })
}

/// A one-way cancellation request. Once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Holds the flags of many units so that they can all be cancelled at once,
/// e.g. from the interrupt handler.
#[derive(Debug, Clone, Default)]
pub struct CancelGroup {
    flags: Vec<CancelFlag>,
}

impl CancelGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, flag: &CancelFlag) {
        self.flags.push(flag.clone());
    }

    pub fn cancel_all(&self) {
        for flag in &self.flags {
            flag.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn queue_pair_is_crossed() {
    let (left, right) = queue_pair::<u8>(2);
    left.tx.send(1).unwrap();
    right.tx.send(2).unwrap();
    assert_eq!(right.rx.try_recv(), Ok(1));
    assert_eq!(left.rx.try_recv(), Ok(2));
}

#[test]
fn queue_pair_is_bounded() {
    let (left, _right) = queue_pair::<u8>(1);
    left.tx.try_send(1).unwrap();
    assert!(left.tx.is_full());
    assert!(left.tx.try_send(2).is_err());
}

#[test]
fn cancellation_is_one_way_and_shared_by_clones() {
    let flag = CancelFlag::new();
    let clone = flag.clone();
    assert!(!clone.is_cancelled());
    flag.cancel();
    flag.cancel();
    assert!(clone.is_cancelled());
}

#[test]
fn group_fans_out_to_every_flag() {
    let flags: Vec<CancelFlag> = (0..4).map(|_| CancelFlag::new()).collect();
    let outsider = CancelFlag::new();
    let mut group = CancelGroup::new();
    flags.iter().for_each(|flag| group.add(flag));

    group.clone().cancel_all();

    assert_eq!(group.len(), 4);
    assert!(flags.iter().all(CancelFlag::is_cancelled));
    assert!(!outsider.is_cancelled());
}
