//! Signal intents
//!
//! The OS handler does nothing but append a `(kind, timestamp)` word to a
//! fixed lock-free ring. Each supervision loop drains the ring at the top of
//! its tick and acts on the intents in arrival order, outside signal context.

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const CAPACITY: usize = 64;

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_SLOT: AtomicU64 = AtomicU64::new(0);

static SLOTS: [AtomicU64; CAPACITY] = [EMPTY_SLOT; CAPACITY];
static HEAD: AtomicUsize = AtomicUsize::new(0);
static TAIL: AtomicUsize = AtomicUsize::new(0);
static DROPPED: AtomicUsize = AtomicUsize::new(0);

/// Administrative signal kinds understood by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// SIGHUP: replace the running generation
    Reload,
    /// SIGTERM: cascade shutdown and exit
    Terminate,
    /// SIGINT: same as terminate, raised by an interactive interrupt
    InteractiveTerminate,
}

impl SignalKind {
    pub fn signal(self) -> Signal {
        match self {
            SignalKind::Reload => Signal::SIGHUP,
            SignalKind::Terminate => Signal::SIGTERM,
            SignalKind::InteractiveTerminate => Signal::SIGINT,
        }
    }

    fn from_raw(signum: libc::c_int) -> Option<Self> {
        match signum {
            libc::SIGHUP => Some(SignalKind::Reload),
            libc::SIGTERM => Some(SignalKind::Terminate),
            libc::SIGINT => Some(SignalKind::InteractiveTerminate),
            _ => None,
        }
    }

    fn code(self) -> u64 {
        match self {
            SignalKind::Reload => 1,
            SignalKind::Terminate => 2,
            SignalKind::InteractiveTerminate => 3,
        }
    }

    fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(SignalKind::Reload),
            2 => Some(SignalKind::Terminate),
            3 => Some(SignalKind::InteractiveTerminate),
            _ => None,
        }
    }

    pub fn is_terminate(self) -> bool {
        matches!(
            self,
            SignalKind::Terminate | SignalKind::InteractiveTerminate
        )
    }
}

/// A queued request produced by a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalIntent {
    pub kind: SignalKind,
    pub received_at: SystemTime,
}

fn encode(kind: SignalKind, at: SystemTime) -> u64 {
    let millis = at
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    (millis << 2) | kind.code()
}

fn decode(word: u64) -> Option<SignalIntent> {
    let kind = SignalKind::from_code(word & 0b11)?;
    Some(SignalIntent {
        kind,
        received_at: UNIX_EPOCH + Duration::from_millis(word >> 2),
    })
}

/// Append an intent to the ring
///
/// Async-signal-safe: atomics only, no allocation, no locks. When the ring is
/// full the intent is counted as dropped.
pub fn enqueue(kind: SignalKind) {
    let word = encode(kind, SystemTime::now());
    loop {
        let tail = TAIL.load(Ordering::Acquire);
        if tail.wrapping_sub(HEAD.load(Ordering::Acquire)) >= CAPACITY {
            DROPPED.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if TAIL
            .compare_exchange(tail, tail.wrapping_add(1), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            SLOTS[tail % CAPACITY].store(word, Ordering::Release);
            return;
        }
    }
}

/// Take every queued intent, oldest first
pub fn drain() -> Vec<SignalIntent> {
    let tail = TAIL.load(Ordering::Acquire);
    let mut head = HEAD.load(Ordering::Acquire);
    let mut intents = Vec::new();
    while head != tail {
        let word = SLOTS[head % CAPACITY].swap(0, Ordering::AcqRel);
        if let Some(intent) = decode(word) {
            intents.push(intent);
        }
        head = head.wrapping_add(1);
    }
    HEAD.store(head, Ordering::Release);

    let dropped = DROPPED.swap(0, Ordering::Relaxed);
    if dropped > 0 {
        tracing::warn!("{} signal intent(s) dropped, queue full", dropped);
    }
    intents
}

/// Whether an intent is queued that the next [`drain`] would return
///
/// Checked right before an interval sleep, so an intent that landed after the
/// last drain does not wait out a whole interval.
pub fn pending() -> bool {
    TAIL.load(Ordering::Acquire) != HEAD.load(Ordering::Acquire)
}

/// Forget intents inherited across a fork
///
/// A freshly forked level starts with a copy of its spawner's ring; whatever
/// is in there was meant for the spawner.
pub fn reset() {
    let tail = TAIL.load(Ordering::Acquire);
    for slot in SLOTS.iter() {
        slot.store(0, Ordering::Relaxed);
    }
    HEAD.store(tail, Ordering::Release);
    DROPPED.store(0, Ordering::Relaxed);
}

extern "C" fn handler(signum: libc::c_int) {
    if let Some(kind) = SignalKind::from_raw(signum) {
        enqueue(kind);
    }
}

/// Route the given kinds into the intent queue
///
/// Handlers go in without `SA_RESTART`, an interval sleep returns as soon as
/// one has run.
pub fn install(kinds: &[SignalKind]) -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(handler),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for kind in kinds {
        // SAFETY: the handler only touches atomics, see `enqueue`.
        unsafe { signal::sigaction(kind.signal(), &action) }?;
    }
    Ok(())
}

/// Ignore `sig` entirely
pub fn ignore(sig: Signal) -> nix::Result<()> {
    set_disposition(sig, SigHandler::SigIgn)
}

/// Put `sig` back to the kernel default action
pub fn restore_default(sig: Signal) -> nix::Result<()> {
    set_disposition(sig, SigHandler::SigDfl)
}

fn set_disposition(sig: Signal, handler: SigHandler) -> nix::Result<()> {
    let action = SigAction::new(handler, SaFlags::empty(), SigSet::empty());
    // SAFETY: installs a kernel disposition, no Rust handler is involved.
    unsafe { signal::sigaction(sig, &action) }?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_drain_preserves_arrival_order() {
        reset();
        enqueue(SignalKind::Reload);
        enqueue(SignalKind::Terminate);
        enqueue(SignalKind::InteractiveTerminate);

        let kinds: Vec<_> = drain().into_iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SignalKind::Reload,
                SignalKind::Terminate,
                SignalKind::InteractiveTerminate
            ]
        );
        assert!(drain().is_empty());
    }

    #[test]
    #[serial]
    fn test_full_queue_drops_newest() {
        reset();
        for _ in 0..CAPACITY + 5 {
            enqueue(SignalKind::Reload);
        }
        assert_eq!(drain().len(), CAPACITY);
        enqueue(SignalKind::Terminate);
        assert_eq!(drain()[0].kind, SignalKind::Terminate);
    }

    #[test]
    #[serial]
    fn test_pending_tracks_undrained_intents() {
        reset();
        assert!(!pending());
        enqueue(SignalKind::Reload);
        assert!(pending());
        drain();
        assert!(!pending());
    }

    #[test]
    #[serial]
    fn test_reset_discards_pending_intents() {
        reset();
        enqueue(SignalKind::Terminate);
        reset();
        assert!(!pending());
        assert!(drain().is_empty());
    }

    #[test]
    fn test_intent_timestamp_survives_encoding() {
        let at = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        let intent = decode(encode(SignalKind::InteractiveTerminate, at)).expect("decodes");
        assert_eq!(intent.kind, SignalKind::InteractiveTerminate);
        assert_eq!(intent.received_at, at);
        assert!(decode(0).is_none());
    }

    #[test]
    #[serial]
    fn test_installed_handler_queues_raised_signal() {
        reset();
        install(&[SignalKind::Reload]).expect("install");
        signal::raise(Signal::SIGHUP).expect("raise");
        let intents = drain();
        restore_default(Signal::SIGHUP).expect("restore");

        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].kind, SignalKind::Reload);
    }

    #[test]
    fn test_terminate_kinds() {
        assert!(SignalKind::Terminate.is_terminate());
        assert!(SignalKind::InteractiveTerminate.is_terminate());
        assert!(!SignalKind::Reload.is_terminate());
        assert_eq!(SignalKind::Reload.signal(), Signal::SIGHUP);
    }
}
