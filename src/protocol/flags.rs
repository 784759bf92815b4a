//! The flags register, shared between the signaling strategy, the bus engine
//! and the ATN edge handler.
//!
//! The ATN edge handler may only set [`Flags::ATN_ASSERTED`].  Everything
//! else belongs to the bus service loop, which clears the register once per
//! protocol cycle.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use bitflags::bitflags;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use portable_atomic::{AtomicU8, Ordering};

bitflags! {
    /// Transient protocol outcomes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        /// An ATN falling edge has been seen and not yet serviced.
        const ATN_ASSERTED = 0x01;

        /// A hard failure occurred during the last transfer.
        const ERROR = 0x02;

        /// The talker signalled EOI with no byte following.
        const EMPTY_STREAM = 0x04;

        /// The byte just received was the last of the transfer.
        const EOI_RECVD = 0x08;

        /// The controller probed for JiffyDOS, and we answered.
        const FAST_DETECTED = 0x10;
    }
}

impl Flags {
    /// The flags a strategy clears before each byte it receives.
    pub const TRANSIENT: Flags = Flags::ERROR
        .union(Flags::EMPTY_STREAM)
        .union(Flags::EOI_RECVD)
        .union(Flags::FAST_DETECTED);
}

/// An atomic register of [`Flags`], with a wake signal raised alongside
/// ATN so the bus service task can sleep until there is work.
pub struct FlagsRegister {
    bits: AtomicU8,
    wake: Signal<CriticalSectionRawMutex, ()>,
}

impl Default for FlagsRegister {
    fn default() -> Self {
        Self::new()
    }
}

impl FlagsRegister {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU8::new(0),
            wake: Signal::new(),
        }
    }

    /// Record an ATN edge.  Safe to call from interrupt context.
    pub fn raise_attention(&self) {
        self.bits
            .fetch_or(Flags::ATN_ASSERTED.bits(), Ordering::AcqRel);
        self.wake.signal(());
    }

    /// Consume the ATN flag, returning whether it was set.
    pub fn take_attention(&self) -> bool {
        let prev = self
            .bits
            .fetch_and(!Flags::ATN_ASSERTED.bits(), Ordering::AcqRel);
        prev & Flags::ATN_ASSERTED.bits() != 0
    }

    pub fn get(&self) -> Flags {
        Flags::from_bits_truncate(self.bits.load(Ordering::Acquire))
    }

    pub fn contains(&self, flags: Flags) -> bool {
        self.get().contains(flags)
    }

    pub fn set(&self, flags: Flags) {
        self.bits.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub fn clear(&self, flags: Flags) {
        self.bits.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Clears every flag, including ATN.  Called once at the end of each
    /// protocol cycle.
    pub fn clear_all(&self) {
        self.bits.store(0, Ordering::Release);
        self.wake.reset();
    }

    /// Waits until [`FlagsRegister::raise_attention`] is called.  Returns
    /// immediately if it has been called since the last wait.
    pub async fn wait_attention(&self) {
        self.wake.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    #[test]
    fn transient_excludes_attention() {
        assert!(!Flags::TRANSIENT.contains(Flags::ATN_ASSERTED));
        assert!(Flags::TRANSIENT.contains(Flags::EOI_RECVD));
    }

    #[test]
    fn clear_leaves_other_bits() {
        let flags = FlagsRegister::new();
        flags.set(Flags::EOI_RECVD | Flags::ERROR);
        flags.raise_attention();
        flags.clear(Flags::TRANSIENT);
        assert_eq!(flags.get(), Flags::ATN_ASSERTED);
        assert!(flags.take_attention());
        assert!(!flags.take_attention());
        assert!(flags.get().is_empty());
    }

    #[test]
    fn raised_attention_wakes_waiter() {
        let flags = FlagsRegister::new();
        flags.raise_attention();
        block_on(flags.wait_attention());
        assert!(flags.contains(Flags::ATN_ASSERTED));
        flags.clear_all();
        assert!(flags.get().is_empty());
    }
}
