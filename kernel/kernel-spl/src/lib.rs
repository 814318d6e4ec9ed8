//! # Interrupt Priority Levels
//!
//! The set-priority-level (spl) seam between machine-independent kernel
//! code and the platform's interrupt controller, plus an RAII guard for
//! masked critical sections.
//!
//! Code that must not be interrupted — a TLB write, for instance — raises
//! the priority to the highest level for the duration of a scope:
//!
//! ```rust
//! # use kernel_spl::{Ipl, Spl, SplGuard};
//! # struct NoInterrupts(u32);
//! # impl Spl for NoInterrupts {
//! #     fn splhigh(&mut self) -> Ipl { let p = Ipl::new(self.0); self.0 = 3; p }
//! #     fn splx(&mut self, prev: Ipl) { self.0 = prev.as_raw(); }
//! # }
//! # let mut spl = NoInterrupts(0);
//! {
//!     let _masked = SplGuard::high(&mut spl);
//!     // interrupts are masked here
//! }
//! // previous level restored
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

/// A saved interrupt priority level, as returned by [`Spl::splhigh`].
///
/// Opaque to machine-independent code; only the platform interprets the
/// raw value. Callers hand it back to [`Spl::splx`] unchanged.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Ipl(u32);

impl Ipl {
    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

/// Platform interrupt-priority control.
///
/// `splhigh` raises to the highest priority level, masking all interrupts
/// on the current processor, and returns the previous level; `splx`
/// restores a previously saved level. Calls must be balanced and properly
/// nested; [`SplGuard`] enforces this by construction.
pub trait Spl {
    /// Raise to the highest priority level; returns the previous level.
    fn splhigh(&mut self) -> Ipl;

    /// Restore a previously saved priority level.
    fn splx(&mut self, prev: Ipl);
}

/// RAII guard that raises the priority level on creation and restores the
/// saved level on drop.
pub struct SplGuard<'a, S: Spl> {
    spl: &'a mut S,
    prev: Ipl,
}

impl<'a, S: Spl> SplGuard<'a, S> {
    /// Raise to the highest priority level for the lifetime of the guard.
    #[inline]
    pub fn high(spl: &'a mut S) -> Self {
        let prev = spl.splhigh();
        Self { spl, prev }
    }
}

impl<S: Spl> Drop for SplGuard<'_, S> {
    /// Restores the priority level saved when the guard was created.
    fn drop(&mut self) {
        self.spl.splx(self.prev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fake priority controller: level 0 is "everything enabled", the
    /// highest level is 3. Records how often each call happened.
    struct FakeSpl {
        level: u32,
        raises: usize,
        restores: usize,
    }

    impl FakeSpl {
        const fn new() -> Self {
            Self {
                level: 0,
                raises: 0,
                restores: 0,
            }
        }
    }

    impl Spl for FakeSpl {
        fn splhigh(&mut self) -> Ipl {
            self.raises += 1;
            let prev = Ipl::new(self.level);
            self.level = 3;
            prev
        }

        fn splx(&mut self, prev: Ipl) {
            self.restores += 1;
            self.level = prev.as_raw();
        }
    }

    #[test]
    fn guard_masks_and_restores() {
        let mut spl = FakeSpl::new();
        {
            let _g = SplGuard::high(&mut spl);
        }
        assert_eq!(spl.level, 0);
        assert_eq!(spl.raises, 1);
        assert_eq!(spl.restores, 1);
    }

    #[test]
    fn nested_guards_unwind_in_order() {
        let mut spl = FakeSpl::new();
        spl.level = 1;
        {
            let prev = spl.splhigh();
            assert_eq!(spl.level, 3);
            {
                let _inner = SplGuard::high(&mut spl);
                assert_eq!(_inner.spl.level, 3);
            }
            assert_eq!(spl.level, 3);
            spl.splx(prev);
        }
        assert_eq!(spl.level, 1);
        assert_eq!(spl.raises, spl.restores);
    }
}
