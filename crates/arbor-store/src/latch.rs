//! Level latches (read/write guards) for safe concurrent access.
//!
//! These RAII guards wrap owned `parking_lot` guards so a traversal can
//! hand a lock from one level to the next without borrowing from the
//! previous guard. A guard may also be counted: it bumps the store's
//! active-holder counter while held, which is what an exclusive section
//! waits on to drain.

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::level::{LevelData, LevelRef};

/// Shared guard on a level.
///
/// This guard:
/// - Provides read-only access to the level
/// - Keeps the active-holder counter raised while held, if counted
/// - Releases both automatically when dropped
pub(crate) struct LevelReadGuard<'s> {
    guard: ArcRwLockReadGuard<RawRwLock, LevelData>,
    active: Option<&'s AtomicUsize>,
}

impl<'s> LevelReadGuard<'s> {
    /// Blocks until the shared lock is granted.
    pub(crate) fn acquire(level: &LevelRef, active: Option<&'s AtomicUsize>) -> Self {
        let guard = level.read_arc();
        enter(active);
        Self { guard, active }
    }

    /// Takes the shared lock only if it is free right now.
    pub(crate) fn try_acquire(level: &LevelRef, active: Option<&'s AtomicUsize>) -> Option<Self> {
        let guard = level.try_read_arc()?;
        enter(active);
        Some(Self { guard, active })
    }

    /// Returns the locked level.
    #[inline]
    pub(crate) fn level(&self) -> &LevelRef {
        ArcRwLockReadGuard::rwlock(&self.guard)
    }
}

impl Deref for LevelReadGuard<'_> {
    type Target = LevelData;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl Drop for LevelReadGuard<'_> {
    fn drop(&mut self) {
        leave(self.active);
    }
}

impl std::fmt::Debug for LevelReadGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LevelReadGuard")
            .field("owner", &self.guard.owner)
            .field("counted", &self.active.is_some())
            .finish()
    }
}

/// Exclusive guard on a level.
///
/// This guard:
/// - Provides read-write access to the level
/// - Keeps the active-holder counter raised while held, if counted
/// - Releases both automatically when dropped
pub(crate) struct LevelWriteGuard<'s> {
    guard: ArcRwLockWriteGuard<RawRwLock, LevelData>,
    active: Option<&'s AtomicUsize>,
}

impl<'s> LevelWriteGuard<'s> {
    /// Blocks until the exclusive lock is granted.
    pub(crate) fn acquire(level: &LevelRef, active: Option<&'s AtomicUsize>) -> Self {
        let guard = level.write_arc();
        enter(active);
        Self { guard, active }
    }

    /// Returns the locked level.
    #[inline]
    pub(crate) fn level(&self) -> &LevelRef {
        ArcRwLockWriteGuard::rwlock(&self.guard)
    }

    /// Returns a clone of the handle to the locked level.
    #[inline]
    pub(crate) fn level_ref(&self) -> LevelRef {
        Arc::clone(self.level())
    }

    /// Returns the counter this guard raises, if any. Nested locks taken
    /// while this guard is held use the same counter.
    #[inline]
    pub(crate) fn counter(&self) -> Option<&'s AtomicUsize> {
        self.active
    }
}

impl Deref for LevelWriteGuard<'_> {
    type Target = LevelData;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for LevelWriteGuard<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl Drop for LevelWriteGuard<'_> {
    fn drop(&mut self) {
        leave(self.active);
    }
}

impl std::fmt::Debug for LevelWriteGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LevelWriteGuard")
            .field("owner", &self.guard.owner)
            .field("detached", &self.guard.detached)
            .field("counted", &self.active.is_some())
            .finish()
    }
}

#[inline]
fn enter(active: Option<&AtomicUsize>) {
    if let Some(counter) = active {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[inline]
fn leave(active: Option<&AtomicUsize>) {
    if let Some(counter) = active {
        counter.fetch_sub(1, Ordering::SeqCst);
    }
}
