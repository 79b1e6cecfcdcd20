//! Primitivas de sincronização.
//!
//! Em um único CPU, a "concorrência" vem das interrupções: o spinlock
//! desabilita IRQs enquanto mantido, restaurando o estado anterior no
//! drop do guard.

pub mod atomic;
pub mod spinlock;

pub use atomic::{AtomicCounter, AtomicFlag};
pub use spinlock::{Spinlock, SpinlockGuard};
