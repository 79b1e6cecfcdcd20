//! Operações atômicas.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Wrapper para AtomicBool com API mais limpa
pub struct AtomicFlag(AtomicBool);

impl AtomicFlag {
    pub const fn new(value: bool) -> Self {
        Self(AtomicBool::new(value))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, value: bool) {
        self.0.store(value, Ordering::Release);
    }

    /// Test-and-set: retorna valor anterior
    pub fn test_and_set(&self) -> bool {
        self.0.swap(true, Ordering::AcqRel)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Contador atômico (32 bits: suficiente para PIDs e ticks neste alvo)
pub struct AtomicCounter(AtomicU32);

impl AtomicCounter {
    pub const fn new(value: u32) -> Self {
        Self(AtomicU32::new(value))
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, value: u32) {
        self.0.store(value, Ordering::Release);
    }

    /// Incrementa e retorna o valor anterior
    pub fn inc(&self) -> u32 {
        self.0.fetch_add(1, Ordering::AcqRel)
    }
}
