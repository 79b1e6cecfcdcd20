//! Testes do alocador de frames.
//!
//! Rodam antes do PID 1, com o kernel quieto: mexer na contagem global
//! de frames aqui é seguro.

use crate::klib::test_framework::{TestCase, TestResult};
use crate::mm::addr::PhysAddr;
use crate::mm::pmm::FRAME_ALLOCATOR;
use crate::test_assert;
use alloc::vec::Vec;

pub const PMM_TESTS: &[TestCase] = &[
    TestCase::new("pmm_bijecao_alloc_free", test_bijecao),
    TestCase::new("pmm_run_contiguo", test_run_contiguo),
    TestCase::new("pmm_exaustao_e_recuperacao", test_exaustao),
];

/// Bits setados acompanham exatamente as alocações vivas.
fn test_bijecao() -> TestResult {
    let used_before = FRAME_ALLOCATOR.lock().stats().1;

    let frames: Vec<PhysAddr> = (0..8)
        .filter_map(|_| FRAME_ALLOCATOR.lock().alloc(1))
        .collect();
    test_assert!(frames.len() == 8);
    test_assert!(FRAME_ALLOCATOR.lock().stats().1 == used_before + 8);

    for frame in &frames {
        FRAME_ALLOCATOR.lock().free(*frame, 1);
    }
    test_assert!(FRAME_ALLOCATOR.lock().stats().1 == used_before);

    TestResult::Pass
}

/// alloc(n) devolve frames contíguos e free(base, n) devolve todos.
fn test_run_contiguo() -> TestResult {
    let used_before = FRAME_ALLOCATOR.lock().stats().1;

    let base = match FRAME_ALLOCATOR.lock().alloc(4) {
        Some(b) => b,
        None => return TestResult::Fail,
    };
    test_assert!(base.as_usize() % crate::mm::config::PAGE_SIZE == 0);
    test_assert!(FRAME_ALLOCATOR.lock().stats().1 == used_before + 4);

    // A faixa está mesmo reservada: alloc_at nela falha.
    test_assert!(!FRAME_ALLOCATOR.lock().alloc_at(base, 1));

    FRAME_ALLOCATOR.lock().free(base, 4);
    test_assert!(FRAME_ALLOCATOR.lock().stats().1 == used_before);

    // Agora alloc_at funciona.
    test_assert!(FRAME_ALLOCATOR.lock().alloc_at(base, 4));
    FRAME_ALLOCATOR.lock().free(base, 4);

    TestResult::Pass
}

/// Esgotar o bitmap falha limpo; liberar um frame destrava a próxima
/// alocação sem corromper as anteriores.
fn test_exaustao() -> TestResult {
    let mut held: Vec<PhysAddr> = Vec::new();

    loop {
        match FRAME_ALLOCATOR.lock().alloc(1) {
            Some(frame) => held.push(frame),
            None => break,
        }
    }
    test_assert!(!held.is_empty());

    // Exausto: a próxima falha de novo.
    test_assert!(FRAME_ALLOCATOR.lock().alloc(1).is_none());

    // Devolve um; a próxima alocação volta a funcionar.
    let released = held.pop().unwrap();
    FRAME_ALLOCATOR.lock().free(released, 1);
    let again = FRAME_ALLOCATOR.lock().alloc(1);
    test_assert!(again.is_some());
    FRAME_ALLOCATOR.lock().free(again.unwrap(), 1);

    for frame in held {
        FRAME_ALLOCATOR.lock().free(frame, 1);
    }

    TestResult::Pass
}
