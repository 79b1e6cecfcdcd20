//! Testes do alocador de blocos, sobre uma região de brinquedo (a
//! `HeapRegion` funciona em qualquer faixa de memória).

use crate::klib::test_framework::{TestCase, TestResult};
use crate::mm::heap::HeapRegion;
use crate::test_assert;
use alloc::vec::Vec;

pub const HEAP_TESTS: &[TestCase] = &[
    TestCase::new("heap_round_trip_coalesce", test_round_trip),
    TestCase::new("heap_conteudo_sobrevive", test_conteudo),
    TestCase::new("heap_alinhado_sem_overlap", test_alinhamento),
    TestCase::new("heap_exaustao_da_regiao", test_exaustao),
];

const SCRATCH_SIZE: usize = 128 * 1024;

/// Região de brinquedo carved do heap global.
fn scratch() -> Option<(usize, HeapRegion)> {
    let base = crate::mm::heap::allocate(SCRATCH_SIZE, true, false);
    if base.is_null() {
        return None;
    }
    let start = base as usize;
    let region = unsafe { HeapRegion::new(start, start + SCRATCH_SIZE) };
    Some((start, region))
}

fn release_scratch(start: usize) {
    crate::mm::heap::free(start as *mut u8);
}

/// Alocações seguidas de frees em qualquer ordem recolapsam em uma
/// única região livre contígua.
fn test_round_trip() -> TestResult {
    let Some((start, mut region)) = scratch() else {
        return TestResult::Skip;
    };

    let sizes = [13usize, 256, 31, 4096, 8, 1024, 77];
    let mut ptrs = Vec::new();
    for &size in &sizes {
        let p = unsafe { region.allocate(size, false, false) };
        test_assert!(!p.is_null());
        ptrs.push(p);
    }

    // Libera fora de ordem: do meio, pontas, resto.
    for &idx in &[3usize, 0, 6, 2, 5, 1, 4] {
        unsafe { region.free(ptrs[idx]) };
    }

    test_assert!(region.is_fully_coalesced());
    let (total, free) = region.stats();
    test_assert!(total == SCRATCH_SIZE);
    // Única região livre: tudo menos o overhead do bloco coalescido
    // (header + footer).
    test_assert!(free + 12 >= total);

    release_scratch(start);
    TestResult::Pass
}

/// Bytes escritos permanecem intactos até o free, mesmo com vizinhos
/// sendo alocados e liberados.
fn test_conteudo() -> TestResult {
    let Some((start, mut region)) = scratch() else {
        return TestResult::Skip;
    };

    unsafe {
        let a = region.allocate(64, false, false);
        let b = region.allocate(128, false, true);
        test_assert!(!a.is_null() && !b.is_null());

        core::ptr::write_bytes(a, 0xA5, 64);
        // b veio zerado.
        for i in 0..128 {
            test_assert!(*b.add(i) == 0);
        }

        let c = region.allocate(32, false, false);
        core::ptr::write_bytes(c, 0x5A, 32);
        region.free(b);

        // a e c intactos depois do free do vizinho.
        for i in 0..64 {
            test_assert!(*a.add(i) == 0xA5);
        }
        for i in 0..32 {
            test_assert!(*c.add(i) == 0x5A);
        }

        region.free(a);
        region.free(c);
    }

    test_assert!(region.is_fully_coalesced());
    release_scratch(start);
    TestResult::Pass
}

/// Alocação alinhada devolve ponteiro múltiplo de página; alocações
/// vivas nunca se sobrepõem.
fn test_alinhamento() -> TestResult {
    let Some((start, mut region)) = scratch() else {
        return TestResult::Skip;
    };

    unsafe {
        let plain = region.allocate(100, false, false);
        let aligned = region.allocate(512, true, false);
        test_assert!(!plain.is_null() && !aligned.is_null());
        test_assert!(aligned as usize % crate::mm::config::PAGE_SIZE == 0);

        // Sem overlap: as janelas [ptr, ptr+size) são disjuntas.
        let (p0, p1) = (plain as usize, plain as usize + 100);
        let (a0, a1) = (aligned as usize, aligned as usize + 512);
        test_assert!(p1 <= a0 || a1 <= p0);

        region.free(plain);
        region.free(aligned);
    }

    test_assert!(region.is_fully_coalesced());
    release_scratch(start);
    TestResult::Pass
}

/// Exaustão da região devolve null (a política fatal fica no
/// GlobalAlloc, não aqui).
fn test_exaustao() -> TestResult {
    let Some((start, mut region)) = scratch() else {
        return TestResult::Skip;
    };

    unsafe {
        let too_big = region.allocate(SCRATCH_SIZE * 2, false, false);
        test_assert!(too_big.is_null());

        // Região continua funcional.
        let ok = region.allocate(64, false, false);
        test_assert!(!ok.is_null());
        region.free(ok);
    }

    release_scratch(start);
    TestResult::Pass
}
