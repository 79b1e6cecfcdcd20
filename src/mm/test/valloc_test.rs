//! Testes do alocador virtual: reserva em contexto de usuário e a
//! semântica de cópia eager do fork.

use crate::klib::test_framework::{TestCase, TestResult};
use crate::mm::config::{PAGE_SIZE, USER_MMAP_BASE};
use crate::mm::valloc::{AddressSpace, VmFlags};
use crate::test_assert;

pub const VALLOC_TESTS: &[TestCase] = &[
    TestCase::new("valloc_reserva_usuario", test_reserva),
    TestCase::new("valloc_fork_copia_eager", test_fork),
    TestCase::new("valloc_map_across_offset", test_map_across),
];

fn test_reserva() -> TestResult {
    let aspace = match AddressSpace::new_user() {
        Ok(a) => a,
        Err(_) => return TestResult::Fail,
    };

    let r = aspace.reserve(
        2,
        None,
        None,
        VmFlags::USER | VmFlags::WRITABLE | VmFlags::ZERO | VmFlags::FORK_DUP,
    );
    let reserved = match r {
        Ok(r) => r,
        Err(_) => return TestResult::Fail,
    };

    // Reserva anônima cai na área de mmap e vem mapeada + zerada.
    test_assert!(reserved.virt >= USER_MMAP_BASE);
    test_assert!(reserved.phys.is_some());
    test_assert!(aspace.translate(reserved.virt).is_some());

    // Reservar por cima colide.
    test_assert!(aspace
        .reserve(1, Some(reserved.virt), None, VmFlags::USER)
        .is_err());

    test_assert!(aspace.release(reserved.virt).is_ok());
    test_assert!(aspace.translate(reserved.virt).is_none());

    aspace.release_all();
    TestResult::Pass
}

/// Fork duplica o conteúdo na hora; escritas posteriores num lado não
/// aparecem no outro.
fn test_fork() -> TestResult {
    let parent = match AddressSpace::new_user() {
        Ok(a) => a,
        Err(_) => return TestResult::Fail,
    };

    let reserved = match parent.reserve(
        1,
        None,
        None,
        VmFlags::USER | VmFlags::WRITABLE | VmFlags::ZERO | VmFlags::FORK_DUP,
    ) {
        Ok(r) => r,
        Err(_) => return TestResult::Fail,
    };
    let parent_phys = reserved.phys.unwrap();

    unsafe {
        core::ptr::write_bytes(parent_phys.as_mut_ptr::<u8>(), 0x77, PAGE_SIZE);
    }

    let child = match parent.fork() {
        Ok(c) => c,
        Err(_) => return TestResult::Fail,
    };

    let child_phys = match child.translate(reserved.virt) {
        Some(p) => p,
        None => return TestResult::Fail,
    };

    // Backing distinto, conteúdo idêntico no instante do fork.
    test_assert!(child_phys.as_usize() != parent_phys.as_usize());
    unsafe {
        for i in [0usize, 1, PAGE_SIZE / 2, PAGE_SIZE - 1] {
            test_assert!(*child_phys.as_mut_ptr::<u8>().add(i) == 0x77);
        }

        // Escrita no pai não vaza para o filho.
        core::ptr::write_bytes(parent_phys.as_mut_ptr::<u8>(), 0x11, 16);
        test_assert!(*child_phys.as_mut_ptr::<u8>() == 0x77);
    }

    child.release_all();
    parent.release_all();
    TestResult::Pass
}

/// map_across preserva o offset intra-página e enxerga a mesma
/// memória física.
fn test_map_across() -> TestResult {
    let src = match AddressSpace::new_user() {
        Ok(a) => a,
        Err(_) => return TestResult::Fail,
    };
    let dst = match AddressSpace::new_user() {
        Ok(a) => a,
        Err(_) => return TestResult::Fail,
    };

    let reserved = match src.reserve(
        2,
        None,
        None,
        VmFlags::USER | VmFlags::WRITABLE | VmFlags::ZERO,
    ) {
        Ok(r) => r,
        Err(_) => return TestResult::Fail,
    };

    // Origem desalinhada: 0x30 dentro da primeira página.
    let src_addr = reserved.virt + 0x30;
    let mapped = match crate::mm::valloc::map_across(
        &dst,
        &src,
        src_addr,
        PAGE_SIZE, // transborda para a segunda página
        VmFlags::USER | VmFlags::WRITABLE,
    ) {
        Ok(v) => v,
        Err(_) => return TestResult::Fail,
    };

    test_assert!(mapped % PAGE_SIZE == 0x30);

    // Mesma física dos dois lados.
    let via_src = src.translate(src_addr);
    let via_dst = dst.translate(mapped);
    test_assert!(via_src.is_some() && via_src == via_dst);

    dst.release_all();
    src.release_all();
    TestResult::Pass
}
