//! Testes de paging e valloc (bijeção do translate, janela do kernel).

use crate::klib::test_framework::{TestCase, TestResult};
use crate::mm::config::PAGE_SIZE;
use crate::mm::paging::PageDirectory;
use crate::mm::pmm::FRAME_ALLOCATOR;
use crate::mm::valloc;
use crate::test_assert;

pub const PAGING_TESTS: &[TestCase] = &[
    TestCase::new("paging_bijecao_translate", test_bijecao),
    TestCase::new("valloc_janela_map_unmap", test_janela),
];

/// Depois de map(v, p, n): translate(v+k) == p+k para todo k < n.
fn test_bijecao() -> TestResult {
    let frames = match FRAME_ALLOCATOR.lock().alloc(4) {
        Some(f) => f,
        None => return TestResult::Fail,
    };

    let virt = match valloc::kernel_window_map(frames, 4) {
        Some(v) => v,
        None => {
            FRAME_ALLOCATOR.lock().free(frames, 4);
            return TestResult::Fail;
        }
    };

    let dir = PageDirectory::kernel();
    let mut ok = true;
    for k in [0usize, 1, PAGE_SIZE - 1, PAGE_SIZE, 3 * PAGE_SIZE + 17] {
        match dir.translate(virt + k) {
            Some(phys) => ok &= phys.as_usize() == frames.as_usize() + k,
            None => ok = false,
        }
    }
    test_assert!(ok);

    valloc::kernel_window_unmap(virt);
    test_assert!(dir.translate(virt).is_none());

    FRAME_ALLOCATOR.lock().free(frames, 4);
    TestResult::Pass
}

/// Mapear na janela, escrever pelo virtual, ler pelo físico
/// (identity) e vice-versa.
fn test_janela() -> TestResult {
    let frame = match FRAME_ALLOCATOR.lock().alloc(1) {
        Some(f) => f,
        None => return TestResult::Fail,
    };

    let virt = match valloc::kernel_window_map(frame, 1) {
        Some(v) => v,
        None => {
            FRAME_ALLOCATOR.lock().free(frame, 1);
            return TestResult::Fail;
        }
    };

    unsafe {
        core::ptr::write_volatile(virt as *mut u32, 0xB1A5_A000);
        let via_identity = core::ptr::read_volatile(frame.as_mut_ptr::<u32>());
        test_assert!(via_identity == 0xB1A5_A000);

        core::ptr::write_volatile(frame.as_mut_ptr::<u32>(), 0x0000_CAFE);
        let via_window = core::ptr::read_volatile(virt as *const u32);
        test_assert!(via_window == 0x0000_CAFE);
    }

    valloc::kernel_window_unmap(virt);
    FRAME_ALLOCATOR.lock().free(frame, 1);
    TestResult::Pass
}
