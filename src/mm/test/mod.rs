//! Self-tests do subsistema de memória (feature `self_test`).

mod heap_test;
mod paging_test;
mod pmm_test;
mod valloc_test;

pub fn run_memory_tests() {
    use crate::klib::test_framework::run_test_suite;

    run_test_suite("pmm", pmm_test::PMM_TESTS);
    run_test_suite("heap", heap_test::HEAP_TESTS);
    run_test_suite("paging", paging_test::PAGING_TESTS);
    run_test_suite("valloc", valloc_test::VALLOC_TESTS);
}
