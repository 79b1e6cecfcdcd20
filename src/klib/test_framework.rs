//! Framework de self-tests do kernel.
//!
//! Suítes rodam no boot (feature `self_test`), depois de todos os
//! inits e antes do PID 1. Falha em qualquer teste derruba o kernel:
//! melhor parar na hora do que corromper estado mais adiante.

/// Resultado de um teste individual.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestResult {
    Pass,
    Fail,
    /// Não aplicável no contexto atual (ex.: sem disco).
    Skip,
}

/// Um caso de teste nomeado.
pub struct TestCase {
    pub name: &'static str,
    pub func: fn() -> TestResult,
}

impl TestCase {
    pub const fn new(name: &'static str, func: fn() -> TestResult) -> Self {
        Self { name, func }
    }

    pub fn run(&self) -> TestResult {
        let result = (self.func)();
        match result {
            TestResult::Pass => crate::kinfo!("test", "ok   {}", self.name),
            TestResult::Fail => crate::kerror!("test", "FAIL {}", self.name),
            TestResult::Skip => crate::kwarn!("test", "skip {}", self.name),
        }
        result
    }
}

/// Roda uma suíte; qualquer falha vira panic.
pub fn run_test_suite(suite_name: &str, tests: &[TestCase]) {
    crate::kinfo!("test", "==== suíte {} ({} casos)", suite_name, tests.len());

    let mut passed = 0usize;
    let mut skipped = 0usize;

    for test in tests {
        match test.run() {
            TestResult::Pass => passed += 1,
            TestResult::Skip => skipped += 1,
            TestResult::Fail => {
                panic!("suíte {} falhou no caso {}", suite_name, test.name);
            }
        }
    }

    crate::kinfo!(
        "test",
        "==== suíte {}: {} ok, {} pulados",
        suite_name,
        passed,
        skipped
    );
}

/// Converte uma condição em resultado, logando a expressão que falhou.
#[macro_export]
macro_rules! test_assert {
    ($cond:expr) => {
        if !($cond) {
            $crate::kerror!("test", "assert falhou: {}", stringify!($cond));
            return $crate::klib::test_framework::TestResult::Fail;
        }
    };
}
