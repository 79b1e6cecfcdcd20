//! Handler de page fault (exceção 14).
//!
//! Três destinos possíveis:
//! 1. Página demand-zero de um range reservado: aloca frame, zera pela
//!    janela do kernel, instala o PTE e retoma.
//! 2. Escrita em página write-protected cujo range é gravável (frame
//!    compartilhado): aloca frame novo, copia, remapeia e retoma.
//! 3. Qualquer outra coisa: task de usuário morre; falta em modo
//!    kernel é pânico com dump de registradores.

use crate::arch::Cpu;
use crate::interrupts::IrqFrame;

/// Bits do error code empurrado pela CPU.
const ERR_PRESENT: u32 = 1 << 0;
const ERR_WRITE: u32 = 1 << 1;
const ERR_USER: u32 = 1 << 2;

pub fn init() {
    crate::interrupts::register(14, page_fault_handler, 0);
}

fn page_fault_handler(frame: &mut IrqFrame, _data: usize) -> Option<usize> {
    let addr = Cpu::read_cr2();
    let err = frame.err_code;

    // Tenta resolver pelo espaço de endereçamento da task atual.
    if let Some(aspace) = crate::sched::scheduler::current_aspace() {
        let write = err & ERR_WRITE != 0;
        let present = err & ERR_PRESENT != 0;
        if aspace.handle_fault(addr, write, present) {
            return None;
        }
    }

    if frame.from_user() || err & ERR_USER != 0 {
        crate::kerror!(
            "fault",
            "segfault: task {} em {:#x} (eip={:#x}, err={:#x})",
            crate::sched::scheduler::current_pid().unwrap_or(0),
            addr,
            frame.eip,
            err
        );
        return crate::sched::lifecycle::kill_current(frame, "Page fault");
    }

    crate::kerror!("fault", "page fault de kernel em {:#x} (err={:#x})", addr, err);
    crate::core::panic::panic_with_frame("Page fault", frame);
}
