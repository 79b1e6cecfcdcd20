//! Tratamento de panic: mascara interrupções, despeja estado na serial
//! e trava a CPU.

use core::fmt::Write;
use core::panic::PanicInfo;

use crate::arch::Cpu;
use crate::interrupts::IrqFrame;

/// Handler chamado pelo runtime do Rust (`panic!`, asserts).
#[cfg(not(test))]
#[panic_handler]
fn panic_handler(info: &PanicInfo) -> ! {
    Cpu::disable_interrupts();

    // Escrita crua, sem lock: o dono do lock pode ser quem panicou.
    let mut out = unsafe { crate::drivers::serial::raw_writer() };
    let _ = write!(out, "\n*** KERNEL PANIC ***\n{}\n", info);

    dump_task(&mut out);
    Cpu::hang();
}

/// Panic vindo de uma exceção da CPU, com o frame de registradores.
pub fn panic_with_frame(reason: &str, frame: &IrqFrame) -> ! {
    Cpu::disable_interrupts();

    let mut out = unsafe { crate::drivers::serial::raw_writer() };
    let _ = write!(out, "\n*** KERNEL PANIC ***\n{}\n", reason);
    let _ = write!(
        out,
        "int={} err={:#x}\n\
         eax={:08x} ebx={:08x} ecx={:08x} edx={:08x}\n\
         esi={:08x} edi={:08x} ebp={:08x}\n\
         eip={:08x} cs={:04x} eflags={:08x}\n",
        frame.int_no,
        frame.err_code,
        frame.eax,
        frame.ebx,
        frame.ecx,
        frame.edx,
        frame.esi,
        frame.edi,
        frame.ebp,
        frame.eip,
        frame.cs,
        frame.eflags,
    );

    if frame.from_user() {
        let _ = write!(out, "esp={:08x} ss={:04x}\n", frame.useresp, frame.ss);
    }

    dump_task(&mut out);
    Cpu::hang();
}

fn dump_task(out: &mut impl Write) {
    match crate::sched::scheduler::current_pid() {
        Some(pid) => {
            let _ = write!(out, "task ativa: pid {}\n", pid);
        }
        None => {
            let _ = write!(out, "task ativa: nenhuma (boot/idle)\n");
        }
    }
}
