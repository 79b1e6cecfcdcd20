//! Despacho de interrupções, exceções e do gate de syscall.
//!
//! Os stubs em `arch::x86::stubs` empurram um frame uniforme e chamam
//! `interrupt_dispatch` com o ESP atual. O valor retornado vira o novo
//! ESP, o que permite ao scheduler trocar de task devolvendo o frame
//! salvo de outra kernel stack.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::drivers::pic;

/// Frame de registradores empurrado pelos stubs.
///
/// Layout casado com o assembly: segmentos, `pusha`, vetor + error
/// code, e o frame de hardware (eip/cs/eflags, + esp/ss se a
/// interrupção veio de ring 3).
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct IrqFrame {
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub int_no: u32,
    pub err_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    // Válidos apenas quando a interrupção veio de ring 3.
    pub useresp: u32,
    pub ss: u32,
}

impl IrqFrame {
    /// A interrupção veio de código de usuário?
    pub fn from_user(&self) -> bool {
        self.cs & 3 == 3
    }
}

/// Handler de um vetor. Retorna `Some(novo_esp)` para trocar de stack
/// (scheduler), `None` para retornar ao contexto interrompido.
pub type Handler = fn(frame: &mut IrqFrame, data: usize) -> Option<usize>;

#[derive(Clone, Copy)]
struct Entry {
    handler: Handler,
    data: usize,
}

static mut HANDLERS: [Option<Entry>; 256] = [None; 256];

/// Profundidade de despacho. IRQs e syscalls aninhados são descartados;
/// pontos de espera (`sched::relax`) zeram temporariamente para
/// permitir preempção.
static DISPATCH_DEPTH: AtomicUsize = AtomicUsize::new(0);

/// Page fault dentro de page fault é fatal.
static IN_PAGE_FAULT: AtomicBool = AtomicBool::new(false);

/// Nomes das exceções da CPU (vetores 0-18).
const EXCEPTION_NAMES: [&str; 19] = [
    "Division by zero",
    "Debug exception",
    "Non maskable interrupt",
    "Breakpoint",
    "Into detected",
    "Out of bounds",
    "Invalid opcode",
    "No coprocessor",
    "Double fault",
    "Coprocessor segment overrun",
    "Bad TSS",
    "Segment not present",
    "Stack fault",
    "General protection fault",
    "Page fault",
    "Unknown interrupt exception",
    "Coprocessor fault",
    "Alignment check exception",
    "Machine check exception",
];

/// Registra um handler para um vetor.
pub fn register(vector: usize, handler: Handler, data: usize) {
    if vector >= 256 {
        return;
    }
    let was_enabled = crate::arch::Cpu::interrupts_enabled();
    crate::arch::Cpu::disable_interrupts();
    unsafe {
        HANDLERS[vector] = Some(Entry { handler, data });
    }
    if was_enabled {
        crate::arch::Cpu::enable_interrupts();
    }
    crate::kdebug!("int", "handler registrado para vetor {}", vector);
}

/// Registra o mesmo handler para uma faixa inclusiva de vetores.
pub fn register_range(first: usize, last: usize, handler: Handler, data: usize) {
    for vector in first..=last {
        if vector >= 256 {
            break;
        }
        unsafe {
            HANDLERS[vector] = Some(Entry { handler, data });
        }
    }
}

/// Usado pelos pontos de espera do scheduler: libera o guard de
/// re-entrada enquanto a task dorme em `hlt`.
pub fn leave_guard() -> usize {
    DISPATCH_DEPTH.swap(0, Ordering::SeqCst)
}

pub fn restore_guard(depth: usize) {
    DISPATCH_DEPTH.store(depth, Ordering::SeqCst);
}

/// `true` se estamos dentro de um handler (contexto de interrupção).
pub fn in_interrupt() -> bool {
    DISPATCH_DEPTH.load(Ordering::SeqCst) > 0
}

/// Entrada única chamada pelos stubs em assembly.
///
/// Recebe o ESP apontando para o `IrqFrame` recém-empurrado e retorna
/// o ESP a restaurar (o mesmo, ou o de outra task).
#[no_mangle]
pub extern "C" fn interrupt_dispatch(esp: usize) -> usize {
    let frame = unsafe { &mut *(esp as *mut IrqFrame) };
    let vector = frame.int_no as usize;

    let is_exception = vector < 32;
    let is_irq = (32..48).contains(&vector);

    // Guard de re-entrada: IRQs e syscall aninhados são descartados.
    // Exceções passam sempre (um page fault durante um syscall é
    // legítimo: página demand-zero tocada pelo kernel).
    if !is_exception && DISPATCH_DEPTH.load(Ordering::SeqCst) > 0 {
        if is_irq {
            pic::send_eoi(vector as u8);
        }
        return esp;
    }

    if vector == 14 {
        if IN_PAGE_FAULT.swap(true, Ordering::SeqCst) {
            crate::core::panic::panic_with_frame("page fault dentro de page fault", frame);
        }
    }

    DISPATCH_DEPTH.fetch_add(1, Ordering::SeqCst);

    // EOI antes do handler, como o hardware espera de um kernel sem
    // interrupt nesting.
    if is_irq {
        pic::send_eoi(vector as u8);
    }

    let entry = unsafe { HANDLERS[vector] };
    let new_esp = match entry {
        Some(e) => (e.handler)(frame, e.data).unwrap_or(esp),
        None => {
            if is_exception {
                unhandled_exception(frame).unwrap_or(esp)
            } else {
                // IRQ sem handler: só o EOI acima.
                esp
            }
        }
    };

    if vector == 14 {
        IN_PAGE_FAULT.store(false, Ordering::SeqCst);
    }
    DISPATCH_DEPTH.fetch_sub(1, Ordering::SeqCst);

    new_esp
}

/// Exceção sem handler registrado: task de usuário morre (e o retorno
/// é o frame da próxima task), kernel panica.
fn unhandled_exception(frame: &mut IrqFrame) -> Option<usize> {
    let vector = frame.int_no as usize;
    let name = EXCEPTION_NAMES
        .get(vector)
        .copied()
        .unwrap_or("Unknown CPU error");

    if frame.from_user() {
        crate::kerror!(
            "fault",
            "task {} morta por exceção: {} (eip={:#x})",
            crate::sched::scheduler::current_pid().unwrap_or(0),
            name,
            frame.eip
        );
        return crate::sched::lifecycle::kill_current(frame, name);
    }

    crate::core::panic::panic_with_frame(name, frame);
}

/// Instala o handler default de exceções em 0-13 e 15-31.
/// O vetor 14 (page fault) é reivindicado por `mm::paging::fault`.
pub fn init() {
    register_range(0, 13, default_exception_handler, 0);
    register_range(15, 31, default_exception_handler, 0);
    crate::kinfo!("int", "dispatcher inicializado (256 vetores)");
}

fn default_exception_handler(frame: &mut IrqFrame, _data: usize) -> Option<usize> {
    unhandled_exception(frame)
}
