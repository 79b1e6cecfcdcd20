//! Task Control Block.

pub mod state;

pub use state::TaskState;

use crate::arch::platform::gdt;
use crate::fs::fd::FdTable;
use crate::interrupts::IrqFrame;
use crate::mm::config::KERNEL_STACK_SIZE;
use crate::mm::valloc::AspaceRef;
use crate::sys::{Gid, Pid, Uid};
use alloc::string::String;

/// Em que canal uma task `Waiting` está parada.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitChannel {
    /// Esperando qualquer filho terminar (`wait`).
    ChildExit,
    /// Dormindo até o tick dado (`sleep`, timeout de `poll`).
    SleepUntil(u32),
}

/// Task Control Block.
pub struct Task {
    /// ID único
    pub pid: Pid,
    /// Quem criou esta task (órfãos são re-adotados pelo init)
    pub ppid: Pid,
    /// Estado atual
    pub state: TaskState,
    /// Nome (debug)
    pub name: String,
    /// Credenciais
    pub uid: Uid,
    pub gid: Gid,

    /// Espaço de endereçamento
    pub aspace: AspaceRef,
    /// CR3 cacheado (físico do diretório), para o troca-contexto não
    /// precisar do lock do aspace
    pub cr3: usize,

    /// Base da kernel stack (vinda do heap, alinhada a página)
    kernel_stack: *mut u8,
    /// Topo da kernel stack (vira esp0 da TSS quando a task roda)
    pub kstack_top: usize,
    /// ESP salvo: aponta para o IrqFrame da task dentro da kernel
    /// stack dela
    pub saved_esp: usize,

    /// Entry point do binário carregado
    pub entry: usize,
    /// Topo do segmento de dados (syscall brk)
    pub sbrk: usize,

    /// Status registrado por exit (Some = zumbi até o pai colher)
    pub exit_status: Option<i32>,
    /// Motivo de morte involuntária (page fault etc.)
    pub term_reason: Option<&'static str>,
    /// Canal de espera quando `Waiting`
    pub wait_channel: Option<WaitChannel>,

    /// errno da última syscall que falhou
    pub errno: i32,
    /// Descritores abertos
    pub fds: FdTable,
    /// Diretório de trabalho (absoluto, normalizado)
    pub cwd: String,
}

// SAFETY: tasks só são tocadas sob o lock da tabela do scheduler.
unsafe impl Send for Task {}

impl Task {
    /// Cria uma task nova (estado `New`, sem frame construído).
    pub fn new(name: &str, ppid: Pid, aspace: AspaceRef) -> Option<Self> {
        let kernel_stack = crate::mm::heap::allocate(KERNEL_STACK_SIZE, true, true);
        if kernel_stack.is_null() {
            return None;
        }

        let pid = scheduler_next_pid();
        let kstack_top = kernel_stack as usize + KERNEL_STACK_SIZE;
        let cr3 = aspace.dir_phys().as_usize();

        Some(Self {
            pid,
            ppid,
            state: TaskState::New,
            name: String::from(name),
            uid: 0,
            gid: 0,
            aspace,
            cr3,
            kernel_stack,
            kstack_top,
            saved_esp: 0,
            entry: 0,
            sbrk: 0,
            exit_status: None,
            term_reason: None,
            wait_channel: None,
            errno: 0,
            fds: FdTable::new(),
            cwd: String::from("/"),
        })
    }

    /// Constrói o IrqFrame inicial de uma task de usuário no topo da
    /// kernel stack dela. O primeiro switch "retorna" por ele com iret
    /// direto para ring 3.
    pub fn build_user_frame(&mut self, entry: usize, user_esp: usize) {
        let frame_addr = self.kstack_top - core::mem::size_of::<IrqFrame>();
        let frame = frame_addr as *mut IrqFrame;

        unsafe {
            *frame = IrqFrame {
                gs: gdt::USER_DATA as u32,
                fs: gdt::USER_DATA as u32,
                es: gdt::USER_DATA as u32,
                ds: gdt::USER_DATA as u32,
                edi: 0,
                esi: 0,
                ebp: 0,
                esp_dummy: 0,
                ebx: 0,
                edx: 0,
                ecx: 0,
                eax: 0,
                int_no: 0,
                err_code: 0,
                eip: entry as u32,
                cs: gdt::USER_CODE as u32,
                // IF ligado: a task nasce preemptível.
                eflags: 0x202,
                useresp: user_esp as u32,
                ss: gdt::USER_DATA as u32,
            };
        }

        self.entry = entry;
        self.saved_esp = frame_addr;
    }

    /// Clona a kernel stack do pai para o filho (fork). O frame salvo
    /// fica no mesmo offset; o retorno do filho é forçado a 0.
    pub fn clone_kernel_stack_from(&mut self, parent: &Task, parent_frame_esp: usize) {
        let parent_base = parent.kernel_stack as usize;
        let child_base = self.kernel_stack as usize;

        unsafe {
            core::ptr::copy_nonoverlapping(
                parent.kernel_stack as *const u8,
                self.kernel_stack,
                KERNEL_STACK_SIZE,
            );
        }

        let offset = parent_frame_esp - parent_base;
        self.saved_esp = child_base + offset;

        let frame = self.saved_esp as *mut IrqFrame;
        unsafe {
            // fork retorna 0 no filho.
            (*frame).eax = 0;
        }
    }

    /// Libera a kernel stack. Chamado no reap, quando é garantido que
    /// a task nunca mais executa.
    pub fn release_kernel_stack(&mut self) {
        if !self.kernel_stack.is_null() {
            crate::mm::heap::free(self.kernel_stack);
            self.kernel_stack = core::ptr::null_mut();
        }
    }
}

fn scheduler_next_pid() -> Pid {
    use crate::sync::AtomicCounter;
    static NEXT_PID: AtomicCounter = AtomicCounter::new(1);
    NEXT_PID.inc()
}
