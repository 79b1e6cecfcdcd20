//! Superfície de syscalls (gate int 0x80).
//!
//! O handler do vetor materializa os argumentos do frame, consulta a
//! tabela estática e devolve o resultado em EAX: >= 0 sucesso, -1 com
//! `errno` por task em falha. Número desconhecido → ENOSYS.

pub mod abi;
pub mod error;
pub mod fs;
pub mod memory;
pub mod numbers;
pub mod process;

use self::abi::SyscallArgs;
use self::error::{Errno, SysResult};
use self::numbers::*;
use crate::interrupts::IrqFrame;

/// Contexto de uma syscall em andamento. Handlers que trocam de task
/// (exit) gravam o ESP de destino em `switch_esp`.
pub struct SyscallCtx<'a> {
    pub frame: &'a mut IrqFrame,
    pub args: SyscallArgs,
    pub switch_esp: Option<usize>,
}

pub type SyscallHandler = fn(&mut SyscallCtx) -> SysResult<usize>;

/// Tabela estática de handlers. None = não implementada.
static SYSCALL_TABLE: [Option<SyscallHandler>; SYSCALL_TABLE_SIZE] = {
    let mut table: [Option<SyscallHandler>; SYSCALL_TABLE_SIZE] = [None; SYSCALL_TABLE_SIZE];

    // === Processos ===
    table[SYS_EXIT] = Some(process::sys_exit);
    table[SYS_FORK] = Some(process::sys_fork);
    table[SYS_WAITPID] = Some(process::sys_waitpid);
    table[SYS_EXECVE] = Some(process::sys_execve);
    table[SYS_GETPID] = Some(process::sys_getpid);
    table[SYS_NANOSLEEP] = Some(process::sys_nanosleep);

    // === Arquivos ===
    table[SYS_READ] = Some(fs::sys_read);
    table[SYS_WRITE] = Some(fs::sys_write);
    table[SYS_OPEN] = Some(fs::sys_open);
    table[SYS_CLOSE] = Some(fs::sys_close);
    table[SYS_LSEEK] = Some(fs::sys_lseek);
    table[SYS_STAT] = Some(fs::sys_stat);
    table[SYS_FSTAT] = Some(fs::sys_fstat);
    table[SYS_CHDIR] = Some(fs::sys_chdir);
    table[SYS_GETCWD] = Some(fs::sys_getcwd);
    table[SYS_PIPE] = Some(fs::sys_pipe);
    table[SYS_IOCTL] = Some(fs::sys_ioctl);
    table[SYS_POLL] = Some(fs::sys_poll);
    table[SYS_GETDENTS] = Some(fs::sys_getdents);
    table[SYS_UNLINK] = Some(fs::sys_unlink);
    table[SYS_CHMOD] = Some(fs::sys_chmod);
    table[SYS_SYMLINK] = Some(fs::sys_symlink);
    table[SYS_READLINK] = Some(fs::sys_readlink);

    // === Memória ===
    table[SYS_BRK] = Some(memory::sys_brk);
    table[SYS_MMAP] = Some(memory::sys_mmap);

    table
};

/// Registra o gate 0x80 no dispatcher de interrupções.
pub fn init() {
    crate::interrupts::register(
        crate::arch::platform::idt::SYSCALL_VECTOR,
        syscall_entry,
        0,
    );
    crate::kinfo!("syscall", "gate 0x80 registrado ({} entradas)", SYSCALL_TABLE_SIZE);
}

fn syscall_entry(frame: &mut IrqFrame, _data: usize) -> Option<usize> {
    let args = SyscallArgs::from_frame(frame);

    let handler = SYSCALL_TABLE.get(args.num).copied().flatten();

    let mut ctx = SyscallCtx {
        frame,
        args,
        switch_esp: None,
    };

    let result = match handler {
        Some(h) => h(&mut ctx),
        None => Err(Errno::ENOSYS),
    };

    // exit/kill: o frame atual morreu, restaura outra task.
    if let Some(esp) = ctx.switch_esp {
        return Some(esp);
    }

    let ret: i32 = match result {
        Ok(value) => value as i32,
        Err(errno) => {
            crate::sched::scheduler::with_current(|t| t.errno = errno.as_i32());
            -1
        }
    };
    ctx.frame.eax = ret as u32;
    None
}
