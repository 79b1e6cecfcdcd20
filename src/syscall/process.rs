//! Syscalls de processo.

use super::abi;
use super::error::{Errno, SysResult};
use super::SyscallCtx;
use crate::sched::{lifecycle, scheduler};

/// exit(code). Nunca retorna ao chamador: troca para outra task.
pub fn sys_exit(ctx: &mut SyscallCtx) -> SysResult<usize> {
    let status = ctx.args.args[0] as i32;
    ctx.switch_esp = Some(lifecycle::exit_current(ctx.frame, status));
    Ok(0)
}

/// fork() → pid do filho no pai, 0 no filho.
pub fn sys_fork(ctx: &mut SyscallCtx) -> SysResult<usize> {
    lifecycle::fork(ctx.frame)
}

/// waitpid(pid, statusp, options). A semântica implementada é a do
/// wait clássico: colhe qualquer filho terminado.
pub fn sys_waitpid(ctx: &mut SyscallCtx) -> SysResult<usize> {
    let statusp = ctx.args.args[1];

    let (pid, status) = lifecycle::wait_for_child()?;
    if statusp != 0 {
        abi::put_user_u32(statusp, status as u32)?;
    }
    Ok(pid as usize)
}

/// execve(path, argv, envp).
pub fn sys_execve(ctx: &mut SyscallCtx) -> SysResult<usize> {
    let path = abi::user_cstr(ctx.args.args[0])?;
    // Copia argv/envp para o kernel ANTES de destruir a imagem velha.
    let argv = abi::user_str_array(ctx.args.args[1])?;
    let envp = abi::user_str_array(ctx.args.args[2])?;

    let cwd = scheduler::with_current(|t| t.cwd.clone()).ok_or(Errno::ESRCH)?;
    let canonical = crate::fs::vfs::canonicalize(&cwd, &path)?;

    crate::kdebug!("syscall", "execve de {}", canonical);
    crate::sched::exec::execve(ctx.frame, &canonical, argv, envp)
}

pub fn sys_getpid(_ctx: &mut SyscallCtx) -> SysResult<usize> {
    scheduler::current_pid()
        .map(|p| p as usize)
        .ok_or(Errno::ESRCH)
}

/// nanosleep(req, rem). Acordar antes do prazo (cancelamento) devolve
/// EINTR.
pub fn sys_nanosleep(ctx: &mut SyscallCtx) -> SysResult<usize> {
    let req = ctx.args.args[0];
    let secs = abi::get_user_u32(req)?;
    let nsecs = abi::get_user_u32(req + 4)?;

    let ms = secs.saturating_mul(1000).saturating_add(nsecs / 1_000_000);
    let deadline = crate::drivers::pit::ticks().wrapping_add(crate::drivers::pit::ms_to_ticks(ms));

    if scheduler::sleep_until(deadline) {
        Ok(0)
    } else {
        Err(Errno::EINTR)
    }
}
