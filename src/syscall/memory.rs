//! Syscalls de memória: brk e mmap anônimo.

use super::error::{Errno, SysResult};
use super::SyscallCtx;
use crate::klib::{align_down, align_up};
use crate::mm::config::PAGE_SIZE;
use crate::mm::valloc::VmFlags;
use crate::sched::scheduler;

const MAP_ANONYMOUS: usize = 0x20;
const PROT_WRITE: usize = 0x2;

/// brk(addr): move o topo do segmento de dados. addr = 0 consulta.
/// Crescimento reserva páginas demand-zero; encolhimento é ignorado.
pub fn sys_brk(ctx: &mut SyscallCtx) -> SysResult<usize> {
    let addr = ctx.args.args[0];

    let (cur, aspace) =
        scheduler::with_current(|t| (t.sbrk, t.aspace.clone())).ok_or(Errno::ESRCH)?;

    if addr == 0 || addr <= cur {
        return Ok(cur);
    }

    let old_top = align_up(cur, PAGE_SIZE);
    let new_top = align_up(addr, PAGE_SIZE);

    if new_top > old_top {
        let pages = (new_top - old_top) / PAGE_SIZE;
        aspace
            .reserve(
                pages,
                Some(old_top),
                None,
                VmFlags::USER
                    | VmFlags::WRITABLE
                    | VmFlags::DEMAND_ZERO
                    | VmFlags::FORK_DUP,
            )
            .map_err(|_| Errno::ENOMEM)?;
    }

    scheduler::with_current(|t| t.sbrk = addr);
    Ok(addr)
}

/// mmap(addr, len, prot, flags, fd, off). Só mapeamento anônimo; o
/// resto devolve ENOSYS.
pub fn sys_mmap(ctx: &mut SyscallCtx) -> SysResult<usize> {
    let addr_hint = ctx.args.args[0];
    let len = ctx.args.args[1];
    let prot = ctx.args.args[2];
    let flags = ctx.args.args[3];

    if len == 0 {
        return Err(Errno::EINVAL);
    }
    if flags & MAP_ANONYMOUS == 0 {
        return Err(Errno::ENOSYS);
    }

    let aspace = scheduler::current_aspace().ok_or(Errno::ESRCH)?;
    let pages = align_up(len, PAGE_SIZE) / PAGE_SIZE;

    let mut vm_flags = VmFlags::USER | VmFlags::DEMAND_ZERO | VmFlags::FORK_DUP;
    if prot & PROT_WRITE != 0 {
        vm_flags |= VmFlags::WRITABLE;
    }

    let virt_req = if addr_hint != 0 {
        Some(align_down(addr_hint, PAGE_SIZE))
    } else {
        None
    };

    // Hint ocupado cai no primeiro buraco livre, como mmap sem
    // MAP_FIXED.
    let reserved = match aspace.reserve(pages, virt_req, None, vm_flags) {
        Ok(r) => r,
        Err(_) if virt_req.is_some() => aspace
            .reserve(pages, None, None, vm_flags)
            .map_err(|_| Errno::ENOMEM)?,
        Err(_) => return Err(Errno::ENOMEM),
    };

    Ok(reserved.virt)
}
