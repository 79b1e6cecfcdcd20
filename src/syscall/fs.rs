//! Syscalls de arquivo.

use super::abi;
use super::error::{Errno, SysResult};
use super::SyscallCtx;
use crate::fs::fd::{self, FdBacking, OpenFile, FD_FLOOR};
use crate::fs::pipe::PipeEnd;
use crate::fs::vfs::{self, FileType, OpenFlags};
use crate::sched::scheduler::{self, with_current};
use alloc::string::String;

/// Canoniza um caminho de usuário contra o cwd da task.
fn canonical_from_user(addr: usize) -> SysResult<String> {
    let path = abi::user_cstr(addr)?;
    let cwd = with_current(|t| t.cwd.clone()).ok_or(Errno::ESRCH)?;
    vfs::canonicalize(&cwd, &path)
}

/// open(path, flags, mode).
pub fn sys_open(ctx: &mut SyscallCtx) -> SysResult<usize> {
    let canonical = canonical_from_user(ctx.args.args[0])?;
    let flags = OpenFlags::from_bits_truncate(ctx.args.args[1] as u32);

    let (ops, node) = vfs::open(&canonical, flags)?;

    let file = OpenFile {
        backing: FdBacking::Vfs {
            ops,
            node,
            path: canonical,
        },
        offset: 0,
        flags,
    };

    let fd = with_current(|t| t.fds.install(file, 0)).ok_or(Errno::ESRCH)??;
    Ok(fd as usize)
}

/// read(fd, buf, n).
pub fn sys_read(ctx: &mut SyscallCtx) -> SysResult<usize> {
    let fd = ctx.args.args[0] as i32;
    let buf = abi::user_slice_mut(ctx.args.args[1], ctx.args.args[2])?;

    let file = with_current(|t| t.fds.get(fd)).ok_or(Errno::ESRCH)??;
    fd::read(&file, buf)
}

/// write(fd, buf, n).
pub fn sys_write(ctx: &mut SyscallCtx) -> SysResult<usize> {
    let fd = ctx.args.args[0] as i32;
    let buf = abi::user_slice(ctx.args.args[1], ctx.args.args[2])?;

    let file = with_current(|t| t.fds.get(fd)).ok_or(Errno::ESRCH)??;
    fd::write(&file, buf)
}

/// close(fd).
pub fn sys_close(ctx: &mut SyscallCtx) -> SysResult<usize> {
    let fd = ctx.args.args[0] as i32;
    with_current(|t| t.fds.close(fd)).ok_or(Errno::ESRCH)??;
    Ok(0)
}

/// lseek(fd, offset, whence).
pub fn sys_lseek(ctx: &mut SyscallCtx) -> SysResult<usize> {
    const SEEK_SET: usize = 0;
    const SEEK_CUR: usize = 1;
    const SEEK_END: usize = 2;

    let fd = ctx.args.args[0] as i32;
    let offset = ctx.args.args[1] as i32 as i64;
    let whence = ctx.args.args[2];

    let file = with_current(|t| t.fds.get(fd)).ok_or(Errno::ESRCH)??;
    let mut f = file.lock();

    let size = match &f.backing {
        FdBacking::Vfs { node, .. } => node.size as i64,
        // Pipes e console não têm posição.
        _ => return Err(Errno::ESPIPE),
    };

    let base = match whence {
        SEEK_SET => 0,
        SEEK_CUR => f.offset as i64,
        SEEK_END => size,
        _ => return Err(Errno::EINVAL),
    };

    let target = base + offset;
    if target < 0 {
        return Err(Errno::EINVAL);
    }
    f.offset = target as u64;
    Ok(target as usize)
}

/// Estrutura stat entregue ao userspace: 13 campos u32.
fn write_stat(addr: usize, node: &vfs::NodeInfo) -> SysResult<()> {
    let type_bits: u32 = match node.file_type {
        FileType::Regular => 0x8000,
        FileType::Directory => 0x4000,
        FileType::Symlink => 0xA000,
        FileType::CharDevice => 0x2000,
        FileType::BlockDevice => 0x6000,
        FileType::Fifo => 0x1000,
        FileType::Socket => 0xC000,
    };

    let fields: [u32; 13] = [
        1,                              // st_dev
        node.id,                        // st_ino
        type_bits | node.mode as u32,   // st_mode
        node.nlink as u32,              // st_nlink
        node.uid as u32,                // st_uid
        node.gid as u32,                // st_gid
        0,                              // st_rdev
        node.size as u32,               // st_size
        0,                              // st_atime
        0,                              // st_mtime
        0,                              // st_ctime
        512,                            // st_blksize
        (node.size as u32).div_ceil(512), // st_blocks
    ];

    let out = abi::user_slice_mut(addr, 52)?;
    for (i, field) in fields.iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&field.to_le_bytes());
    }
    Ok(())
}

/// stat(path, statbuf).
pub fn sys_stat(ctx: &mut SyscallCtx) -> SysResult<usize> {
    let canonical = canonical_from_user(ctx.args.args[0])?;
    let node = vfs::stat(&canonical)?;
    write_stat(ctx.args.args[1], &node)?;
    Ok(0)
}

/// fstat(fd, statbuf).
pub fn sys_fstat(ctx: &mut SyscallCtx) -> SysResult<usize> {
    let fd = ctx.args.args[0] as i32;
    let file = with_current(|t| t.fds.get(fd)).ok_or(Errno::ESRCH)??;

    let node = {
        let f = file.lock();
        match &f.backing {
            FdBacking::Vfs { node, .. } => *node,
            FdBacking::Pipe(_) => vfs::NodeInfo {
                id: 0,
                size: 0,
                file_type: FileType::Fifo,
                mode: 0o600,
                nlink: 1,
                uid: 0,
                gid: 0,
            },
            FdBacking::Console => vfs::NodeInfo {
                id: 0,
                size: 0,
                file_type: FileType::CharDevice,
                mode: 0o620,
                nlink: 1,
                uid: 0,
                gid: 0,
            },
        }
    };

    write_stat(ctx.args.args[1], &node)?;
    Ok(0)
}

/// chdir(path).
pub fn sys_chdir(ctx: &mut SyscallCtx) -> SysResult<usize> {
    let canonical = canonical_from_user(ctx.args.args[0])?;

    let node = vfs::stat(&canonical)?;
    if node.file_type != FileType::Directory {
        return Err(Errno::ENOTDIR);
    }

    with_current(|t| t.cwd = canonical).ok_or(Errno::ESRCH)?;
    Ok(0)
}

/// getcwd(buf, n).
pub fn sys_getcwd(ctx: &mut SyscallCtx) -> SysResult<usize> {
    let cwd = with_current(|t| t.cwd.clone()).ok_or(Errno::ESRCH)?;
    let needed = cwd.len() + 1;
    if ctx.args.args[1] < needed {
        return Err(Errno::EINVAL);
    }

    let out = abi::user_slice_mut(ctx.args.args[0], needed)?;
    out[..cwd.len()].copy_from_slice(cwd.as_bytes());
    out[cwd.len()] = 0;
    Ok(needed)
}

/// pipe(int[2]).
pub fn sys_pipe(ctx: &mut SyscallCtx) -> SysResult<usize> {
    let fds_ptr = ctx.args.args[0];

    let (read_end, write_end) = PipeEnd::pair();

    let read_file = OpenFile {
        backing: FdBacking::Pipe(read_end),
        offset: 0,
        flags: OpenFlags::RDONLY,
    };
    let write_file = OpenFile {
        backing: FdBacking::Pipe(write_end),
        offset: 0,
        flags: OpenFlags::WRONLY,
    };

    // Piso 3: nunca sombrear stdio.
    let read_fd = with_current(|t| t.fds.install(read_file, FD_FLOOR)).ok_or(Errno::ESRCH)??;
    let write_fd = match with_current(|t| t.fds.install(write_file, FD_FLOOR)).ok_or(Errno::ESRCH)? {
        Ok(fd) => fd,
        Err(e) => {
            let _ = with_current(|t| t.fds.close(read_fd));
            return Err(e);
        }
    };

    abi::put_user_u32(fds_ptr, read_fd as u32)?;
    abi::put_user_u32(fds_ptr + 4, write_fd as u32)?;
    Ok(0)
}

/// ioctl(fd, request, arg).
pub fn sys_ioctl(ctx: &mut SyscallCtx) -> SysResult<usize> {
    let fd = ctx.args.args[0] as i32;
    let request = ctx.args.args[1] as u32;
    let arg = ctx.args.args[2];

    let file = with_current(|t| t.fds.get(fd)).ok_or(Errno::ESRCH)??;
    let (ops, node) = {
        let f = file.lock();
        match &f.backing {
            FdBacking::Vfs { ops, node, .. } => (*ops, *node),
            _ => return Err(Errno::EINVAL),
        }
    };
    ops.ioctl(&node, request, arg)
}

/// poll(fds, nfds, timeout_ms). Coleta bits de prontidão; espera em
/// halt-and-wait até o deadline (timeout < 0 = infinito).
pub fn sys_poll(ctx: &mut SyscallCtx) -> SysResult<usize> {
    let fds_ptr = ctx.args.args[0];
    let nfds = ctx.args.args[1];
    let timeout_ms = ctx.args.args[2] as i32;

    if nfds > 64 {
        return Err(Errno::EINVAL);
    }

    let deadline = crate::drivers::pit::ticks()
        .wrapping_add(crate::drivers::pit::ms_to_ticks(timeout_ms.max(0) as u32));

    loop {
        let mut ready_count = 0usize;

        for i in 0..nfds {
            let entry = fds_ptr + i * 8;
            let fd = abi::get_user_u32(entry)? as i32;
            let raw = abi::user_slice(entry + 4, 2)?;
            let events = u16::from_le_bytes([raw[0], raw[1]]);

            let revents = match with_current(|t| t.fds.get(fd)).ok_or(Errno::ESRCH)? {
                Ok(file) => fd::poll_one(&file, events)?,
                Err(_) => vfs::POLLERR,
            };

            let out = abi::user_slice_mut(entry + 6, 2)?;
            out.copy_from_slice(&revents.to_le_bytes());
            if revents != 0 {
                ready_count += 1;
            }
        }

        if ready_count > 0 || timeout_ms == 0 {
            return Ok(ready_count);
        }
        if timeout_ms > 0
            && (crate::drivers::pit::ticks().wrapping_sub(deadline) as i32) >= 0
        {
            return Ok(0);
        }

        scheduler::relax();
    }
}

/// getdents(fd, buf, n).
pub fn sys_getdents(ctx: &mut SyscallCtx) -> SysResult<usize> {
    let fd = ctx.args.args[0] as i32;
    let buf = abi::user_slice_mut(ctx.args.args[1], ctx.args.args[2])?;

    let file = with_current(|t| t.fds.get(fd)).ok_or(Errno::ESRCH)??;
    fd::getdents(&file, buf)
}

/// unlink(path).
pub fn sys_unlink(ctx: &mut SyscallCtx) -> SysResult<usize> {
    let canonical = canonical_from_user(ctx.args.args[0])?;
    vfs::unlink(&canonical)?;
    Ok(0)
}

/// chmod(path, mode).
pub fn sys_chmod(ctx: &mut SyscallCtx) -> SysResult<usize> {
    let canonical = canonical_from_user(ctx.args.args[0])?;
    vfs::chmod(&canonical, ctx.args.args[1] as u16)?;
    Ok(0)
}

/// symlink(target, path).
pub fn sys_symlink(ctx: &mut SyscallCtx) -> SysResult<usize> {
    let target = abi::user_cstr(ctx.args.args[0])?;
    let canonical = canonical_from_user(ctx.args.args[1])?;
    vfs::symlink(&target, &canonical)?;
    Ok(0)
}

/// readlink(path, buf, n).
pub fn sys_readlink(ctx: &mut SyscallCtx) -> SysResult<usize> {
    // Sem canonizar o último componente: queremos o próprio symlink.
    let path = abi::user_cstr(ctx.args.args[0])?;
    let cwd = with_current(|t| t.cwd.clone()).ok_or(Errno::ESRCH)?;
    let normalized = vfs::path::normalize(&cwd, &path);

    let target = vfs::readlink(&normalized)?;
    let n = core::cmp::min(target.len(), ctx.args.args[2]);
    let out = abi::user_slice_mut(ctx.args.args[1], n)?;
    out.copy_from_slice(&target.as_bytes()[..n]);
    Ok(n)
}
