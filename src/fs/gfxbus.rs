//! Barramento do compositor gráfico de userland (`/dev/gfxbus`).
//!
//! Protocolo herdado do original:
//! - ioctl 0x2f01: registra a task chamadora como master (compositor);
//! - ioctl 0x2f02 (arg = tamanho): aloca um buffer compartilhado,
//!   mapeia no chamador e no master (`map_across`) e devolve o
//!   endereço virtual do chamador.
//! - read/write: fila de mensagens byte-stream entre clientes e master.

use super::sysfs::{self, DevOps};
use super::vfs::{POLLIN, POLLOUT};
use crate::klib::align_up;
use crate::mm::config::PAGE_SIZE;
use crate::mm::valloc::VmFlags;
use crate::syscall::error::{Errno, SysResult};
use crate::sync::Spinlock;
use crate::sys::Pid;
use alloc::collections::VecDeque;

const IOCTL_REGISTER_MASTER: u32 = 0x2f01;
const IOCTL_ALLOC_BUFFER: u32 = 0x2f02;

/// Capacidade da fila de mensagens.
const QUEUE_CAP: usize = 1500;

struct GfxState {
    master: Option<Pid>,
    queue: VecDeque<u8>,
}

struct GfxBus {
    state: Spinlock<GfxState>,
}

static GFXBUS: GfxBus = GfxBus {
    state: Spinlock::new(GfxState {
        master: None,
        queue: VecDeque::new(),
    }),
};

impl DevOps for GfxBus {
    fn read(&self, _offset: u64, buf: &mut [u8], nonblock: bool) -> SysResult<usize> {
        loop {
            {
                let mut state = self.state.lock();
                if !state.queue.is_empty() {
                    let n = core::cmp::min(buf.len(), state.queue.len());
                    for slot in buf.iter_mut().take(n) {
                        *slot = state.queue.pop_front().unwrap_or(0);
                    }
                    return Ok(n);
                }
            }
            if nonblock {
                return Err(Errno::EAGAIN);
            }
            crate::sched::scheduler::relax();
        }
    }

    fn write(&self, _offset: u64, buf: &[u8]) -> SysResult<usize> {
        let mut state = self.state.lock();
        let space = QUEUE_CAP.saturating_sub(state.queue.len());
        let n = core::cmp::min(space, buf.len());
        state.queue.extend(buf[..n].iter().copied());
        Ok(n)
    }

    fn poll(&self, events: u16) -> u16 {
        let state = self.state.lock();
        let mut ready = 0;
        if events & POLLIN != 0 && !state.queue.is_empty() {
            ready |= POLLIN;
        }
        if events & POLLOUT != 0 && state.queue.len() < QUEUE_CAP {
            ready |= POLLOUT;
        }
        ready
    }

    fn ioctl(&self, request: u32, arg: usize) -> SysResult<usize> {
        match request {
            IOCTL_REGISTER_MASTER => {
                let pid = crate::sched::scheduler::current_pid().ok_or(Errno::EPERM)?;
                self.state.lock().master = Some(pid);
                crate::kdebug!("gfxbus", "master registrado: pid {}", pid);
                Ok(0)
            }
            IOCTL_ALLOC_BUFFER => {
                let size = arg;
                if size == 0 {
                    return Err(Errno::EINVAL);
                }

                let master = match self.state.lock().master {
                    Some(m) => m,
                    // Sem master registrado o buffer não tem destino.
                    None => return Ok(0),
                };

                let caller_pid = crate::sched::scheduler::current_pid().ok_or(Errno::EPERM)?;
                let caller = crate::sched::scheduler::current_aspace().ok_or(Errno::EPERM)?;

                // Aloca no chamador (zerado, compartilhável).
                let pages = align_up(size, PAGE_SIZE) / PAGE_SIZE;
                let reserved = caller
                    .reserve(
                        pages,
                        None,
                        None,
                        VmFlags::USER | VmFlags::WRITABLE | VmFlags::ZERO,
                    )
                    .map_err(|_| Errno::ENOMEM)?;

                // Espelha no master, preservando offsets.
                if master != caller_pid {
                    let master_aspace = crate::sched::scheduler::with_task(master, |t| {
                        t.aspace.clone()
                    })
                    .ok_or(Errno::ESRCH)?;

                    let master_addr = crate::mm::valloc::map_across(
                        &master_aspace,
                        &caller,
                        reserved.virt,
                        size,
                        VmFlags::USER | VmFlags::WRITABLE,
                    )
                    .map_err(|_| Errno::ENOMEM)?;

                    crate::kdebug!(
                        "gfxbus",
                        "buffer de {} bytes: caller {:#x}, master {:#x}",
                        size,
                        reserved.virt,
                        master_addr
                    );
                }

                Ok(reserved.virt)
            }
            _ => Err(Errno::EINVAL),
        }
    }
}

pub fn init() {
    sysfs::add_dev("gfxbus", &GFXBUS);
}
