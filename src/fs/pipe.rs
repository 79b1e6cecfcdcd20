//! Pipes inter-processo.
//!
//! Um buffer de bytes limitado compartilhado por duas pontas. Escrita
//! que estouraria o buffer falha com EFBIG; leitura bloqueia enquanto
//! vazio (EAGAIN com O_NONBLOCK); com a ponta de escrita fechada, a
//! leitura drena o que sobrou e então devolve 0.

use crate::syscall::error::{Errno, SysResult};
use crate::sync::Spinlock;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Capacidade fixa do buffer.
pub const PIPE_BUFFER_SIZE: usize = 16 * 1024;

pub struct Pipe {
    data: Spinlock<VecDeque<u8>>,
    readers: AtomicUsize,
    writers: AtomicUsize,
}

impl Pipe {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            data: Spinlock::new(VecDeque::new()),
            readers: AtomicUsize::new(0),
            writers: AtomicUsize::new(0),
        })
    }
}

/// Uma ponta de pipe. Clones (fork) contam; a última ponta de escrita
/// a cair produz EOF nos leitores.
pub struct PipeEnd {
    pipe: Arc<Pipe>,
    write_end: bool,
}

impl PipeEnd {
    /// Cria o par (leitura, escrita).
    pub fn pair() -> (PipeEnd, PipeEnd) {
        let pipe = Pipe::new();
        pipe.readers.store(1, Ordering::Relaxed);
        pipe.writers.store(1, Ordering::Relaxed);
        (
            PipeEnd {
                pipe: pipe.clone(),
                write_end: false,
            },
            PipeEnd {
                pipe,
                write_end: true,
            },
        )
    }

    pub fn is_write_end(&self) -> bool {
        self.write_end
    }

    /// Leitura. Bloqueia (halt-and-wait) enquanto não há dados e ainda
    /// existe quem possa escrever.
    pub fn read(&self, buf: &mut [u8], nonblock: bool) -> SysResult<usize> {
        if self.write_end {
            return Err(Errno::EBADF);
        }

        loop {
            {
                let mut data = self.pipe.data.lock();
                if !data.is_empty() {
                    let n = core::cmp::min(buf.len(), data.len());
                    for slot in buf.iter_mut().take(n) {
                        *slot = data.pop_front().unwrap_or(0);
                    }
                    return Ok(n);
                }
            }

            // Vazio: EOF se não há mais escritores.
            if self.pipe.writers.load(Ordering::Acquire) == 0 {
                return Ok(0);
            }
            if nonblock {
                return Err(Errno::EAGAIN);
            }

            crate::sched::scheduler::relax();
        }
    }

    /// Escrita. O conjunto inteiro cabe ou a chamada falha com EFBIG.
    pub fn write(&self, buf: &[u8]) -> SysResult<usize> {
        if !self.write_end {
            return Err(Errno::EBADF);
        }

        let mut data = self.pipe.data.lock();
        if data.len() + buf.len() > PIPE_BUFFER_SIZE {
            return Err(Errno::EFBIG);
        }
        data.extend(buf.iter().copied());
        Ok(buf.len())
    }

    pub fn poll(&self, events: u16) -> u16 {
        use super::vfs::{POLLHUP, POLLIN, POLLOUT};
        let mut ready = 0u16;
        let len = self.pipe.data.lock().len();

        if !self.write_end {
            if events & POLLIN != 0 && len > 0 {
                ready |= POLLIN;
            }
            if self.pipe.writers.load(Ordering::Acquire) == 0 {
                ready |= POLLHUP;
            }
        } else if events & POLLOUT != 0 && len < PIPE_BUFFER_SIZE {
            ready |= POLLOUT;
        }
        ready
    }
}

impl Clone for PipeEnd {
    fn clone(&self) -> Self {
        let counter = if self.write_end {
            &self.pipe.writers
        } else {
            &self.pipe.readers
        };
        counter.fetch_add(1, Ordering::AcqRel);
        Self {
            pipe: self.pipe.clone(),
            write_end: self.write_end,
        }
    }
}

impl Drop for PipeEnd {
    fn drop(&mut self) {
        let counter = if self.write_end {
            &self.pipe.writers
        } else {
            &self.pipe.readers
        };
        counter.fetch_sub(1, Ordering::AcqRel);
    }
}
