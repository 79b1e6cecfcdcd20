//! Tabela de descritores por task.
//!
//! O descritor é um enum etiquetado por tipo de backend; o número é
//! alocado como o menor inteiro livre acima de um piso (3 preserva
//! stdin/stdout/stderr nos lugares convencionais).

use super::pipe::PipeEnd;
use super::vfs::{self, FileType, NodeInfo, OpenFlags, VfsOps, POLLIN, POLLOUT};
use crate::syscall::error::{Errno, SysResult};
use crate::sync::Spinlock;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// Piso default de alocação de fd.
pub const FD_FLOOR: i32 = 3;
/// Limite de descritores por task.
pub const FD_MAX: i32 = 256;

/// O que há por trás de um descritor.
pub enum FdBacking {
    /// Arquivo de um mount do VFS.
    Vfs {
        ops: &'static dyn VfsOps,
        node: NodeInfo,
        /// Caminho canônico (fstat, debug).
        path: String,
    },
    /// Ponta de um pipe.
    Pipe(PipeEnd),
    /// stdin/stdout/stderr pré-abertos no console.
    Console,
}

/// Um arquivo aberto. Compartilhado por fork (offset comum, como no
/// POSIX).
pub struct OpenFile {
    pub backing: FdBacking,
    pub offset: u64,
    pub flags: OpenFlags,
}

impl OpenFile {
    pub fn file_type(&self) -> FileType {
        match &self.backing {
            FdBacking::Vfs { node, .. } => node.file_type,
            FdBacking::Pipe(_) => FileType::Fifo,
            FdBacking::Console => FileType::CharDevice,
        }
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        // Refcount chegou a zero: avisa o backend.
        if let FdBacking::Vfs { ops, node, .. } = &self.backing {
            ops.close(node);
        }
        // PipeEnd tem Drop próprio (contagem de pontas).
    }
}

pub type FileRef = Arc<Spinlock<OpenFile>>;

/// Tabela de descritores. Clonar compartilha os arquivos (fork).
#[derive(Clone)]
pub struct FdTable {
    entries: BTreeMap<i32, FileRef>,
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Tabela inicial de uma task de usuário: 0/1/2 no console.
    pub fn with_stdio() -> Self {
        let mut table = Self::new();
        for fd in 0..3 {
            let file = Arc::new(Spinlock::new(OpenFile {
                backing: FdBacking::Console,
                offset: 0,
                flags: OpenFlags::RDWR,
            }));
            table.entries.insert(fd, file);
        }
        table
    }

    /// Menor número livre >= piso.
    fn lowest_free(&self, floor: i32) -> SysResult<i32> {
        let mut candidate = floor;
        for (&fd, _) in self.entries.range(floor..) {
            if fd == candidate {
                candidate += 1;
            } else {
                break;
            }
        }
        if candidate >= FD_MAX {
            return Err(Errno::EMFILE);
        }
        Ok(candidate)
    }

    /// Instala um arquivo no menor fd livre >= piso.
    pub fn install(&mut self, file: OpenFile, floor: i32) -> SysResult<i32> {
        let fd = self.lowest_free(floor)?;
        self.entries.insert(fd, Arc::new(Spinlock::new(file)));
        Ok(fd)
    }

    pub fn get(&self, fd: i32) -> SysResult<FileRef> {
        self.entries.get(&fd).cloned().ok_or(Errno::EBADF)
    }

    pub fn close(&mut self, fd: i32) -> SysResult<()> {
        self.entries.remove(&fd).map(|_| ()).ok_or(Errno::EBADF)
    }

    pub fn close_all(&mut self) {
        self.entries.clear();
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------
// Operações sobre um arquivo aberto (caminho comum de read/write).
// ---------------------------------------------------------------------

/// Lê do arquivo na posição corrente, avançando o offset.
///
/// O lock do arquivo NUNCA fica retido durante a chamada ao backend:
/// leituras bloqueantes (pipe, tty) esperam em halt-and-wait e outra
/// task pode estar com o mesmo arquivo (fork compartilha descritores).
pub fn read(file: &FileRef, buf: &mut [u8]) -> SysResult<usize> {
    enum Target {
        Vfs(&'static dyn VfsOps, NodeInfo, u64, OpenFlags),
        Pipe(PipeEnd, bool),
        Console(bool),
    }

    let target = {
        let f = file.lock();
        let nonblock = f.flags.contains(OpenFlags::NONBLOCK);
        match &f.backing {
            FdBacking::Vfs { ops, node, .. } => {
                if node.file_type == FileType::Directory {
                    return Err(Errno::EISDIR);
                }
                Target::Vfs(*ops, *node, f.offset, f.flags)
            }
            FdBacking::Pipe(end) => Target::Pipe(end.clone(), nonblock),
            FdBacking::Console => Target::Console(nonblock),
        }
    };

    match target {
        Target::Vfs(ops, node, offset, flags) => {
            let n = ops.read(&node, offset, buf, flags)?;
            file.lock().offset += n as u64;
            Ok(n)
        }
        Target::Pipe(end, nonblock) => end.read(buf, nonblock),
        Target::Console(nonblock) => console_read(buf, nonblock),
    }
}

/// Escreve na posição corrente, avançando o offset.
pub fn write(file: &FileRef, buf: &[u8]) -> SysResult<usize> {
    enum Target {
        Vfs(&'static dyn VfsOps, NodeInfo, u64),
        Pipe(PipeEnd),
        Console,
    }

    let target = {
        let f = file.lock();
        match &f.backing {
            FdBacking::Vfs { ops, node, .. } => Target::Vfs(*ops, *node, f.offset),
            FdBacking::Pipe(end) => Target::Pipe(end.clone()),
            FdBacking::Console => Target::Console,
        }
    };

    match target {
        Target::Vfs(ops, node, offset) => {
            let n = ops.write(&node, offset, buf)?;
            file.lock().offset += n as u64;
            Ok(n)
        }
        Target::Pipe(end) => end.write(buf),
        Target::Console => console_write(buf),
    }
}

pub fn poll_one(file: &FileRef, events: u16) -> SysResult<u16> {
    let f = file.lock();
    match &f.backing {
        FdBacking::Vfs { ops, node, .. } => ops.poll(node, events),
        FdBacking::Pipe(end) => Ok(end.poll(events)),
        FdBacking::Console => {
            let mut ready = events & POLLOUT;
            if events & POLLIN != 0 && !crate::drivers::serial::INPUT.lock().is_empty() {
                ready |= POLLIN;
            }
            Ok(ready)
        }
    }
}

/// Leitura do console: bloqueia até ter entrada.
fn console_read(buf: &mut [u8], nonblock: bool) -> SysResult<usize> {
    loop {
        {
            let mut input = crate::drivers::serial::INPUT.lock();
            if !input.is_empty() {
                let mut n = 0;
                while n < buf.len() {
                    match input.pop() {
                        Some(b) => {
                            buf[n] = b;
                            n += 1;
                        }
                        None => break,
                    }
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

fn console_write(buf: &[u8]) -> SysResult<usize> {
    let mut serial = crate::drivers::serial::SERIAL1.lock();
    for &b in buf {
        serial.send(b);
    }
    Ok(buf.len())
}

// ---------------------------------------------------------------------
// getdents: serialização das entradas de diretório.
// ---------------------------------------------------------------------

/// Formato de registro entregue ao userspace:
/// `{ inode u32, reclen u16, type u8, name..., NUL }`.
pub fn getdents(file: &FileRef, out: &mut [u8]) -> SysResult<usize> {
    let mut f = file.lock();

    let entries: Vec<vfs::DirEntry> = match &f.backing {
        FdBacking::Vfs { ops, node, .. } => {
            if node.file_type != FileType::Directory {
                return Err(Errno::ENOTDIR);
            }
            ops.getdents(node)?
        }
        _ => return Err(Errno::ENOTDIR),
    };

    let mut written = 0usize;
    let mut index = 0usize;
    for (i, entry) in entries.iter().enumerate() {
        // Offset do descritor conta entradas já entregues.
        if (i as u64) < f.offset {
            continue;
        }
        let reclen = 4 + 2 + 1 + entry.name.len() + 1;
        if written + reclen > out.len() {
            break;
        }

        out[written..written + 4].copy_from_slice(&entry.inode.to_le_bytes());
        out[written + 4..written + 6].copy_from_slice(&(reclen as u16).to_le_bytes());
        out[written + 6] = vfs::file_type_byte(entry.file_type);
        out[written + 7..written + 7 + entry.name.len()].copy_from_slice(entry.name.as_bytes());
        out[written + 7 + entry.name.len()] = 0;

        written += reclen;
        index = i + 1;
    }

    if index > 0 {
        f.offset = index as u64;
    }
    Ok(written)
}
