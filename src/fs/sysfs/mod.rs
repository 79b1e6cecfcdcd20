//! Filesystem sintético: nós de dispositivo e introspecção do kernel.
//!
//! Uma lista plana de entradas nomeadas com tabela de callbacks, sob
//! dois mounts: `/sys` (estatísticas, ex.: `memfree`) e `/dev`
//! (dispositivos: tty, null, zero, fb, gfxbus, discos). Adicionar e
//! remover é idempotente por nome. Offsets só significam algo se o
//! callback honrar.

use super::vfs::{self, DirEntry, FileType, NodeInfo, OpenFlags, VfsOps, POLLIN, POLLOUT};
use crate::syscall::error::{Errno, SysResult};
use crate::sync::Spinlock;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write;

/// Callbacks de uma entrada sintética. Leitura e escrita são
/// inteiramente delegadas.
pub trait DevOps: Send + Sync {
    fn read(&self, _offset: u64, _buf: &mut [u8], _nonblock: bool) -> SysResult<usize> {
        Err(Errno::ENOSYS)
    }

    fn write(&self, _offset: u64, _buf: &[u8]) -> SysResult<usize> {
        Err(Errno::ENOSYS)
    }

    fn poll(&self, events: u16) -> u16 {
        events & (POLLIN | POLLOUT)
    }

    fn ioctl(&self, _request: u32, _arg: usize) -> SysResult<usize> {
        Err(Errno::EINVAL)
    }

    fn file_type(&self) -> FileType {
        FileType::CharDevice
    }
}

struct Entry {
    name: String,
    ops: &'static dyn DevOps,
}

static SYS_ENTRIES: Spinlock<Vec<Entry>> = Spinlock::new(Vec::new());
static DEV_ENTRIES: Spinlock<Vec<Entry>> = Spinlock::new(Vec::new());

fn add(list: &Spinlock<Vec<Entry>>, name: &str, ops: &'static dyn DevOps) {
    let mut entries = list.lock();
    match entries.iter_mut().find(|e| e.name == name) {
        // Idempotente: re-registrar troca os callbacks.
        Some(entry) => entry.ops = ops,
        None => entries.push(Entry {
            name: String::from(name),
            ops,
        }),
    }
}

fn remove(list: &Spinlock<Vec<Entry>>, name: &str) {
    list.lock().retain(|e| e.name != name);
}

/// Registra uma entrada de introspecção em `/sys`.
pub fn add_file(name: &str, ops: &'static dyn DevOps) {
    add(&SYS_ENTRIES, name, ops);
}

/// Registra um nó de dispositivo em `/dev`.
pub fn add_dev(name: &str, ops: &'static dyn DevOps) {
    add(&DEV_ENTRIES, name, ops);
}

pub fn rm_file(name: &str) {
    remove(&SYS_ENTRIES, name);
}

pub fn rm_dev(name: &str) {
    remove(&DEV_ENTRIES, name);
}

/// O mount de uma das duas árvores.
struct SynthMount {
    entries: &'static Spinlock<Vec<Entry>>,
}

/// id reservado para o próprio diretório do mount.
const DIR_NODE: u32 = u32::MAX;

impl SynthMount {
    fn ops_for(&self, id: u32) -> SysResult<&'static dyn DevOps> {
        let entries = self.entries.lock();
        entries
            .get(id as usize)
            .map(|e| e.ops)
            .ok_or(Errno::ENOENT)
    }
}

impl VfsOps for SynthMount {
    fn open(&self, tail: &str, _flags: OpenFlags) -> SysResult<NodeInfo> {
        if tail.is_empty() {
            return Ok(NodeInfo {
                id: DIR_NODE,
                size: 0,
                file_type: FileType::Directory,
                mode: 0o555,
                nlink: 2,
                uid: 0,
                gid: 0,
            });
        }

        let entries = self.entries.lock();
        let (idx, entry) = entries
            .iter()
            .enumerate()
            .find(|(_, e)| e.name == tail)
            .ok_or(Errno::ENOENT)?;

        Ok(NodeInfo {
            id: idx as u32,
            size: 0,
            file_type: entry.ops.file_type(),
            mode: 0o666,
            nlink: 1,
            uid: 0,
            gid: 0,
        })
    }

    fn read(
        &self,
        node: &NodeInfo,
        offset: u64,
        buf: &mut [u8],
        flags: OpenFlags,
    ) -> SysResult<usize> {
        if node.id == DIR_NODE {
            return Err(Errno::EISDIR);
        }
        self.ops_for(node.id)?
            .read(offset, buf, flags.contains(OpenFlags::NONBLOCK))
    }

    fn write(&self, node: &NodeInfo, offset: u64, buf: &[u8]) -> SysResult<usize> {
        if node.id == DIR_NODE {
            return Err(Errno::EISDIR);
        }
        self.ops_for(node.id)?.write(offset, buf)
    }

    fn getdents(&self, node: &NodeInfo) -> SysResult<Vec<DirEntry>> {
        if node.id != DIR_NODE {
            return Err(Errno::ENOTDIR);
        }
        let entries = self.entries.lock();
        Ok(entries
            .iter()
            .enumerate()
            .map(|(i, e)| DirEntry {
                inode: i as u32,
                file_type: e.ops.file_type(),
                name: e.name.clone(),
            })
            .collect())
    }

    fn poll(&self, node: &NodeInfo, events: u16) -> SysResult<u16> {
        if node.id == DIR_NODE {
            return Ok(0);
        }
        Ok(self.ops_for(node.id)?.poll(events))
    }

    fn ioctl(&self, node: &NodeInfo, request: u32, arg: usize) -> SysResult<usize> {
        self.ops_for(node.id)?.ioctl(request, arg)
    }
}

static SYS_MOUNT: SynthMount = SynthMount {
    entries: &SYS_ENTRIES,
};
static DEV_MOUNT: SynthMount = SynthMount {
    entries: &DEV_ENTRIES,
};

// ---------------------------------------------------------------------
// Entradas padrão
// ---------------------------------------------------------------------

/// `/sys/memfree`: "<total-bytes> <free-bytes>\n".
struct MemFree;

impl DevOps for MemFree {
    fn read(&self, offset: u64, buf: &mut [u8], _nonblock: bool) -> SysResult<usize> {
        if offset != 0 {
            return Ok(0);
        }
        let (total, free) = crate::mm::heap::stats();
        let mut line = String::new();
        let _ = write!(line, "{} {}\n", total, free);

        let n = core::cmp::min(buf.len(), line.len());
        buf[..n].copy_from_slice(&line.as_bytes()[..n]);
        Ok(n)
    }

    fn file_type(&self) -> FileType {
        FileType::Regular
    }
}

/// `/sys/uptime`: milissegundos desde o boot.
struct Uptime;

impl DevOps for Uptime {
    fn read(&self, offset: u64, buf: &mut [u8], _nonblock: bool) -> SysResult<usize> {
        if offset != 0 {
            return Ok(0);
        }
        let mut line = String::new();
        let _ = write!(line, "{}\n", crate::drivers::pit::uptime_ms());

        let n = core::cmp::min(buf.len(), line.len());
        buf[..n].copy_from_slice(&line.as_bytes()[..n]);
        Ok(n)
    }

    fn file_type(&self) -> FileType {
        FileType::Regular
    }
}

/// `/sys/mounts`: tabela de mounts ativa.
struct Mounts;

impl DevOps for Mounts {
    fn read(&self, offset: u64, buf: &mut [u8], _nonblock: bool) -> SysResult<usize> {
        if offset != 0 {
            return Ok(0);
        }
        let mut line = String::new();
        for (prefix, device, tag) in vfs::mounts_info() {
            let _ = write!(line, "{} {} {}\n", device, prefix, tag);
        }

        let n = core::cmp::min(buf.len(), line.len());
        buf[..n].copy_from_slice(&line.as_bytes()[..n]);
        Ok(n)
    }

    fn file_type(&self) -> FileType {
        FileType::Regular
    }
}

/// `/dev/null`: lê EOF, escreve no vácuo.
struct Null;

impl DevOps for Null {
    fn read(&self, _offset: u64, _buf: &mut [u8], _nonblock: bool) -> SysResult<usize> {
        Ok(0)
    }

    fn write(&self, _offset: u64, buf: &[u8]) -> SysResult<usize> {
        Ok(buf.len())
    }
}

/// `/dev/zero`: zeros infinitos.
struct Zero;

impl DevOps for Zero {
    fn read(&self, _offset: u64, buf: &mut [u8], _nonblock: bool) -> SysResult<usize> {
        buf.fill(0);
        Ok(buf.len())
    }

    fn write(&self, _offset: u64, buf: &[u8]) -> SysResult<usize> {
        Ok(buf.len())
    }
}

/// `/dev/tty`: console serial. Leitura bloqueia até ter entrada.
struct Tty;

impl DevOps for Tty {
    fn read(&self, _offset: u64, buf: &mut [u8], nonblock: bool) -> SysResult<usize> {
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

    fn write(&self, _offset: u64, buf: &[u8]) -> SysResult<usize> {
        let mut serial = crate::drivers::serial::SERIAL1.lock();
        for &b in buf {
            serial.send(b);
        }
        Ok(buf.len())
    }

    fn poll(&self, events: u16) -> u16 {
        let mut ready = events & POLLOUT;
        if events & POLLIN != 0 && !crate::drivers::serial::INPUT.lock().is_empty() {
            ready |= POLLIN;
        }
        ready
    }
}

/// `/dev/fb`: descritor do framebuffer linear via ioctl.
struct Fb;

/// ioctl: largura, altura, pitch, bpp, endereço físico.
const FB_IOCTL_WIDTH: u32 = 0x4600;
const FB_IOCTL_HEIGHT: u32 = 0x4601;
const FB_IOCTL_PITCH: u32 = 0x4602;
const FB_IOCTL_BPP: u32 = 0x4603;
const FB_IOCTL_ADDR: u32 = 0x4604;

impl DevOps for Fb {
    fn ioctl(&self, request: u32, _arg: usize) -> SysResult<usize> {
        let fb = crate::drivers::video::framebuffer().ok_or(Errno::ENODEV)?;
        match request {
            FB_IOCTL_WIDTH => Ok(fb.width as usize),
            FB_IOCTL_HEIGHT => Ok(fb.height as usize),
            FB_IOCTL_PITCH => Ok(fb.pitch as usize),
            FB_IOCTL_BPP => Ok(fb.bpp as usize),
            FB_IOCTL_ADDR => Ok(fb.addr as usize),
            _ => Err(Errno::EINVAL),
        }
    }
}

static MEMFREE: MemFree = MemFree;
static UPTIME: Uptime = Uptime;
static MOUNTS: Mounts = Mounts;
static NULL: Null = Null;
static ZERO: Zero = Zero;
static TTY: Tty = Tty;
static FB: Fb = Fb;

/// Monta as duas árvores e registra as entradas padrão.
pub fn init() {
    vfs::mount("/sys", "none", "sysfs", &SYS_MOUNT);
    vfs::mount("/dev", "none", "devfs", &DEV_MOUNT);

    add_file("memfree", &MEMFREE);
    add_file("uptime", &UPTIME);
    add_file("mounts", &MOUNTS);

    add_dev("null", &NULL);
    add_dev("zero", &ZERO);
    add_dev("tty", &TTY);
    add_dev("tty1", &TTY);
    add_dev("fb", &FB);
}
