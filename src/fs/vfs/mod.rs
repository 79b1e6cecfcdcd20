//! # VFS
//!
//! Tabela de mounts (prefixo absoluto → backend), resolução de caminho
//! com expansão de symlinks e o despacho de operações por callback.
//!
//! A tabela é append-only depois do init: mounts nunca saem, então a
//! resolução só precisa do lock por um instante para copiar o índice
//! do mount vencedor (prefixo mais longo).

pub mod path;

use crate::syscall::error::{Errno, SysResult};
use crate::sync::Spinlock;
use alloc::string::String;
use alloc::vec::Vec;
use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const RDONLY = 0;
        const WRONLY = 1 << 0;
        const RDWR = 1 << 1;
        const CREATE = 1 << 6;
        const TRUNC = 1 << 9;
        const APPEND = 1 << 10;
        const NONBLOCK = 1 << 11;
    }
}

/// Tipo de arquivo, no molde dos bits de modo do ext2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

/// Identidade + metadados de um arquivo aberto, devolvidos pelo open
/// do backend. `id` é o inode (ext2) ou o índice da entrada (sysfs).
#[derive(Debug, Clone, Copy)]
pub struct NodeInfo {
    pub id: u32,
    pub size: u64,
    pub file_type: FileType,
    pub mode: u16,
    pub nlink: u16,
    pub uid: u16,
    pub gid: u16,
}

/// Uma entrada de diretório já decodificada.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub inode: u32,
    pub file_type: FileType,
    pub name: String,
}

/// Byte de tipo no formato de dirent entregue ao userspace (mesma
/// numeração dos dirents do ext2).
pub fn file_type_byte(ft: FileType) -> u8 {
    match ft {
        FileType::Regular => 1,
        FileType::Directory => 2,
        FileType::CharDevice => 3,
        FileType::BlockDevice => 4,
        FileType::Fifo => 5,
        FileType::Socket => 6,
        FileType::Symlink => 7,
    }
}

/// Eventos de poll.
pub const POLLIN: u16 = 0x1;
pub const POLLOUT: u16 = 0x4;
pub const POLLERR: u16 = 0x8;
pub const POLLHUP: u16 = 0x10;

/// Tabela de callbacks de um backend. Só `open` é obrigatório; o resto
/// tem default honesto (ENOSYS, ou pronto-para-tudo no poll).
pub trait VfsOps: Send + Sync {
    fn open(&self, tail: &str, flags: OpenFlags) -> SysResult<NodeInfo>;

    fn stat(&self, tail: &str) -> SysResult<NodeInfo> {
        self.open(tail, OpenFlags::RDONLY)
    }

    fn read(
        &self,
        _node: &NodeInfo,
        _offset: u64,
        _buf: &mut [u8],
        _flags: OpenFlags,
    ) -> SysResult<usize> {
        Err(Errno::ENOSYS)
    }

    fn write(&self, _node: &NodeInfo, _offset: u64, _buf: &[u8]) -> SysResult<usize> {
        Err(Errno::ENOSYS)
    }

    fn getdents(&self, _node: &NodeInfo) -> SysResult<Vec<DirEntry>> {
        Err(Errno::ENOSYS)
    }

    /// Backends sem poll: sempre pronto para leitura e escrita, nunca
    /// em condição excepcional.
    fn poll(&self, _node: &NodeInfo, events: u16) -> SysResult<u16> {
        Ok(events & (POLLIN | POLLOUT))
    }

    fn ioctl(&self, _node: &NodeInfo, _request: u32, _arg: usize) -> SysResult<usize> {
        Err(Errno::EINVAL)
    }

    fn unlink(&self, _tail: &str) -> SysResult<()> {
        Err(Errno::ENOSYS)
    }

    fn chmod(&self, _tail: &str, _mode: u16) -> SysResult<()> {
        Err(Errno::ENOSYS)
    }

    fn symlink(&self, _target: &str, _tail: &str) -> SysResult<()> {
        Err(Errno::ENOSYS)
    }

    fn readlink(&self, _tail: &str) -> SysResult<String> {
        Err(Errno::ENOSYS)
    }

    fn close(&self, _node: &NodeInfo) {}
}

/// Um mount: prefixo absoluto → backend.
struct Mount {
    prefix: String,
    device: String,
    type_tag: &'static str,
    ops: &'static dyn VfsOps,
}

static MOUNTS: Spinlock<Vec<Mount>> = Spinlock::new(Vec::new());

/// Profundidade máxima de expansão de symlinks.
const SYMLINK_DEPTH: usize = 8;

/// Registra um backend num prefixo. Append-only; chamado no init de
/// cada filesystem.
pub fn mount(prefix: &str, device: &str, type_tag: &'static str, ops: &'static dyn VfsOps) {
    let mut mounts = MOUNTS.lock();
    mounts.push(Mount {
        prefix: String::from(prefix),
        device: String::from(device),
        type_tag,
        ops,
    });
    crate::kinfo!("vfs", "mount {} em {} ({})", device, prefix, type_tag);
}

/// Lista de mounts (prefixo, device, tipo), para introspecção.
pub fn mounts_info() -> Vec<(String, String, &'static str)> {
    MOUNTS
        .lock()
        .iter()
        .map(|m| (m.prefix.clone(), m.device.clone(), m.type_tag))
        .collect()
}

/// Um prefixo de mount cobre `path`? Só casa em fronteira de
/// componente: `/mnt` cobre `/mnt/b/x` mas não `/mntx`.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    prefix == "/"
        || path == prefix
        || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
}

/// Escolhe, dentre `prefixes`, o mais longo que cobre `path`
/// (resolução de mount; puro para ser testável).
pub fn best_prefix<'a>(prefixes: impl Iterator<Item = &'a str>, path: &str) -> Option<&'a str> {
    let mut best: Option<&'a str> = None;
    for prefix in prefixes {
        if prefix_matches(prefix, path) && best.map(|b| prefix.len() > b.len()).unwrap_or(true) {
            best = Some(prefix);
        }
    }
    best
}

/// Prefixo mais longo que cobre `path`. Retorna (ops, tail).
fn resolve_mount(path: &str) -> SysResult<(&'static dyn VfsOps, String)> {
    let mounts = MOUNTS.lock();

    let best = best_prefix(mounts.iter().map(|m| m.prefix.as_str()), path)
        .ok_or(Errno::ENOENT)?;
    let mount = mounts
        .iter()
        .find(|m| m.prefix == best)
        .ok_or(Errno::ENOENT)?;

    let tail = if mount.prefix == "/" {
        path.trim_start_matches('/')
    } else {
        path[mount.prefix.len()..].trim_start_matches('/')
    };
    Ok((mount.ops, String::from(tail)))
}

/// Prefixo do mount que atende `path` (introspecção).
pub fn winning_prefix(path: &str) -> SysResult<String> {
    let mounts = MOUNTS.lock();
    best_prefix(mounts.iter().map(|m| m.prefix.as_str()), path)
        .map(String::from)
        .ok_or(Errno::ENOENT)
}

/// Normaliza e expande symlinks componente a componente (limite de
/// profundidade pequeno). Retorna o caminho absoluto final.
pub fn canonicalize(cwd: &str, raw: &str) -> SysResult<String> {
    let mut current = path::normalize(cwd, raw);

    for _ in 0..SYMLINK_DEPTH {
        match expand_one_symlink(&current)? {
            Some(expanded) => current = expanded,
            None => return Ok(current),
        }
    }
    Err(Errno::ELOOP)
}

/// Expande o primeiro symlink encontrado no caminho, se houver.
fn expand_one_symlink(path: &str) -> SysResult<Option<String>> {
    if path == "/" {
        return Ok(None);
    }

    let mut prefix = String::new();
    let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();

    for (i, component) in components.iter().enumerate() {
        prefix.push('/');
        prefix.push_str(component);

        let Ok((ops, tail)) = resolve_mount(&prefix) else {
            return Ok(None);
        };
        let Ok(info) = ops.stat(&tail) else {
            // Componente inexistente: deixa o erro aparecer na
            // operação final, que conhece o contexto.
            return Ok(None);
        };

        if info.file_type == FileType::Symlink {
            let target = ops.readlink(&tail)?;
            // Alvo relativo resolve contra o diretório do symlink.
            let base = path::parent(&prefix);
            let mut expanded = path::normalize(base, &target);

            // Recola o resto do caminho original.
            for rest in &components[i + 1..] {
                if !expanded.ends_with('/') {
                    expanded.push('/');
                }
                expanded.push_str(rest);
            }
            return Ok(Some(path::normalize("/", &expanded)));
        }
    }

    Ok(None)
}

// ---------------------------------------------------------------------
// Operações de alto nível (caminho absoluto já canonizado pelo caller
// de syscall; aqui só se despacha).
// ---------------------------------------------------------------------

pub fn open(path: &str, flags: OpenFlags) -> SysResult<(&'static dyn VfsOps, NodeInfo)> {
    let (ops, tail) = resolve_mount(path)?;
    let node = ops.open(&tail, flags)?;
    Ok((ops, node))
}

pub fn stat(path: &str) -> SysResult<NodeInfo> {
    let (ops, tail) = resolve_mount(path)?;
    ops.stat(&tail)
}

pub fn unlink(path: &str) -> SysResult<()> {
    let (ops, tail) = resolve_mount(path)?;
    ops.unlink(&tail)
}

pub fn chmod(path: &str, mode: u16) -> SysResult<()> {
    let (ops, tail) = resolve_mount(path)?;
    ops.chmod(&tail, mode)
}

pub fn readlink(path: &str) -> SysResult<String> {
    let (ops, tail) = resolve_mount(path)?;
    ops.readlink(&tail)
}

pub fn symlink(target: &str, path: &str) -> SysResult<()> {
    let (ops, tail) = resolve_mount(path)?;
    ops.symlink(target, &tail)
}

/// Lê um arquivo inteiro para um buffer do kernel (loader ELF, etc).
pub fn read_file(path: &str, max: usize) -> SysResult<Vec<u8>> {
    let canonical = canonicalize("/", path)?;
    let (ops, node) = open(&canonical, OpenFlags::RDONLY)?;

    if node.file_type == FileType::Directory {
        ops.close(&node);
        return Err(Errno::EISDIR);
    }
    let size = node.size as usize;
    if size > max {
        ops.close(&node);
        return Err(Errno::EFBIG);
    }

    let mut buf = alloc::vec![0u8; size];
    let mut done = 0usize;
    while done < size {
        match ops.read(&node, done as u64, &mut buf[done..], OpenFlags::RDONLY) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) => {
                ops.close(&node);
                return Err(e);
            }
        }
    }
    buf.truncate(done);
    ops.close(&node);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixo_mais_longo_vence() {
        let mounts = ["/", "/mnt/a", "/mnt"];
        assert_eq!(best_prefix(mounts.iter().copied(), "/mnt/a/x"), Some("/mnt/a"));
        assert_eq!(best_prefix(mounts.iter().copied(), "/mnt/b/x"), Some("/mnt"));
        assert_eq!(best_prefix(mounts.iter().copied(), "/etc"), Some("/"));
        assert_eq!(best_prefix(mounts.iter().copied(), "/mnt"), Some("/mnt"));
    }

    #[test]
    fn prefixo_exige_fronteira_de_componente() {
        let mounts = ["/", "/mnt"];
        assert_eq!(best_prefix(mounts.iter().copied(), "/mntx"), Some("/"));
    }
}
