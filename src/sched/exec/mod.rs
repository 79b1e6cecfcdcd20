//! Carga de binários de usuário: mapeia segmentos, monta a stack com
//! argv/envp e dispara `spawn_init` e `execve`.

pub mod elf;

use self::elf::{ElfFile, PF_W, PF_X, PT_DYNAMIC, PT_INTERP, PT_LOAD};
use super::scheduler::{self, with_current};
use super::task::Task;
use crate::arch::Cpu;
use crate::interrupts::IrqFrame;
use crate::klib::{align_down, align_up};
use crate::mm::config::{PAGE_SIZE, USER_STACK_PAGES, USER_STACK_TOP};
use crate::mm::valloc::{AddressSpace, AspaceRef, VmFlags};
use crate::syscall::error::{Errno, SysResult};
use crate::sys::Pid;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

/// Limite de leitura de um binário (mesma ordem de grandeza do
/// original: nada de init de meio gigabyte).
const MAX_BINARY_SIZE: usize = 4 * 1024 * 1024;

/// Resultado da carga completa de uma imagem.
pub struct LoadedImage {
    pub entry: usize,
    pub user_esp: usize,
    pub sbrk: usize,
}

/// Mapeia os segmentos PT_LOAD de `elf` no espaço dado.
///
/// Código é read-execute, dados read-write; um segmento gravável E
/// executável é rejeitado. O arquivo preenche `filesz` bytes e o resto
/// até `memsz` fica zerado (flag ZERO do range).
fn load_segments(aspace: &AspaceRef, elf: &ElfFile) -> Result<(usize, Option<String>), Errno> {
    let mut sbrk = 0usize;
    let mut interp = None;

    for i in 0..elf.phnum() {
        let ph = elf.phdr(i).map_err(|_| Errno::ENOEXEC)?;

        match ph.p_type {
            PT_LOAD => {
                if ph.memsz == 0 {
                    continue;
                }
                // Sem W^X não tem conversa: a vmem não representa
                // página gravável e executável ao mesmo tempo.
                if ph.flags & PF_W != 0 && ph.flags & PF_X != 0 {
                    return Err(Errno::ENOEXEC);
                }

                let virt_base = align_down(ph.vaddr, PAGE_SIZE);
                let span = align_up(ph.vaddr + ph.memsz, PAGE_SIZE) - virt_base;
                let pages = span / PAGE_SIZE;

                let mut flags = VmFlags::USER | VmFlags::ZERO | VmFlags::FORK_DUP;
                if ph.flags & PF_W != 0 {
                    flags |= VmFlags::WRITABLE;
                }

                let reserved = aspace
                    .reserve(pages, Some(virt_base), None, flags)
                    .map_err(|_| Errno::ENOMEM)?;

                // Copia o conteúdo do arquivo pela região identity (a
                // proteção read-only vale só para ring 3).
                let file_bytes = elf.segment_data(&ph).map_err(|_| Errno::ENOEXEC)?;
                let phys = reserved.phys.ok_or(Errno::ENOMEM)?;
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        file_bytes.as_ptr(),
                        phys.as_mut_ptr::<u8>().add(ph.vaddr - virt_base),
                        ph.filesz,
                    );
                }

                sbrk = sbrk.max(virt_base + span);
            }
            PT_INTERP => {
                let data = elf.segment_data(&ph).map_err(|_| Errno::ENOEXEC)?;
                let nul = data.iter().position(|&b| b == 0).unwrap_or(data.len());
                let path = core::str::from_utf8(&data[..nul]).map_err(|_| Errno::ENOEXEC)?;
                interp = Some(String::from(path));
            }
            PT_DYNAMIC => {
                if let Some(strtab) = elf.dynamic_strtab(&ph) {
                    crate::kdebug!("elf", "strtab dinâmica em {:#x}", strtab);
                }
            }
            _ => {}
        }
    }

    Ok((sbrk, interp))
}

/// Monta a stack de usuário no layout SysV i386:
///
/// ```text
/// esp -> argc
///        argv[0..n], NULL
///        envp[0..m], NULL
///        ... strings ...
/// ```
fn build_user_stack(aspace: &AspaceRef, argv: &[String], envp: &[String]) -> Result<usize, Errno> {
    // Strings + arrays precisam caber com folga na stack inicial.
    let strings_len: usize = argv.iter().chain(envp.iter()).map(|s| s.len() + 1).sum();
    let arrays_len = (argv.len() + envp.len() + 3) * 4;
    if strings_len + arrays_len > USER_STACK_PAGES * PAGE_SIZE / 2 {
        return Err(Errno::EINVAL);
    }

    let stack_base = USER_STACK_TOP - USER_STACK_PAGES * PAGE_SIZE;
    let reserved = aspace
        .reserve(
            USER_STACK_PAGES,
            Some(stack_base),
            None,
            VmFlags::USER | VmFlags::WRITABLE | VmFlags::ZERO | VmFlags::FORK_DUP,
        )
        .map_err(|_| Errno::ENOMEM)?;
    let phys = reserved.phys.ok_or(Errno::ENOMEM)?;

    // Escreve no frame físico pela identity; `virt` é o endereço que a
    // task vai enxergar.
    let write_bytes = |virt: usize, bytes: &[u8]| unsafe {
        let off = virt - stack_base;
        core::ptr::copy_nonoverlapping(bytes.as_ptr(), phys.as_mut_ptr::<u8>().add(off), bytes.len());
    };

    let mut sp = USER_STACK_TOP;

    // Strings, de trás para frente.
    let mut argv_ptrs = Vec::with_capacity(argv.len());
    for arg in argv {
        sp -= arg.len() + 1;
        write_bytes(sp, arg.as_bytes());
        write_bytes(sp + arg.len(), &[0]);
        argv_ptrs.push(sp as u32);
    }

    let mut envp_ptrs = Vec::with_capacity(envp.len());
    for env in envp {
        sp -= env.len() + 1;
        write_bytes(sp, env.as_bytes());
        write_bytes(sp + env.len(), &[0]);
        envp_ptrs.push(sp as u32);
    }

    sp = align_down(sp, 4);

    // envp[], NULL
    sp -= (envp_ptrs.len() + 1) * 4;
    let envp_base = sp;
    for (i, ptr) in envp_ptrs.iter().enumerate() {
        write_bytes(envp_base + i * 4, &ptr.to_le_bytes());
    }
    write_bytes(envp_base + envp_ptrs.len() * 4, &0u32.to_le_bytes());

    // argv[], NULL
    sp -= (argv_ptrs.len() + 1) * 4;
    let argv_base = sp;
    for (i, ptr) in argv_ptrs.iter().enumerate() {
        write_bytes(argv_base + i * 4, &ptr.to_le_bytes());
    }
    write_bytes(argv_base + argv_ptrs.len() * 4, &0u32.to_le_bytes());

    // argc
    sp -= 4;
    write_bytes(sp, &(argv.len() as u32).to_le_bytes());

    Ok(sp)
}

/// Carrega um binário completo (segmentos + interpretador + stack) em
/// um espaço de endereçamento novo.
pub fn load_user_image(
    aspace: &AspaceRef,
    data: &[u8],
    argv: &[String],
    envp: &[String],
) -> Result<LoadedImage, Errno> {
    let elf = ElfFile::parse(data, false).map_err(|e| {
        crate::kdebug!("elf", "binário rejeitado: {:?}", e);
        Errno::ENOEXEC
    })?;

    let (sbrk, interp) = load_segments(aspace, &elf)?;

    // Interpretador: carregado adicionalmente, dependências dinâmicas
    // não são resolvidas.
    if let Some(interp_path) = interp {
        crate::kinfo!("elf", "interpretador pedido: {}", interp_path);
        let interp_data = crate::fs::vfs::read_file(&interp_path, MAX_BINARY_SIZE)?;
        let interp_elf = ElfFile::parse(&interp_data, true).map_err(|_| Errno::ENOEXEC)?;
        if interp_elf.elf_type() == elf::ET_EXEC {
            load_segments(aspace, &interp_elf)?;
        } else {
            crate::kwarn!("elf", "interpretador ET_DYN sem relocação; ignorado");
        }
    }

    let user_esp = build_user_stack(aspace, argv, envp)?;

    Ok(LoadedImage {
        entry: elf.entry(),
        user_esp,
        sbrk,
    })
}

/// Cria a primeira task de usuário a partir de um caminho no VFS.
pub fn spawn_init(path: &str) -> SysResult<Pid> {
    let data = crate::fs::vfs::read_file(path, MAX_BINARY_SIZE)?;

    let aspace = AddressSpace::new_user().map_err(|_| Errno::ENOMEM)?;
    let argv = [String::from(path)];
    let image = match load_user_image(&aspace, &data, &argv, &[]) {
        Ok(img) => img,
        Err(e) => {
            aspace.release_all();
            return Err(e);
        }
    };

    let mut task = Box::new(Task::new("init", 0, aspace.clone()).ok_or_else(|| {
        aspace.release_all();
        Errno::ENOMEM
    })?);
    task.fds = crate::fs::fd::FdTable::with_stdio();
    task.sbrk = image.sbrk;
    task.build_user_frame(image.entry, image.user_esp);

    let pid = scheduler::add_task(task);
    crate::kinfo!("exec", "init carregado de {} (pid {})", path, pid);
    Ok(pid)
}

/// execve: troca a imagem da task atual. Em qualquer falha antes do
/// ponto de não-retorno, o chamador continua intacto.
pub fn execve(
    frame: &mut IrqFrame,
    path: &str,
    argv: Vec<String>,
    envp: Vec<String>,
) -> SysResult<usize> {
    let data = crate::fs::vfs::read_file(path, MAX_BINARY_SIZE)?;

    let new_aspace = AddressSpace::new_user().map_err(|_| Errno::ENOMEM)?;
    let image = match load_user_image(&new_aspace, &data, &argv, &envp) {
        Ok(img) => img,
        Err(e) => {
            new_aspace.release_all();
            return Err(e);
        }
    };

    // Ponto de não-retorno: troca o espaço da task.
    let old_aspace = with_current(|task| {
        let old = core::mem::replace(&mut task.aspace, new_aspace.clone());
        task.cr3 = new_aspace.dir_phys().as_usize();
        task.entry = image.entry;
        task.sbrk = image.sbrk;
        task.name = String::from(path.rsplit('/').next().unwrap_or(path));
        old
    })
    .ok_or(Errno::ESRCH)?;

    // SAFETY: o diretório novo compartilha os mapeamentos do kernel;
    // estamos em kernel stack, que continua visível.
    unsafe { Cpu::write_cr3(new_aspace.dir_phys().as_usize()) };
    old_aspace.release_all();

    // Reescreve o frame da syscall: o iret cai direto na imagem nova.
    frame.eip = image.entry as u32;
    frame.useresp = image.user_esp as u32;
    frame.eflags = 0x202;
    frame.eax = 0;

    crate::kdebug!("exec", "execve: {} (entry {:#x})", path, image.entry);
    Ok(0)
}
