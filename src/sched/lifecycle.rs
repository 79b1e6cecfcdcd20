//! Ciclo de vida: fork, exit, wait e morte involuntária.

use super::scheduler::{self, with_current, TASKS};
use super::task::{Task, TaskState, WaitChannel};
use crate::interrupts::IrqFrame;
use crate::syscall::error::{Errno, SysResult};
use crate::sys::{Pid, INIT_PID};
use alloc::boxed::Box;

/// Fork clássico: duplica espaço de endereçamento (cópia eager),
/// kernel stack e descritores. O pai recebe o PID do filho; o filho,
/// 0 (forçado no frame clonado).
pub fn fork(frame: &mut IrqFrame) -> SysResult<usize> {
    let parent_frame_esp = frame as *mut IrqFrame as usize;

    // Snapshot dos campos do pai.
    let (parent_aspace, name, cwd, fds, sbrk, entry, uid, gid, ppid) = with_current(|t| {
        (
            t.aspace.clone(),
            t.name.clone(),
            t.cwd.clone(),
            t.fds.clone(),
            t.sbrk,
            t.entry,
            t.uid,
            t.gid,
            t.pid,
        )
    })
    .ok_or(Errno::ESRCH)?;

    // Duplicação eager do espaço de endereçamento. Sem COW: os ranges
    // FORK_DUP são copiados frame a frame agora.
    let child_aspace = parent_aspace.fork().map_err(|_| Errno::ENOMEM)?;

    let mut child = Box::new(Task::new(&name, ppid, child_aspace.clone()).ok_or_else(|| {
        child_aspace.release_all();
        Errno::ENOMEM
    })?);

    child.cwd = cwd;
    child.fds = fds;
    child.sbrk = sbrk;
    child.entry = entry;
    child.uid = uid;
    child.gid = gid;

    // Clona a kernel stack do pai: o filho acorda exatamente no mesmo
    // ponto do fork, com eax = 0.
    with_current(|parent| {
        child.clone_kernel_stack_from(parent, parent_frame_esp);
    })
    .ok_or(Errno::ESRCH)?;

    let child_pid = scheduler::add_task(child);
    crate::kdebug!("sched", "fork: {} -> {}", ppid, child_pid);
    Ok(child_pid as usize)
}

/// Marca a task atual como terminada e entrega o CPU. Nunca retorna ao
/// chamador original; o ESP devolvido é de outra task (ou do idle).
fn terminate(frame_esp: usize, status: i32, reason: Option<&'static str>) -> usize {
    let pid = match scheduler::current_pid() {
        Some(p) => p,
        // Sem task atual não há o que terminar; segue no frame.
        None => return frame_esp,
    };

    let parent = {
        let mut table = TASKS.lock();

        if let Some(task) = table.tasks.get_mut(&pid) {
            task.state = TaskState::Terminated;
            task.exit_status = Some(status);
            task.term_reason = reason;
            task.wait_channel = None;
        }
        table.queue.remove(pid);

        // Órfãos são re-adotados pelo init.
        let mut parent = INIT_PID;
        for (_, t) in table.tasks.iter_mut() {
            if t.ppid == pid {
                t.ppid = INIT_PID;
            }
        }
        if let Some(task) = table.tasks.get(&pid) {
            parent = task.ppid;
        }
        parent
    };

    // Acorda o pai se ele está em wait().
    wake_if_waiting_child(parent);

    // A task morreu dentro de um despacho que pode estar aninhado
    // (page fault no meio de um syscall). Os níveis extras nunca vão
    // retornar; deixa exatamente o decremento do despacho corrente.
    crate::interrupts::restore_guard(1);

    scheduler::schedule(frame_esp)
}

fn wake_if_waiting_child(parent: Pid) {
    let mut table = TASKS.lock();
    if let Some(task) = table.tasks.get_mut(&parent) {
        if task.state == TaskState::Waiting
            && task.wait_channel == Some(WaitChannel::ChildExit)
        {
            task.wait_channel = None;
            task.state = TaskState::Runnable;
            table.queue.push(parent);
        }
    }
}

/// exit(code) voluntário.
pub fn exit_current(frame: &mut IrqFrame, status: i32) -> usize {
    let esp = frame as *mut IrqFrame as usize;
    crate::kdebug!(
        "sched",
        "exit: pid {} status {}",
        scheduler::current_pid().unwrap_or(0),
        status
    );
    terminate(esp, status, None)
}

/// Morte involuntária (page fault, instrução ilegal). Status no molde
/// 128+SIGSEGV para o wait do pai.
pub fn kill_current(frame: &mut IrqFrame, reason: &'static str) -> Option<usize> {
    let esp = frame as *mut IrqFrame as usize;
    Some(terminate(esp, 139, Some(reason)))
}

/// wait(): bloqueia até um filho terminar, colhe o status e libera os
/// recursos dele. Retorna o PID colhido.
pub fn wait_for_child() -> SysResult<(Pid, i32)> {
    let pid = scheduler::current_pid().ok_or(Errno::ESRCH)?;

    loop {
        // Procura um zumbi; sem filhos nenhum, falha com ECHILD.
        let mut has_children = false;
        let zombie = {
            let table = TASKS.lock();
            let mut found = None;
            for (child_pid, t) in table.tasks.iter() {
                if t.ppid == pid {
                    has_children = true;
                    if t.state == TaskState::Terminated {
                        found = Some(*child_pid);
                        break;
                    }
                }
            }
            found
        };

        match zombie {
            Some(child_pid) => {
                // Reap: tira da tabela e libera tudo fora do lock.
                let child = {
                    let mut table = TASKS.lock();
                    table.queue.remove(child_pid);
                    table.tasks.remove(&child_pid)
                };

                let Some(mut child) = child else { continue };
                let status = child.exit_status.unwrap_or(0);
                if let Some(reason) = child.term_reason {
                    crate::kinfo!(
                        "sched",
                        "reap: pid {} morto por {} (status {})",
                        child_pid,
                        reason,
                        status
                    );
                }

                child.fds.close_all();
                child.aspace.release_all();
                child.release_kernel_stack();

                return Ok((child_pid, status));
            }
            None if !has_children => return Err(Errno::ECHILD),
            None => scheduler::park(WaitChannel::ChildExit),
        }
    }
}
