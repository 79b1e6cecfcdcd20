//! Scheduler round-robin preemptivo, dirigido pelo tick do PIT.
//!
//! A troca de contexto acontece devolvendo outro ESP ao stub de
//! interrupção: cada task tem sua kernel stack com um `IrqFrame` salvo
//! no topo, e "trocar de task" é restaurar o frame de outra stack
//! (mais CR3 e esp0 da TSS). O contexto de boot vira a task idle:
//! quando não há ninguém pronto, voltamos para o frame dele.

use super::runqueue::RunQueue;
use super::task::{Task, TaskState, WaitChannel};
use crate::arch::platform::gdt;
use crate::arch::Cpu;
use crate::interrupts::IrqFrame;
use crate::mm::valloc::AspaceRef;
use crate::sync::Spinlock;
use crate::sys::Pid;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

pub struct TaskTable {
    pub tasks: BTreeMap<Pid, Box<Task>>,
    pub queue: RunQueue,
}

pub static TASKS: Spinlock<TaskTable> = Spinlock::new(TaskTable {
    tasks: BTreeMap::new(),
    queue: RunQueue::new(),
});

/// PID da task em `Running`. 0 = contexto idle (boot).
static CURRENT: AtomicU32 = AtomicU32::new(0);

/// ESP salvo do contexto idle quando uma task está no CPU.
static IDLE_ESP: AtomicUsize = AtomicUsize::new(0);

pub fn init() {
    crate::kinfo!("sched", "scheduler round-robin pronto (quantum = 1 tick)");
}

/// PID da task atual (None no contexto idle/boot).
pub fn current_pid() -> Option<Pid> {
    match CURRENT.load(Ordering::Relaxed) {
        0 => None,
        pid => Some(pid),
    }
}

/// Espaço de endereçamento da task atual.
pub fn current_aspace() -> Option<AspaceRef> {
    let pid = current_pid()?;
    let table = TASKS.lock();
    table.tasks.get(&pid).map(|t| t.aspace.clone())
}

/// Executa `f` com acesso exclusivo à task atual.
pub fn with_current<R>(f: impl FnOnce(&mut Task) -> R) -> Option<R> {
    let pid = current_pid()?;
    let mut table = TASKS.lock();
    table.tasks.get_mut(&pid).map(|t| f(t))
}

/// Executa `f` com acesso exclusivo a uma task qualquer.
pub fn with_task<R>(pid: Pid, f: impl FnOnce(&mut Task) -> R) -> Option<R> {
    let mut table = TASKS.lock();
    table.tasks.get_mut(&pid).map(|t| f(t))
}

/// Insere uma task pronta na tabela e na fila.
pub fn add_task(mut task: Box<Task>) -> Pid {
    let pid = task.pid;
    task.state = TaskState::Runnable;

    let mut table = TASKS.lock();
    table.tasks.insert(pid, task);
    table.queue.push(pid);
    pid
}

/// Tick do PIT: acorda dorminhocos vencidos e roda o round-robin.
/// Retorna `Some(novo_esp)` quando troca de task.
pub fn on_tick(frame: &mut IrqFrame) -> Option<usize> {
    wake_sleepers(crate::drivers::pit::ticks());
    let cur_esp = frame as *mut IrqFrame as usize;
    Some(schedule(cur_esp))
}

/// Acorda tasks `SleepUntil` cujo deadline passou.
fn wake_sleepers(now: u32) {
    let mut table = TASKS.lock();
    let mut to_wake = alloc::vec::Vec::new();

    for (pid, task) in table.tasks.iter() {
        if task.state == TaskState::Waiting {
            if let Some(WaitChannel::SleepUntil(deadline)) = task.wait_channel {
                // wrapping: compara pela diferença com sinal.
                if (now.wrapping_sub(deadline) as i32) >= 0 {
                    to_wake.push(*pid);
                }
            }
        }
    }

    for pid in to_wake {
        if let Some(task) = table.tasks.get_mut(&pid) {
            task.wait_channel = None;
            task.state = TaskState::Runnable;
        }
        table.queue.push(pid);
    }
}

/// Acorda uma task parada em um canal (exit do filho, cancelamento).
pub fn wake(pid: Pid) {
    let mut table = TASKS.lock();
    if let Some(task) = table.tasks.get_mut(&pid) {
        if task.state == TaskState::Waiting {
            task.wait_channel = None;
            task.state = TaskState::Runnable;
            table.queue.push(pid);
        }
    }
}

/// Round-robin: salva o contexto de quem estava no CPU e escolhe o
/// próximo `Runnable`. Retorna o ESP a restaurar.
pub fn schedule(cur_esp: usize) -> usize {
    let mut table = TASKS.lock();

    // 1. Salvar o contexto corrente.
    let cur = CURRENT.load(Ordering::Relaxed);
    if cur != 0 {
        if let Some(task) = table.tasks.get_mut(&cur) {
            task.saved_esp = cur_esp;
            if task.state == TaskState::Running {
                task.state = TaskState::Runnable;
                table.queue.push(cur);
            }
        }
    } else {
        IDLE_ESP.store(cur_esp, Ordering::Relaxed);
    }

    // 2. Escolher a próxima (descartando PIDs velhos da fila).
    let next = loop {
        match table.queue.pop() {
            Some(pid) => {
                if table
                    .tasks
                    .get(&pid)
                    .map(|t| t.state == TaskState::Runnable)
                    .unwrap_or(false)
                {
                    break Some(pid);
                }
            }
            None => break None,
        }
    };

    // 3. Restaurar.
    match next {
        Some(pid) => {
            let task = table.tasks.get_mut(&pid).expect("task sumiu da tabela");
            task.state = TaskState::Running;
            let esp = task.saved_esp;
            let cr3 = task.cr3;
            let kstack_top = task.kstack_top;
            CURRENT.store(pid, Ordering::Relaxed);
            drop(table);

            gdt::set_kernel_stack(kstack_top);
            if Cpu::read_cr3() != cr3 {
                // SAFETY: cr3 aponta para o diretório da task, que
                // compartilha os mapeamentos do kernel.
                unsafe { Cpu::write_cr3(cr3) };
            }
            esp
        }
        None => {
            CURRENT.store(0, Ordering::Relaxed);
            drop(table);
            let idle = IDLE_ESP.load(Ordering::Relaxed);
            if idle != 0 {
                // Idle roda no diretório do kernel.
                let kdir = crate::mm::paging::PageDirectory::kernel();
                kdir.switch_to();
                idle
            } else {
                // Ainda não existe frame idle salvo: segue no atual.
                cur_esp
            }
        }
    }
}

/// Ponto de escape dos loops de espera bloqueante (halt-and-wait).
///
/// Libera o guard de despacho, habilita interrupções e dorme até a
/// próxima (tipicamente o tick, que pode trocar de task). Retorna com
/// interrupções desabilitadas e o guard restaurado.
pub fn relax() {
    let depth = crate::interrupts::leave_guard();
    Cpu::enable_interrupts();
    Cpu::halt();
    Cpu::disable_interrupts();
    crate::interrupts::restore_guard(depth);
}

/// Espera em loop enquanto a condição valer. Só pode ser chamado de
/// contexto de task (syscall), nunca de handler de IRQ.
pub fn wait_while(mut cond: impl FnMut() -> bool) {
    while cond() {
        relax();
    }
}

/// Parqueia a task atual no canal dado até alguém chamar `wake`.
pub fn park(channel: WaitChannel) {
    let ok = with_current(|t| {
        t.state = TaskState::Waiting;
        t.wait_channel = Some(channel);
    })
    .is_some();
    if !ok {
        return;
    }

    wait_while(|| with_current(|t| t.wait_channel.is_some()).unwrap_or(false));
}

/// Dorme até o tick dado. Retorna `false` se a espera foi cancelada
/// por um `wake` antes do deadline.
pub fn sleep_until(deadline: u32) -> bool {
    park(WaitChannel::SleepUntil(deadline));
    (crate::drivers::pit::ticks().wrapping_sub(deadline) as i32) >= 0
}
