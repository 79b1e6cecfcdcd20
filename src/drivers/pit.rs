//! PIT 8253/8254 (canal 0): heartbeat do scheduler e fonte de uptime.

use crate::arch::platform::ports::Port;
use crate::interrupts::IrqFrame;
use core::sync::atomic::{AtomicU32, Ordering};

const PIT_CH0_DATA: u16 = 0x40;
const PIT_CMD: u16 = 0x43;
const PIT_BASE_HZ: u32 = 1_193_182;

/// Frequência do tick. 250 Hz = 4 ms por tick.
pub const TICK_HZ: u32 = 250;

static TICKS: AtomicU32 = AtomicU32::new(0);

/// Ticks desde o boot.
pub fn ticks() -> u32 {
    TICKS.load(Ordering::Relaxed)
}

/// Milissegundos desde o boot (resolução de um tick).
pub fn uptime_ms() -> u32 {
    // 32 bits a 250 Hz estouram em ~198 dias; aceitável.
    ticks().wrapping_mul(1000 / TICK_HZ)
}

/// Converte milissegundos em ticks, arredondando para cima.
pub fn ms_to_ticks(ms: u32) -> u32 {
    (ms * TICK_HZ + 999) / 1000
}

/// Programa o canal 0 em modo rate generator e registra o handler da
/// IRQ0, que conta o tick e chama o scheduler.
pub fn init() {
    let divisor = PIT_BASE_HZ / TICK_HZ;

    let mut cmd: Port<u8> = Port::new(PIT_CMD);
    let mut data: Port<u8> = Port::new(PIT_CH0_DATA);

    unsafe {
        // Canal 0, lobyte/hibyte, modo 3 (square wave)
        cmd.write(0x36);
        data.write((divisor & 0xFF) as u8);
        data.write((divisor >> 8) as u8);
    }

    crate::interrupts::register(crate::drivers::pic::IRQ_BASE as usize, tick_handler, 0);
    crate::drivers::pic::unmask(0);

    crate::kinfo!("pit", "canal 0 a {} Hz (divisor {})", TICK_HZ, divisor);
}

/// Handler da IRQ0. Retorna o ESP da próxima task quando o scheduler
/// decide trocar.
fn tick_handler(frame: &mut IrqFrame, _data: usize) -> Option<usize> {
    TICKS.fetch_add(1, Ordering::Relaxed);
    crate::sched::scheduler::on_tick(frame)
}
