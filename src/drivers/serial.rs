//! Driver de porta serial (COM1).
//!
//! Usado como saída primária de logs para debug (host/QEMU) e como
//! backend do console `/dev/tty`.

use crate::arch::platform::ports::Port;
use core::fmt;
use spin::Mutex;

const COM1_PORT: u16 = 0x3F8;

/// Driver serial protegido por Mutex global.
pub static SERIAL1: Mutex<SerialPort> = Mutex::new(unsafe { SerialPort::new(COM1_PORT) });

/// Buffer de entrada do console, alimentado pelo driver de teclado
/// externo via `push_input`. Leituras de `/dev/tty` drenam daqui.
pub static INPUT: Mutex<InputBuffer> = Mutex::new(InputBuffer::new());

/// Estrutura do driver serial (sem lock interno).
pub struct SerialPort {
    data: Port<u8>,
    int_en: Port<u8>,
    fifo_ctrl: Port<u8>,
    line_ctrl: Port<u8>,
    modem_ctrl: Port<u8>,
    line_sts: Port<u8>,
}

impl SerialPort {
    /// Cria uma nova instância da porta serial.
    ///
    /// # Safety
    /// Caller deve garantir que o endereço base é válido.
    pub const unsafe fn new(base: u16) -> Self {
        Self {
            data: Port::new(base),
            int_en: Port::new(base + 1),
            fifo_ctrl: Port::new(base + 2),
            line_ctrl: Port::new(base + 3),
            modem_ctrl: Port::new(base + 4),
            line_sts: Port::new(base + 5),
        }
    }

    /// Inicializa a UART 16550.
    pub fn init(&mut self) {
        unsafe {
            self.int_en.write(0x00); // Disable interrupts
            self.line_ctrl.write(0x80); // Enable DLAB (set baud rate divisor)
            self.data.write(0x03); // Set divisor to 3 (lo byte) 38400 baud
            self.int_en.write(0x00); //                  (hi byte)
            self.line_ctrl.write(0x03); // 8 bits, no parity, one stop bit
            self.fifo_ctrl.write(0xC7); // Enable FIFO, clear, 14-byte threshold
            self.modem_ctrl.write(0x0B); // IRQs enabled, RTS/DSR set
        }
    }

    /// Envia um byte pela serial.
    pub fn send(&mut self, data: u8) {
        unsafe {
            // Espera o buffer de transmissão esvaziar (bit 5 do Line Status)
            while (self.line_sts.read() & 0x20) == 0 {}
            self.data.write(data);
        }
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.send(byte);
        }
        Ok(())
    }
}

/// Inicializa a COM1. Primeira coisa que o boot faz: sem isso não há
/// logs de nada.
pub fn init() {
    SERIAL1.lock().init();
}

/// Writer cru para uso em panic, sem passar pelo lock global.
///
/// # Safety
/// Só chamar com interrupções mascaradas e em caminho de morte (panic):
/// escreve na UART por baixo de quem tiver o lock.
pub unsafe fn raw_writer() -> SerialPort {
    SerialPort::new(COM1_PORT)
}

/// Buffer circular simples para entrada de console.
pub struct InputBuffer {
    buf: [u8; 256],
    head: usize,
    tail: usize,
}

impl InputBuffer {
    pub const fn new() -> Self {
        Self {
            buf: [0; 256],
            head: 0,
            tail: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn push(&mut self, byte: u8) {
        let next = (self.head + 1) % self.buf.len();
        if next != self.tail {
            self.buf[self.head] = byte;
            self.head = next;
        }
        // Buffer cheio: byte descartado.
    }

    pub fn pop(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let byte = self.buf[self.tail];
        self.tail = (self.tail + 1) % self.buf.len();
        Some(byte)
    }
}

/// Entrada de console vinda do driver externo (teclado/serial RX).
pub fn push_input(byte: u8) {
    INPUT.lock().push(byte);
}
