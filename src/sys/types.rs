//! Tipos básicos de identificação.

/// Identificador de processo. O init é sempre o PID 1; 0 é reservado
/// para a task idle do boot.
pub type Pid = u32;

pub type Uid = u16;
pub type Gid = u16;

/// PID da task init, destino de órfãos no reparenting.
pub const INIT_PID: Pid = 1;
