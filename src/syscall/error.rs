//! # Taxonomia de erros de syscall
//!
//! Um único enum `Errno`, alinhado ao POSIX, cobre toda a superfície de
//! syscalls. A convenção de transporte: retorno >= 0 é sucesso; falha
//! devolve -1 em EAX com o código gravado na célula `errno` da task.

/// Errno POSIX.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Errno {
    /// Operação não permitida
    EPERM = 1,
    /// Arquivo ou diretório inexistente
    ENOENT = 2,
    /// Processo inexistente
    ESRCH = 3,
    /// Espera interrompida (cancelamento de sleep)
    EINTR = 4,
    /// Erro de I/O
    EIO = 5,
    /// execve em algo que não é executável
    ENOEXEC = 8,
    /// Descritor inválido
    EBADF = 9,
    /// Sem filhos para esperar
    ECHILD = 10,
    /// Operação bloquearia (modo non-blocking)
    EAGAIN = 11,
    /// Sem memória
    ENOMEM = 12,
    /// Ponteiro de usuário inválido
    EFAULT = 14,
    /// Dispositivo inexistente
    ENODEV = 19,
    /// Não é diretório
    ENOTDIR = 20,
    /// É diretório
    EISDIR = 21,
    /// Argumento inválido
    EINVAL = 22,
    /// Tabela de descritores cheia
    EMFILE = 24,
    /// Arquivo grande demais (ou pipe cheio)
    EFBIG = 27,
    /// Seek em pipe
    ESPIPE = 29,
    /// Syscall não implementada
    ENOSYS = 38,
    /// Loop de symlinks
    ELOOP = 40,
}

impl Errno {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Resultado de syscall: Ok(valor) ou Err(Errno).
pub type SysResult<T> = Result<T, Errno>;
