//! Estados de uma task.
//!
//! Invariante do scheduler: no CPU único, no máximo uma task está em
//! `Running`; `{Running} ∪ fila ∪ Waiting ∪ Terminated` particiona os
//! PIDs vivos.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Criada, ainda sem frame inicial.
    New,
    /// Executando agora.
    Running,
    /// Pronta, na fila do round-robin.
    Runnable,
    /// Parada em um canal de espera.
    Waiting,
    /// Suspensa por controle externo (não re-escalonada).
    Stopped,
    /// Morta; zumbi até o pai colher com wait.
    Terminated,
}
