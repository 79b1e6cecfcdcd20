//! Fila de prontas do round-robin.

use crate::sys::Pid;
use alloc::collections::VecDeque;

pub struct RunQueue {
    queue: VecDeque<Pid>,
}

impl RunQueue {
    pub const fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    pub fn push(&mut self, pid: Pid) {
        self.queue.push_back(pid);
    }

    pub fn pop(&mut self) -> Option<Pid> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Remove um PID da fila (usado quando uma task morre fora do CPU).
    pub fn remove(&mut self, pid: Pid) {
        self.queue.retain(|&p| p != pid);
    }
}
