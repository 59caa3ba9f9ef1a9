//! Process registry
//!
//! Each supervision level keeps the pids it spawned itself, in spawn order.
//! The registry is owned by exactly one level and is never handed to another.

use std::fmt;

/// Which tier a recorded process belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The mid-tier process owned by the master
    Parent,
    /// A leaf process, `index` in `[0, workers)`
    Worker { index: usize },
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Parent => write!(f, "parent"),
            Role::Worker { index } => write!(f, "worker[{}]", index),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessRecord {
    pub pid: u32,
    pub role: Role,
}

impl ProcessRecord {
    pub fn parent(pid: u32) -> Self {
        Self {
            pid,
            role: Role::Parent,
        }
    }

    pub fn worker(pid: u32, index: usize) -> Self {
        Self {
            pid,
            role: Role::Worker { index },
        }
    }
}

#[derive(Debug, Default)]
pub struct ProcessRegistry {
    records: Vec<ProcessRecord>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a freshly spawned process
    pub fn record_spawn(&mut self, record: ProcessRecord) {
        self.records.push(record);
    }

    /// Drop every record whose pid `is_alive` reports gone
    ///
    /// Returns the removed records in registry order.
    pub fn sweep_dead<F>(&mut self, is_alive: F) -> Vec<ProcessRecord>
    where
        F: Fn(u32) -> bool,
    {
        let mut dead = Vec::new();
        self.records.retain(|record| {
            if is_alive(record.pid) {
                true
            } else {
                dead.push(*record);
                false
            }
        });
        dead
    }

    /// Empty the registry, handing back what it held
    pub fn drain(&mut self) -> Vec<ProcessRecord> {
        std::mem::take(&mut self.records)
    }

    pub fn pids(&self) -> Vec<u32> {
        self.records.iter().map(|r| r.pid).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
