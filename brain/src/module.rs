//! Scoped module lifecycle.
//!
//! Acquiring a module registers its driver callback and spawns its
//! background task; dropping the guard cancels the task and deregisters the
//! callback. Modules therefore cannot outlive the run that started them.

use tokio::task::JoinHandle;
use tracing::debug;

use crate::driver::WatchGuard;

pub struct ModuleGuard {
    name: &'static str,
    tasks: Vec<JoinHandle<()>>,
    watches: Vec<WatchGuard>,
}

impl ModuleGuard {
    pub fn new(name: &'static str) -> Self {
        Self { name, tasks: Vec::new(), watches: Vec::new() }
    }

    pub fn add_task(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    pub fn add_watch(&mut self, watch: WatchGuard) {
        self.watches.push(watch);
    }
}

impl Drop for ModuleGuard {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        self.watches.clear();
        debug!("[{}] released", self.name);
    }
}
