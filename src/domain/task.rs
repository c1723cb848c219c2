use serde_json::Value;
use stowage_common::{Result, Task};

use super::{TaskExecutor, TaskHandle};

impl TaskHandle for Task {
    fn task(&self) -> &Task {
        self
    }

    fn run(&mut self, executor: &dyn TaskExecutor) -> Result<()> {
        executor.begin_processing(self.task_id)
    }

    fn begin_processing(&mut self) -> Result<()> {
        Task::begin_processing(self)
    }

    fn succeed(&mut self, result: Value) -> Result<()> {
        Task::succeed(self, result)
    }

    fn fail(&mut self, message: &str) -> Result<()> {
        Task::fail(self, message)
    }
}
