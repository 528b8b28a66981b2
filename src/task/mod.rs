//! Asynchronous execution subsystem: task records, the bounded queue,
//! the worker pool, and the manager facade.

pub mod manager;
pub mod model;
pub mod queue;
pub mod worker;

pub use manager::TaskManager;
pub use model::{
    LogLevel, Operation, OperationLogEntry, TaskFilter, TaskRecord, TaskStatus,
};
pub use queue::TaskQueue;
pub use worker::{WorkerContext, WorkerPool};
