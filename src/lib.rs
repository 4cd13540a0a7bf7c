//! Пул запросов фиксированного размера (fan-out/fan-in) поверх tokio
//!
//! # Features
//! - Известное число запросов на фиксированном наборе воркеров
//! - Единственный агрегатор владеет историей ответов
//! - Одноразовый сигнал завершения после всех ожидаемых ответов
//! - Кооперативная отмена через родительский `CancellationToken`
//! - Паника обработчика не выходит за пределы воркера
//! - Снимки метрик и периодический мониторинг

mod aggregator;
pub mod errors;
pub mod handle;
pub mod logging;
pub mod model;
pub mod pool;
mod queue;
pub mod result;
mod worker;

pub use errors::PoolError;
pub use handle::Completion;
pub use model::{PoolMetrics, PoolReport, PoolState, Request, Response, WorkerState};
pub use pool::{Config, RequestPool, Submitter};
