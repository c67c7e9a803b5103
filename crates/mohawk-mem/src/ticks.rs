//! Driving deferred flushes with a single-threaded executor.
use std::rc::Rc;

use async_executor::LocalExecutor;
use mohawk::runtime::TickDriver;

/// A [`TickDriver`] that spawns each flush tick onto a [`LocalExecutor`].
///
/// This is the deferred, microtask-like mode: mutations return immediately
/// and the flush runs when the executor is next driven - by
/// [`ExecutorTicks::turn`], or by whatever async loop the application
/// already runs the executor in.
///
/// ```
/// use std::rc::Rc;
/// use mohawk::prelude::*;
/// use mohawk_mem::ExecutorTicks;
///
/// let rt = Runtime::new();
/// let ticks = Rc::new(ExecutorTicks::new());
/// rt.set_tick_driver(ticks.clone());
///
/// let state = rt.observe(Plain::map(vec![("n", Plain::from(1i64))]));
/// let map = state.as_map().unwrap().clone();
/// map.set("n", 2i64);
/// ticks.turn();
/// ```
#[derive(Default)]
pub struct ExecutorTicks {
    executor: Rc<LocalExecutor<'static>>,
}

impl ExecutorTicks {
    pub fn new() -> Self {
        ExecutorTicks::default()
    }

    /// The underlying executor, for embedding into an existing async loop.
    pub fn executor(&self) -> &Rc<LocalExecutor<'static>> {
        &self.executor
    }

    /// Drive the executor until it has nothing left to do. Returns how many
    /// tasks ran.
    pub fn turn(&self) -> usize {
        let mut count = 0;
        while self.executor.try_tick() {
            count += 1;
        }
        count
    }

    /// Block on `fut`, driving queued ticks while it is pending.
    pub fn run_while<T>(&self, fut: impl std::future::Future<Output = T>) -> T {
        futures_lite::future::block_on(self.executor.run(fut))
    }
}

impl TickDriver for ExecutorTicks {
    fn schedule(&self, tick: Box<dyn FnOnce()>) {
        self.executor.spawn(async move { tick() }).detach();
    }
}

#[cfg(test)]
mod test {
    use std::{cell::Cell, rc::Rc};

    use mohawk::prelude::*;

    use super::ExecutorTicks;

    #[test]
    fn flushes_run_on_the_executor() {
        let rt = Runtime::new();
        let ticks = Rc::new(ExecutorTicks::new());
        rt.set_tick_driver(ticks.clone());

        let state = rt.observe(Plain::map(vec![("n", Plain::from(0i64))]));
        let map = state.as_map().unwrap().clone();

        let runs = Rc::new(Cell::new(0u32));
        let _w = rt.watch(
            "n",
            {
                let map = map.clone();
                let runs = runs.clone();
                move || {
                    runs.set(runs.get() + 1);
                    Ok(map.get("n").unwrap_or(Value::Null))
                }
            },
            |_, _| {},
            Default::default(),
        );

        map.set("n", 1i64);
        map.set("n", 2i64);
        assert_eq!(runs.get(), 1, "nothing flushed before the executor turns");

        // The marker task was spawned after the flush tick, so running until
        // the marker completes runs the flush first.
        let marker = ticks.executor().spawn(async {});
        ticks.run_while(marker);
        // Two writes, one coalesced flush.
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn turn_drains_pending_ticks() {
        let rt = Runtime::new();
        let ticks = Rc::new(ExecutorTicks::new());
        rt.set_tick_driver(ticks.clone());

        let state = rt.observe(Plain::map(vec![("n", Plain::from(0i64))]));
        let map = state.as_map().unwrap().clone();
        let runs = Rc::new(Cell::new(0u32));
        let _w = rt.watch(
            "n",
            {
                let map = map.clone();
                let runs = runs.clone();
                move || {
                    runs.set(runs.get() + 1);
                    Ok(map.get("n").unwrap_or(Value::Null))
                }
            },
            |_, _| {},
            Default::default(),
        );

        map.set("n", 1i64);
        assert!(ticks.turn() >= 1);
        assert_eq!(runs.get(), 2);
    }
}
