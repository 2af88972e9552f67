//! Generic task loop hosted on a dedicated thread.
//!
//! The player starts one of these as the engine's default context: the engine may post
//! internal scheduling work (listener callbacks, timers) onto it through a [`ContextHandle`].

use std::thread::JoinHandle;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender};

/// Unit of work executed on a loop thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

enum LoopMessage {
    Run(Task),
    Quit,
}

/// Cloneable sender side of a [`LoopThread`].
#[derive(Clone)]
pub struct ContextHandle {
    name: String,
    tx: Sender<LoopMessage>,
}

impl ContextHandle {
    /// Queue a task on the loop. Returns false once the loop has stopped.
    pub fn invoke<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(LoopMessage::Run(Box::new(task))).is_ok()
    }

    /// Ask the loop to stop after the tasks already queued ahead of this request.
    pub fn quit(&self) {
        let _ = self.tx.send(LoopMessage::Quit);
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextHandle")
            .field("name", &self.name)
            .finish()
    }
}

/// Task loop running on its own named thread.
pub struct LoopThread {
    handle: ContextHandle,
    join: Option<JoinHandle<()>>,
}

impl LoopThread {
    /// Spawn the loop and wait until it is running.
    pub fn spawn(name: &str) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<()>(1);
        let thread_name = name.to_string();
        let join = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || run_loop(thread_name, rx, ready_tx))
            .with_context(|| format!("spawn {name} loop thread"))?;
        ready_rx
            .recv()
            .map_err(|_| anyhow!("{name} loop exited before start"))?;
        Ok(Self {
            handle: ContextHandle {
                name: name.to_string(),
                tx,
            },
            join: Some(join),
        })
    }

    pub fn handle(&self) -> ContextHandle {
        self.handle.clone()
    }

    /// Stop the loop and wait for its thread. Idempotent.
    pub fn quit_and_join(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };
        self.handle.quit();
        if join.join().is_err() {
            tracing::error!(name = %self.handle.name, "loop thread panicked");
        }
    }
}

impl Drop for LoopThread {
    fn drop(&mut self) {
        self.quit_and_join();
    }
}

fn run_loop(name: String, rx: Receiver<LoopMessage>, ready: Sender<()>) {
    tracing::info!(name = %name, "loop started");
    let _ = ready.send(());
    while let Ok(msg) = rx.recv() {
        match msg {
            LoopMessage::Run(task) => task(),
            LoopMessage::Quit => break,
        }
    }
    tracing::info!(name = %name, "loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn tasks_run_on_the_loop_thread_in_order() {
        let mut lp = LoopThread::spawn("test-loop").unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        for i in 0..3 {
            let tx = tx.clone();
            assert!(lp.handle().invoke(move || {
                let name = std::thread::current().name().map(str::to_string);
                tx.send((i, name)).unwrap();
            }));
        }
        for i in 0..3 {
            let (got, name) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            assert_eq!(got, i);
            assert_eq!(name.as_deref(), Some("test-loop"));
        }
        lp.quit_and_join();
    }

    #[test]
    fn invoke_fails_after_join() {
        let mut lp = LoopThread::spawn("test-quit").unwrap();
        let handle = lp.handle();
        lp.quit_and_join();
        assert!(!handle.invoke(|| {}));
        lp.quit_and_join();
    }
}
