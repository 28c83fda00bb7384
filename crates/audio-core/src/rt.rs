//! Dedicated real-time execution context
//!
//! Backends that have to produce their own audio clock run their
//! [`Processor`](crate::Processor) on an [`ExecutionContext`]: a named thread
//! that prepares, signals readiness, then ticks periodically until it is
//! joined. Joining is the stop barrier; it hands the owned state back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::{BackendFault, ErrorKind};

/// Hint used to promote the thread to real-time priority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityHint {
    pub buffer_frames: u32,
    pub sample_rate: u32,
}

#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub name: String,
    pub period: Duration,
    pub priority: Option<PriorityHint>,
}

impl ContextConfig {
    pub fn new(name: impl Into<String>, period: Duration) -> Self {
        Self {
            name: name.into(),
            period,
            priority: None,
        }
    }

    pub fn with_priority(mut self, buffer_frames: u32, sample_rate: u32) -> Self {
        self.priority = Some(PriorityHint {
            buffer_frames,
            sample_rate,
        });
        self
    }
}

type Ready = Result<(), BackendFault>;

pub struct ExecutionContext<S> {
    name: String,
    stop: Arc<AtomicBool>,
    ready: Option<oneshot::Receiver<Ready>>,
    handle: Option<JoinHandle<S>>,
}

impl<S: Send + 'static> ExecutionContext<S> {
    /// Spawns the context thread.
    ///
    /// `prepare` runs first on the new thread; its result is what
    /// [`wait_ready`](Self::wait_ready) reports. `tick` then runs once per
    /// `period` until the context is stopped.
    pub fn spawn<P, T>(config: ContextConfig, state: S, prepare: P, tick: T) -> Result<Self, BackendFault>
    where
        P: FnOnce(&mut S) -> Result<(), BackendFault> + Send + 'static,
        T: FnMut(&mut S) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_sender, ready_receiver) = oneshot::channel();

        let thread_stop = Arc::clone(&stop);
        let ContextConfig {
            name,
            period,
            priority,
        } = config;

        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || run(state, period, priority, thread_stop, ready_sender, prepare, tick))
            .map_err(|e| {
                BackendFault::classified(ErrorKind::OpenError, format!("failed to spawn thread: {e}"))
            })?;

        tracing::debug!(context = %name, ?period, "Execution context spawned");

        Ok(Self {
            name,
            stop,
            ready: Some(ready_receiver),
            handle: Some(handle),
        })
    }

    /// Waits at most `timeout` for the context to finish preparing.
    ///
    /// On timeout the context is asked to stop and `BackendTimeout` is
    /// returned; the thread exits on its own once preparation completes.
    pub fn wait_ready(&mut self, timeout: Duration) -> Result<(), BackendFault> {
        let Some(ready) = self.ready.take() else {
            return Ok(());
        };

        match ready.recv_timeout(timeout) {
            Ok(result) => result,
            Err(oneshot::RecvTimeoutError::Timeout) => {
                self.request_stop();
                tracing::warn!(context = %self.name, ?timeout, "Execution context not ready in time");
                Err(BackendFault::classified(
                    ErrorKind::BackendTimeout,
                    format!("{} not ready after {timeout:?}", self.name),
                ))
            }
            Err(oneshot::RecvTimeoutError::Disconnected) => Err(BackendFault::classified(
                ErrorKind::BackendError,
                format!("{} exited before becoming ready", self.name),
            )),
        }
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stops the context and waits for its thread, returning the state.
    /// `None` if the thread panicked.
    pub fn join(mut self) -> Option<S> {
        self.stop_and_join()
    }

    fn stop_and_join(&mut self) -> Option<S> {
        self.request_stop();
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(state) => {
                tracing::debug!(context = %self.name, "Execution context joined");
                Some(state)
            }
            Err(_) => {
                tracing::error!(context = %self.name, "Execution context panicked");
                None
            }
        }
    }
}

impl<S> Drop for ExecutionContext<S> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run<S, P, T>(
    mut state: S,
    period: Duration,
    priority: Option<PriorityHint>,
    stop: Arc<AtomicBool>,
    ready: oneshot::Sender<Ready>,
    prepare: P,
    mut tick: T,
) -> S
where
    P: FnOnce(&mut S) -> Result<(), BackendFault>,
    T: FnMut(&mut S),
{
    let _priority = priority.and_then(promote);

    let prepared = prepare(&mut state);
    let failed = prepared.is_err();
    // Receiver may already be gone after a timeout
    let _ = ready.send(prepared);
    if failed {
        return state;
    }

    let mut deadline = Instant::now();
    while !stop.load(Ordering::SeqCst) {
        tick(&mut state);

        deadline += period;
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        } else {
            deadline = now;
        }
    }

    state
}

#[cfg(feature = "rt-priority")]
struct Promotion(Option<audio_thread_priority::RtPriorityHandle>);

#[cfg(feature = "rt-priority")]
impl Drop for Promotion {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            if let Err(e) = audio_thread_priority::demote_current_thread_from_real_time(handle) {
                tracing::warn!("Failed to demote thread: {e}");
            }
        }
    }
}

#[cfg(feature = "rt-priority")]
fn promote(hint: PriorityHint) -> Option<Promotion> {
    match audio_thread_priority::promote_current_thread_to_real_time(
        hint.buffer_frames,
        hint.sample_rate,
    ) {
        Ok(handle) => Some(Promotion(Some(handle))),
        Err(e) => {
            tracing::warn!("Failed to promote thread to real-time priority: {e}");
            None
        }
    }
}

#[cfg(not(feature = "rt-priority"))]
fn promote(_hint: PriorityHint) -> Option<()> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str) -> ContextConfig {
        ContextConfig::new(name, Duration::from_millis(1)).with_priority(64, 48_000)
    }

    #[test]
    fn test_ticks_until_joined() {
        let mut ctx = ExecutionContext::spawn(config("tick"), 0u32, |_| Ok(()), |n| *n += 1).unwrap();
        ctx.wait_ready(Duration::from_secs(1)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(!ctx.is_finished());
        let ticks = ctx.join().unwrap();
        assert!(ticks >= 1);
    }

    #[test]
    fn test_prepare_failure_is_reported() {
        let mut ctx = ExecutionContext::spawn(
            config("fail"),
            (),
            |_| Err(BackendFault::Native(-19)),
            |_| {},
        )
        .unwrap();
        assert_eq!(
            ctx.wait_ready(Duration::from_secs(1)),
            Err(BackendFault::Native(-19))
        );
        assert!(ctx.join().is_some());
    }

    #[test]
    fn test_slow_prepare_times_out() {
        let mut ctx = ExecutionContext::spawn(
            config("slow"),
            7u8,
            |_| {
                std::thread::sleep(Duration::from_millis(200));
                Ok(())
            },
            |_| {},
        )
        .unwrap();

        let err = ctx.wait_ready(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(
            err,
            BackendFault::Classified {
                kind: ErrorKind::BackendTimeout,
                ..
            }
        ));
        // The thread still finishes and hands its state back
        assert_eq!(ctx.join(), Some(7));
    }
}
