//! Named threads that build native streams and keep them
//!
//! Some hosts tie a stream to the thread that built it, so the stream never
//! leaves its [`Owner`] thread; play and pause travel over a command channel.
//! A thread whose build outlives the open timeout is told to shut down and
//! handed to [`Stragglers`], which joins it later.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use unison_audio_core::{BackendFault, BackendResult, ErrorKind};

type Reply = oneshot::Sender<BackendResult<()>>;

enum Command {
    Play(Reply),
    Pause(Reply),
    Shutdown,
}

/// Native streams pinned to their owner thread
pub(crate) trait Playback {
    fn play(&self) -> BackendResult<()>;

    fn pause(&self) -> BackendResult<()>;
}

fn lost() -> BackendFault {
    BackendFault::classified(ErrorKind::BackendError, "stream thread is gone")
}

fn serve<P: Playback>(playback: P, inbox: mpsc::Receiver<Command>) {
    for command in inbox {
        match command {
            Command::Play(reply) => {
                let _ = reply.send(playback.play());
            }
            Command::Pause(reply) => {
                let _ = reply.send(playback.pause());
            }
            Command::Shutdown => break,
        }
    }
    // the native streams go with this thread
}

/// Owner threads that did not finish building in time
#[derive(Default)]
pub(crate) struct Stragglers {
    threads: Vec<(String, JoinHandle<()>)>,
}

impl Stragglers {
    fn push(&mut self, label: String, thread: JoinHandle<()>) {
        self.threads.push((label, thread));
    }

    pub(crate) fn len(&self) -> usize {
        self.threads.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Joins the threads that have already exited
    pub(crate) fn reap(&mut self) {
        let (done, pending) = std::mem::take(&mut self.threads)
            .into_iter()
            .partition(|(_, thread)| thread.is_finished());
        self.threads = pending;
        Self::join(done);
    }

    fn join(threads: Vec<(String, JoinHandle<()>)>) {
        for (label, thread) in threads {
            if thread.join().is_err() {
                tracing::error!(thread = %label, "Stream thread panicked");
            } else {
                tracing::debug!(thread = %label, "Late stream thread joined");
            }
        }
    }
}

impl Drop for Stragglers {
    fn drop(&mut self) {
        Self::join(std::mem::take(&mut self.threads));
    }
}

/// Handle to a thread owning one set of native streams
pub(crate) struct Owner {
    label: String,
    timeout: Duration,
    commands: Option<mpsc::Sender<Command>>,
    thread: Option<JoinHandle<()>>,
}

impl Owner {
    /// Runs `build` on a new thread named `label` and waits up to `timeout`
    /// for it to finish
    pub(crate) fn spawn<P, B>(
        label: &str,
        timeout: Duration,
        build: B,
        stragglers: &mut Stragglers,
    ) -> BackendResult<Self>
    where
        P: Playback,
        B: FnOnce() -> BackendResult<P> + Send + 'static,
    {
        let (ready, built) = oneshot::channel();
        let (commands, inbox) = mpsc::channel();

        let thread = thread::Builder::new()
            .name(label.to_string())
            .spawn(move || match build() {
                Ok(playback) => {
                    // nobody waits any more: drop the streams right away
                    if ready.send(Ok(())).is_ok() {
                        serve(playback, inbox);
                    }
                }
                Err(fault) => {
                    let _ = ready.send(Err(fault));
                }
            })
            .map_err(|e| {
                BackendFault::classified(
                    ErrorKind::OpenError,
                    format!("failed to spawn stream thread: {e}"),
                )
            })?;

        match built.recv_timeout(timeout) {
            Ok(Ok(())) => Ok(Self {
                label: label.to_string(),
                timeout,
                commands: Some(commands),
                thread: Some(thread),
            }),
            Ok(Err(fault)) => {
                let _ = thread.join();
                Err(fault)
            }
            Err(oneshot::RecvTimeoutError::Timeout) => {
                tracing::warn!(thread = %label, ?timeout, "Stream did not build in time");
                let _ = commands.send(Command::Shutdown);
                stragglers.push(label.to_string(), thread);
                Err(BackendFault::classified(
                    ErrorKind::BackendTimeout,
                    format!("{label} did not open within {timeout:?}"),
                ))
            }
            Err(oneshot::RecvTimeoutError::Disconnected) => {
                let _ = thread.join();
                Err(lost())
            }
        }
    }

    fn request(&self, command: fn(Reply) -> Command) -> BackendResult<()> {
        let commands = self.commands.as_ref().ok_or_else(lost)?;
        let (reply, answer) = oneshot::channel();
        commands.send(command(reply)).map_err(|_| lost())?;

        match answer.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(oneshot::RecvTimeoutError::Timeout) => Err(BackendFault::classified(
                ErrorKind::BackendTimeout,
                format!("{} did not respond within {:?}", self.label, self.timeout),
            )),
            Err(oneshot::RecvTimeoutError::Disconnected) => Err(lost()),
        }
    }

    pub(crate) fn play(&self) -> BackendResult<()> {
        self.request(Command::Play)
    }

    pub(crate) fn pause(&self) -> BackendResult<()> {
        self.request(Command::Pause)
    }
}

impl Drop for Owner {
    fn drop(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Shutdown);
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(thread = %self.label, "Stream thread panicked");
            }
        }
    }
}
