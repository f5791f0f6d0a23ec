// Copyright 2025 John Brosnihan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Paced frame loop
//!
//! [`FrameLoop::spawn`] moves a [`Runtime`] onto a dedicated thread that
//! ticks it once per `frame_interval`, sleeping whatever is left of each
//! frame. Other threads interact with the runtime through the returned
//! [`FrameLoopHandle`]: queued closures run with `&mut Runtime` at the start
//! of the next frame, before its tick.

use crate::error::{Result, RuntimeError};
use crate::runtime::Runtime;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

type Command = Box<dyn FnOnce(&mut Runtime) + Send>;

enum Message {
    Run(Command),
    Stop,
}

/// Entry point for running a runtime on its own thread
pub struct FrameLoop;

impl FrameLoop {
    /// Move `runtime` onto a new thread named `frame-loop` and start ticking
    pub fn spawn(runtime: Runtime) -> Result<FrameLoopHandle> {
        let (tx, rx) = unbounded();
        let thread = thread::Builder::new()
            .name("frame-loop".to_string())
            .spawn(move || run_loop(runtime, rx))?;
        Ok(FrameLoopHandle {
            tx,
            thread: Some(thread),
        })
    }
}

/// Handle to a running [`FrameLoop`]
pub struct FrameLoopHandle {
    tx: Sender<Message>,
    thread: Option<JoinHandle<Runtime>>,
}

impl FrameLoopHandle {
    /// Queue `f` to run with the runtime at the start of the next frame
    pub fn sync<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Runtime) + Send + 'static,
    {
        self.tx
            .send(Message::Run(Box::new(f)))
            .map_err(|_| RuntimeError::Stopped)
    }

    /// Queue `f` and block until it has run, returning its result
    pub fn wait<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Runtime) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = bounded(1);
        self.sync(move |runtime| {
            let _ = reply_tx.send(f(runtime));
        })?;
        reply_rx.recv().map_err(|_| RuntimeError::Stopped)
    }

    /// Whether the loop thread has exited
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// End the loop after the current frame and take the runtime back
    pub fn stop(mut self) -> Result<Runtime> {
        let _ = self.tx.send(Message::Stop);
        let thread = self.thread.take().ok_or(RuntimeError::Stopped)?;
        thread.join().map_err(|_| {
            tracing::error!("frame loop thread panicked");
            RuntimeError::Stopped
        })
    }
}

impl Drop for FrameLoopHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.tx.send(Message::Stop);
            let _ = thread.join();
        }
    }
}

fn run_loop(mut runtime: Runtime, rx: Receiver<Message>) -> Runtime {
    let interval = runtime.config().frame_interval();
    tracing::info!(interval_ms = interval.as_millis() as u64, "frame loop started");

    loop {
        let frame_start = Instant::now();

        // Only what was queued before this frame; later commands wait a frame
        for _ in 0..rx.len() {
            match rx.try_recv() {
                Ok(Message::Run(command)) => command(&mut runtime),
                Ok(Message::Stop) | Err(TryRecvError::Disconnected) => {
                    tracing::info!(frames = runtime.frame(), "frame loop stopped");
                    return runtime;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        match runtime.update() {
            Ok(_) => {}
            Err(RuntimeError::Stopped) => {
                tracing::info!("runtime stopped, leaving frame loop");
                return runtime;
            }
            Err(err) => tracing::error!(frame = runtime.frame(), "tick failed: {err}"),
        }

        let elapsed = frame_start.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        } else {
            tracing::debug!(
                elapsed_ms = elapsed.as_millis() as u64,
                "frame overran its interval"
            );
        }
    }
}
