//! Wait handle and the strategies synchronous callers block with.

use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::{Result, SubmissionError};

type Waker = Box<dyn FnOnce() + Send + 'static>;

struct HandleState {
    signaled: bool,
    wakers: Vec<Waker>,
}

/// Manual-reset event, signaled exactly once when a submission completes.
///
/// Blocking threads wait on a condition variable, async tasks on a watch
/// channel, and pumping waiters register a waker.
pub struct WaitHandle {
    state: Mutex<HandleState>,
    cond: Condvar,
    watch: watch::Sender<bool>,
}

impl WaitHandle {
    pub fn new() -> Self {
        let (watch, _) = watch::channel(false);
        Self {
            state: Mutex::new(HandleState {
                signaled: false,
                wakers: Vec::new(),
            }),
            cond: Condvar::new(),
            watch,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Signal the handle. Returns `false` if it was already signaled.
    pub fn set(&self) -> bool {
        let wakers = {
            let mut state = self.lock();
            if state.signaled {
                return false;
            }
            state.signaled = true;
            std::mem::take(&mut state.wakers)
        };
        self.cond.notify_all();
        self.watch.send_replace(true);
        for wake in wakers {
            wake();
        }
        true
    }

    pub fn is_set(&self) -> bool {
        self.lock().signaled
    }

    pub fn wait(&self) {
        let state = self.lock();
        let _state = self
            .cond
            .wait_while(state, |s| !s.signaled)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Returns whether the handle was signaled before `timeout` elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .cond
            .wait_timeout_while(state, timeout, |s| !s.signaled)
            .unwrap_or_else(PoisonError::into_inner);
        state.signaled
    }

    pub async fn wait_async(&self) {
        let mut rx = self.watch.subscribe();
        // The sender lives as long as `self`, so this only returns once set.
        let _ = rx.wait_for(|signaled| *signaled).await;
    }

    /// Run `wake` once the handle is signaled; immediately if it already is.
    pub fn on_signal(&self, wake: Waker) {
        {
            let mut state = self.lock();
            if !state.signaled {
                state.wakers.push(wake);
                return;
            }
        }
        wake();
    }
}

impl Default for WaitHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WaitHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitHandle")
            .field("signaled", &self.is_set())
            .finish()
    }
}

/// How a synchronous caller blocks until a submission completes.
pub trait WaitStrategy: Send + Sync {
    /// Block until `handle` is signaled or `timeout` elapses.
    /// Returns whether the handle was signaled.
    fn wait(&self, handle: &WaitHandle, timeout: Option<Duration>) -> Result<bool>;

    fn name(&self) -> &'static str;
}

/// Plain blocking wait.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockingWait;

impl WaitStrategy for BlockingWait {
    fn wait(&self, handle: &WaitHandle, timeout: Option<Duration>) -> Result<bool> {
        match timeout {
            Some(timeout) => Ok(handle.wait_timeout(timeout)),
            None => {
                handle.wait();
                Ok(true)
            }
        }
    }

    fn name(&self) -> &'static str {
        "blocking"
    }
}

enum PumpMessage {
    Call(Box<dyn FnOnce() + Send + 'static>),
    Wake,
}

/// Call-in queue of one thread.
struct ThreadPump {
    tx: mpsc::Sender<PumpMessage>,
    rx: Mutex<mpsc::Receiver<PumpMessage>>,
}

/// Wait that keeps servicing calls marshalled onto the waiting thread.
///
/// Components that must run on the thread blocked in `execute` (they were
/// created there and are not thread-safe) post work through a
/// [`CallInDispatcher`]; the waiting thread runs each call as it arrives
/// and returns once the handle is signaled or the timeout elapses.
///
/// Every thread that waits gets its own queue, so any number of threads
/// may pump through one `PumpingWait` at the same time.
pub struct PumpingWait {
    pumps: Mutex<HashMap<ThreadId, Arc<ThreadPump>>>,
}

impl PumpingWait {
    pub fn new() -> Self {
        Self {
            pumps: Mutex::new(HashMap::new()),
        }
    }

    /// Handle for other threads to call into the current thread once it
    /// waits.
    pub fn dispatcher(&self) -> CallInDispatcher {
        self.dispatcher_for(std::thread::current().id())
    }

    /// Handle for other threads to call into `thread` once it waits.
    pub fn dispatcher_for(&self, thread: ThreadId) -> CallInDispatcher {
        CallInDispatcher {
            tx: self.pump_for(thread).tx.clone(),
        }
    }

    fn pump_for(&self, thread: ThreadId) -> Arc<ThreadPump> {
        self.pumps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(thread)
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel();
                Arc::new(ThreadPump {
                    tx,
                    rx: Mutex::new(rx),
                })
            })
            .clone()
    }
}

impl Default for PumpingWait {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for PumpingWait {
    fn wait(&self, handle: &WaitHandle, timeout: Option<Duration>) -> Result<bool> {
        let pump = self.pump_for(std::thread::current().id());
        let rx = match pump.rx.try_lock() {
            Ok(rx) => rx,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                // A call-in running on this thread is waiting; the outer wait owns the queue.
                tracing::debug!("Nested pumping wait; blocking without pumping");
                return BlockingWait.wait(handle, timeout);
            }
        };

        run_queued(&rx);
        let waker_tx = pump.tx.clone();
        handle.on_signal(Box::new(move || {
            let _ = waker_tx.send(PumpMessage::Wake);
        }));

        let outcome = pump_until_signaled(&rx, handle, timeout);
        // Leaves no wake behind for the next wait on this thread.
        run_queued(&rx);
        outcome
    }

    fn name(&self) -> &'static str {
        "pumping"
    }
}

fn pump_until_signaled(
    rx: &mpsc::Receiver<PumpMessage>,
    handle: &WaitHandle,
    timeout: Option<Duration>,
) -> Result<bool> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        if handle.is_set() {
            return Ok(true);
        }
        let message = match deadline {
            None => rx
                .recv()
                .map_err(|_| SubmissionError::Wait("call-in queue closed".into()))?,
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(remaining) {
                    Ok(message) => message,
                    Err(RecvTimeoutError::Timeout) => return Ok(handle.is_set()),
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(SubmissionError::Wait("call-in queue closed".into()))
                    }
                }
            }
        };
        match message {
            PumpMessage::Call(call) => call(),
            PumpMessage::Wake => {}
        }
    }
}

/// Run queued calls and discard wakes without blocking.
fn run_queued(rx: &mpsc::Receiver<PumpMessage>) {
    while let Ok(message) = rx.try_recv() {
        if let PumpMessage::Call(call) = message {
            call();
        }
    }
}

/// Marshals calls onto one thread's [`PumpingWait`] queue.
#[derive(Clone)]
pub struct CallInDispatcher {
    tx: mpsc::Sender<PumpMessage>,
}

impl CallInDispatcher {
    /// Queue `call` for the pumping thread without waiting for it.
    pub fn post(&self, call: impl FnOnce() + Send + 'static) -> Result<()> {
        self.tx
            .send(PumpMessage::Call(Box::new(call)))
            .map_err(|_| SubmissionError::Wait("pumping wait dropped".into()))
    }

    /// Run `call` on the pumping thread and block for its return value.
    ///
    /// Must not be called from the pumping thread itself.
    pub fn invoke<R, F>(&self, call: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.post(move || {
            let _ = reply_tx.send(call());
        })?;
        reply_rx
            .recv()
            .map_err(|_| SubmissionError::Wait("call-in dropped before it ran".into()))
    }
}
