//! Promises, channels and the native-thread task runners behind `async`,
//! `await`, `go` and `chan`.
//!
//! Arrays and dicts reachable from several tasks are not synchronised beyond
//! their own per-operation lock; interleaved read-modify-write sequences from
//! two tasks can race.

use std::{
    any::Any,
    fmt, io,
    panic::{self, AssertUnwindSafe},
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

use crossbeam::channel::{self as chan, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

use crate::value::{Host, Value, ValueKind};

const TASK_STACK_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("send on closed channel")]
    Closed,
}

/// Single-assignment result of an async computation.
pub struct Promise {
    state: Mutex<PromiseState>,
    settled: Condvar,
}

#[derive(Default)]
struct PromiseState {
    outcome: Option<Result<Value, Value>>,
    callbacks: Vec<Value>,
}

impl Promise {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PromiseState::default()),
            settled: Condvar::new(),
        }
    }

    pub fn pending() -> Value {
        Value::new(ValueKind::Promise(Self::new()))
    }

    pub fn resolve(&self, host: &dyn Host, value: Value) -> bool {
        self.settle(host, Ok(value))
    }

    pub fn reject(&self, host: &dyn Host, error: Value) -> bool {
        self.settle(host, Err(error))
    }

    /// First settlement wins; later calls return `false` and change nothing.
    fn settle(&self, host: &dyn Host, outcome: Result<Value, Value>) -> bool {
        let callbacks = {
            let mut state = self.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome.clone());
            self.settled.notify_all();
            std::mem::take(&mut state.callbacks)
        };
        if let Ok(value) = outcome {
            for callback in callbacks {
                let result = host.call(&callback, vec![value.clone()]);
                if let Some(message) = result.error_message() {
                    warn!(error = message, "promise callback failed");
                }
            }
        }
        true
    }

    /// Blocks until the promise settles.
    pub fn wait(&self) -> Result<Value, Value> {
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            self.settled.wait(&mut state);
        }
    }

    pub fn is_done(&self) -> bool {
        self.state.lock().outcome.is_some()
    }

    /// Runs `callback` with the resolved value now, or queues it until the
    /// promise resolves. Rejections skip callbacks.
    pub fn then(&self, host: &dyn Host, callback: Value) -> Value {
        let resolved = {
            let mut state = self.state.lock();
            match &state.outcome {
                Some(Ok(value)) => value.clone(),
                Some(Err(_)) => return Value::null(),
                None => {
                    state.callbacks.push(callback);
                    return Value::null();
                }
            }
        };
        host.call(&callback, vec![resolved])
    }
}

impl Default for Promise {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state.lock().outcome {
            None => write!(f, "Promise{{pending}}"),
            Some(Ok(value)) => write!(f, "Promise{{resolved: {value}}}"),
            Some(Err(error)) => write!(f, "Promise{{rejected: {error}}}"),
        }
    }
}

/// Capacity 0 is a rendezvous channel; N allows N queued values.
pub struct Channel {
    capacity: usize,
    sender: Mutex<Option<Sender<Value>>>,
    receiver: Receiver<Value>,
    closed: AtomicBool,
}

impl Channel {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = chan::bounded(capacity);
        Self {
            capacity,
            sender: Mutex::new(Some(sender)),
            receiver,
            closed: AtomicBool::new(false),
        }
    }

    pub fn value(capacity: usize) -> Value {
        Value::new(ValueKind::Channel(Self::new(capacity)))
    }

    /// Blocks until a receiver takes the value or buffer space frees up.
    pub fn send(&self, value: Value) -> Result<(), ChannelError> {
        let sender = self.sender.lock().clone().ok_or(ChannelError::Closed)?;
        sender.send(value).map_err(|_| ChannelError::Closed)
    }

    /// Next value, or `None` once the channel is closed and drained.
    pub fn receive(&self) -> Option<Value> {
        self.receiver.recv().ok()
    }

    /// Safe to call more than once.
    pub fn close(&self) {
        if self.sender.lock().take().is_some() {
            self.closed.store(true, Ordering::SeqCst);
            debug!(capacity = self.capacity, "channel closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.capacity == 0 {
            write!(f, "chan(unbuffered)")
        } else {
            write!(f, "chan(buffered:{})", self.capacity)
        }
    }
}

/// Runs `body` on a new thread and settles `promise` with its outcome. A panic
/// inside `body` becomes a rejection.
pub fn spawn_async<H, F>(name: &str, host: H, promise: Value, body: F) -> io::Result<()>
where
    H: Host + Send + 'static,
    F: FnOnce(&H) -> Value + Send + 'static,
{
    let label = name.to_string();
    thread::Builder::new()
        .name(format!("vint-async-{name}"))
        .stack_size(TASK_STACK_SIZE)
        .spawn(move || {
            let ValueKind::Promise(target) = &*promise.0 else {
                return;
            };
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&host)));
            match outcome {
                Ok(result) if result.is_error() => {
                    debug!(task = %label, "async task rejected");
                    target.reject(&host, result);
                }
                Ok(result) => {
                    debug!(task = %label, "async task resolved");
                    target.resolve(&host, result);
                }
                Err(payload) => {
                    let message = format!("async function panic: {}", panic_message(&*payload));
                    warn!(task = %label, "{message}");
                    target.reject(&host, Value::error(message));
                }
            }
        })?;
    Ok(())
}

/// Fire-and-forget: nothing about the outcome reaches the spawner.
pub fn spawn_detached<H, F>(host: H, body: F) -> io::Result<()>
where
    H: Host + Send + 'static,
    F: FnOnce(&H) -> Value + Send + 'static,
{
    thread::Builder::new()
        .name("vint-go".into())
        .stack_size(TASK_STACK_SIZE)
        .spawn(move || {
            match panic::catch_unwind(AssertUnwindSafe(|| body(&host))) {
                Ok(result) => {
                    if let Some(message) = result.error_message() {
                        debug!(error = message, "go task failed");
                    }
                }
                Err(payload) => warn!("go task panicked: {}", panic_message(&*payload)),
            }
        })?;
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".into()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::output::Output;

    struct NullHost(Output);

    impl Host for NullHost {
        fn call(&self, _function: &Value, args: Vec<Value>) -> Value {
            args.into_iter().next().unwrap_or_else(Value::null)
        }

        fn output(&self) -> &Output {
            &self.0
        }
    }

    fn host() -> NullHost {
        NullHost(Output::Silent)
    }

    #[test]
    fn promise_settles_once() {
        let promise = Promise::new();
        assert!(promise.resolve(&host(), Value::int(1)));
        assert!(!promise.reject(&host(), Value::error("late")));
        assert_eq!(promise.wait().map(|v| v.inspect()).map_err(|e| e.inspect()), Ok("1".into()));
        assert_eq!(promise.to_string(), "Promise{resolved: 1}");
    }

    #[test]
    fn wait_blocks_until_another_thread_resolves() {
        let promise = Arc::new(Promise::new());
        let remote = Arc::clone(&promise);
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.resolve(&host(), Value::string("done"));
        });
        assert_eq!(promise.wait().map(|v| v.inspect()).map_err(|e| e.inspect()), Ok("done".into()));
        worker.join().expect("worker thread");
    }

    #[test]
    fn panicking_task_rejects_its_promise() {
        let promise = Promise::pending();
        spawn_async("boom", host(), promise.clone(), |_| -> Value {
            panic!("exploded");
        })
        .expect("spawn");
        let ValueKind::Promise(target) = &*promise.0 else {
            panic!("expected promise");
        };
        let error = target.wait().expect_err("rejected");
        assert_eq!(
            error.error_message(),
            Some("async function panic: exploded")
        );
    }

    #[test]
    fn closed_channel_drains_then_reports_empty() {
        let channel = Channel::new(2);
        channel.send(Value::int(1)).expect("send");
        channel.close();
        channel.close();
        assert_eq!(channel.send(Value::int(2)), Err(ChannelError::Closed));
        assert_eq!(channel.receive().map(|v| v.inspect()), Some("1".into()));
        assert!(channel.receive().is_none());
        assert!(channel.is_closed());
    }

    #[test]
    fn unbuffered_send_waits_for_receiver() {
        let channel = Arc::new(Channel::new(0));
        let sender = Arc::clone(&channel);
        let worker = thread::spawn(move || {
            sender.send(Value::int(7)).expect("send");
        });
        assert_eq!(channel.receive().map(|v| v.inspect()), Some("7".into()));
        worker.join().expect("sender thread");
        assert_eq!(channel.to_string(), "chan(unbuffered)");
    }
}
