//! Cold, unicast observables
//!
//! An `Observable<T>` holds the function that starts its work and runs it on
//! first poll. The producer side receives an `Observer<T>` and pushes events
//! into an unbounded channel; the consumer side is a `futures` stream of
//! `Result<T, StorageError>` that ends after the first terminal event.
//!
//! Dropping the stream is disposal: the receiver goes away, later `on_next`
//! calls become no-ops, and the `Disposable` returned by the start function
//! runs. A producer that goes away without a terminal event ends the stream
//! with `StorageError::Interrupted`.

use std::fmt;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use parking_lot::Mutex;
use rxstore_storage::StorageError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub enum Event<T> {
    Next(T),
    Error(StorageError),
    Completed,
}

/// Producer handle; cheap to clone, all clones feed the same subscriber
pub struct Observer<T> {
    sender: Arc<Mutex<Option<mpsc::UnboundedSender<Event<T>>>>>,
}

impl<T> Observer<T> {
    fn new(sender: mpsc::UnboundedSender<Event<T>>) -> Self {
        Self {
            sender: Arc::new(Mutex::new(Some(sender))),
        }
    }

    /// Emit a value; returns false once terminated or disposed
    pub fn on_next(&self, value: T) -> bool {
        let guard = self.sender.lock();
        match guard.as_ref() {
            Some(sender) => sender.send(Event::Next(value)).is_ok(),
            None => false,
        }
    }

    pub fn on_error(&self, error: StorageError) {
        if let Some(sender) = self.sender.lock().take() {
            let _ = sender.send(Event::Error(error));
        }
    }

    pub fn on_completed(&self) {
        if let Some(sender) = self.sender.lock().take() {
            let _ = sender.send(Event::Completed);
        }
    }

    /// True after a terminal event or once the subscriber went away
    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .as_ref()
            .map_or(true, |sender| sender.is_closed())
    }
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
        }
    }
}

/// Cleanup run once, when the stream finishes or is dropped
pub struct Disposable {
    action: Option<Box<dyn FnOnce() + Send>>,
}

impl Disposable {
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Some(Box::new(action)),
        }
    }

    pub fn empty() -> Self {
        Self { action: None }
    }

    pub fn dispose(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}

impl Drop for Disposable {
    fn drop(&mut self) {
        self.run();
    }
}

type StartFn<T> = Box<dyn FnOnce(Observer<T>) -> Disposable + Send>;

enum State<T> {
    Idle(StartFn<T>),
    Running {
        events: mpsc::UnboundedReceiver<Event<T>>,
        _disposable: Disposable,
    },
    Done,
}

#[must_use = "observables do nothing until polled or subscribed"]
pub struct Observable<T> {
    state: State<T>,
}

impl<T: Send + 'static> Observable<T> {
    /// Build an observable from a start function
    ///
    /// `start` runs on first poll and must eventually call exactly one of
    /// `on_completed` / `on_error`.
    pub fn create<F>(start: F) -> Self
    where
        F: FnOnce(Observer<T>) -> Disposable + Send + 'static,
    {
        Self {
            state: State::Idle(Box::new(start)),
        }
    }

    /// Drive the observable on the current tokio runtime, delivering events to `on_event`
    pub fn subscribe<F>(mut self, mut on_event: F) -> Subscription
    where
        F: FnMut(Event<T>) + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut failed = false;
            while let Some(item) = self.next().await {
                match item {
                    Ok(value) => on_event(Event::Next(value)),
                    Err(e) => {
                        failed = true;
                        on_event(Event::Error(e));
                    }
                }
            }
            if !failed {
                on_event(Event::Completed);
            }
        });

        Subscription { handle }
    }

    fn finish(&mut self) {
        self.state = State::Done;
    }
}

// Never pinned structurally; every field is behind a pointer
impl<T> Unpin for Observable<T> {}

impl<T: Send + 'static> Stream for Observable<T> {
    type Item = Result<T, StorageError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let State::Idle(_) = this.state {
            if let State::Idle(start) = mem::replace(&mut this.state, State::Done) {
                let (sender, events) = mpsc::unbounded_channel();
                let disposable = start(Observer::new(sender));
                this.state = State::Running {
                    events,
                    _disposable: disposable,
                };
            }
        }

        let State::Running { events, .. } = &mut this.state else {
            return Poll::Ready(None);
        };

        match events.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Event::Next(value))) => Poll::Ready(Some(Ok(value))),
            Poll::Ready(Some(Event::Error(e))) => {
                this.finish();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(Some(Event::Completed)) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                tracing::warn!("Observable producer dropped without a terminal event");
                this.finish();
                Poll::Ready(Some(Err(StorageError::Interrupted)))
            }
        }
    }
}

impl<T> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            State::Idle(_) => "idle",
            State::Running { .. } => "running",
            State::Done => "done",
        };
        f.debug_struct("Observable").field("state", &state).finish()
    }
}

/// Handle for a callback subscription
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    /// Stop delivering events; engine work already started keeps running
    pub fn dispose(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
