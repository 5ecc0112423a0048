//! Per-request transaction state machine.
//!
//! One transaction drives a single HTTP request/response exchange over an
//! established connection: request-body backpressure, response head/body
//! delivery, cancellation, and the request deadline. All mutation goes
//! through one mutex held only for state transitions, never across I/O;
//! operations return action values the HTTP layer applies to its executor.
//!
//! Out-of-order transitions are programmer errors and panic; independent
//! cancellation sources (deadline timer, user cancel, transport error)
//! converge on the one idempotent `fail` path.

use crate::base::error::DialError;
use crate::http::body::{
    response_body_channel, ProducerAction, RequestBody, ResponseBody, ResponseBodySink,
};
use crate::http::executor::{Executor, Scheduler};
use crate::socket::target::PoolKey;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use http::{HeaderMap, StatusCode, Version};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Response head delivered through the response promise.
#[derive(Debug)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
}

/// The resolved response: head plus the async body stream.
#[derive(Debug)]
pub struct Response {
    pub head: ResponseHead,
    pub body: ResponseBody,
}

/// Single-shot future the requester awaits.
pub type ResponseFuture = oneshot::Receiver<Result<Response, DialError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initialized,
    Queued,
    ExecutingRequest,
    AwaitingResponseHead,
    StreamingResponseBody,
    Finished,
    Failed,
}

/// Verdict for `will_execute_request`.
#[derive(Debug)]
pub enum ExecuteAction {
    Proceed,
    /// The transaction was cancelled before execution; the executor must
    /// abort the request.
    Cancel,
}

/// Verdict for `resume_request_body_stream`.
pub enum ResumeAction {
    /// Start the body pump with the caller's byte source. Emitted at most
    /// once per transaction.
    StartStream(BoxStream<'static, Result<Bytes, DialError>>),
    None,
}

impl fmt::Debug for ResumeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartStream(_) => f.write_str("StartStream"),
            Self::None => f.write_str("None"),
        }
    }
}

/// Verdict for `write_next_request_part`.
#[derive(Debug)]
pub enum WriteAction {
    /// Write the part and keep pumping.
    Continue,
    /// Write the part, then suspend until writability returns. The receiver
    /// resolves with an error iff `fail` or the deadline fires first.
    Wait(oneshot::Receiver<Result<(), DialError>>),
    /// The transaction already failed; exit the pump silently.
    Fail,
}

struct Inner {
    state: State,
    body: Option<RequestBody>,
    scheduler: Option<Arc<dyn Scheduler>>,
    executor: Option<Arc<dyn Executor>>,
    promise: Option<oneshot::Sender<Result<Response, DialError>>>,
    sink: ResponseBodySink,
    body_handle: Option<ResponseBody>,
    write_paused: bool,
    write_waiter: Option<oneshot::Sender<Result<(), DialError>>>,
    cancelled: bool,
    executor_cancelled: bool,
}

/// State machine for one request/response exchange.
pub struct Transaction {
    key: PoolKey,
    inner: Mutex<Inner>,
}

impl Transaction {
    /// Create a transaction for `key` carrying `body`, returning the
    /// response future its owner awaits.
    pub fn new(key: PoolKey, body: RequestBody) -> (Arc<Self>, ResponseFuture) {
        let (promise, response_future) = oneshot::channel();
        let (sink, body_handle) = response_body_channel();
        let transaction = Arc::new(Self {
            key,
            inner: Mutex::new(Inner {
                state: State::Initialized,
                body: Some(body),
                scheduler: None,
                executor: None,
                promise: Some(promise),
                sink,
                body_handle: Some(body_handle),
                write_paused: false,
                write_waiter: None,
                cancelled: false,
                executor_cancelled: false,
            }),
        });
        (transaction, response_future)
    }

    /// Immutable identity, safe to read from any thread.
    pub fn pool_key(&self) -> &PoolKey {
        &self.key
    }

    /// The request entered a scheduler's queue.
    pub fn request_was_queued(&self, scheduler: Arc<dyn Scheduler>) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            State::Initialized => {
                inner.state = State::Queued;
                inner.scheduler = Some(scheduler);
            }
            // Cancelled (or timed out) before queueing; the scheduler is not
            // retained and the terminal state stands.
            State::Failed => {}
            state => panic!("request_was_queued in state {state:?}"),
        }
    }

    /// The scheduler handed the request to an executor.
    ///
    /// Returns `Cancel` when the transaction was terminated first; the
    /// response promise has already been resumed with that error.
    pub fn will_execute_request(&self, executor: Arc<dyn Executor>) -> ExecuteAction {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            State::Queued => {
                inner.state = State::ExecutingRequest;
                inner.scheduler = None;
                inner.executor = Some(executor.clone());
                // Response-body demand flows back to this executor.
                inner.sink.set_demand_hook(move || {
                    executor.demand_response_body_stream();
                });
                ExecuteAction::Proceed
            }
            State::Failed => ExecuteAction::Cancel,
            state => panic!("will_execute_request in state {state:?}"),
        }
    }

    /// Producer-side credit from the connection.
    ///
    /// For a streaming body the first call yields `StartStream` (exactly
    /// once); a buffered body is written and finished here; otherwise, and
    /// on later calls, a suspended body write is resumed if one is parked.
    pub fn resume_request_body_stream(&self) -> ResumeAction {
        enum Step {
            Start(BoxStream<'static, Result<Bytes, DialError>>),
            WriteBuffered(Bytes, Arc<dyn Executor>),
            ResumeWaiter(oneshot::Sender<Result<(), DialError>>),
            Nothing,
        }

        let step = {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                State::ExecutingRequest => {
                    inner.write_paused = false;
                    if let Some(waiter) = inner.write_waiter.take() {
                        Step::ResumeWaiter(waiter)
                    } else {
                        match inner.body.take() {
                            Some(RequestBody::Streaming(stream)) => Step::Start(stream),
                            Some(RequestBody::Buffered(buf)) => {
                                // The whole body goes out as one part; the
                                // stream is finished right behind it.
                                inner.state = State::AwaitingResponseHead;
                                let executor = inner
                                    .executor
                                    .clone()
                                    .expect("executing without an executor");
                                Step::WriteBuffered(buf, executor)
                            }
                            Some(RequestBody::Empty) | None => Step::Nothing,
                        }
                    }
                }
                State::AwaitingResponseHead
                | State::StreamingResponseBody
                | State::Finished
                | State::Failed => Step::Nothing,
                state => panic!("resume_request_body_stream in state {state:?}"),
            }
        };

        match step {
            Step::Start(stream) => ResumeAction::StartStream(stream),
            Step::WriteBuffered(buf, executor) => {
                executor.write_request_body_part(buf);
                executor.finish_request_body_stream();
                ResumeAction::None
            }
            Step::ResumeWaiter(waiter) => {
                let _ = waiter.send(Ok(()));
                ResumeAction::None
            }
            Step::Nothing => ResumeAction::None,
        }
    }

    /// Writability is gone; subsequent `write_next_request_part` calls
    /// suspend until `resume_request_body_stream`.
    pub fn pause_request_body_stream(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == State::ExecutingRequest {
            inner.write_paused = true;
        }
    }

    /// Ask how to deliver the next request body part.
    pub fn write_next_request_part(&self) -> WriteAction {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            State::ExecutingRequest => {
                if inner.write_paused {
                    debug_assert!(
                        inner.write_waiter.is_none(),
                        "at most one suspended body write"
                    );
                    let (tx, rx) = oneshot::channel();
                    inner.write_waiter = Some(tx);
                    WriteAction::Wait(rx)
                } else {
                    WriteAction::Continue
                }
            }
            State::Failed | State::Finished => WriteAction::Fail,
            state => panic!("write_next_request_part in state {state:?}"),
        }
    }

    /// The request body stream ran dry; forward end-of-stream.
    pub fn forward_stream_finished(&self) {
        let executor = {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                State::ExecutingRequest => {
                    inner.state = State::AwaitingResponseHead;
                    inner.executor.clone()
                }
                _ => None,
            }
        };
        if let Some(executor) = executor {
            executor.finish_request_body_stream();
        }
    }

    /// Deliver the response head, resolving the response promise.
    ///
    /// Valid once the request is executing; a second head is a protocol
    /// error and panics.
    pub fn receive_response_head(&self, head: ResponseHead) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            State::ExecutingRequest | State::AwaitingResponseHead => {
                inner.state = State::StreamingResponseBody;
                let promise = inner
                    .promise
                    .take()
                    .expect("response promise resumed before the head arrived");
                let body = inner
                    .body_handle
                    .take()
                    .expect("response body handed out before the head arrived");
                let _ = promise.send(Ok(Response { head, body }));
            }
            state => panic!("receive_response_head in state {state:?}"),
        }
    }

    /// Deliver response body bytes into the bounded source.
    ///
    /// `StopProducing` pauses demand; it resumes through the executor's
    /// `demand_response_body_stream` once the consumer drains.
    pub fn receive_response_body_parts(&self, part: Bytes) -> ProducerAction {
        let sink = {
            let inner = self.inner.lock().unwrap();
            match inner.state {
                State::StreamingResponseBody => inner.sink.clone(),
                State::Failed => return ProducerAction::StopProducing,
                state => panic!("receive_response_body_parts in state {state:?}"),
            }
        };
        let action = sink.push(part);
        if action == ProducerAction::StopProducing {
            tracing::trace!("response body demand paused");
        }
        action
    }

    /// The exchange completed; finish the response stream, optionally
    /// yielding a trailing buffer first. Terminal.
    pub fn succeed_request(&self, trailing: Option<Bytes>) {
        let sink = {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                State::StreamingResponseBody => {
                    inner.state = State::Finished;
                    inner.executor = None;
                    inner.scheduler = None;
                    inner.sink.clone()
                }
                // A transport failure can race the final frame.
                State::Failed => return,
                state => panic!("succeed_request in state {state:?}"),
            }
        };
        if let Some(tail) = trailing {
            sink.push(tail);
        }
        sink.finish(None);
    }

    /// Terminal failure from any source. Idempotent.
    pub fn fail(&self, error: DialError) {
        self.fail_with(error, false);
    }

    /// External cancellation from the user.
    pub fn cancel(&self) {
        self.fail_with(DialError::Cancelled, true);
    }

    /// The request deadline timer fired.
    pub fn deadline_exceeded(&self) {
        self.fail_with(DialError::DeadlineExceeded, false);
    }

    fn fail_with(&self, error: DialError, mark_cancelled: bool) {
        let (promise, sink, waiter, executor, scheduler);
        {
            let mut inner = self.inner.lock().unwrap();
            if mark_cancelled {
                inner.cancelled = true;
            }
            if matches!(inner.state, State::Finished | State::Failed) {
                return;
            }
            inner.state = State::Failed;
            promise = inner.promise.take();
            waiter = inner.write_waiter.take();
            scheduler = inner.scheduler.take();
            executor = if inner.executor_cancelled {
                None
            } else {
                inner.executor_cancelled = true;
                inner.executor.take()
            };
            sink = inner.sink.clone();
        }

        // The error lands on exactly one primary surface: the unresolved
        // response promise, or the already-delivered body stream. A parked
        // body-write continuation always observes it as well.
        match promise {
            Some(promise) => {
                let _ = promise.send(Err(error.clone()));
            }
            None => sink.finish(Some(error.clone())),
        }
        if let Some(waiter) = waiter {
            let _ = waiter.send(Err(error.clone()));
        }
        if let Some(scheduler) = scheduler {
            scheduler.cancel_request();
        }
        if let Some(executor) = executor {
            executor.cancel_request();
        }
        tracing::debug!(error = %error, "transaction failed");
    }

    /// Drive a streaming request body to the executor.
    ///
    /// Writes each part, suspending on lost writability; a failed transaction
    /// ends the pump silently (the failure is reported through the primary
    /// error path). End-of-stream forwards to the executor.
    pub async fn run_request_body_pump(
        self: &Arc<Self>,
        executor: Arc<dyn Executor>,
        mut stream: BoxStream<'static, Result<Bytes, DialError>>,
    ) {
        while let Some(next) = stream.next().await {
            let part = match next {
                Ok(part) => part,
                Err(e) => {
                    self.fail(e);
                    return;
                }
            };
            match self.write_next_request_part() {
                WriteAction::Continue => executor.write_request_body_part(part),
                WriteAction::Wait(resumed) => {
                    executor.write_request_body_part(part);
                    match resumed.await {
                        Ok(Ok(())) => {}
                        _ => return,
                    }
                }
                WriteAction::Fail => return,
            }
        }
        self.forward_stream_finished();
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("Transaction")
            .field("key", &self.key)
            .field("state", &inner.state)
            .field("cancelled", &inner.cancelled)
            .finish()
    }
}
