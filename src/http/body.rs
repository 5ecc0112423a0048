//! Request body variants and the bounded response-body source.

use crate::base::error::DialError;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::Stream;
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

/// The body attached to an outbound request.
pub enum RequestBody {
    Empty,
    /// Fully-buffered body written in a single part.
    Buffered(Bytes),
    /// Caller-supplied async byte source, pumped with backpressure.
    Streaming(BoxStream<'static, Result<Bytes, DialError>>),
}

impl RequestBody {
    pub fn empty() -> Self {
        Self::Empty
    }

    pub fn bytes(buf: impl Into<Bytes>) -> Self {
        Self::Buffered(buf.into())
    }

    pub fn stream(
        stream: impl Stream<Item = Result<Bytes, DialError>> + Send + 'static,
    ) -> Self {
        Self::Streaming(Box::pin(stream))
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Buffered(buf) => f.debug_tuple("Buffered").field(&buf.len()).finish(),
            Self::Streaming(_) => f.write_str("Streaming"),
        }
    }
}

/// Queued parts above this pause the producer until the consumer drains.
const HIGH_WATERMARK: usize = 8;

/// Producer-side verdict after enqueueing a part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerAction {
    /// Keep delivering parts.
    ProduceMore,
    /// Demand is paused; deliveries resume once the consumer drains the
    /// queue and the demand hook fires.
    StopProducing,
}

struct SourceState {
    queue: VecDeque<Bytes>,
    /// `Some(Ok)` = finished cleanly, `Some(Err)` = finished with an error
    /// still to deliver. Set exactly once.
    end: Option<Result<(), DialError>>,
    producing: bool,
    waker: Option<Waker>,
    demand_hook: Option<Arc<dyn Fn() + Send + Sync>>,
}

/// Producer half: fed by the transaction as response body parts arrive.
#[derive(Clone)]
pub struct ResponseBodySink {
    state: Arc<Mutex<SourceState>>,
}

/// Consumer half: the async stream handed to the response's reader.
pub struct ResponseBody {
    state: Arc<Mutex<SourceState>>,
}

/// Create a connected sink/stream pair.
pub fn response_body_channel() -> (ResponseBodySink, ResponseBody) {
    let state = Arc::new(Mutex::new(SourceState {
        queue: VecDeque::new(),
        end: None,
        producing: true,
        waker: None,
        demand_hook: None,
    }));
    (
        ResponseBodySink {
            state: state.clone(),
        },
        ResponseBody { state },
    )
}

impl ResponseBodySink {
    /// Enqueue a body part, waking the consumer. Crossing the watermark
    /// pauses demand until the consumer drains.
    pub fn push(&self, part: Bytes) -> ProducerAction {
        let waker;
        let action;
        {
            let mut state = self.state.lock().unwrap();
            debug_assert!(state.end.is_none(), "push after finish");
            state.queue.push_back(part);
            waker = state.waker.take();
            action = if state.queue.len() >= HIGH_WATERMARK {
                state.producing = false;
                ProducerAction::StopProducing
            } else {
                ProducerAction::ProduceMore
            };
        }
        if let Some(waker) = waker {
            waker.wake();
        }
        action
    }

    /// Finish the stream, optionally with a terminal error. Later calls
    /// no-op: the source finishes exactly once.
    pub fn finish(&self, error: Option<DialError>) {
        let waker;
        {
            let mut state = self.state.lock().unwrap();
            if state.end.is_some() {
                return;
            }
            state.end = Some(match error {
                None => Ok(()),
                Some(e) => Err(e),
            });
            waker = state.waker.take();
        }
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().unwrap().end.is_some()
    }

    /// Install the callback invoked when the consumer drains a paused queue
    /// and demand resumes.
    pub fn set_demand_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.state.lock().unwrap().demand_hook = Some(Arc::new(hook));
    }
}

impl Stream for ResponseBody {
    type Item = Result<Bytes, DialError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let resumed_hook;
        let result = {
            let mut state = self.state.lock().unwrap();
            if let Some(part) = state.queue.pop_front() {
                // Draining below the watermark resumes demand.
                if !state.producing && state.queue.len() < HIGH_WATERMARK {
                    state.producing = true;
                    resumed_hook = state.demand_hook.clone();
                } else {
                    resumed_hook = None;
                }
                Poll::Ready(Some(Ok(part)))
            } else {
                resumed_hook = None;
                match state.end.take() {
                    Some(Ok(())) => {
                        state.end = Some(Ok(()));
                        Poll::Ready(None)
                    }
                    Some(Err(e)) => {
                        // The error is delivered once; the stream then ends.
                        state.end = Some(Ok(()));
                        Poll::Ready(Some(Err(e)))
                    }
                    None => {
                        state.waker = Some(cx.waker().clone());
                        Poll::Pending
                    }
                }
            }
        };
        if let Some(hook) = resumed_hook {
            hook();
        }
        result
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("ResponseBody")
            .field("queued", &state.queue.len())
            .field("finished", &state.end.is_some())
            .finish()
    }
}
