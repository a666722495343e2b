use futures::Stream;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::sync::mpsc;

use super::buffer::ResultBuffer;
use super::dispatcher::Completion;
use super::Pool;
use crate::error::PoolError;

/// Ordered results of one [`Pool::map`] call.
///
/// Yields one item per input, in input order, as soon as every earlier item
/// has been yielded. A failed task yields `Err` at its position and the
/// stream continues; a batch-level failure (such as a worker dying under the
/// default failure policy) yields the results already in order, then the
/// error, then ends.
///
/// Dropping the stream early abandons the batch: queued tasks are discarded
/// and running ones finish in the background.
pub struct MapStream<'a, R> {
    buffer: ResultBuffer<Result<R, PoolError>>,
    completions: Option<mpsc::UnboundedReceiver<Completion>>,
    failure: Option<PoolError>,
    done: bool,
    _pool: PhantomData<&'a mut Pool>,
}

impl<R> Unpin for MapStream<'_, R> {}

impl<'a, R> MapStream<'a, R> {
    pub(crate) fn new(len: usize, completions: mpsc::UnboundedReceiver<Completion>) -> Self {
        Self {
            buffer: ResultBuffer::new(len),
            completions: Some(completions),
            failure: None,
            done: false,
            _pool: PhantomData,
        }
    }

    /// A stream that yields `error` and ends.
    pub(crate) fn failed(error: PoolError) -> Self {
        Self {
            buffer: ResultBuffer::new(0),
            completions: None,
            failure: Some(error),
            done: false,
            _pool: PhantomData,
        }
    }

    /// Number of results not yet yielded.
    pub fn remaining(&self) -> usize {
        if self.done {
            0
        } else {
            self.buffer.remaining()
        }
    }
}

impl<R: DeserializeOwned> MapStream<'_, R> {
    fn store(&mut self, index: usize, item: Result<R, PoolError>) {
        if let Err(e) = self.buffer.fill(index, item) {
            self.failure = Some(PoolError::Protocol(e.to_string()));
        }
    }

    fn accept(&mut self, completion: Completion) {
        match completion {
            Completion::Value { index, value } => {
                let item = serde_json::from_value(value)
                    .map_err(|source| PoolError::Decode { index, source });
                self.store(index, item);
            }
            Completion::Failed { index, message } => {
                self.store(index, Err(PoolError::Task { index, message }));
            }
            Completion::Aborted(error) => self.failure = Some(error),
        }
    }
}

impl<R: DeserializeOwned> Stream for MapStream<'_, R> {
    type Item = Result<R, PoolError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.done {
                return Poll::Ready(None);
            }
            if let Some(item) = this.buffer.take_next() {
                return Poll::Ready(Some(item));
            }
            if let Some(error) = this.failure.take() {
                this.done = true;
                this.completions = None;
                return Poll::Ready(Some(Err(error)));
            }
            if this.buffer.is_finished() {
                this.done = true;
                this.completions = None;
                return Poll::Ready(None);
            }

            let Some(completions) = this.completions.as_mut() else {
                this.failure = Some(PoolError::Closed);
                continue;
            };
            match ready!(completions.poll_recv(cx)) {
                Some(completion) => this.accept(completion),
                None => this.failure = Some(PoolError::Closed),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (0, Some(remaining + usize::from(self.failure.is_some())))
    }
}
