//! Body interception.
//!
//! [`CapturingBody`] wraps a body (the outbound response body, and the inbound
//! request body when request-body logging is on) and forwards every frame
//! unchanged while copying data frames, in order, into a bounded accumulator.
//! Exactly one terminal event is reported to its [`BodyObserver`]:
//!
//! - end-of-stream (the inner body returned `None`, or was dropped after
//!   reporting [`is_end_stream`](http_body::Body::is_end_stream)): `complete`
//! - an error frame, or a drop before end-of-stream: `fault`

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use http_body::{Body as _, Frame, SizeHint};
use serde_json::Value;

use super::context::body_value;

/// Receives the terminal event of a [`CapturingBody`].
pub trait BodyObserver: Send + 'static {
    /// The body finished. `parse_error` is set when a JSON body failed to parse.
    fn complete(self: Box<Self>, body: CapturedBody, parse_error: Option<serde_json::Error>);

    /// The body stream failed or was abandoned before finishing.
    fn fault(self: Box<Self>, error: String);
}

/// What was captured from a response body.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyContent {
    Empty,
    Json(Value),
    Raw(Bytes),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapturedBody {
    pub content: BodyContent,
    /// The body was longer than the capture limit.
    pub truncated: bool,
}

impl CapturedBody {
    pub fn empty() -> Self {
        Self {
            content: BodyContent::Empty,
            truncated: false,
        }
    }

    /// Parse `bytes` as JSON when `json` is set and nothing was cut off.
    /// On parse failure the raw bytes are kept and the error returned.
    pub fn finalize(
        bytes: Bytes,
        json: bool,
        truncated: bool,
    ) -> (Self, Option<serde_json::Error>) {
        if bytes.is_empty() {
            return (Self { truncated, ..Self::empty() }, None);
        }
        if !json || truncated {
            return (
                Self {
                    content: BodyContent::Raw(bytes),
                    truncated,
                },
                None,
            );
        }
        match serde_json::from_slice(&bytes) {
            Ok(value) => (
                Self {
                    content: BodyContent::Json(value),
                    truncated,
                },
                None,
            ),
            Err(e) => (
                Self {
                    content: BodyContent::Raw(bytes),
                    truncated,
                },
                Some(e),
            ),
        }
    }

    pub fn to_value(&self) -> Value {
        match &self.content {
            BodyContent::Empty => Value::Null,
            BodyContent::Json(value) => value.clone(),
            BodyContent::Raw(bytes) => body_value(bytes),
        }
    }
}

/// Body decorator that records what passes through it.
pub struct CapturingBody {
    inner: Body,
    buf: BytesMut,
    limit: usize,
    truncated: bool,
    json: bool,
    observer: Option<Box<dyn BodyObserver>>,
}

impl CapturingBody {
    /// `json`: the response declared an `application/json` content type.
    pub fn new(inner: Body, limit: usize, json: bool, observer: Box<dyn BodyObserver>) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            limit,
            truncated: false,
            json,
            observer: Some(observer),
        }
    }

    fn record(&mut self, data: &Bytes) {
        let room = self.limit.saturating_sub(self.buf.len());
        if data.len() > room {
            self.buf.extend_from_slice(&data[..room]);
            self.truncated = true;
        } else {
            self.buf.extend_from_slice(data);
        }
    }

    fn finish(&mut self) {
        if let Some(observer) = self.observer.take() {
            let bytes = std::mem::take(&mut self.buf).freeze();
            let (body, parse_error) = CapturedBody::finalize(bytes, self.json, self.truncated);
            observer.complete(body, parse_error);
        }
    }

    fn fail(&mut self, error: String) {
        if let Some(observer) = self.observer.take() {
            observer.fault(error);
        }
    }
}

impl http_body::Body for CapturingBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.record(data);
                }
            }
            Poll::Ready(Some(Err(e))) => this.fail(e.to_string()),
            Poll::Ready(None) => this.finish(),
            Poll::Pending => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for CapturingBody {
    fn drop(&mut self) {
        if self.observer.is_none() {
            return;
        }
        if self.inner.is_end_stream() {
            self.finish();
        } else {
            self.fail("response body dropped before completion".to_owned());
        }
    }
}
