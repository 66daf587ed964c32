// SPDX-License-Identifier: MIT OR Apache-2.0
//! Streams, durable consumers, and delivery state.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

use weft_core::subject::{is_valid_token, subject_matches};

/// How a stream retains messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Keep messages up to configured limits; consumption does not remove
    /// them. Used for broadcast event streams.
    Limits,
    /// Each message is owned by one consumer group and removed on ack. Used
    /// for command streams.
    WorkQueue,
}

/// Configuration for a named stream.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Stream name (single subject token).
    pub name: String,
    /// Subject filters this stream captures (wildcards allowed).
    pub subjects: Vec<String>,
    /// Retention policy.
    pub retention: Retention,
    /// For [`Retention::Limits`]: cap after which the oldest message is
    /// evicted. `None` keeps everything.
    pub max_messages: Option<usize>,
}

impl StreamConfig {
    /// A limits-retention stream.
    pub fn limits(name: impl Into<String>, subjects: Vec<String>) -> Self {
        Self {
            name: name.into(),
            subjects,
            retention: Retention::Limits,
            max_messages: None,
        }
    }

    /// A work-queue stream.
    pub fn work_queue(name: impl Into<String>, subjects: Vec<String>) -> Self {
        Self {
            name: name.into(),
            subjects,
            retention: Retention::WorkQueue,
            max_messages: None,
        }
    }
}

/// Durable consumer definition registered on a work-queue stream.
#[derive(Debug, Clone)]
pub struct ConsumerSpec {
    /// Stream the consumer reads from.
    pub stream: String,
    /// Durable name; delivery state survives consumer restarts.
    pub durable_name: String,
    /// Subject filter (wildcards allowed).
    pub filter_subject: String,
    /// How long a fetched message may stay unacknowledged before the broker
    /// redelivers it.
    pub ack_wait: Duration,
    /// Progressive redelivery delays applied on nak; the last entry repeats.
    pub backoff: Vec<Duration>,
}

/// Errors from broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The named stream does not exist.
    #[error("unknown stream: {name}")]
    UnknownStream {
        /// The missing stream name.
        name: String,
    },

    /// No durable consumer with this name is registered on the stream.
    #[error("unknown consumer {durable} on stream {stream}")]
    UnknownConsumer {
        /// Stream name.
        stream: String,
        /// Durable consumer name.
        durable: String,
    },

    /// No stream's subject set captures this subject.
    #[error("no stream bound to subject: {subject}")]
    NoStreamForSubject {
        /// The unroutable subject.
        subject: String,
    },

    /// Another stream already claims an identical subject filter.
    #[error("subject {subject} already bound to stream {stream}")]
    SubjectTaken {
        /// The conflicting filter.
        subject: String,
        /// The stream that owns it.
        stream: String,
    },

    /// The subject is not a valid dot-separated token hierarchy.
    #[error("invalid subject {subject}: {reason}")]
    InvalidSubject {
        /// The offending subject.
        subject: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Fetch was issued against a limits stream.
    #[error("stream {name} is not a work queue")]
    NotWorkQueue {
        /// Stream name.
        name: String,
    },
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Available { deliver_at: Option<Instant> },
    InFlight { deadline: Instant },
}

#[derive(Debug)]
struct MessageState {
    seq: u64,
    subject: String,
    payload: Vec<u8>,
    num_delivered: u32,
    phase: Phase,
}

struct StreamState {
    config: StreamConfig,
    next_seq: u64,
    messages: Vec<MessageState>,
}

#[derive(Default)]
struct BrokerInner {
    streams: BTreeMap<String, StreamState>,
    consumers: BTreeMap<(String, String), ConsumerSpec>,
}

/// A stored message as seen through stream introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    /// Broker-assigned sequence within the stream.
    pub seq: u64,
    /// Subject the message was published on.
    pub subject: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

/// Broker delivery metadata attached to a fetched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryInfo {
    /// Sequence of the message within its stream.
    pub stream_sequence: u64,
    /// 1-based count of deliveries, this one included.
    pub num_delivered: u32,
}

/// A fetched work-queue message awaiting explicit acknowledgement.
///
/// Dropping the handle without calling [`ack`](Self::ack) leaves the message
/// in flight; the broker redelivers it once the consumer's ack wait expires.
/// That is exactly the crash window the runtime's idempotency protocol
/// covers.
pub struct PendingMessage {
    broker: Broker,
    stream: String,
    durable: String,
    /// Subject the message was published on.
    pub subject: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// Delivery metadata.
    pub info: DeliveryInfo,
}

impl PendingMessage {
    /// Acknowledge: the message is done and leaves the work queue.
    pub async fn ack(&self) {
        self.broker.ack(&self.stream, self.info.stream_sequence).await;
    }

    /// Negative-acknowledge: redeliver after the consumer's progressive
    /// backoff delay.
    pub async fn nak(&self) {
        self.broker
            .nak(&self.stream, &self.durable, self.info.stream_sequence)
            .await;
    }
}

/// In-process durable broker with named streams and durable pull consumers.
///
/// Cloning is cheap; clones share state.
#[derive(Clone, Default)]
pub struct Broker {
    inner: Arc<Mutex<BrokerInner>>,
    notify: Arc<Notify>,
}

impl Broker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotently create a stream. An existing stream with the same name
    /// is left untouched.
    ///
    /// # Errors
    ///
    /// [`BrokerError::SubjectTaken`] when another stream already claims one
    /// of the subject filters; [`BrokerError::InvalidSubject`] for malformed
    /// filters.
    pub async fn ensure_stream(&self, config: StreamConfig) -> Result<(), BrokerError> {
        for subject in &config.subjects {
            validate_subject(subject, true)?;
        }
        let mut inner = self.inner.lock().await;
        if inner.streams.contains_key(&config.name) {
            return Ok(());
        }
        for (name, state) in &inner.streams {
            for subject in &config.subjects {
                if state.config.subjects.iter().any(|s| s == subject) {
                    return Err(BrokerError::SubjectTaken {
                        subject: subject.clone(),
                        stream: name.clone(),
                    });
                }
            }
        }
        debug!(target: "weft.broker", stream = %config.name, subjects = ?config.subjects, "stream ensured");
        inner.streams.insert(
            config.name.clone(),
            StreamState {
                config,
                next_seq: 0,
                messages: Vec::new(),
            },
        );
        Ok(())
    }

    /// Idempotently register a durable consumer on a work-queue stream.
    ///
    /// # Errors
    ///
    /// [`BrokerError::UnknownStream`] when the stream does not exist;
    /// [`BrokerError::NotWorkQueue`] when it is a limits stream.
    pub async fn ensure_consumer(&self, spec: ConsumerSpec) -> Result<(), BrokerError> {
        validate_subject(&spec.filter_subject, true)?;
        let mut inner = self.inner.lock().await;
        let stream = inner
            .streams
            .get(&spec.stream)
            .ok_or_else(|| BrokerError::UnknownStream {
                name: spec.stream.clone(),
            })?;
        if stream.config.retention != Retention::WorkQueue {
            return Err(BrokerError::NotWorkQueue {
                name: spec.stream.clone(),
            });
        }
        debug!(
            target: "weft.broker",
            stream = %spec.stream,
            durable = %spec.durable_name,
            filter = %spec.filter_subject,
            "consumer ensured"
        );
        inner
            .consumers
            .insert((spec.stream.clone(), spec.durable_name.clone()), spec);
        Ok(())
    }

    /// Publish a payload on a concrete subject. The first stream whose
    /// subject set captures it stores the message.
    ///
    /// # Errors
    ///
    /// [`BrokerError::NoStreamForSubject`] when nothing captures the
    /// subject; [`BrokerError::InvalidSubject`] for malformed subjects.
    pub async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<u64, BrokerError> {
        validate_subject(subject, false)?;
        let mut inner = self.inner.lock().await;
        let state = inner
            .streams
            .values_mut()
            .find(|s| s.config.subjects.iter().any(|f| subject_matches(f, subject)))
            .ok_or_else(|| BrokerError::NoStreamForSubject {
                subject: subject.to_string(),
            })?;

        state.next_seq += 1;
        let seq = state.next_seq;
        state.messages.push(MessageState {
            seq,
            subject: subject.to_string(),
            payload,
            num_delivered: 0,
            phase: Phase::Available { deliver_at: None },
        });
        if state.config.retention == Retention::Limits
            && let Some(max) = state.config.max_messages
            && state.messages.len() > max
        {
            state.messages.remove(0);
        }
        debug!(target: "weft.broker", stream = %state.config.name, %subject, seq, "published");
        drop(inner);
        self.notify.notify_waiters();
        Ok(seq)
    }

    /// Pull up to `max_messages` deliverable messages for a durable
    /// consumer, waiting up to `max_wait` for one to become available.
    /// Returns an empty batch on timeout.
    ///
    /// Fetching also requeues in-flight messages whose ack wait expired;
    /// redelivery is driven by the pull loop, not a background timer.
    ///
    /// # Errors
    ///
    /// [`BrokerError::UnknownConsumer`], [`BrokerError::UnknownStream`], or
    /// [`BrokerError::NotWorkQueue`].
    pub async fn fetch(
        &self,
        stream: &str,
        durable: &str,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<Vec<PendingMessage>, BrokerError> {
        let wait_deadline = Instant::now() + max_wait;
        loop {
            let next_ready;
            {
                let mut inner = self.inner.lock().await;
                let spec = inner
                    .consumers
                    .get(&(stream.to_string(), durable.to_string()))
                    .cloned()
                    .ok_or_else(|| BrokerError::UnknownConsumer {
                        stream: stream.to_string(),
                        durable: durable.to_string(),
                    })?;
                let state =
                    inner
                        .streams
                        .get_mut(stream)
                        .ok_or_else(|| BrokerError::UnknownStream {
                            name: stream.to_string(),
                        })?;
                if state.config.retention != Retention::WorkQueue {
                    return Err(BrokerError::NotWorkQueue {
                        name: stream.to_string(),
                    });
                }

                let now = Instant::now();
                for msg in &mut state.messages {
                    if let Phase::InFlight { deadline } = msg.phase
                        && now >= deadline
                    {
                        debug!(
                            target: "weft.broker",
                            stream, seq = msg.seq,
                            "ack wait expired, requeueing"
                        );
                        msg.phase = Phase::Available { deliver_at: None };
                    }
                }

                let mut batch = Vec::new();
                for msg in &mut state.messages {
                    if batch.len() >= max_messages {
                        break;
                    }
                    let ready = match msg.phase {
                        Phase::Available { deliver_at } => {
                            deliver_at.is_none_or(|t| now >= t)
                        }
                        Phase::InFlight { .. } => false,
                    };
                    if ready && subject_matches(&spec.filter_subject, &msg.subject) {
                        msg.num_delivered += 1;
                        msg.phase = Phase::InFlight {
                            deadline: now + spec.ack_wait,
                        };
                        batch.push(PendingMessage {
                            broker: self.clone(),
                            stream: stream.to_string(),
                            durable: durable.to_string(),
                            subject: msg.subject.clone(),
                            payload: msg.payload.clone(),
                            info: DeliveryInfo {
                                stream_sequence: msg.seq,
                                num_delivered: msg.num_delivered,
                            },
                        });
                    }
                }
                if !batch.is_empty() {
                    return Ok(batch);
                }

                next_ready = state
                    .messages
                    .iter()
                    .filter(|m| subject_matches(&spec.filter_subject, &m.subject))
                    .map(|m| match m.phase {
                        Phase::Available { deliver_at } => deliver_at.unwrap_or(now),
                        Phase::InFlight { deadline } => deadline,
                    })
                    .min();
            }

            let now = Instant::now();
            if now >= wait_deadline {
                return Ok(Vec::new());
            }
            // Bounded slices keep the loop honest even when a notify is
            // lost between unlock and wait.
            let mut wake = now + Duration::from_millis(25);
            if let Some(ready) = next_ready {
                wake = wake.min(ready.max(now));
            }
            wake = wake.min(wait_deadline);
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    /// All messages currently retained by a stream, in sequence order.
    /// In-flight work-queue messages are still present: a message leaves the
    /// queue only on ack.
    ///
    /// # Errors
    ///
    /// [`BrokerError::UnknownStream`].
    pub async fn stream_messages(&self, stream: &str) -> Result<Vec<StreamMessage>, BrokerError> {
        let inner = self.inner.lock().await;
        let state = inner
            .streams
            .get(stream)
            .ok_or_else(|| BrokerError::UnknownStream {
                name: stream.to_string(),
            })?;
        Ok(state
            .messages
            .iter()
            .map(|m| StreamMessage {
                seq: m.seq,
                subject: m.subject.clone(),
                payload: m.payload.clone(),
            })
            .collect())
    }

    /// Number of messages currently retained by a stream.
    ///
    /// # Errors
    ///
    /// [`BrokerError::UnknownStream`].
    pub async fn stream_len(&self, stream: &str) -> Result<usize, BrokerError> {
        Ok(self.stream_messages(stream).await?.len())
    }

    async fn ack(&self, stream: &str, seq: u64) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner.streams.get_mut(stream) {
            state.messages.retain(|m| m.seq != seq);
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    async fn nak(&self, stream: &str, durable: &str, seq: u64) {
        let mut inner = self.inner.lock().await;
        let num_delivered = inner
            .streams
            .get(stream)
            .and_then(|s| s.messages.iter().find(|m| m.seq == seq))
            .map(|m| m.num_delivered);
        let Some(num_delivered) = num_delivered else {
            return;
        };
        let delay = inner
            .consumers
            .get(&(stream.to_string(), durable.to_string()))
            .map(|spec| backoff_delay(&spec.backoff, num_delivered))
            .unwrap_or(Duration::ZERO);
        if let Some(state) = inner.streams.get_mut(stream)
            && let Some(msg) = state.messages.iter_mut().find(|m| m.seq == seq)
        {
            debug!(
                target: "weft.broker",
                stream, seq,
                num_delivered = msg.num_delivered,
                delay_ms = delay.as_millis() as u64,
                "nak, scheduling redelivery"
            );
            msg.phase = Phase::Available {
                deliver_at: Some(Instant::now() + delay),
            };
        }
        drop(inner);
        self.notify.notify_waiters();
    }
}

/// Delay before the next delivery, given how many deliveries have already
/// happened. The last backoff entry repeats once the sequence is exhausted.
fn backoff_delay(backoff: &[Duration], num_delivered: u32) -> Duration {
    if backoff.is_empty() {
        return Duration::ZERO;
    }
    let idx = (num_delivered.saturating_sub(1) as usize).min(backoff.len() - 1);
    backoff[idx]
}

fn validate_subject(subject: &str, allow_wildcards: bool) -> Result<(), BrokerError> {
    let invalid = |reason: &str| BrokerError::InvalidSubject {
        subject: subject.to_string(),
        reason: reason.to_string(),
    };
    if subject.is_empty() {
        return Err(invalid("empty subject"));
    }
    let tokens: Vec<&str> = subject.split('.').collect();
    for (i, token) in tokens.iter().enumerate() {
        match *token {
            "*" if allow_wildcards => {}
            ">" if allow_wildcards => {
                if i != tokens.len() - 1 {
                    return Err(invalid("'>' must be the last token"));
                }
            }
            "*" | ">" => return Err(invalid("wildcards only allowed in consumer filters")),
            t if is_valid_token(t) => {}
            _ => return Err(invalid("token outside [a-zA-Z0-9_-]")),
        }
    }
    Ok(())
}
