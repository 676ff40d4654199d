//! Time-synchronized acquisition from a timestamped message stream
//!
//! A [`SynchronizedReader`] answers one question: "what did the stream say at
//! or after this instant?". Messages older than the reference instant are
//! discarded, so data sampled before a move can never be attributed to the
//! position reached after it. The last accepted message is cached, which lets
//! monitor fields be read from the exact snapshot the primary read used.

use crate::error::{Result, ScanError};
use crate::types::Value;
use crate::utils::poll_with_timeout;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, trace, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Logical stream timestamp: seconds plus nanosecond offset
///
/// Ordering is lexicographic on `(secs, nanos)`, which is exactly the
/// freshness rule: equal seconds need an equal or larger offset, otherwise
/// the seconds must be larger.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct StreamTimestamp {
    pub secs: u64,
    pub nanos: u32,
}

impl StreamTimestamp {
    pub fn new(secs: u64, nanos: u32) -> Self {
        // Normalize so nanos always stays below one second
        Self {
            secs: secs + (nanos / 1_000_000_000) as u64,
            nanos: nanos % 1_000_000_000,
        }
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self::from_duration(since_epoch)
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self {
            secs: duration.as_secs(),
            nanos: duration.subsec_nanos(),
        }
    }

    /// Split a floating point epoch timestamp into seconds and nanoseconds
    pub fn from_secs_f64(timestamp: f64) -> Self {
        let secs = timestamp.trunc().max(0.0) as u64;
        let nanos = (timestamp.fract().max(0.0) * 1e9) as u32;
        Self::new(secs, nanos)
    }

    pub fn as_duration(&self) -> Duration {
        Duration::new(self.secs, self.nanos)
    }

    pub fn checked_add(&self, offset: Duration) -> Option<Self> {
        self.as_duration().checked_add(offset).map(Self::from_duration)
    }

    pub fn checked_sub(&self, offset: Duration) -> Option<Self> {
        self.as_duration().checked_sub(offset).map(Self::from_duration)
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future
    pub fn saturating_duration_since(&self, earlier: StreamTimestamp) -> Duration {
        self.as_duration().saturating_sub(earlier.as_duration())
    }

    /// A message stamped `self` is fresh relative to `reference`
    pub fn is_at_or_after(&self, reference: &StreamTimestamp) -> bool {
        self >= reference
    }
}

/// One message from the stream: a timestamp and a field mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynchronizedMessage {
    pub timestamp: StreamTimestamp,
    pub fields: HashMap<String, Value>,
}

impl SynchronizedMessage {
    pub fn new(timestamp: StreamTimestamp) -> Self {
        Self {
            timestamp,
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, id: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(id.into(), value.into());
        self
    }

    pub fn get(&self, id: &str) -> Option<&Value> {
        self.fields.get(id)
    }
}

/// Caller-supplied predicate; messages it rejects are dropped before the freshness check
pub type MessageFilter = Arc<dyn Fn(&SynchronizedMessage) -> bool + Send + Sync>;

/// What to do when a requested field is absent from the matched message
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingFieldPolicy {
    /// Fail with [`ScanError::MissingField`]
    #[default]
    Raise,
    /// Substitute this value
    UseDefault(Value),
}

/// A field to extract from stream messages
///
/// `missing` is `None` when the field inherits the reader's default policy.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub id: String,
    pub missing: Option<MissingFieldPolicy>,
}

impl FieldSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            missing: None,
        }
    }

    pub fn or_default(mut self, value: impl Into<Value>) -> Self {
        self.missing = Some(MissingFieldPolicy::UseDefault(value.into()));
        self
    }

    pub fn or_raise(mut self) -> Self {
        self.missing = Some(MissingFieldPolicy::Raise);
        self
    }
}

impl From<&str> for FieldSpec {
    fn from(id: &str) -> Self {
        FieldSpec::new(id)
    }
}

/// Source of stream messages
///
/// `receive` blocks for at most `timeout` and yields `None` when nothing
/// arrived in time. Transport failures are errors.
pub trait MessageSource: Send {
    fn receive(&mut self, timeout: Duration) -> Result<Option<SynchronizedMessage>>;

    /// Release the underlying connection
    fn disconnect(&mut self) {}
}

/// Message source backed by a crossbeam channel
///
/// The TCP transport feeds one of these from its background thread; tests
/// feed it directly.
pub struct ChannelSource {
    receiver: Option<Receiver<SynchronizedMessage>>,
    on_disconnect: Option<Box<dyn FnOnce() + Send>>,
}

impl ChannelSource {
    pub fn new(receiver: Receiver<SynchronizedMessage>) -> Self {
        Self {
            receiver: Some(receiver),
            on_disconnect: None,
        }
    }

    /// Run `callback` once when the source is disconnected
    pub fn with_disconnect_hook(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_disconnect = Some(Box::new(callback));
        self
    }

    pub fn is_connected(&self) -> bool {
        self.receiver.is_some()
    }
}

impl MessageSource for ChannelSource {
    fn receive(&mut self, timeout: Duration) -> Result<Option<SynchronizedMessage>> {
        let receiver = self
            .receiver
            .as_ref()
            .ok_or_else(|| ScanError::Protocol("Stream is closed".to_string()))?;

        match receiver.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ScanError::Protocol(
                "Stream disconnected while waiting for messages".to_string(),
            )),
        }
    }

    fn disconnect(&mut self) {
        self.receiver = None;
        if let Some(callback) = self.on_disconnect.take() {
            callback();
        }
    }
}

impl Drop for ChannelSource {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Reader that matches stream messages against a freshness deadline
pub struct SynchronizedReader {
    source: Box<dyn MessageSource>,
    filter: Option<MessageFilter>,
    default_policy: MissingFieldPolicy,
    receive_timeout: Duration,
    read_timeout: Duration,
    cache: Option<SynchronizedMessage>,
}

/// Reader shared between a primary read group and conditions on its snapshot
pub type SharedStreamReader = Arc<Mutex<SynchronizedReader>>;

impl SynchronizedReader {
    pub fn new(source: impl MessageSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            filter: None,
            default_policy: MissingFieldPolicy::Raise,
            receive_timeout: Duration::from_millis(100),
            read_timeout: Duration::from_secs(10),
            cache: None,
        }
    }

    pub fn with_filter(mut self, filter: Option<MessageFilter>) -> Self {
        self.filter = filter;
        self
    }

    /// Policy for fields that do not configure their own
    pub fn with_default_policy(mut self, policy: MissingFieldPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Bound on a single pull from the source
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Timeout used by [`SynchronizedReader::read_fresh`]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn into_shared(self) -> SharedStreamReader {
        Arc::new(Mutex::new(self))
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Read `fields` from the first message stamped at or after `reference`
    ///
    /// The timeout counts wall-clock time since `reference`, so a reference
    /// taken long before the call leaves less time to wait. Stale and
    /// filtered messages are consumed and dropped. On timeout nothing is
    /// cached and no partial result is returned.
    pub fn read(
        &mut self,
        reference: StreamTimestamp,
        fields: &[FieldSpec],
        timeout: Duration,
    ) -> Result<Vec<Value>> {
        let already_elapsed = StreamTimestamp::now().saturating_duration_since(reference);
        let budget = timeout.saturating_sub(already_elapsed);
        let receive_timeout = self.receive_timeout;
        let source = &mut self.source;
        let filter = &self.filter;

        let accepted = poll_with_timeout(
            || -> Result<Option<SynchronizedMessage>> {
                let Some(message) = source.receive(receive_timeout)? else {
                    return Ok(None);
                };

                if let Some(filter) = filter {
                    if !filter(&message) {
                        trace!("Message at {:?} rejected by filter", message.timestamp);
                        return Ok(None);
                    }
                }

                if message.timestamp.is_at_or_after(&reference) {
                    Ok(Some(message))
                } else {
                    trace!(
                        "Discarding stale message at {:?} (reference {:?})",
                        message.timestamp, reference
                    );
                    Ok(None)
                }
            },
            budget,
            Duration::ZERO,
        )
        .map_err(ScanError::from)?;

        match accepted {
            Some(message) => {
                debug!(
                    "Accepted message at {:?} for reference {:?}",
                    message.timestamp, reference
                );
                self.cache = Some(message);
                self.read_cached(fields)
            }
            None => {
                warn!("No fresh stream message within {:?}", timeout);
                Err(ScanError::AcquisitionTimeout { timeout })
            }
        }
    }

    /// Read from the first message at or after the moment of the call
    pub fn read_fresh(&mut self, fields: &[FieldSpec]) -> Result<Vec<Value>> {
        let reference = StreamTimestamp::now();
        let timeout = self.read_timeout;
        self.read(reference, fields, timeout)
    }

    /// Re-extract fields from the cached message without waiting
    pub fn read_cached(&self, fields: &[FieldSpec]) -> Result<Vec<Value>> {
        let message = self.cache.as_ref().ok_or_else(|| {
            ScanError::EmptyCache(fields.iter().map(|field| field.id.clone()).collect())
        })?;

        fields
            .iter()
            .map(|field| match message.get(&field.id) {
                Some(value) => Ok(value.clone()),
                None => self.missing_value(field),
            })
            .collect()
    }

    pub fn cached_timestamp(&self) -> Option<StreamTimestamp> {
        self.cache.as_ref().map(|message| message.timestamp)
    }

    /// Disconnect from the stream and clear the message cache
    pub fn close(&mut self) {
        self.source.disconnect();
        self.cache = None;
        debug!("Synchronized reader closed");
    }

    fn missing_value(&self, field: &FieldSpec) -> Result<Value> {
        match field.missing.as_ref().unwrap_or(&self.default_policy) {
            MissingFieldPolicy::Raise => Err(ScanError::MissingField(field.id.clone())),
            MissingFieldPolicy::UseDefault(value) => Ok(value.clone()),
        }
    }
}
