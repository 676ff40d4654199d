use crate::error::{Result, ScanError};
use crate::stream::{ChannelSource, StreamTimestamp, SynchronizedMessage};
use crate::types::Value;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crossbeam_channel::TrySendError;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter, Cursor, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::thread;

const HEADER_SIZE: usize = 14;
const MAX_TEXT_LEN: u32 = 16 * 1024 * 1024;
const MAX_ITEMS: u32 = 1_000_000;
const MAX_DEPTH: usize = 64;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_TEXT: u8 = 4;
const TAG_ARRAY: u8 = 5;
const TAG_RECORD: u8 = 6;

/// Read one frame from `reader`
///
/// # Frame Format
/// Header (14 bytes, big endian): `secs: u64`, `nanos: u32`, `field_count: u16`.
/// Each field: `name_len: u16`, UTF-8 name, then a tagged value.
pub fn read_message<R: Read>(reader: &mut R) -> Result<SynchronizedMessage> {
    let mut header = [0u8; HEADER_SIZE];
    reader
        .read_exact(&mut header)
        .map_err(|e| ScanError::io(e, "Reading stream frame header"))?;

    let mut cursor = Cursor::new(&header[..]);
    let secs = cursor.read_u64::<BigEndian>().map_err(frame_error)?;
    let nanos = cursor.read_u32::<BigEndian>().map_err(frame_error)?;
    let field_count = cursor.read_u16::<BigEndian>().map_err(frame_error)?;

    if nanos >= 1_000_000_000 {
        return Err(ScanError::Protocol(format!(
            "Nanosecond offset out of range: {nanos}"
        )));
    }

    let mut message = SynchronizedMessage::new(StreamTimestamp::new(secs, nanos));
    for _ in 0..field_count {
        let name = read_name(reader)?;
        let value = read_value(reader, 0)?;
        message.fields.insert(name, value);
    }

    Ok(message)
}

/// Write one frame to `writer`; field order follows the message's map order
pub fn write_message<W: Write>(writer: &mut W, message: &SynchronizedMessage) -> Result<()> {
    let field_count = u16::try_from(message.fields.len())
        .map_err(|_| ScanError::Protocol("Too many fields for one frame".to_string()))?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + 16 * message.fields.len());
    frame.write_u64::<BigEndian>(message.timestamp.secs).map_err(frame_error)?;
    frame.write_u32::<BigEndian>(message.timestamp.nanos).map_err(frame_error)?;
    frame.write_u16::<BigEndian>(field_count).map_err(frame_error)?;

    for (name, value) in &message.fields {
        write_name(&mut frame, name)?;
        write_value(&mut frame, value, 0)?;
    }

    writer
        .write_all(&frame)
        .and_then(|_| writer.flush())
        .map_err(|e| ScanError::io(e, "Writing stream frame"))
}

fn frame_error(e: std::io::Error) -> ScanError {
    ScanError::io(e, "Decoding stream frame")
}

fn read_name<R: Read>(reader: &mut R) -> Result<String> {
    let len = reader.read_u16::<BigEndian>().map_err(frame_error)?;
    read_utf8(reader, len as usize)
}

fn read_utf8<R: Read>(reader: &mut R, len: usize) -> Result<String> {
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).map_err(frame_error)?;
    String::from_utf8(bytes)
        .map_err(|e| ScanError::Protocol(format!("Invalid UTF-8 in frame: {e}")))
}

fn read_count<R: Read>(reader: &mut R) -> Result<u32> {
    let count = reader.read_u32::<BigEndian>().map_err(frame_error)?;
    if count > MAX_ITEMS {
        return Err(ScanError::Protocol(format!(
            "Collection of {count} items exceeds frame limit"
        )));
    }
    Ok(count)
}

fn nesting_error() -> ScanError {
    ScanError::Protocol("Value nesting exceeds frame limit".to_string())
}

/// `depth` counts the enclosing arrays and records
fn read_value<R: Read>(reader: &mut R, depth: usize) -> Result<Value> {
    let tag = reader.read_u8().map_err(frame_error)?;
    let value = match tag {
        TAG_NULL => Value::Null,
        TAG_BOOL => Value::Bool(reader.read_u8().map_err(frame_error)? != 0),
        TAG_INT => Value::Int(reader.read_i64::<BigEndian>().map_err(frame_error)?),
        TAG_FLOAT => Value::Float(reader.read_f64::<BigEndian>().map_err(frame_error)?),
        TAG_TEXT => {
            let len = reader.read_u32::<BigEndian>().map_err(frame_error)?;
            if len > MAX_TEXT_LEN {
                return Err(ScanError::Protocol(format!(
                    "String of {len} bytes exceeds frame limit"
                )));
            }
            Value::Text(read_utf8(reader, len as usize)?)
        }
        TAG_ARRAY => {
            if depth >= MAX_DEPTH {
                return Err(nesting_error());
            }
            let count = read_count(reader)?;
            let mut items = Vec::with_capacity(count.min(1024) as usize);
            for _ in 0..count {
                items.push(read_value(reader, depth + 1)?);
            }
            Value::Array(items)
        }
        TAG_RECORD => {
            if depth >= MAX_DEPTH {
                return Err(nesting_error());
            }
            let count = read_count(reader)?;
            let mut fields = BTreeMap::new();
            for _ in 0..count {
                let name = read_name(reader)?;
                fields.insert(name, read_value(reader, depth + 1)?);
            }
            Value::Record(fields)
        }
        other => {
            return Err(ScanError::Protocol(format!("Unknown value tag {other}")));
        }
    };
    Ok(value)
}

fn write_name(frame: &mut Vec<u8>, name: &str) -> Result<()> {
    let len = u16::try_from(name.len())
        .map_err(|_| ScanError::Protocol(format!("Field name too long: {name}")))?;
    frame.write_u16::<BigEndian>(len).map_err(frame_error)?;
    frame.extend_from_slice(name.as_bytes());
    Ok(())
}

fn write_count(frame: &mut Vec<u8>, count: usize) -> Result<()> {
    let count = u32::try_from(count)
        .ok()
        .filter(|count| *count <= MAX_ITEMS)
        .ok_or_else(|| ScanError::Protocol("Collection exceeds frame limit".to_string()))?;
    frame.write_u32::<BigEndian>(count).map_err(frame_error)
}

fn write_value(frame: &mut Vec<u8>, value: &Value, depth: usize) -> Result<()> {
    match value {
        Value::Null => frame.write_u8(TAG_NULL).map_err(frame_error),
        Value::Bool(v) => {
            frame.write_u8(TAG_BOOL).map_err(frame_error)?;
            frame.write_u8(u8::from(*v)).map_err(frame_error)
        }
        Value::Int(v) => {
            frame.write_u8(TAG_INT).map_err(frame_error)?;
            frame.write_i64::<BigEndian>(*v).map_err(frame_error)
        }
        Value::Float(v) => {
            frame.write_u8(TAG_FLOAT).map_err(frame_error)?;
            frame.write_f64::<BigEndian>(*v).map_err(frame_error)
        }
        Value::Text(v) => {
            let len = u32::try_from(v.len())
                .ok()
                .filter(|len| *len <= MAX_TEXT_LEN)
                .ok_or_else(|| ScanError::Protocol("String exceeds frame limit".to_string()))?;
            frame.write_u8(TAG_TEXT).map_err(frame_error)?;
            frame.write_u32::<BigEndian>(len).map_err(frame_error)?;
            frame.extend_from_slice(v.as_bytes());
            Ok(())
        }
        Value::Array(_) | Value::Record(_) if depth >= MAX_DEPTH => Err(nesting_error()),
        Value::Array(items) => {
            frame.write_u8(TAG_ARRAY).map_err(frame_error)?;
            write_count(frame, items.len())?;
            items
                .iter()
                .try_for_each(|item| write_value(frame, item, depth + 1))
        }
        Value::Record(fields) => {
            frame.write_u8(TAG_RECORD).map_err(frame_error)?;
            write_count(frame, fields.len())?;
            for (name, item) in fields {
                write_name(frame, name)?;
                write_value(frame, item, depth + 1)?;
            }
            Ok(())
        }
    }
}

/// TCP connection to a timestamped message stream
pub struct TcpMessageStream {
    reader: BufReader<TcpStream>,
    peer: SocketAddr,
}

impl TcpMessageStream {
    /// Connect to a stream server
    ///
    /// # Arguments
    /// * `addr` - Server address (e.g., "127.0.0.1")
    /// * `port` - Stream port
    pub fn connect(addr: &str, port: u16) -> Result<Self> {
        let socket_addr: SocketAddr = format!("{addr}:{port}")
            .parse()
            .map_err(|_| ScanError::Protocol(format!("Invalid stream address: {addr}:{port}")))?;

        let stream = TcpStream::connect(socket_addr).map_err(|e| {
            ScanError::io(e, format!("Failed to connect to stream at {socket_addr}"))
        })?;

        info!("Connected to message stream at {socket_addr}");

        Ok(Self {
            reader: BufReader::new(stream),
            peer: socket_addr,
        })
    }

    /// Read a single message, blocking until a full frame arrives
    pub fn read_message(&mut self) -> Result<SynchronizedMessage> {
        read_message(&mut self.reader)
    }

    /// Spawn background reader thread
    ///
    /// Frames are decoded on a dedicated thread and handed over through a
    /// bounded channel holding at most `capacity` messages; when the consumer
    /// falls behind the oldest message is dropped. Disconnecting the returned
    /// source shuts the socket down, which ends the thread.
    pub fn spawn_background_reader(mut self, capacity: usize) -> Result<ChannelSource> {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        let overflow = receiver.clone();
        let control = self
            .reader
            .get_ref()
            .try_clone()
            .map_err(|e| ScanError::io(e, "Cloning stream socket"))?;
        let peer = self.peer;

        thread::spawn(move || {
            debug!("Started stream reader thread for {peer}");
            let mut dropped: u64 = 0;

            loop {
                let message = match self.read_message() {
                    Ok(message) => message,
                    Err(e) => {
                        info!("Stream {peer} ended: {e}");
                        break;
                    }
                };

                match sender.try_send(message) {
                    Ok(()) => {}
                    Err(TrySendError::Full(message)) => {
                        let _ = overflow.try_recv();
                        dropped += 1;
                        if dropped % 100 == 1 {
                            warn!("Stream consumer falling behind, {dropped} messages dropped");
                        }
                        let _ = sender.try_send(message);
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
        });

        Ok(ChannelSource::new(receiver).with_disconnect_hook(move || {
            let _ = control.shutdown(Shutdown::Both);
            info!("Disconnected from message stream at {peer}");
        }))
    }
}

/// Writes frames to any byte sink, e.g. an accepted TCP connection
pub struct StreamSender<W: Write> {
    writer: BufWriter<W>,
    sent: u64,
}

impl<W: Write> StreamSender<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            sent: 0,
        }
    }

    pub fn send(&mut self, message: &SynchronizedMessage) -> Result<()> {
        write_message(&mut self.writer, message)?;
        self.sent += 1;
        Ok(())
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{FieldSpec, MessageSource, SynchronizedReader};
    use std::net::TcpListener;
    use std::time::Duration;

    fn sample_message() -> SynchronizedMessage {
        let mut record = BTreeMap::new();
        record.insert("gain".to_string(), Value::Float(1.5));
        SynchronizedMessage::new(StreamTimestamp::new(1_700_000_000, 250_000_000))
            .with_field("CAMERA1:X", 12)
            .with_field("CAMERA1:NAME", "cam")
            .with_field("CAMERA1:PROFILE", vec![0.5, 1.5])
            .with_field("CAMERA1:VALID", true)
            .with_field("CAMERA1:META", Value::Record(record))
            .with_field("CAMERA1:EMPTY", Value::Null)
    }

    #[test]
    fn test_frame_decodes_every_value_kind() {
        let message = sample_message();
        let mut bytes = Vec::new();
        write_message(&mut bytes, &message).unwrap();

        let decoded = read_message(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_truncated_frame_is_io_error() {
        let mut bytes = Vec::new();
        write_message(&mut bytes, &sample_message()).unwrap();
        bytes.truncate(bytes.len() - 3);

        let result = read_message(&mut Cursor::new(bytes));
        assert!(matches!(result, Err(ScanError::Io { .. })));
    }

    #[test]
    fn test_unknown_tag_is_protocol_error() {
        let mut bytes = Vec::new();
        bytes.write_u64::<BigEndian>(1).unwrap();
        bytes.write_u32::<BigEndian>(0).unwrap();
        bytes.write_u16::<BigEndian>(1).unwrap();
        bytes.write_u16::<BigEndian>(1).unwrap();
        bytes.extend_from_slice(b"x");
        bytes.write_u8(42).unwrap();

        let result = read_message(&mut Cursor::new(bytes));
        assert!(matches!(result, Err(ScanError::Protocol(msg)) if msg.contains("42")));
    }

    fn nested_array_frame(depth: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.write_u64::<BigEndian>(1).unwrap();
        bytes.write_u32::<BigEndian>(0).unwrap();
        bytes.write_u16::<BigEndian>(1).unwrap();
        bytes.write_u16::<BigEndian>(1).unwrap();
        bytes.extend_from_slice(b"x");
        for _ in 0..depth {
            bytes.write_u8(TAG_ARRAY).unwrap();
            bytes.write_u32::<BigEndian>(1).unwrap();
        }
        bytes.write_u8(TAG_NULL).unwrap();
        bytes
    }

    #[test]
    fn test_deeply_nested_frame_is_rejected() {
        let frame = nested_array_frame(2_000_000);
        let result = read_message(&mut Cursor::new(frame));
        assert!(matches!(result, Err(ScanError::Protocol(msg)) if msg.contains("nesting")));

        let decoded = read_message(&mut Cursor::new(nested_array_frame(MAX_DEPTH))).unwrap();
        assert!(matches!(decoded.get("x"), Some(Value::Array(_))));
        assert!(read_message(&mut Cursor::new(nested_array_frame(MAX_DEPTH + 1))).is_err());
    }

    #[test]
    fn test_deeply_nested_value_is_not_written() {
        let mut value = Value::Null;
        for _ in 0..=MAX_DEPTH {
            value = Value::Array(vec![value]);
        }
        let message = SynchronizedMessage::new(StreamTimestamp::new(1, 0)).with_field("x", value);
        let mut bytes = Vec::new();
        assert!(matches!(
            write_message(&mut bytes, &message),
            Err(ScanError::Protocol(_))
        ));
    }

    #[test]
    fn test_tcp_stream_feeds_synchronized_reader() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            let mut sender = StreamSender::new(socket);
            for x in 0..20 {
                let message = SynchronizedMessage::new(StreamTimestamp::now())
                    .with_field("CAMERA1:X", x);
                if sender.send(&message).is_err() {
                    break;
                }
                thread::sleep(Duration::from_millis(20));
            }
            sender.sent()
        });

        let stream = TcpMessageStream::connect("127.0.0.1", port).unwrap();
        let source = stream.spawn_background_reader(16).unwrap();
        let mut reader = SynchronizedReader::new(source)
            .with_receive_timeout(Duration::from_millis(50))
            .with_read_timeout(Duration::from_secs(2));

        let values = reader.read_fresh(&[FieldSpec::new("CAMERA1:X")]).unwrap();
        assert!(matches!(values[0], Value::Int(_)));

        reader.close();
        assert!(server.join().unwrap() >= 1);
    }

    #[test]
    fn test_full_channel_drops_oldest() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            let mut sender = StreamSender::new(socket);
            for x in 0..10 {
                let message = SynchronizedMessage::new(StreamTimestamp::new(100 + x, 0))
                    .with_field("X", x as i64);
                sender.send(&message).unwrap();
            }
        });

        let stream = TcpMessageStream::connect("127.0.0.1", port).unwrap();
        let mut source = stream.spawn_background_reader(2).unwrap();
        server.join().unwrap();
        thread::sleep(Duration::from_millis(200));

        let mut received = Vec::new();
        while let Ok(Some(message)) = source.receive(Duration::from_millis(50)) {
            received.push(message.timestamp.secs);
        }
        assert!(received.len() <= 2);
        assert_eq!(received.last(), Some(&109));
    }

    #[test]
    fn test_invalid_address() {
        let result = TcpMessageStream::connect("not an address", 1);
        assert!(matches!(result, Err(ScanError::Protocol(_))));
    }
}
