use std::borrow::Cow;
use std::io::{Read, Write};

use crate::error::ProtocolError;
use crate::messages::{StreamRecord, STREAM_FORMAT_VERSION};
use crate::vulkan_commands::VulkanCommand;

/// Stream frame magic bytes: "VP"
pub const MAGIC: [u8; 2] = [0x56, 0x50];

/// Maximum frame payload size: 256 MB
pub const MAX_FRAME_SIZE: u32 = 256 * 1024 * 1024;

/// Frame header size in bytes: magic(2) + flags(1) + seq(4) + length(4) = 11
pub const HEADER_SIZE: usize = 11;

/// Payloads smaller than this are written uncompressed.
const COMPRESSION_THRESHOLD: usize = 512;

bitflags::bitflags! {
    /// Frame flags byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u8 {
        const COMPRESSED = 0b0000_0001;
        const HEADER     = 0b0000_0010;
        const MARKER     = 0b0000_0100;
        const END        = 0b0000_1000;
    }
}

/// Encode one record into a frame (header + payload), compressing large payloads
/// with LZ4 when `compress` is set and it actually shrinks the payload.
pub fn encode_record(record: &StreamRecord, seq: u32, compress: bool) -> Result<Vec<u8>, WireError> {
    let payload = rkyv::to_bytes::<rkyv::rancor::Error>(record)
        .map_err(|e| WireError::Serialization(e.to_string()))?;

    let (final_payload, compression_flag) = if compress && payload.len() > COMPRESSION_THRESHOLD {
        let compressed = lz4_flex::compress_prepend_size(&payload);
        if compressed.len() < payload.len() {
            (Cow::Owned(compressed), FrameFlags::COMPRESSED)
        } else {
            (Cow::Borrowed(payload.as_slice()), FrameFlags::empty())
        }
    } else {
        (Cow::Borrowed(payload.as_slice()), FrameFlags::empty())
    };

    let kind_flags = match record {
        StreamRecord::Header { .. } => FrameFlags::HEADER,
        StreamRecord::Marker { .. } => FrameFlags::MARKER,
        StreamRecord::End { .. } => FrameFlags::END,
        StreamRecord::Command { .. } => FrameFlags::empty(),
    };

    let payload_len = u32::try_from(final_payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_SIZE)
        .ok_or(WireError::FrameTooLarge(u32::MAX))?;

    let flags = compression_flag | kind_flags;
    let mut frame = Vec::with_capacity(HEADER_SIZE + final_payload.len());
    frame.extend_from_slice(&MAGIC);
    frame.push(flags.bits());
    frame.extend_from_slice(&seq.to_le_bytes());
    frame.extend_from_slice(&payload_len.to_le_bytes());
    frame.extend_from_slice(&final_payload);

    Ok(frame)
}

/// Decode a frame header. Returns (flags, seq, payload_length).
pub fn decode_header(header: &[u8; HEADER_SIZE]) -> Result<(FrameFlags, u32, u32), WireError> {
    if header[0] != MAGIC[0] || header[1] != MAGIC[1] {
        return Err(WireError::InvalidMagic);
    }

    let flags = FrameFlags::from_bits_truncate(header[2]);
    let seq = u32::from_le_bytes([header[3], header[4], header[5], header[6]]);
    let length = u32::from_le_bytes([header[7], header[8], header[9], header[10]]);

    if length > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge(length));
    }

    Ok((flags, seq, length))
}

/// Decode a record from payload bytes, decompressing if the COMPRESSED flag is set.
pub fn decode_record(payload: &[u8], flags: FrameFlags) -> Result<StreamRecord, WireError> {
    let data: Cow<'_, [u8]> = if flags.contains(FrameFlags::COMPRESSED) {
        Cow::Owned(
            lz4_flex::decompress_size_prepended(payload)
                .map_err(|e| WireError::DecompressionError(e.to_string()))?,
        )
    } else {
        Cow::Borrowed(payload)
    };
    // rkyv validation wants the archive aligned; payload slices carry no such promise.
    let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(data.len());
    aligned.extend_from_slice(&data);
    rkyv::from_bytes::<StreamRecord, rkyv::rancor::Error>(&aligned)
        .map_err(|e| WireError::Serialization(e.to_string()))
}

/// Writes a framed command stream: a header record up front, one frame per
/// command or marker, and an end record from [`StreamWriter::finish`].
pub struct StreamWriter<W: Write> {
    inner: W,
    compress: bool,
    next_frame: u32,
    command_count: u64,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(inner: W, producer: &str, compress: bool) -> Result<Self, WireError> {
        let mut writer = Self {
            inner,
            compress,
            next_frame: 0,
            command_count: 0,
        };
        writer.write_record(&StreamRecord::Header {
            format_version: STREAM_FORMAT_VERSION,
            producer: producer.to_string(),
        })?;
        Ok(writer)
    }

    pub fn write_command(&mut self, command: VulkanCommand) -> Result<(), WireError> {
        let record = StreamRecord::Command {
            seq: self.command_count,
            command,
        };
        self.write_record(&record)?;
        self.command_count += 1;
        Ok(())
    }

    pub fn write_marker(&mut self, label: impl Into<String>) -> Result<(), WireError> {
        self.write_record(&StreamRecord::Marker { label: label.into() })
    }

    pub fn command_count(&self) -> u64 {
        self.command_count
    }

    /// Write the end record, flush, and hand back the underlying writer.
    pub fn finish(mut self) -> Result<W, WireError> {
        let end = StreamRecord::End {
            command_count: self.command_count,
        };
        self.write_record(&end)?;
        self.inner.flush()?;
        Ok(self.inner)
    }

    fn write_record(&mut self, record: &StreamRecord) -> Result<(), WireError> {
        let frame = encode_record(record, self.next_frame, self.compress)?;
        self.inner.write_all(&frame)?;
        self.next_frame = self.next_frame.wrapping_add(1);
        Ok(())
    }
}

/// Reads a stream written by [`StreamWriter`]. The header is consumed and
/// validated by [`StreamReader::new`].
pub struct StreamReader<R: Read> {
    inner: R,
    producer: String,
    records: u64,
    finished: bool,
}

impl<R: Read> StreamReader<R> {
    pub fn new(inner: R) -> Result<Self, WireError> {
        let mut reader = Self {
            inner,
            producer: String::new(),
            records: 0,
            finished: false,
        };
        match reader.read_frame()? {
            Some(StreamRecord::Header { format_version, producer }) => {
                if format_version != STREAM_FORMAT_VERSION {
                    return Err(ProtocolError::VersionMismatch {
                        expected: STREAM_FORMAT_VERSION,
                        found: format_version,
                    }
                    .into());
                }
                reader.producer = producer;
                Ok(reader)
            }
            Some(other) => Err(ProtocolError::UnexpectedRecord {
                expected: "header".to_string(),
                found: other.kind().to_string(),
            }
            .into()),
            None => Err(ProtocolError::Truncated { records: 0 }.into()),
        }
    }

    pub fn producer(&self) -> &str {
        &self.producer
    }

    /// Next record after the header, or `None` once the end record was read.
    pub fn next_record(&mut self) -> Result<Option<StreamRecord>, WireError> {
        if self.finished {
            return Ok(None);
        }
        match self.read_frame()? {
            Some(StreamRecord::End { command_count }) => {
                self.finished = true;
                Ok(Some(StreamRecord::End { command_count }))
            }
            Some(record) => Ok(Some(record)),
            None => Err(ProtocolError::Truncated {
                records: self.records,
            }
            .into()),
        }
    }

    /// Collect every command of the remaining stream, skipping markers.
    pub fn read_commands(&mut self) -> Result<Vec<VulkanCommand>, WireError> {
        let mut commands = Vec::new();
        while let Some(record) = self.next_record()? {
            if let StreamRecord::Command { command, .. } = record {
                commands.push(command);
            }
        }
        Ok(commands)
    }

    fn read_frame(&mut self) -> Result<Option<StreamRecord>, WireError> {
        let mut header = [0u8; HEADER_SIZE];
        match self.inner.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let (flags, _seq, length) = decode_header(&header)?;
        let mut payload = vec![0u8; length as usize];
        self.inner.read_exact(&mut payload)?;
        self.records += 1;
        decode_record(&payload, flags).map(Some)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("invalid magic bytes")]
    InvalidMagic,
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(u32),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("decompression error: {0}")]
    DecompressionError(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
