//! Integration test: command stream framing
//!
//! Writes streams with `StreamWriter` into memory and reads them back with
//! `StreamReader`, covering compression, markers, truncation and bad input.

use std::io::Cursor;

use vkprime_protocol::vulkan_commands::*;
use vkprime_protocol::wire::{decode_header, encode_record, FrameFlags, HEADER_SIZE};
use vkprime_protocol::{ProtocolError, ReplayHandle, ResourceType, StreamReader, StreamRecord, StreamWriter, WireError};

fn device() -> ReplayHandle {
    ReplayHandle::new(ResourceType::VkDevice, 0x10)
}

fn flush_command(len: usize) -> VulkanCommand {
    let memory = ReplayHandle::new(ResourceType::VkDeviceMemory, 0x20);
    VulkanCommand::FlushMappedMemoryRanges {
        device: device(),
        ranges: vec![MappedMemoryRange { memory, offset: 0, size: len as u64 }],
        data: vec![vec![0xAB; len]],
    }
}

#[test]
fn test_stream_round_trip_preserves_order() {
    let mut writer = StreamWriter::new(Vec::new(), "wire-test", true).expect("writer");
    writer.write_marker("prime VkImage(0x1)").expect("marker");
    writer
        .write_command(VulkanCommand::CreateFence {
            device: device(),
            fence: ReplayHandle::new(ResourceType::VkFence, 0x30),
            signaled: false,
        })
        .expect("fence");
    writer.write_command(flush_command(64)).expect("flush");
    assert_eq!(writer.command_count(), 2);
    let bytes = writer.finish().expect("finish");

    let mut reader = StreamReader::new(Cursor::new(bytes)).expect("reader");
    assert_eq!(reader.producer(), "wire-test");

    match reader.next_record().expect("record") {
        Some(StreamRecord::Marker { label }) => assert_eq!(label, "prime VkImage(0x1)"),
        other => panic!("expected Marker, got {:?}", other),
    }
    match reader.next_record().expect("record") {
        Some(StreamRecord::Command { seq: 0, command: VulkanCommand::CreateFence { fence, .. } }) => {
            assert_eq!(fence.id, 0x30);
        }
        other => panic!("expected CreateFence, got {:?}", other),
    }
    match reader.next_record().expect("record") {
        Some(StreamRecord::Command { seq: 1, command: VulkanCommand::FlushMappedMemoryRanges { data, .. } }) => {
            assert_eq!(data, vec![vec![0xAB; 64]]);
        }
        other => panic!("expected FlushMappedMemoryRanges, got {:?}", other),
    }
    match reader.next_record().expect("record") {
        Some(StreamRecord::End { command_count }) => assert_eq!(command_count, 2),
        other => panic!("expected End, got {:?}", other),
    }
    assert!(reader.next_record().expect("after end").is_none());
}

#[test]
fn test_large_payload_is_compressed() {
    let record = StreamRecord::Command { seq: 0, command: flush_command(64 * 1024) };
    let frame = encode_record(&record, 7, true).expect("encode");
    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&frame[..HEADER_SIZE]);
    let (flags, seq, len) = decode_header(&header).expect("header");
    assert!(flags.contains(FrameFlags::COMPRESSED));
    assert_eq!(seq, 7);
    assert_eq!(len as usize, frame.len() - HEADER_SIZE);

    let plain = encode_record(&record, 7, false).expect("encode");
    assert!(plain.len() > frame.len());
}

#[test]
fn test_read_commands_skips_markers() {
    let mut writer = StreamWriter::new(Vec::new(), "wire-test", false).expect("writer");
    writer.write_marker("a").expect("marker");
    writer.write_command(flush_command(8)).expect("flush");
    writer.write_marker("b").expect("marker");
    let bytes = writer.finish().expect("finish");

    let commands = StreamReader::new(Cursor::new(bytes))
        .expect("reader")
        .read_commands()
        .expect("commands");
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].name(), "vkFlushMappedMemoryRanges");
}

#[test]
fn test_truncated_stream_is_reported() {
    let mut writer = StreamWriter::new(Vec::new(), "wire-test", false).expect("writer");
    writer.write_command(flush_command(8)).expect("flush");
    let mut bytes = writer.finish().expect("finish");
    // Drop the end record entirely.
    let end_frame = encode_record(&StreamRecord::End { command_count: 1 }, 2, false).expect("encode");
    bytes.truncate(bytes.len() - end_frame.len());

    let mut reader = StreamReader::new(Cursor::new(bytes)).expect("reader");
    assert!(matches!(reader.next_record(), Ok(Some(StreamRecord::Command { .. }))));
    match reader.next_record() {
        Err(WireError::Protocol(ProtocolError::Truncated { records })) => assert_eq!(records, 2),
        other => panic!("expected Truncated, got {:?}", other),
    }
}

#[test]
fn test_bad_magic_is_rejected() {
    let mut bytes = StreamWriter::new(Vec::new(), "wire-test", false)
        .expect("writer")
        .finish()
        .expect("finish");
    bytes[0] = b'X';
    match StreamReader::new(Cursor::new(bytes)) {
        Err(WireError::InvalidMagic) => {}
        Err(other) => panic!("expected InvalidMagic, got {:?}", other),
        Ok(_) => panic!("expected InvalidMagic, got a reader"),
    }
}

#[test]
fn test_stream_must_start_with_header() {
    let frame = encode_record(&StreamRecord::End { command_count: 0 }, 0, false).expect("encode");
    match StreamReader::new(Cursor::new(frame)) {
        Err(WireError::Protocol(ProtocolError::UnexpectedRecord { found, .. })) => assert_eq!(found, "end"),
        Err(other) => panic!("expected UnexpectedRecord, got {:?}", other),
        Ok(_) => panic!("expected UnexpectedRecord, got a reader"),
    }
}
