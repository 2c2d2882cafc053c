#![no_main]

use libfuzzer_sys::fuzz_target;
use packet_protocol::{CaptureReader, OutputType, ReadStatus};
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    // Damaged captures end in FormatError or EndOfFile, never a panic or a hang
    if let Ok(mut reader) = CaptureReader::new(Cursor::new(data), OutputType::Both) {
        while matches!(reader.next(), ReadStatus::Parsed | ReadStatus::RawOnly) {}
    }
});
