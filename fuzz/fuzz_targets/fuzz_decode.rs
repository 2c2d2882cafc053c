#![no_main]

use libfuzzer_sys::fuzz_target;
use packet_protocol::{PacketCodec, PacketDialect, SerializedFormat};

fuzz_target!(|data: &[u8]| {
    // Binary and serialized decoding must fail cleanly, never panic
    for dialect in PacketDialect::ALL {
        let mut codec = PacketCodec::new(dialect);
        if let Ok(model) = codec.decode_raw(data) {
            let _ = codec.encode_raw(&model);
        }
        for format in SerializedFormat::ALL {
            if codec.set_format(format).is_ok() {
                let _ = codec.decode_serialized(data);
            }
        }
    }
});
