use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use packet_protocol::protocol::handshake::{HandshakeKeys, Session};
use packet_protocol::protocol::message::{ChatArea, ChatMessagePacket, SystemMessagePacket};
use packet_protocol::transport::framing::Framer;
use packet_protocol::CipherSuite;
use packet_protocol::{Packet, PacketCodec, PacketDialect, PacketModel, SerializedFormat};

fn chat(len: usize) -> PacketModel {
    PacketModel::new(
        PacketDialect::Classic,
        Packet::ChatMessage(ChatMessagePacket {
            area: ChatArea::Party,
            message: "a".repeat(len),
            ..ChatMessagePacket::default()
        }),
    )
}

#[allow(clippy::unwrap_used)]
fn bench_raw_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("raw_codec");
    for &len in &[16usize, 256, 4096] {
        let model = chat(len);
        let mut codec = PacketCodec::new(PacketDialect::Classic);
        let frame = codec.encode_raw(&model).unwrap();
        group.throughput(Throughput::Bytes(frame.len() as u64));

        group.bench_function(format!("encode_chat_{len}"), |b| {
            b.iter(|| codec.encode_raw(&model).unwrap())
        });
        group.bench_function(format!("decode_chat_{len}"), |b| {
            b.iter(|| codec.decode_raw(&frame).unwrap())
        });
    }
    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_serialized(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialized");
    let model = PacketModel::new(
        PacketDialect::Vita,
        Packet::SystemMessage(SystemMessagePacket {
            message: "Server maintenance begins in 10 minutes".to_string(),
            ..SystemMessagePacket::default()
        }),
    );
    for format in SerializedFormat::ALL {
        let mut codec = PacketCodec::new(PacketDialect::Vita);
        codec.set_format(format).unwrap();
        let bytes = codec.encode_serialized(&model).unwrap();

        group.bench_function(format!("encode_{format}"), |b| {
            b.iter(|| codec.encode_serialized(&model).unwrap())
        });
        group.bench_function(format!("decode_{format}"), |b| {
            b.iter(|| codec.decode_serialized(&bytes).unwrap())
        });
    }
    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope");
    let frame = vec![0x5Au8; 1024];
    group.throughput(Throughput::Bytes(frame.len() as u64));

    for suite in [CipherSuite::XChaCha20Poly1305, CipherSuite::Aes256Cbc] {
        let mut session = Session::with_cipher(b"bench secret", &suite.factory()).unwrap();
        let sealed = session.seal(&frame).unwrap();
        group.bench_function(format!("seal_1k_{suite}"), |b| {
            b.iter(|| session.seal(&frame).unwrap())
        });
        group.bench_function(format!("open_1k_{suite}"), |b| {
            b.iter(|| session.open(&sealed).unwrap())
        });
    }
    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_framer_stream(c: &mut Criterion) {
    let mut sender = Framer::new(PacketCodec::new(PacketDialect::Classic), HandshakeKeys::default());
    let mut stream = Vec::new();
    for _ in 0..64 {
        stream.extend(sender.encode_packet(&chat(64)).unwrap());
    }

    c.bench_function("framer_split_64_frames", |b| {
        b.iter_batched(
            || {
                (
                    Framer::new(PacketCodec::new(PacketDialect::Classic), HandshakeKeys::default()),
                    BytesMut::from(&stream[..]),
                )
            },
            |(mut framer, mut inbound)| {
                while framer.next_packet(&mut inbound).unwrap().is_some() {}
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_raw_codec,
    bench_serialized,
    bench_envelope,
    bench_framer_stream
);
criterion_main!(benches);
