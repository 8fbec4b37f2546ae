use bytes::{BufMut, Bytes, BytesMut};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use std::time::Instant;
use telemetry_relay::config::RelayConfig;
use telemetry_relay::core::envelope::{Envelope, EnvelopeCodec};
use telemetry_relay::core::packet::{decode, Frame};
use telemetry_relay::core::reassembly::FragmentReassembler;
use telemetry_relay::service::RelayService;
use tokio_util::codec::Encoder;

fn single(payload_len: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(16 + payload_len);
    buf.put_slice(b"LC02");
    buf.put_u32(7);
    buf.put_slice(b"pose\0");
    buf.put_bytes(0x5A, payload_len);
    buf.freeze()
}

fn fragments(seq: u32, count: u16, chunk_len: usize) -> Vec<Bytes> {
    (0..count)
        .map(|i| {
            let mut buf = BytesMut::with_capacity(32 + chunk_len);
            buf.put_slice(b"LC03");
            buf.put_u32(seq);
            buf.put_u32((usize::from(count) * chunk_len) as u32);
            buf.put_u32((usize::from(i) * chunk_len) as u32);
            buf.put_u16(i);
            buf.put_u16(count);
            if i == 0 {
                buf.put_slice(b"camera\0");
            }
            buf.put_bytes(0xC3, chunk_len);
            buf.freeze()
        })
        .collect()
}

#[allow(clippy::unwrap_used)]
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for &size in &[64usize, 1024, 8192, 60_000] {
        let datagram = single(size);
        group.throughput(Throughput::Bytes(datagram.len() as u64));
        group.bench_function(format!("single_{size}b"), |b| {
            b.iter(|| decode(datagram.clone()).unwrap())
        });
    }

    let frag = fragments(1, 4, 1400).remove(0);
    group.bench_function("fragment_zero", |b| b.iter(|| decode(frag.clone()).unwrap()));

    let envelope = Envelope::new(Bytes::from_static(b"pose"), vec![0u8; 1024]).to_bytes();
    group.bench_function("passthrough_envelope", |b| {
        b.iter(|| decode(envelope.clone()).unwrap())
    });

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_envelope_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_encode");
    let envelope = Envelope::new(Bytes::from_static(b"lidar"), vec![0u8; 4096]);
    group.throughput(Throughput::Bytes(envelope.encoded_len() as u64));
    group.bench_function("codec_4k", |b| {
        b.iter_batched(
            || (envelope.clone(), BytesMut::with_capacity(4200)),
            |(env, mut buf)| {
                EnvelopeCodec.encode(env, &mut buf).unwrap();
                buf
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassembly");

    for &count in &[2u16, 16, 64] {
        let parts: Vec<_> = fragments(9, count, 1400)
            .into_iter()
            .map(|d| match decode(d).unwrap() {
                Frame::Fragment(f) => f,
                _ => unreachable!(),
            })
            .collect();
        group.throughput(Throughput::Bytes(u64::from(count) * 1400));
        group.bench_function(format!("reverse_order_{count}"), |b| {
            b.iter_batched(
                FragmentReassembler::new,
                |mut r| {
                    let now = Instant::now();
                    let mut out = None;
                    for f in parts.iter().rev() {
                        out = r.ingest_at(f.key, f.index, f.chunk.clone(), now);
                    }
                    out.unwrap()
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_relay_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("relay_pipeline");
    let datagrams = fragments(3, 8, 1400);

    group.bench_function("fragmented_message_to_hub", |b| {
        b.iter_batched(
            || RelayService::new(&RelayConfig::default()),
            |mut service| {
                for d in &datagrams {
                    service.handle_datagram(d.clone()).unwrap();
                }
                service
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_decode,
    bench_envelope_encode,
    bench_reassembly,
    bench_relay_pipeline
);
criterion_main!(benches);
