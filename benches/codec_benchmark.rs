use airios_rs::protocol::{decode, encode, ProtocolMessage};
use airios_rs::util::hex::decode_hex;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn benchmark_decode_read_request(c: &mut Criterion) {
    let data = decode_hex("01 03 00 00 00 01 84 0A").unwrap();

    c.bench_function("decode_read_request", |b| {
        b.iter(|| {
            let _ = black_box(decode(black_box(&data)));
        })
    });
}

fn benchmark_read_response(c: &mut Criterion) {
    let message = ProtocolMessage::ReadResponse {
        address: 2,
        registers: (0..125).collect(),
    };
    let frame = encode(&message).unwrap();

    c.bench_function("encode_read_response_125", |b| {
        b.iter(|| {
            let _ = black_box(encode(black_box(&message)));
        })
    });
    c.bench_function("decode_read_response_125", |b| {
        b.iter(|| {
            let _ = black_box(decode(black_box(&frame)));
        })
    });
}

criterion_group!(benches, benchmark_decode_read_request, benchmark_read_response);
criterion_main!(benches);
