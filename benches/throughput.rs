//! Throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use phonelink_core::core::simulator::{sample_jpeg, VirtualPhone};
use phonelink_core::{
    ExchangeSettings, FrameExtractor, PhoneElement, PhoneMessage, PhoneSession, PortConfig,
};

fn envelope(payload: &[u8]) -> Vec<u8> {
    let mut reply = b"AT+KPSR=\"0010\"\r\r\nCONNECT\r\n".to_vec();
    reply.extend_from_slice(payload);
    reply.extend_from_slice(b"\r\nNO CARRIER\r\n");
    reply
}

fn frame_benchmark(c: &mut Criterion) {
    let mut jpeg = sample_jpeg();
    jpeg.resize(64 * 1024, 0x55);
    let jpeg_reply = envelope(&jpeg);

    // Nothing but the one-byte WBMP marker near the end: worst case scan
    let mut wbmp = vec![0x41u8; 64 * 1024];
    wbmp[60 * 1024] = 0x24;
    let mut wbmp_reply = wbmp.clone();
    wbmp_reply.extend_from_slice(b"\r\nNO CARRIER");

    let extractor = FrameExtractor::new();
    let mut group = c.benchmark_group("frame");
    group.throughput(Throughput::Bytes(jpeg_reply.len() as u64));

    group.bench_function("jpeg_64k", |b| {
        b.iter(|| black_box(extractor.extract(black_box(&jpeg_reply)).map(|f| f.payload.len())))
    });

    group.bench_function("wbmp_64k_worst_case", |b| {
        b.iter(|| black_box(extractor.extract(black_box(&wbmp_reply)).map(|f| f.payload.len())))
    });

    group.finish();
}

fn parser_benchmark(c: &mut Criterion) {
    let listing: String = (0..200)
        .map(|i| {
            format!(
                "+KPSL: {:04X},0,{},\"PICTURES\",\"JPEG\",1,0,\"Picture {}\"\r\n",
                0x10 + i,
                1000 + i,
                i
            )
        })
        .chain(std::iter::once("OK\r\n".to_string()))
        .collect();

    let messages: String = (0..100)
        .map(|i| {
            format!(
                "+CMGL: {},\"REC READ\",\"+3161234{:04}\",,\"24/03/01,12:{:02}:00+04\"\r\nMessage number {}\r\n",
                i + 1,
                i,
                i % 60,
                i
            )
        })
        .chain(std::iter::once("OK\r\n".to_string()))
        .collect();

    let mut group = c.benchmark_group("parser");

    group.bench_function("element_listing_200", |b| {
        b.iter(|| black_box(PhoneElement::parse_listing(black_box(&listing)).len()))
    });

    group.bench_function("message_list_100", |b| {
        b.iter(|| black_box(PhoneMessage::parse_list(black_box(&messages)).len()))
    });

    group.finish();
}

fn session_benchmark(c: &mut Criterion) {
    let phone = VirtualPhone::new();
    let mut content = sample_jpeg();
    content.resize(16 * 1024, 0x55);
    let id = phone.add_element("PICTURES", "JPEG", "bench", &content);
    let element = PhoneElement::new(&id, "JPEG", "bench");

    let settings = ExchangeSettings {
        read_timeout_ms: 20,
        settle_delay_ms: 0,
        ..ExchangeSettings::default()
    };
    let mut session = PhoneSession::new(phone, settings);
    session
        .open(PortConfig::new("virtual", 115_200))
        .expect("virtual phone opens");
    let dir = tempfile::tempdir().expect("temp dir");
    let destination = dir.path().join("bench.jpg");

    let mut group = c.benchmark_group("session");
    group.throughput(Throughput::Bytes(content.len() as u64));
    group.sample_size(20);

    group.bench_function("download_16k", |b| {
        b.iter(|| black_box(session.download_element(&element, &destination).ok()))
    });

    group.finish();
}

criterion_group!(benches, frame_benchmark, parser_benchmark, session_benchmark);
criterion_main!(benches);
