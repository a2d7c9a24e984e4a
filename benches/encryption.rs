//! Payload encryption benchmark: seal and open a 100-event batch.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use guard_agent::encryption::generate_key;
use guard_agent::{EventBatch, EventType, PayloadEncryptor, SecurityEvent};

fn batch() -> EventBatch {
    let events = (0..100)
        .map(|i| {
            SecurityEvent::new(EventType::IpBanned, format!("10.0.0.{}", i % 255), "block", "bench")
        })
        .collect();
    EventBatch::of_events("bench-project", events)
}

fn bench_encrypt(c: &mut Criterion) {
    let encryptor = PayloadEncryptor::new(&generate_key()).unwrap();
    let batch = batch();

    c.bench_function("encrypt_batch_100", |b| {
        b.iter(|| black_box(encryptor.encrypt(&batch, Some(batch.batch_id.as_str()))).unwrap())
    });
}

fn bench_decrypt(c: &mut Criterion) {
    let encryptor = PayloadEncryptor::new(&generate_key()).unwrap();
    let batch = batch();
    let sealed = encryptor.encrypt(&batch, None).unwrap();

    c.bench_function("decrypt_batch_100", |b| {
        b.iter(|| black_box(encryptor.decrypt(&sealed, None)).unwrap())
    });
}

criterion_group!(benches, bench_encrypt, bench_decrypt);
criterion_main!(benches);
