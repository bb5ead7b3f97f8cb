use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use sanad_collab::broadcast::{BroadcastGroup, Outbound};
use sanad_collab::protocol::Frame;
use sanad_collab::{
    CompactionConfig, Compactor, DocumentStore, NewDocument, Replica, StoreConfig, UpdateRecord,
};
use std::sync::Arc;
use uuid::Uuid;
use yrs::{Doc, GetString, ReadTxn, Text, Transact, WriteTxn};

fn keystrokes(n: usize) -> Vec<Vec<u8>> {
    let doc = Doc::new();
    (0..n)
        .map(|_| {
            let before = doc.transact().state_vector();
            {
                let mut txn = doc.transact_mut();
                let content = txn.get_or_insert_text("content");
                let len = content.get_string(&txn).len() as u32;
                content.insert(&mut txn, len, "x");
            }
            doc.transact().encode_diff_v1(&before)
        })
        .collect()
}

fn bench_frame_decode(c: &mut Criterion) {
    let frame = Frame::Update(keystrokes(1).remove(0)).encode();

    c.bench_function("frame_decode_update", |b| {
        b.iter(|| {
            black_box(Frame::decode(black_box(&frame)).unwrap());
        })
    });
}

fn bench_replica_replay(c: &mut Criterion) {
    let doc_id = Uuid::new_v4();
    let start = Utc::now();
    let records: Vec<UpdateRecord> = keystrokes(1_000)
        .into_iter()
        .enumerate()
        .map(|(i, delta)| {
            UpdateRecord::raw(doc_id, None, None, delta, start + Duration::milliseconds(i as i64))
        })
        .collect();

    c.bench_function("replica_replay_1000", |b| {
        b.iter(|| {
            let replica = Replica::build_from(black_box(&records));
            black_box(replica.encoded_state_vector());
        })
    });
}

fn bench_broadcast_fanout(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let group = BroadcastGroup::new();
    let mut members = Vec::new();
    let mut receivers = Vec::new();
    rt.block_on(async {
        for _ in 0..50 {
            let id = Uuid::new_v4();
            receivers.push(group.join(id).await);
            members.push(id);
        }
    });
    let payload = Arc::new(vec![0u8; 64]);

    c.bench_function("broadcast_fanout_50_peers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let delivered = group
                    .publish(Outbound::Binary(payload.clone()), Some(black_box(members[0])))
                    .await;
                black_box(delivered);
            });
            for rx in receivers.iter_mut() {
                while rx.try_recv().is_ok() {}
            }
        })
    });
}

fn bench_compaction(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store =
        Arc::new(DocumentStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap());
    let deltas = keystrokes(200);

    c.bench_function("compact_session_200", |b| {
        b.iter_batched(
            || {
                let doc = store
                    .create_document(NewDocument::new("bench", Uuid::new_v4()))
                    .unwrap();
                let start = Utc::now() - Duration::hours(2);
                for (i, delta) in deltas.iter().enumerate() {
                    let record = UpdateRecord::raw(
                        doc.id,
                        None,
                        None,
                        delta.clone(),
                        start + Duration::seconds(i as i64),
                    );
                    store.put_update(&record).unwrap();
                }
                Compactor::new(store.clone(), CompactionConfig::default())
            },
            |compactor| black_box(compactor.run_once(Utc::now()).unwrap()),
            BatchSize::PerIteration,
        )
    });
}

criterion_group!(
    benches,
    bench_frame_decode,
    bench_replica_replay,
    bench_broadcast_fanout,
    bench_compaction,
);
criterion_main!(benches);
