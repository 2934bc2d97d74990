use std::hint::black_box;

use chrono::Utc;
use criterion::{criterion_group, criterion_main, Criterion};
use geek_collab::transport::memory;
use geek_collab::{
    Envelope, Frame, Hub, Mailbox, MemberInfo, PresenceSnapshot, Registration, RoomRegistry,
};
use uuid::Uuid;

const EDIT: &str =
    r#"{"action":"edit","room":"bench","user":"alice","change":{"range":[120,128],"text":"fn main() {}"}}"#;

fn members(n: usize) -> Vec<MemberInfo> {
    (0..n)
        .map(|i| MemberInfo::new(Uuid::new_v4(), format!("user-{i}"), Utc::now()))
        .collect()
}

fn bench_envelope_decode(c: &mut Criterion) {
    c.bench_function("envelope_decode_edit", |b| {
        b.iter(|| {
            black_box(Envelope::decode(black_box(EDIT)).unwrap());
        })
    });
}

fn bench_system_encode(c: &mut Criterion) {
    c.bench_function("system_notice_encode", |b| {
        b.iter(|| {
            let env = Envelope::system(black_box("bench"), black_box("alice joined the room"));
            black_box(env.encode().unwrap());
        })
    });
}

fn bench_presence_encode_100(c: &mut Criterion) {
    let members = members(100);

    c.bench_function("presence_update_encode_100_members", |b| {
        b.iter(|| {
            let snapshot = PresenceSnapshot::from_members(black_box(&members));
            black_box(Envelope::presence_update("bench", snapshot).encode().unwrap());
        })
    });
}

fn bench_room_fan_out(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let registry = RoomRegistry::default();

    let (room, sender, mut receivers) = rt.block_on(async {
        let room = registry.resolve("bench").await;
        let mut receivers = Vec::new();
        let mut sender = None;
        for info in members(100) {
            let conn_id = Uuid::new_v4();
            let (mailbox, rx) = Mailbox::channel(4096);
            let registration = Registration {
                conn_id,
                info: MemberInfo { user_id: conn_id.to_string(), ..info },
                mailbox,
                announce: false,
            };
            room.register(registration).await.unwrap();
            sender.get_or_insert(conn_id);
            receivers.push(rx);
        }
        // drop the join-time presence traffic
        for rx in receivers.iter_mut() {
            while let Ok(Some(_)) =
                tokio::time::timeout(std::time::Duration::from_millis(1), rx.next()).await
            {}
        }
        (room, sender.unwrap(), receivers)
    });
    let frame = Frame::from(EDIT);

    c.bench_function("room_fan_out_100_msgs_100_members", |b| {
        b.iter(|| {
            rt.block_on(async {
                for _ in 0..100 {
                    room.broadcast(sender, frame.clone()).await.unwrap();
                }
                // commands are handled in order, so this waits for the fan-out
                black_box(room.stats().await.unwrap());
                for rx in receivers.iter_mut().skip(1) {
                    for _ in 0..100 {
                        black_box(rx.next().await);
                    }
                }
            })
        })
    });
}

fn bench_hub_edit_relay(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let hub = Hub::default();

    let (alice, mut bob, _sessions) = rt.block_on(async {
        let (src_a, sink_a, alice) = memory::pair(256);
        let (src_b, sink_b, mut bob) = memory::pair(256);
        let a = hub.connect(src_a, sink_a, "bench", None).await.unwrap();
        let b = hub.connect(src_b, sink_b, "bench", None).await.unwrap();
        // presence traffic from both registrations
        while let Ok(Some(_)) =
            tokio::time::timeout(std::time::Duration::from_millis(10), bob.recv()).await
        {}
        (alice, bob, (a, b))
    });

    c.bench_function("hub_edit_relay_memory_transport", |b| {
        b.iter(|| {
            rt.block_on(async {
                alice.send_text(EDIT).await;
                black_box(bob.recv().await.unwrap());
            })
        })
    });
}

criterion_group!(
    benches,
    bench_envelope_decode,
    bench_system_encode,
    bench_presence_encode_100,
    bench_room_fan_out,
    bench_hub_edit_relay,
);
criterion_main!(benches);
