//! Event source lifecycle tests against the in-memory transport.

use cable_effect::{
    CancelHandle, Channel, ChannelDescriptor, ChannelEventSource, ChannelPolicy, DataMapper, MemoryChannel,
    MemoryTransport, MessageKind, RawMessage, SubscriptionState,
};
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

type IdMapper = DataMapper<fn(&serde_json::Value) -> Option<u64>, u64>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn id_of(payload: &serde_json::Value) -> Option<u64> {
    payload.get("id")?.as_u64()
}

/// Source whose factory counts its invocations.
fn counting_source(
    channel: Option<Arc<MemoryChannel>>,
) -> (ChannelEventSource<MemoryChannel, IdMapper>, Arc<AtomicUsize>) {
    let builds = Arc::new(AtomicUsize::new(0));
    let counter = builds.clone();
    let mapper: fn(&serde_json::Value) -> Option<u64> = id_of;
    let source = ChannelEventSource::new(
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            channel.clone()
        },
        DataMapper::new(mapper),
    );
    (source, builds)
}

fn start_collecting(
    source: &ChannelEventSource<MemoryChannel, IdMapper>,
) -> (CancelHandle, Arc<Mutex<Vec<u64>>>, Arc<AtomicUsize>) {
    let values = Arc::new(Mutex::new(Vec::new()));
    let ends = Arc::new(AtomicUsize::new(0));
    let (v, e) = (values.clone(), ends.clone());
    let handle = source.start(
        move |value| v.lock().push(value),
        move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        },
    );
    (handle, values, ends)
}

// --- Properties ---

proptest! {
    #[test]
    fn prop_factory_runs_once(demands in 1usize..32) {
        let transport = MemoryTransport::new();
        let channel = transport.channel(ChannelDescriptor::new("ChatChannel"));
        let (source, builds) = counting_source(Some(channel));

        for _ in 0..demands {
            let _ = start_collecting(&source);
        }

        prop_assert_eq!(builds.load(Ordering::SeqCst), 1);
        prop_assert_eq!(source.build_count(), 1);
    }

    #[test]
    fn prop_cancel_idempotent(cancels in 1usize..16) {
        let transport = MemoryTransport::new();
        let channel = transport.channel(ChannelDescriptor::new("ChatChannel"));
        let (source, _) = counting_source(Some(channel.clone()));
        let (handle, values, ends) = start_collecting(&source);

        for _ in 0..cancels {
            handle.cancel();
        }
        channel.deliver(RawMessage::data(json!({"id": 1})));

        prop_assert_eq!(channel.unsubscribe_calls(), 1);
        prop_assert_eq!(ends.load(Ordering::SeqCst), 0);
        prop_assert!(values.lock().is_empty());
        prop_assert_eq!(source.state(), SubscriptionState::Cancelled);
    }

    #[test]
    fn prop_arrival_order_preserved(ids in proptest::collection::vec(0u64..1000, 0..50)) {
        let transport = MemoryTransport::new();
        let channel = transport.channel(ChannelDescriptor::new("ChatChannel"));
        let (source, _) = counting_source(Some(channel));
        let (_handle, values, _) = start_collecting(&source);

        for id in &ids {
            transport.publish("ChatChannel", RawMessage::data(json!({"id": id})));
        }

        prop_assert_eq!(&*values.lock(), &ids);
    }
}

// --- Scenarios ---

#[test]
fn test_explicit_subscribe_before_first_message() {
    init_tracing();
    let transport = MemoryTransport::new();
    let channel =
        transport.channel(ChannelDescriptor::new("ChatChannel").with_policy(ChannelPolicy::manual()));
    let (source, _) = counting_source(Some(channel.clone()));

    // Nothing routed while not subscribed
    assert_eq!(transport.publish("ChatChannel", RawMessage::data(json!({"id": 0}))), 0);

    let (_handle, values, _) = start_collecting(&source);
    assert_eq!(channel.subscribe_calls(), 1);

    assert_eq!(transport.publish("ChatChannel", RawMessage::data(json!({"id": 1}))), 1);
    assert_eq!(*values.lock(), vec![1]);
}

#[test]
fn test_server_unsubscribe_triggers_one_resubscribe() {
    init_tracing();
    let transport = MemoryTransport::new();
    let channel = transport.channel(ChannelDescriptor::new("ChatChannel"));
    let (source, _) = counting_source(Some(channel.clone()));
    let (_handle, values, _) = start_collecting(&source);

    channel.notify_unsubscribed();
    assert_eq!(channel.subscribe_calls(), 1);

    transport.publish("ChatChannel", RawMessage::data(json!({"id": 4})));
    assert_eq!(*values.lock(), vec![4]);
}

#[test]
fn test_control_frames_produce_nothing() {
    let transport = MemoryTransport::new();
    let channel = transport.channel(ChannelDescriptor::new("ChatChannel"));
    let (source, _) = counting_source(Some(channel));
    let (_handle, values, ends) = start_collecting(&source);

    transport.publish("ChatChannel", RawMessage::control(MessageKind::Confirmation));
    transport.publish("ChatChannel", RawMessage::control(MessageKind::Ping));

    assert!(values.lock().is_empty());
    assert_eq!(ends.load(Ordering::SeqCst), 0);
}

#[test]
fn test_parameterized_channels_share_a_name() {
    let transport = MemoryTransport::new();
    let lobby = transport.channel(ChannelDescriptor::new("ChatChannel").param("room", "lobby"));
    let (source, _) = counting_source(Some(lobby.clone()));
    let (_handle, values, _) = start_collecting(&source);

    assert_eq!(
        lobby.descriptor().identifier(),
        r#"{"channel":"ChatChannel","room":"lobby"}"#
    );
    transport.publish("ChatChannel", RawMessage::data(json!({"id": 8})));
    assert_eq!(*values.lock(), vec![8]);
}

#[test]
fn test_no_channel_never_emits() {
    let (source, builds) = counting_source(None);
    let (handle, values, ends) = start_collecting(&source);
    let _ = start_collecting(&source);

    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert_eq!(source.state(), SubscriptionState::Ended);
    assert!(values.lock().is_empty());
    // Silent completion: one non-error end, no values
    assert_eq!(ends.load(Ordering::SeqCst), 1);

    handle.cancel();
    assert_eq!(source.state(), SubscriptionState::Ended);
}

// --- Concurrency ---

#[test]
fn test_concurrent_demand_builds_once() {
    let transport = MemoryTransport::new();
    let channel = transport.channel(ChannelDescriptor::new("ChatChannel"));
    let (source, builds) = counting_source(Some(channel));
    let source = Arc::new(source);

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let source = source.clone();
            thread::spawn(move || {
                let _ = start_collecting(&source);
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(builds.load(Ordering::SeqCst), 1);
}

#[test]
fn test_concurrent_cancel_unsubscribes_once() {
    let transport = MemoryTransport::new();
    let channel = transport.channel(ChannelDescriptor::new("ChatChannel"));
    let (source, _) = counting_source(Some(channel.clone()));
    let (handle, _, ends) = start_collecting(&source);

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let handle = handle.clone();
            thread::spawn(move || handle.cancel())
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(channel.unsubscribe_calls(), 1);
    assert_eq!(ends.load(Ordering::SeqCst), 0);
}

#[test]
fn test_silence_after_cancel_with_inflight_frames() {
    init_tracing();
    let transport = MemoryTransport::new();
    let channel = transport.channel(ChannelDescriptor::new("ChatChannel"));
    let (source, _) = counting_source(Some(channel.clone()));
    let (handle, values, _) = start_collecting(&source);

    let stop = Arc::new(AtomicBool::new(false));
    let producer = {
        let channel = channel.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            let mut id = 0u64;
            while !stop.load(Ordering::SeqCst) {
                channel.deliver(RawMessage::data(json!({"id": id})));
                id += 1;
            }
        })
    };

    thread::sleep(Duration::from_millis(20));
    handle.cancel();
    let seen_at_cancel = values.lock().len();

    thread::sleep(Duration::from_millis(20));
    stop.store(true, Ordering::SeqCst);
    producer.join().unwrap();

    assert_eq!(values.lock().len(), seen_at_cancel);
}
