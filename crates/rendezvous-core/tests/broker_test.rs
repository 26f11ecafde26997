//! End-to-end behaviour of the broker through its public API.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;

use rendezvous_core::{
    Broker, BrokerError, ChannelId, ChannelStore, MemoryStore, PeerAddr, Settings, SharedChannel,
};

async fn create(broker: &Broker, host: &PeerAddr, port: i64) -> ChannelId {
    let channel = broker
        .create_channel(host.clone(), Settings::with_port(port))
        .await
        .unwrap();
    let id = channel.lock().await.id().clone();
    id
}

/// Host 10.0.0.1 and client 10.0.0.2 exchange a message each way while a
/// third address sees nothing.
#[tokio::test]
async fn test_host_client_exchange_scenario() {
    let broker = Broker::in_memory();
    let host = PeerAddr::from("10.0.0.1");
    let client = PeerAddr::from("10.0.0.2");
    let stranger = PeerAddr::from("10.0.0.3");

    let id = create(&broker, &host, 9).await;

    let settings = broker.attach(&id, client.clone()).await.unwrap().unwrap();
    assert_eq!(settings.channel(), Some(id.as_str()));
    assert_eq!(settings.port(), Some(&json!(9)));

    assert_eq!(
        broker.send(&id, &host, Bytes::from_static(b"hello")).await.unwrap(),
        Some(true)
    );
    assert_eq!(
        broker.receive(&id, &client).await.unwrap(),
        Some(Some(Bytes::from_static(b"hello")))
    );

    assert_eq!(
        broker.send(&id, &client, Bytes::from_static(b"hi")).await.unwrap(),
        Some(true)
    );
    assert_eq!(
        broker.receive(&id, &host).await.unwrap(),
        Some(Some(Bytes::from_static(b"hi")))
    );

    assert_eq!(broker.receive(&id, &stranger).await.unwrap(), Some(None));
}

#[tokio::test]
async fn test_stranger_send_leaves_queues_untouched() {
    let broker = Broker::in_memory();
    let host = PeerAddr::from("10.0.0.1");
    let client = PeerAddr::from("10.0.0.2");
    let id = create(&broker, &host, 1).await;
    broker.attach(&id, client.clone()).await.unwrap();

    assert_eq!(
        broker
            .send(&id, &PeerAddr::from("10.0.0.3"), Bytes::from_static(b"spoof"))
            .await
            .unwrap(),
        Some(false)
    );
    assert_eq!(broker.receive(&id, &host).await.unwrap(), Some(None));
    assert_eq!(broker.receive(&id, &client).await.unwrap(), Some(None));
}

#[tokio::test]
async fn test_second_attach_takes_over_client_role() {
    let broker = Broker::in_memory();
    let host = PeerAddr::from("10.0.0.1");
    let first = PeerAddr::from("10.0.0.2");
    let second = PeerAddr::from("10.0.0.4");
    let id = create(&broker, &host, 1).await;

    broker.attach(&id, first.clone()).await.unwrap();
    broker.attach(&id, second.clone()).await.unwrap();

    broker.send(&id, &host, Bytes::from_static(b"for-client")).await.unwrap();
    assert_eq!(broker.receive(&id, &first).await.unwrap(), Some(None));
    assert_eq!(
        broker.receive(&id, &second).await.unwrap(),
        Some(Some(Bytes::from_static(b"for-client")))
    );
}

#[tokio::test]
async fn test_lookup_returns_identical_settings() {
    let broker = Broker::in_memory();
    let channel = broker
        .create_channel(PeerAddr::from("10.0.0.1"), Settings::with_port(8080))
        .await
        .unwrap();
    let (id, settings) = {
        let channel = channel.lock().await;
        (channel.id().clone(), channel.settings().clone())
    };

    let found = broker.lookup(&id).await.unwrap().unwrap();
    let found = found.lock().await;
    assert_eq!(found.settings(), &settings);
    assert_eq!(
        serde_json::to_value(found.settings()).unwrap(),
        json!({"channel": id.as_str(), "port": 8080})
    );
}

#[tokio::test]
async fn test_delete_then_lookup_is_none() {
    let broker = Broker::in_memory();
    let id = create(&broker, &PeerAddr::from("10.0.0.1"), 1).await;

    broker.delete(&id).await.unwrap();
    assert!(broker.lookup(&id).await.unwrap().is_none());

    // Second delete of the same id is a no-op.
    broker.delete(&id).await.unwrap();
    assert!(broker.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_sends_all_arrive_in_order_per_sender() {
    let broker = Broker::in_memory();
    let host = PeerAddr::from("10.0.0.1");
    let client = PeerAddr::from("10.0.0.2");
    let id = create(&broker, &host, 1).await;
    broker.attach(&id, client.clone()).await.unwrap();

    let mut tasks = Vec::new();
    for worker in 0..4u8 {
        let broker = broker.clone();
        let id = id.clone();
        let host = host.clone();
        tasks.push(tokio::spawn(async move {
            for seq in 0..50u8 {
                broker
                    .send(&id, &host, Bytes::from(vec![worker, seq]))
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut last_seen = [None::<u8>; 4];
    let mut total = 0;
    while let Some(Some(message)) = broker.receive(&id, &client).await.unwrap() {
        let (worker, seq) = (message[0] as usize, message[1]);
        if let Some(previous) = last_seen[worker] {
            assert!(seq > previous);
        }
        last_seen[worker] = Some(seq);
        total += 1;
    }
    assert_eq!(total, 200);
}

/// Store that fails every call, standing in for an unreachable backend.
#[derive(Default)]
struct UnavailableStore {
    calls: AtomicUsize,
}

#[async_trait]
impl ChannelStore for UnavailableStore {
    async fn get(&self, _id: &ChannelId) -> Result<Option<SharedChannel>, BrokerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BrokerError::StoreUnavailable("offline".into()))
    }

    async fn put(&self, _id: ChannelId, _channel: SharedChannel) -> Result<(), BrokerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BrokerError::StoreUnavailable("offline".into()))
    }

    async fn delete(&self, _id: &ChannelId) -> Result<(), BrokerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BrokerError::StoreUnavailable("offline".into()))
    }

    async fn keys(&self) -> Result<Vec<ChannelId>, BrokerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BrokerError::StoreUnavailable("offline".into()))
    }
}

#[tokio::test]
async fn test_store_failure_propagates_without_retry() {
    let broker = Broker::new(UnavailableStore::default());
    let peer = PeerAddr::from("10.0.0.1");

    let err = broker.create_channel(peer.clone(), Settings::new()).await.unwrap_err();
    assert!(err.to_string().contains("offline"));
    assert_eq!(broker_calls(&broker), 1);
    assert!(broker.receive(&ChannelId::from("x"), &peer).await.is_err());
    assert!(broker.list_all().await.is_err());
}

fn broker_calls(broker: &Broker<UnavailableStore>) -> usize {
    broker.store().calls.load(Ordering::SeqCst)
}

#[tokio::test]
async fn test_brokers_do_not_share_default_stores() {
    let first = Broker::in_memory();
    let second: Broker<MemoryStore> = Broker::new(MemoryStore::new());
    let id = create(&first, &PeerAddr::from("10.0.0.1"), 1).await;

    assert!(first.lookup(&id).await.unwrap().is_some());
    assert!(second.lookup(&id).await.unwrap().is_none());
}
