#![allow(dead_code)]

use std::time::Duration;

use dbdock_engine::LogStore;

/// Polls `store` until `instance` has an entry with exactly `message`.
pub async fn wait_for_entry(store: &LogStore, instance: &str, message: &str) {
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if store.instance_logs(instance).iter().any(|e| e.message == message) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(found.is_ok(), "timed out waiting for {message:?} from {instance}");
}

pub fn frame(source: u8, payload: &[u8]) -> Vec<u8> {
    let mut wire = vec![source, 0, 0, 0];
    wire.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    wire.extend_from_slice(payload);
    wire
}
