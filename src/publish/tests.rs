//! Unit tests for the publish pipeline: sequence monotonicity,
//! single-flight resolve deduplication, verification, and fallback.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::crypto::ed25519::generate_ed25519_keypair;
use crate::crypto::ipns::derive_ipns_name;
use crate::error::CoreError;
use crate::publish::PublishPipeline;
use crate::testutil::MockTransport;

fn pointer_keypair() -> ([u8; 32], String) {
    let (pk, sk) = generate_ed25519_keypair();
    let name = derive_ipns_name(&pk.try_into().unwrap()).unwrap();
    (sk.try_into().unwrap(), name)
}

#[tokio::test]
async fn test_publish_sequences_strictly_increase() {
    let transport = Arc::new(MockTransport::new());
    let pipeline = PublishPipeline::new(transport.clone());
    let (signing_key, name) = pointer_keypair();

    pipeline.register_new_pointer(&name).await;

    let mut last = 0;
    for i in 1..=5 {
        let seq = pipeline
            .publish(&name, &signing_key, &format!("bafycid{}", i))
            .await
            .unwrap();
        assert!(seq > last, "sequence must strictly increase");
        last = seq;
    }
    assert_eq!(last, 5);
}

#[tokio::test]
async fn test_fresh_unregistered_pointer_fails_sequence_unknown() {
    let transport = Arc::new(MockTransport::new());
    let pipeline = PublishPipeline::new(transport);
    let (signing_key, name) = pointer_keypair();

    // No cached sequence, nothing resolvable: publish must refuse rather
    // than fall back to zero.
    let result = pipeline.publish(&name, &signing_key, "bafycid").await;
    assert!(matches!(result, Err(CoreError::SequenceUnknown)));
}

#[tokio::test]
async fn test_publish_uses_remote_sequence_when_higher() {
    let transport = Arc::new(MockTransport::new());
    let pipeline = PublishPipeline::new(transport.clone());
    let (signing_key, name) = pointer_keypair();

    // Another device already published sequence 41.
    transport.install_record(&name, &signing_key, "bafyremote", 41);

    pipeline.register_new_pointer(&name).await;
    let seq = pipeline.publish(&name, &signing_key, "bafylocal").await.unwrap();
    assert_eq!(seq, 42);
}

#[tokio::test]
async fn test_cached_sequence_never_decreases() {
    let transport = Arc::new(MockTransport::new());
    let pipeline = PublishPipeline::new(transport.clone());
    let (signing_key, name) = pointer_keypair();

    transport.install_record(&name, &signing_key, "bafyremote", 10);
    let resolved = pipeline.resolve(&name).await.unwrap();
    assert_eq!(resolved.sequence, 10);

    // The routing layer regresses to an older record; the local cache must
    // still move publishes forward.
    transport.install_record(&name, &signing_key, "bafyolder", 3);
    let seq = pipeline.publish(&name, &signing_key, "bafynew").await.unwrap();
    assert_eq!(seq, 11);
    assert_eq!(pipeline.cached_sequence(&name).await, Some(11));
}

#[tokio::test]
async fn test_resolve_verifies_and_caches() {
    let transport = Arc::new(MockTransport::new());
    let pipeline = PublishPipeline::new(transport.clone());
    let (signing_key, name) = pointer_keypair();

    transport.install_record(&name, &signing_key, "bafygood", 7);

    let resolved = pipeline.resolve(&name).await.unwrap();
    assert_eq!(resolved.cid, "bafygood");
    assert_eq!(resolved.sequence, 7);
    assert!(!resolved.stale);
}

#[tokio::test]
async fn test_tampered_resolve_serves_cached_with_stale_flag() {
    let transport = Arc::new(MockTransport::new());
    let pipeline = PublishPipeline::new(transport.clone());
    let (signing_key, name) = pointer_keypair();

    transport.install_record(&name, &signing_key, "bafygood", 7);
    pipeline.resolve(&name).await.unwrap();

    // Next resolve arrives with a corrupted signature; the untrusted value
    // must not surface.
    transport.install_record(&name, &signing_key, "bafyevil", 8);
    transport.corrupt_signatures.store(1, Ordering::SeqCst);

    let resolved = pipeline.resolve(&name).await.unwrap();
    assert_eq!(resolved.cid, "bafygood");
    assert!(resolved.stale);
}

#[tokio::test]
async fn test_tampered_resolve_without_cache_is_an_error() {
    let transport = Arc::new(MockTransport::new());
    let pipeline = PublishPipeline::new(transport.clone());
    let (signing_key, name) = pointer_keypair();

    transport.install_record(&name, &signing_key, "bafyevil", 1);
    transport.corrupt_signatures.store(1, Ordering::SeqCst);

    assert!(matches!(
        pipeline.resolve(&name).await,
        Err(CoreError::SignatureMismatch)
    ));
}

#[tokio::test]
async fn test_signer_key_must_match_pointer_name() {
    let transport = Arc::new(MockTransport::new());
    let pipeline = PublishPipeline::new(transport.clone());
    let (_, name) = pointer_keypair();
    let (foreign_key, _) = pointer_keypair();

    // A well-formed record signed by a key that does not own the name.
    transport.install_record(&name, &foreign_key, "bafyforged", 1);

    assert!(matches!(
        pipeline.resolve(&name).await,
        Err(CoreError::SignatureMismatch)
    ));
}

#[tokio::test]
async fn test_routing_outage_serves_cached_with_stale_flag() {
    let transport = Arc::new(MockTransport::new());
    let pipeline = PublishPipeline::new(transport.clone());
    let (signing_key, name) = pointer_keypair();

    transport.install_record(&name, &signing_key, "bafygood", 3);
    pipeline.resolve(&name).await.unwrap();

    transport.fail_resolves.store(1, Ordering::SeqCst);
    let resolved = pipeline.resolve(&name).await.unwrap();
    assert_eq!(resolved.cid, "bafygood");
    assert!(resolved.stale);

    // Without any cache the outage surfaces.
    let (_, other_name) = pointer_keypair();
    transport.fail_resolves.store(1, Ordering::SeqCst);
    assert!(matches!(
        pipeline.resolve(&other_name).await,
        Err(CoreError::RoutingUnavailable)
    ));
}

#[tokio::test]
async fn test_concurrent_resolves_share_one_network_call() {
    let transport = Arc::new(MockTransport::new());
    let pipeline = Arc::new(PublishPipeline::new(transport.clone()));
    let (signing_key, name) = pointer_keypair();

    transport.install_record(&name, &signing_key, "bafyshared", 5);
    *transport.resolve_delay.lock().unwrap() = Some(Duration::from_millis(50));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pipeline = pipeline.clone();
        let name = name.clone();
        handles.push(tokio::spawn(async move { pipeline.resolve(&name).await }));
    }

    for handle in handles {
        let resolved = handle.await.unwrap().unwrap();
        assert_eq!(resolved.cid, "bafyshared");
        assert_eq!(resolved.sequence, 5);
    }

    assert_eq!(
        transport.resolve_calls.load(Ordering::SeqCst),
        1,
        "concurrent resolves must coalesce into a single network call"
    );
}

#[tokio::test(start_paused = true)]
async fn test_publish_retries_transient_failures_with_backoff() {
    let transport = Arc::new(MockTransport::new());
    let pipeline = PublishPipeline::new(transport.clone());
    let (signing_key, name) = pointer_keypair();

    pipeline.register_new_pointer(&name).await;
    transport.fail_publishes.store(2, Ordering::SeqCst);

    let seq = pipeline.publish(&name, &signing_key, "bafyretry").await.unwrap();
    assert_eq!(seq, 1);
    assert_eq!(transport.publish_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_publish_gives_up_after_bounded_attempts() {
    let transport = Arc::new(MockTransport::new());
    let pipeline = PublishPipeline::new(transport.clone());
    let (signing_key, name) = pointer_keypair();

    pipeline.register_new_pointer(&name).await;
    transport.fail_publishes.store(10, Ordering::SeqCst);

    let result = pipeline.publish(&name, &signing_key, "bafyfail").await;
    assert!(matches!(result, Err(CoreError::RoutingUnavailable)));
    assert_eq!(transport.publish_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_concurrent_publishes_serialize_per_pointer() {
    let transport = Arc::new(MockTransport::new());
    let pipeline = Arc::new(PublishPipeline::new(transport.clone()));
    let (signing_key, name) = pointer_keypair();

    pipeline.register_new_pointer(&name).await;

    let mut handles = Vec::new();
    for i in 0..4 {
        let pipeline = pipeline.clone();
        let name = name.clone();
        handles.push(tokio::spawn(async move {
            pipeline.publish(&name, &signing_key, &format!("bafycc{}", i)).await
        }));
    }

    let mut sequences: Vec<u64> = Vec::new();
    for handle in handles {
        sequences.push(handle.await.unwrap().unwrap());
    }
    sequences.sort_unstable();
    assert_eq!(sequences, vec![1, 2, 3, 4], "each publish gets a distinct sequence");
}

#[tokio::test]
async fn test_resolve_after_publish_round_trips() {
    let transport = Arc::new(MockTransport::new());
    let pipeline = PublishPipeline::new(transport.clone());
    let (signing_key, name) = pointer_keypair();

    pipeline.register_new_pointer(&name).await;
    pipeline.publish(&name, &signing_key, "bafypublished").await.unwrap();

    let resolved = pipeline.resolve(&name).await.unwrap();
    assert_eq!(resolved.cid, "bafypublished");
    assert_eq!(resolved.sequence, 1);
    assert!(!resolved.stale);
}
