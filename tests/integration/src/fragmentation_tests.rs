//! Fragmentation Tests - Large PDU Transfer Tests
//!
//! These tests exercise multi-fragment transfers over TCP:
//! - Requests exceeding the negotiated max_xmit_frag
//! - Responses exceeding max_recv_frag, delivered in small socket writes
//! - Response size and fragment count limits
//! - Fragmentation across concurrent connections

mod common;

use std::time::{Duration, Instant};

use common::*;
use ndr_client::{RpcError, SessionBuilder};

fn size_request(size: usize) -> [u8; 4] {
    (size as u32).to_le_bytes()
}

/// Test: Large request fragmentation
/// Sends a request that exceeds max_xmit_frag and verifies the server saw all of it
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_large_request_fragmentation() {
    init_logging();

    const REQUEST_SIZE: usize = 100_000; // ~25 fragments at 4096

    let config = FakeServerConfig {
        max_frag: 4096,
        ..Default::default()
    };
    let server = FakeServer::start(config, echo_handler()).await.unwrap();

    let payload = pattern(REQUEST_SIZE);
    let expected_checksum = compute_checksum(&payload);

    println!("Sending {} byte request (should fragment into ~25 PDUs)", REQUEST_SIZE);
    let start = Instant::now();

    let response = with_session(server.addr(), SessionBuilder::new(), move |mut session| {
        let binding = session.bind(&test_service()).unwrap();
        assert_eq!(binding.max_xmit_frag(), 4096);
        session.call_raw(&binding, 2, &payload).unwrap()
    })
    .await;

    println!("Response received in {:?}", start.elapsed());
    let server_checksum = u64::from_le_bytes(response.as_ref().try_into().unwrap());
    assert_eq!(server_checksum, expected_checksum, "Data corruption detected!");
    println!("✓ Large request fragmentation test passed");
}

/// Test: Large response fragmentation
/// Requests the server to generate a large response
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_large_response_fragmentation() {
    init_logging();

    const RESPONSE_SIZE: usize = 150_000; // ~37 fragments at 4096

    let config = FakeServerConfig {
        max_frag: 4096,
        write_chunk: 1000,
        ..Default::default()
    };
    let server = FakeServer::start(config, echo_handler()).await.unwrap();

    let reply = with_session(server.addr(), SessionBuilder::new(), |mut session| {
        let binding = session.bind(&test_service()).unwrap();
        let reply = session
            .call(&binding, 1, &ndr_client::RawCodec, &size_request(RESPONSE_SIZE)[..])
            .unwrap();
        session.release(reply.heap());
        reply
    })
    .await;

    println!(
        "Response size: {} bytes in {} fragments",
        reply.value().len(),
        reply.fragments()
    );
    assert_eq!(reply.fragments(), RESPONSE_SIZE.div_ceil(4096 - 24));
    let response = reply.into_inner();
    assert_eq!(response.len(), RESPONSE_SIZE, "Response size mismatch");
    for (i, byte) in response.iter().enumerate() {
        assert_eq!(*byte, (i % 256) as u8, "Pattern mismatch at byte {}", i);
    }
    println!("✓ Large response fragmentation test passed");
}

/// Test: Bidirectional large transfer
/// Both request and response are large
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bidirectional_large_transfer() {
    init_logging();

    const DATA_SIZE: usize = 75_000;

    let config = FakeServerConfig {
        max_frag: 2048,
        ..Default::default()
    };
    let server = FakeServer::start(config, echo_handler()).await.unwrap();

    let payload: Vec<u8> = (0..DATA_SIZE).map(|i| (i * 7 % 251) as u8).collect();
    let expected_checksum = compute_checksum(&payload);

    let response = with_session(server.addr(), SessionBuilder::new(), move |mut session| {
        let binding = session.bind(&test_service()).unwrap();
        session.call_raw(&binding, 0, &payload).unwrap()
    })
    .await;

    assert_eq!(response.len(), DATA_SIZE);
    assert_eq!(compute_checksum(&response), expected_checksum, "Data corruption detected!");
    println!("✓ Bidirectional large transfer test passed");
}

/// Test: Fragments split across many tiny reads
/// Tiny socket writes and a tiny initial buffer force every growth path
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tiny_writes_and_buffer_growth() {
    init_logging();

    const RESPONSE_SIZE: usize = 20_000;

    let config = FakeServerConfig {
        max_frag: 256,
        write_chunk: 7,
        ..Default::default()
    };
    let server = FakeServer::start(config, echo_handler()).await.unwrap();

    let builder = SessionBuilder::new()
        .initial_inbound_capacity(64)
        .growth_step(64);
    let response = with_session(server.addr(), builder, |mut session| {
        let binding = session.bind(&test_service()).unwrap();
        session
            .call_raw(&binding, 1, &size_request(RESPONSE_SIZE))
            .unwrap()
    })
    .await;

    assert_eq!(response.as_ref(), pattern(RESPONSE_SIZE).as_slice());
    println!("✓ Tiny writes test passed");
}

/// Test: Slow server
/// Fragments trickle in with pauses between writes
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_fragment_delivery() {
    init_logging();

    let config = FakeServerConfig {
        max_frag: 1024,
        write_chunk: 512,
        write_delay: Some(Duration::from_millis(2)),
        ..Default::default()
    };
    let server = FakeServer::start(config, echo_handler()).await.unwrap();

    let response = with_session(server.addr(), SessionBuilder::new(), |mut session| {
        let binding = session.bind(&test_service()).unwrap();
        session.call_raw(&binding, 1, &size_request(10_000)).unwrap()
    })
    .await;

    assert_eq!(response.as_ref(), pattern(10_000).as_slice());
}

/// Test: Response size limit
/// A response larger than max_response_size is a protocol fault
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_response_size_limit() {
    init_logging();

    let config = FakeServerConfig {
        max_frag: 1024,
        ..Default::default()
    };
    let server = FakeServer::start(config, echo_handler()).await.unwrap();

    let builder = SessionBuilder::new().max_response_size(8 * 1024);
    let err = with_session(server.addr(), builder, |mut session| {
        let binding = session.bind(&test_service()).unwrap();
        session
            .call_raw(&binding, 1, &size_request(64 * 1024))
            .unwrap_err()
    })
    .await;

    assert!(matches!(err, RpcError::ResponseTooLarge { max: 8192, .. }));
    assert!(err.is_protocol_fault());
}

/// Test: Fragment count limit
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fragment_count_limit() {
    init_logging();

    let config = FakeServerConfig {
        max_frag: 256,
        ..Default::default()
    };
    let server = FakeServer::start(config, echo_handler()).await.unwrap();

    let builder = SessionBuilder::new().max_fragments(10);
    let err = with_session(server.addr(), builder, |mut session| {
        let binding = session.bind(&test_service()).unwrap();
        session
            .call_raw(&binding, 1, &size_request(20_000))
            .unwrap_err()
    })
    .await;

    assert!(matches!(err, RpcError::TooManyFragments { max: 10 }));
}

/// Test: Concurrent fragmented calls on separate connections
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_fragmented_calls() {
    init_logging();

    const NUM_CLIENTS: usize = 8;
    const CALLS_PER_CLIENT: usize = 5;
    const DATA_SIZE: usize = 30_000;

    let config = FakeServerConfig {
        max_frag: 1024,
        write_chunk: 300,
        ..Default::default()
    };
    let server = FakeServer::start(config, echo_handler()).await.unwrap();

    let start = Instant::now();
    let tasks: Vec<_> = (0..NUM_CLIENTS)
        .map(|client_id| {
            tokio::spawn(with_session(server.addr(), SessionBuilder::new(), move |mut session| {
                let binding = session.bind(&test_service()).unwrap();
                for call in 0..CALLS_PER_CLIENT {
                    let payload: Vec<u8> = (0..DATA_SIZE)
                        .map(|i| ((i + client_id * 13 + call) % 256) as u8)
                        .collect();
                    let response = session.call_raw(&binding, 0, &payload).unwrap();
                    assert_eq!(compute_checksum(&response), compute_checksum(&payload));
                }
            }))
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }

    println!(
        "{} clients x {} calls completed in {:?}",
        NUM_CLIENTS,
        CALLS_PER_CLIENT,
        start.elapsed()
    );
    assert_eq!(server.requests(), NUM_CLIENTS * CALLS_PER_CLIENT);
}
