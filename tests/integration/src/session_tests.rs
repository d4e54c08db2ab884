//! Session Tests - bind and call against a live TCP server
//!
//! These tests drive the blocking client over real sockets:
//! - Bind negotiation and rejection
//! - Echo calls and server faults
//! - Local validation that never reaches the wire
//! - Sharing one session between threads

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use ndr_client::{
    ContextResult, ErrorClass, FaultPdu, RpcError, ServiceDescriptor, SessionBuilder,
    SharedSession, SyntaxId, Uuid,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bind_and_echo() {
    init_logging();

    let server = FakeServer::start(FakeServerConfig::default(), echo_handler())
        .await
        .unwrap();

    let (binding, response) = with_session(server.addr(), SessionBuilder::new(), |mut session| {
        let binding = session.bind(&test_service()).unwrap();
        let response = session.call_raw(&binding, 0, b"hello").unwrap();
        (binding, response)
    })
    .await;

    assert_eq!(binding.presentation_id(), 0);
    assert_eq!(binding.assoc_group_id(), 0x5a5a);
    assert_eq!(binding.max_xmit_frag(), 4280);
    assert_eq!(response.as_ref(), b"hello");
    assert_eq!(server.requests(), 1);
    println!("✓ Bind and echo test passed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_empty_request_and_response() {
    init_logging();

    let server = FakeServer::start(FakeServerConfig::default(), echo_handler())
        .await
        .unwrap();

    let response = with_session(server.addr(), SessionBuilder::new(), |mut session| {
        let binding = session.bind(&test_service()).unwrap();
        session.call_raw(&binding, 0, b"").unwrap()
    })
    .await;

    assert!(response.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bind_rejected_for_unknown_interface() {
    init_logging();

    let server = FakeServer::start(FakeServerConfig::default(), echo_handler())
        .await
        .unwrap();

    let other = ServiceDescriptor::unchecked(SyntaxId::new(
        Uuid::parse("00000001-0002-0003-0004-000000000005").unwrap(),
        1,
        0,
    ));

    let (err, next_presentation_id) =
        with_session(server.addr(), SessionBuilder::new(), move |mut session| {
            let err = session.bind(&other).unwrap_err();
            (err, session.next_presentation_id())
        })
        .await;

    assert!(matches!(
        err,
        RpcError::BindRejected {
            result: ContextResult::ProviderRejection,
            reason: 1
        }
    ));
    assert_eq!(err.class(), ErrorClass::Protocol);
    assert_eq!(next_presentation_id, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bind_user_rejection() {
    init_logging();

    let config = FakeServerConfig {
        bind_result: ContextResult::UserRejection,
        ..Default::default()
    };
    let server = FakeServer::start(config, echo_handler()).await.unwrap();

    let result = with_session(server.addr(), SessionBuilder::new(), |mut session| {
        let result = session.bind(&test_service());
        assert!(session.bindings().is_empty());
        result
    })
    .await;

    assert!(matches!(
        result,
        Err(RpcError::BindRejected {
            result: ContextResult::UserRejection,
            ..
        })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_server_fault() {
    init_logging();

    let server = FakeServer::start(FakeServerConfig::default(), echo_handler())
        .await
        .unwrap();

    let err = with_session(server.addr(), SessionBuilder::new(), |mut session| {
        let binding = session.bind(&test_service()).unwrap();
        let err = session.call_raw(&binding, 99, b"").unwrap_err();

        // The connection stays usable after a fault
        let echoed = session.call_raw(&binding, 0, b"still alive").unwrap();
        assert_eq!(echoed.as_ref(), b"still alive");
        err
    })
    .await;

    assert!(matches!(err, RpcError::Fault { status } if status == FaultPdu::NCA_S_OP_RNG_ERROR));
    assert_eq!(err.class(), ErrorClass::Protocol);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_invalid_opnum_never_sent() {
    init_logging();

    let server = FakeServer::start(FakeServerConfig::default(), echo_handler())
        .await
        .unwrap();

    let service = test_service().operations([0, 1, 2]);
    let err = with_session(server.addr(), SessionBuilder::new(), move |mut session| {
        let binding = session.bind(&service).unwrap();
        session.call_raw(&binding, 7, b"data").unwrap_err()
    })
    .await;

    assert!(matches!(err, RpcError::OpnumInvalid(7)));
    assert_eq!(err.class(), ErrorClass::Local);
    assert_eq!(server.requests(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_call_ids_and_contexts_advance() {
    init_logging();

    let server = FakeServer::start(FakeServerConfig::default(), echo_handler())
        .await
        .unwrap();

    let (first, second, next_call_id) =
        with_session(server.addr(), SessionBuilder::new(), |mut session| {
            let first = session.bind(&test_service()).unwrap();
            let second = session.bind(&test_service()).unwrap();
            for i in 0..5u8 {
                let binding = if i % 2 == 0 { &first } else { &second };
                let response = session.call_raw(binding, 0, &[i; 16]).unwrap();
                assert_eq!(response.as_ref(), &[i; 16]);
            }
            (first, second, session.next_call_id())
        })
        .await;

    assert_eq!(first.presentation_id(), 0);
    assert_eq!(second.presentation_id(), 1);
    // Two binds and five calls, starting from 1
    assert_eq!(next_call_id, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_server_hangup_is_transport_fault() {
    init_logging();

    let handler: Handler = Arc::new(|_, _| ServerReply::Hangup);
    let server = FakeServer::start(FakeServerConfig::default(), handler)
        .await
        .unwrap();

    let err = with_session(server.addr(), SessionBuilder::new(), |mut session| {
        let binding = session.bind(&test_service()).unwrap();
        session.call_raw(&binding, 0, b"bye").unwrap_err()
    })
    .await;

    assert_eq!(err.class(), ErrorClass::Transport);
    assert!(!err.is_protocol_fault());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_session_across_threads() {
    init_logging();

    const THREADS: usize = 4;
    const CALLS_PER_THREAD: usize = 25;

    let server = FakeServer::start(
        FakeServerConfig {
            max_frag: 512,
            ..Default::default()
        },
        echo_handler(),
    )
    .await
    .unwrap();
    let addr = server.addr();

    tokio::task::spawn_blocking(move || {
        let session = SessionBuilder::new()
            .io_timeout(Duration::from_secs(10))
            .connect(addr)
            .unwrap();
        let shared = SharedSession::new(session);
        let binding = shared.bind(&test_service()).unwrap();

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let shared = shared.clone();
                let binding = binding.clone();
                std::thread::spawn(move || {
                    for i in 0..CALLS_PER_THREAD {
                        let payload = vec![(t * 31 + i) as u8; 700 + t * 100];
                        let response = shared.call_raw(&binding, 0, &payload).unwrap();
                        assert_eq!(compute_checksum(&response), compute_checksum(&payload));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(
            shared.with(|s| s.next_call_id()),
            2 + (THREADS * CALLS_PER_THREAD) as u32
        );
    })
    .await
    .unwrap();

    assert_eq!(server.requests(), THREADS * CALLS_PER_THREAD);
    println!("✓ Shared session test passed");
}
