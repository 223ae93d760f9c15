//! End-to-end engine scenarios: two engines joined by the in-memory pipe
//! transport, exercising dispatch, flow control, and shutdown.

use std::{cell::RefCell, rc::Rc, time::Duration};

use blip_core::{Engine, EngineOptions, HandlerError, MessageBuf};
use blip_harness::pair;
use tokio::time::timeout;

const TEST_DEADLINE: Duration = Duration::from_secs(30);

/// Honor `RUST_LOG` when debugging a scenario.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn engines() -> (Engine, Engine) {
    init_tracing();
    let (ta, tb) = pair();
    (
        Engine::new(Box::new(ta), EngineOptions::default()),
        Engine::new(Box::new(tb), EngineOptions::default()),
    )
}

/// Run both engines and the test body concurrently on one task, bounded
/// by a deadline so a scheduling bug fails instead of hanging.
async fn run_pair<F>(a: &Engine, b: &Engine, body: F)
where
    F: std::future::Future<Output = ()>,
{
    timeout(TEST_DEADLINE, async {
        tokio::join!(a.run(), b.run(), body);
    })
    .await
    .expect("scenario deadline exceeded");
}

#[tokio::test]
async fn request_response_round_trip() {
    let (a, b) = engines();
    b.on_request("Echo", |req| Ok(MessageBuf::response().body(req.body())));

    let rx = a
        .send_request(MessageBuf::request().profile("Echo").body(b"bonjour"))
        .unwrap()
        .expect("a response is expected");

    run_pair(&a, &b, async {
        let response = rx.await.unwrap();
        assert!(!response.is_error());
        assert_eq!(response.body(), b"bonjour");
        a.close_when_idle();
        b.close_when_idle();
    })
    .await;
}

#[tokio::test]
async fn unknown_profile_gets_404() {
    let (a, b) = engines();
    // b registers no handlers at all

    let rx = a.send_request(MessageBuf::request().profile("Unknown")).unwrap().unwrap();

    run_pair(&a, &b, async {
        let response = rx.await.unwrap();
        assert!(response.is_error());
        assert_eq!(response.error_domain(), "BLIP");
        assert_eq!(response.error_code(), Some(404));
        assert!(std::str::from_utf8(response.body()).unwrap().contains("No handler"));
        a.close_when_idle();
        b.close_when_idle();
    })
    .await;
}

#[tokio::test]
async fn default_handler_catches_unmatched_profiles() {
    let (a, b) = engines();
    b.on_default(|req| {
        Ok(MessageBuf::response().body(req.profile().unwrap_or("none").as_bytes()))
    });

    let rx = a.send_request(MessageBuf::request().profile("Anything")).unwrap().unwrap();

    run_pair(&a, &b, async {
        let response = rx.await.unwrap();
        assert_eq!(response.body(), b"Anything");
        a.close_when_idle();
        b.close_when_idle();
    })
    .await;
}

#[tokio::test]
async fn handler_failures_become_error_responses() {
    let (a, b) = engines();
    b.on_request("Boom", |_| Err(HandlerError::from("kaboom")));
    b.on_request("Forbidden", |_| Err(HandlerError::new("HTTP", 403, "not for you")));

    let boom = a.send_request(MessageBuf::request().profile("Boom")).unwrap().unwrap();
    let forbidden =
        a.send_request(MessageBuf::request().profile("Forbidden")).unwrap().unwrap();

    run_pair(&a, &b, async {
        let response = boom.await.unwrap();
        assert_eq!(response.error_domain(), "BLIP");
        assert_eq!(response.error_code(), Some(501));
        assert_eq!(response.body(), b"kaboom");

        let response = forbidden.await.unwrap();
        assert_eq!(response.error_domain(), "HTTP");
        assert_eq!(response.error_code(), Some(403));

        a.close_when_idle();
        b.close_when_idle();
    })
    .await;
}

#[tokio::test]
async fn requests_dispatch_once_in_order() {
    let (a, b) = engines();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    b.on_request("Note", move |req| {
        log.borrow_mut().push(req.number());
        Ok(MessageBuf::response())
    });

    // Multi-frame bodies force interleaved frames; each request must
    // still dispatch exactly once, in number order.
    let body = vec![0x2Eu8; 20_000];
    let waits: Vec<_> = (0..3)
        .map(|_| {
            a.send_request(MessageBuf::request().profile("Note").body(&body))
                .unwrap()
                .unwrap()
        })
        .collect();

    run_pair(&a, &b, async {
        for rx in waits {
            rx.await.unwrap();
        }
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
        a.close_when_idle();
        b.close_when_idle();
    })
    .await;
}

#[tokio::test]
async fn no_reply_requests_are_dispatched_but_not_answered() {
    let (a, b) = engines();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    b.on_request("Note", move |req| {
        log.borrow_mut().push((req.number(), req.no_reply()));
        Ok(MessageBuf::response().body(b"ignored for no-reply"))
    });

    let fire_and_forget =
        a.send_request(MessageBuf::request().profile("Note").no_reply(true)).unwrap();
    assert!(fire_and_forget.is_none(), "no-reply requests have no response future");
    let rx = a.send_request(MessageBuf::request().profile("Note")).unwrap().unwrap();

    run_pair(&a, &b, async {
        let response = rx.await.unwrap();
        assert_eq!(response.body(), b"ignored for no-reply");
        // Request 1 was dispatched despite never being answered.
        assert_eq!(*seen.borrow(), vec![(1, true), (2, false)]);
        a.close_when_idle();
        b.close_when_idle();
    })
    .await;
}

#[tokio::test]
async fn large_transfer_completes_through_ack_flow_control() {
    // A 500 KiB request and its 500 KiB echo cross both the incoming ACK
    // threshold (50 KB) and the outgoing freeze threshold (100 KB) many
    // times over.
    let (a, b) = engines();
    b.on_request("Echo", |req| Ok(MessageBuf::response().body(req.body())));

    let body: Vec<u8> = (0..500_000u32).map(|i| (i % 251) as u8).collect();
    let rx = a
        .send_request(MessageBuf::request().profile("Echo").body(&body))
        .unwrap()
        .unwrap();

    run_pair(&a, &b, async {
        let response = rx.await.unwrap();
        assert!(!response.is_error());
        assert_eq!(response.body(), &body[..]);
        a.close_when_idle();
        b.close_when_idle();
    })
    .await;
}

#[tokio::test]
async fn compressed_messages_interleave_on_one_stream() {
    let (a, b) = engines();
    b.on_request("Echo", |req| {
        Ok(MessageBuf::response().compressed(true).body(req.body()))
    });

    let first = "first compressed payload, full of repetition, ".repeat(700);
    let second = "second compressed payload, also quite repetitive, ".repeat(700);
    let rx1 = a
        .send_request(MessageBuf::request().profile("Echo").compressed(true).body(first.as_bytes()))
        .unwrap()
        .unwrap();
    let rx2 = a
        .send_request(
            MessageBuf::request().profile("Echo").compressed(true).body(second.as_bytes()),
        )
        .unwrap()
        .unwrap();

    run_pair(&a, &b, async {
        assert_eq!(rx1.await.unwrap().body(), first.as_bytes());
        assert_eq!(rx2.await.unwrap().body(), second.as_bytes());
        a.close_when_idle();
        b.close_when_idle();
    })
    .await;
}

#[tokio::test]
async fn urgent_requests_round_trip() {
    let (a, b) = engines();
    b.on_request("Echo", |req| Ok(MessageBuf::response().body(req.body())));

    let bulk = vec![0x11u8; 60_000];
    let slow = a
        .send_request(MessageBuf::request().profile("Echo").body(&bulk))
        .unwrap()
        .unwrap();
    let fast = a
        .send_request(MessageBuf::request().profile("Echo").urgent(true).body(b"now"))
        .unwrap()
        .unwrap();

    run_pair(&a, &b, async {
        assert_eq!(fast.await.unwrap().body(), b"now");
        assert_eq!(slow.await.unwrap().body(), &bulk[..]);
        a.close_when_idle();
        b.close_when_idle();
    })
    .await;
}

#[tokio::test]
async fn peer_disconnect_fails_pending_responses_with_502() {
    let (ta, tb) = pair();
    let a = Engine::new(Box::new(ta), EngineOptions::default());

    let rx = a.send_request(MessageBuf::request().profile("Void")).unwrap().unwrap();

    // The peer vanishes without ever running an engine.
    drop(tb);

    timeout(TEST_DEADLINE, async {
        tokio::join!(a.run(), async {
            let response = rx.await.unwrap();
            assert!(response.is_error());
            assert_eq!(response.error_domain(), "BLIP");
            assert_eq!(response.error_code(), Some(502));
            assert_eq!(response.body(), b"Disconnected");
        });
    })
    .await
    .expect("disconnect must terminate the engine");
}

#[tokio::test]
async fn send_after_shutdown_is_refused() {
    let (ta, tb) = pair();
    let a = Engine::new(Box::new(ta), EngineOptions::default());
    drop(tb);

    timeout(TEST_DEADLINE, a.run()).await.unwrap();
    assert!(a.send_request(MessageBuf::request().profile("Echo")).is_err());
}

#[tokio::test]
async fn close_when_idle_waits_for_inflight_work() {
    let (a, b) = engines();
    b.on_request("Echo", |req| Ok(MessageBuf::response().body(req.body())));

    let body = vec![0x77u8; 120_000];
    let rx = a
        .send_request(MessageBuf::request().profile("Echo").body(&body))
        .unwrap()
        .unwrap();

    // Request the shutdown before the transfer has even started moving;
    // the peer winds down when it observes our close.
    a.close_when_idle();

    run_pair(&a, &b, async {
        let response = rx.await.unwrap();
        assert!(!response.is_error(), "in-flight work must finish before idle close");
        assert_eq!(response.body(), &body[..]);
    })
    .await;
}
