mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use common::MockForwarder;
use ndn_client::{ClientConfig, ClientError, Connection, Handler, UpcallKind, UpcallResult};
use ndn_core::key::KEY_BITS;
use ndn_core::{ContentError, ContentObject, Interest, Key, KeyLocator, Name, SignedInfo};

fn name(uri: &str) -> Name {
    uri.parse().unwrap()
}

fn signed(key: &Key, uri: &str, payload: &[u8]) -> ContentObject {
    let mut co = ContentObject::new(name(uri), SignedInfo::for_key(key), payload.to_vec());
    co.sign(key).unwrap();
    co
}

fn key() -> Key {
    Key::generate(KEY_BITS).unwrap()
}

#[test]
fn connect_to_closed_port_fails() {
    let cfg = ClientConfig {
        forwarder_addr: "127.0.0.1:1".into(),
        ..ClientConfig::default()
    };
    let conn = Connection::new(cfg).unwrap();
    assert!(matches!(conn.connect(), Err(ClientError::Connection(_))));
    assert!(!conn.is_connected());
}

#[test]
fn disconnect_twice_reports_not_connected() {
    let fwd = MockForwarder::start();
    let conn = Connection::open(fwd.config()).unwrap();
    assert!(matches!(conn.connect(), Err(ClientError::AlreadyConnected)));
    conn.disconnect().unwrap();
    assert!(matches!(conn.disconnect(), Err(ClientError::NotConnected)));
    assert!(matches!(
        conn.run(Some(Duration::ZERO)),
        Err(ClientError::NotConnected)
    ));
}

#[test]
fn reconnect_after_disconnect() {
    let fwd = MockForwarder::start();
    let k = key();
    fwd.insert(signed(&k, "/again", b"x"));
    let conn = Connection::open(fwd.config()).unwrap();
    conn.disconnect().unwrap();
    conn.connect().unwrap();
    let co = conn.get(&name("/again"), None, Duration::from_secs(2)).unwrap();
    assert_eq!(co.content(), b"x");
}

#[test]
fn get_returns_stored_content() {
    let fwd = MockForwarder::start();
    let k = key();
    fwd.insert(signed(&k, "/a/b/c", b"payload"));
    let conn = Connection::open(fwd.config()).unwrap();
    let co = conn.get(&name("/a/b"), None, Duration::from_secs(2)).unwrap();
    assert_eq!(co.name(), Some(&name("/a/b/c")));
    assert_eq!(co.content(), b"payload");
    assert!(co.is_signed());
}

#[test]
fn get_times_out_without_content() {
    let fwd = MockForwarder::start();
    let conn = Connection::open(fwd.config()).unwrap();
    let start = Instant::now();
    let res = conn.get(&name("/missing"), None, Duration::from_millis(200));
    assert!(matches!(res, Err(ClientError::Timeout)));
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
fn get_reports_content_with_bad_signature() {
    let fwd = MockForwarder::start();
    let k = key();
    let mut co = signed(&k, "/tampered", b"original");
    co.set_content(b"forged".to_vec());
    fwd.insert(co);
    let conn = Connection::open(fwd.config()).unwrap();
    let start = Instant::now();
    let res = conn.get(&name("/tampered"), None, Duration::from_secs(3));
    match res {
        Err(ClientError::Verification(bad)) => assert_eq!(bad, name("/tampered")),
        other => panic!("expected verification error, got {:?}", other),
    }
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
fn write_failure_closes_connection_and_releases_handlers() {
    let fwd = MockForwarder::start();
    let conn = Connection::open(fwd.config()).unwrap();
    assert!(fwd.wait_for(|f| f.peers() == 1));
    fwd.close_all();
    assert!(fwd.wait_for(|f| f.peers() == 0));

    let finals = Arc::new(Mutex::new(0));
    let handler = {
        let finals = finals.clone();
        Handler::new(move |_, kind, _| {
            if kind == UpcallKind::Final {
                *finals.lock() += 1;
            }
            UpcallResult::Ok
        })
    };
    let mut failure = None;
    for i in 0..100 {
        if let Err(e) = conn.express_interest(&name(&format!("/gone/{}", i)), &handler, None) {
            failure = Some(e);
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    assert!(matches!(failure, Some(ClientError::Connection(_))));
    assert!(!conn.is_connected());
    assert_eq!(*finals.lock(), 1);
    assert!(matches!(
        conn.express_interest(&name("/gone"), &handler, None),
        Err(ClientError::NotConnected)
    ));
}

#[test]
fn put_refuses_unsigned_content() {
    let fwd = MockForwarder::start();
    let conn = Connection::open(fwd.config()).unwrap();
    let co = ContentObject::new(name("/u"), SignedInfo::default(), b"x".to_vec());
    assert!(matches!(
        conn.put(&co),
        Err(ClientError::Content(ContentError::Unsigned))
    ));
}

#[test]
fn put_makes_content_available_to_other_connections() {
    let fwd = MockForwarder::start();
    let k = key();
    let publisher = Connection::open(fwd.config()).unwrap();
    publisher.put(&signed(&k, "/shared/doc", b"hello")).unwrap();
    assert!(fwd.wait_for(|f| f.stored() == 1));
    let consumer = Connection::open(fwd.config()).unwrap();
    let co = consumer.get(&name("/shared"), None, Duration::from_secs(2)).unwrap();
    assert_eq!(co.content(), b"hello");
}

#[test]
fn upcall_kind_reflects_verification() {
    let fwd = MockForwarder::start();
    let k = key();
    let mut si = SignedInfo::for_key(&k);
    si.key_locator = Some(KeyLocator::from_name(name("/keys/publisher")));
    let mut co = ContentObject::new(name("/named-key"), si, b"x".to_vec());
    co.sign(&k).unwrap();
    fwd.insert(co);

    let conn = Connection::open(fwd.config()).unwrap();
    let kinds: Arc<Mutex<Vec<UpcallKind>>> = Arc::default();
    let handler = {
        let kinds = kinds.clone();
        Handler::new(move |conn, kind, _| {
            kinds.lock().push(kind);
            if kind != UpcallKind::Final {
                conn.set_run_timeout(Duration::ZERO);
            }
            UpcallResult::Ok
        })
    };
    conn.express_interest(&name("/named-key"), &handler, None).unwrap();
    conn.run(Some(Duration::from_secs(2))).unwrap();
    assert_eq!(kinds.lock()[0], UpcallKind::ContentUnverified);

    conn.add_key(&k);
    conn.express_interest(&name("/named-key"), &handler, None).unwrap();
    conn.run(Some(Duration::from_secs(2))).unwrap();
    assert_eq!(kinds.lock().last(), Some(&UpcallKind::Final));
    assert!(kinds.lock().contains(&UpcallKind::Content));
}

#[test]
fn reexpress_after_timeout_then_final() {
    let fwd = MockForwarder::start();
    let conn = Connection::open(fwd.config()).unwrap();
    let seen: Arc<Mutex<Vec<UpcallKind>>> = Arc::default();
    let handler = {
        let seen = seen.clone();
        Handler::new(move |_, kind, _| {
            let mut seen = seen.lock();
            seen.push(kind);
            let timeouts = seen.iter().filter(|k| **k == UpcallKind::InterestTimedOut).count();
            if kind == UpcallKind::InterestTimedOut && timeouts < 2 {
                UpcallResult::Reexpress
            } else {
                UpcallResult::Ok
            }
        })
    };
    let template = Interest::default().with_lifetime(Duration::from_millis(50));
    conn.express_interest(&name("/nobody"), &handler, Some(&template))
        .unwrap();
    conn.run(Some(Duration::from_millis(500))).unwrap();

    assert_eq!(
        *seen.lock(),
        vec![
            UpcallKind::InterestTimedOut,
            UpcallKind::InterestTimedOut,
            UpcallKind::Final
        ]
    );
    assert!(fwd.wait_for(|f| f.interests().len() == 2));
    let sent = fwd.interests();
    assert_ne!(sent[0].nonce, sent[1].nonce);
    assert_eq!(sent[0].name, sent[1].name);
}

#[test]
fn blocking_calls_from_upcall_are_refused() {
    let fwd = MockForwarder::start();
    let k = key();
    fwd.insert(signed(&k, "/r/1", b"one"));
    fwd.insert(signed(&k, "/r/2", b"two"));
    let conn = Connection::open(fwd.config()).unwrap();

    let log: Arc<Mutex<Vec<String>>> = Arc::default();
    let second = {
        let log = log.clone();
        Handler::new(move |conn, kind, info| {
            if kind == UpcallKind::Content {
                log.lock().push(format!("second {}", info.content.as_ref().unwrap().content().len()));
                conn.set_run_timeout(Duration::ZERO);
            }
            UpcallResult::Ok
        })
    };
    let first = {
        let log = log.clone();
        Handler::new(move |conn, kind, _| {
            if kind != UpcallKind::Content {
                return UpcallResult::Ok;
            }
            log.lock().push(format!("dispatching {}", conn.is_dispatching()));
            let run = conn.run(Some(Duration::ZERO));
            log.lock().push(format!("run {}", matches!(run, Err(ClientError::Reentrancy(_)))));
            let get = conn.get(&name("/r/2"), None, Duration::from_millis(10));
            log.lock().push(format!("get {}", matches!(get, Err(ClientError::Reentrancy(_)))));
            let sched = conn.process_scheduled();
            log.lock().push(format!("sched {}", matches!(sched, Err(ClientError::Reentrancy(_)))));
            let expressed = conn.express_interest(&name("/r/2"), &second, None);
            log.lock().push(format!("express {}", expressed.is_ok()));
            UpcallResult::Ok
        })
    };
    conn.express_interest(&name("/r/1"), &first, None).unwrap();
    assert!(!conn.is_dispatching());
    conn.run(Some(Duration::from_secs(2))).unwrap();
    assert!(!conn.is_dispatching());

    assert_eq!(
        *log.lock(),
        vec!["dispatching true", "run true", "get true", "sched true", "express true", "second 3"]
    );
}

#[test]
fn longer_filter_consumes_interest_first() {
    let fwd = MockForwarder::start();
    let server = Connection::open(fwd.config()).unwrap();
    let calls: Arc<Mutex<Vec<(&'static str, UpcallKind, usize)>>> = Arc::default();
    let short = {
        let calls = calls.clone();
        Handler::new(move |conn, kind, info| {
            if kind != UpcallKind::Final {
                calls.lock().push(("short", kind, info.matched_comps));
                conn.set_run_timeout(Duration::ZERO);
            }
            UpcallResult::Ok
        })
    };
    let long = {
        let calls = calls.clone();
        Handler::new(move |_, kind, info| {
            if kind != UpcallKind::Final {
                calls.lock().push(("long", kind, info.matched_comps));
            }
            UpcallResult::InterestConsumed
        })
    };
    server.set_interest_filter(&name("/app"), &short, None).unwrap();
    server.set_interest_filter(&name("/app/data"), &long, None).unwrap();
    assert!(fwd.wait_for(|f| f.registrations().len() == 2));

    let client = Connection::open(fwd.config()).unwrap();
    let ignore = Handler::new(|_, _, _| UpcallResult::Ok);
    client
        .express_interest(&name("/app/data/x"), &ignore, None)
        .unwrap();
    server.run(Some(Duration::from_secs(2))).unwrap();

    assert_eq!(
        *calls.lock(),
        vec![
            ("long", UpcallKind::Interest, 2),
            ("short", UpcallKind::ConsumedInterest, 1)
        ]
    );
}

#[test]
fn replaced_and_cleared_filters_get_final() {
    let fwd = MockForwarder::start();
    let conn = Connection::open(fwd.config()).unwrap();
    let finals: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    let make = |label: &'static str| {
        let finals = finals.clone();
        Handler::new(move |_, kind, _| {
            if kind == UpcallKind::Final {
                finals.lock().push(label);
            }
            UpcallResult::Ok
        })
    };
    let (old, new) = (make("old"), make("new"));
    conn.set_interest_filter(&name("/p"), &old, None).unwrap();
    conn.set_interest_filter(&name("/p"), &new, None).unwrap();
    assert_eq!(*finals.lock(), vec!["old"]);
    conn.clear_interest_filter(&name("/p")).unwrap();
    assert_eq!(*finals.lock(), vec!["old", "new"]);
}

#[test]
fn disconnect_releases_pending_handlers() {
    let fwd = MockForwarder::start();
    let conn = Connection::open(fwd.config()).unwrap();
    let finals = Arc::new(Mutex::new(0));
    let handler = {
        let finals = finals.clone();
        Handler::new(move |_, kind, _| {
            if kind == UpcallKind::Final {
                *finals.lock() += 1;
            }
            UpcallResult::Ok
        })
    };
    conn.express_interest(&name("/x"), &handler, None).unwrap();
    conn.express_interest(&name("/y"), &handler, None).unwrap();
    conn.disconnect().unwrap();
    assert_eq!(*finals.lock(), 1);
}

#[test]
fn set_run_timeout_from_another_thread_ends_run() {
    let fwd = MockForwarder::start();
    let conn = Connection::open(fwd.config()).unwrap();
    let other = conn.clone();
    let done = Arc::new(AtomicBool::new(false));
    let stopper = {
        let done = done.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            // no effect until run has started its clock
            while !done.load(Ordering::SeqCst) {
                other.set_run_timeout(Duration::ZERO);
                thread::sleep(Duration::from_millis(20));
            }
        })
    };
    let start = Instant::now();
    conn.run(None).unwrap();
    done.store(true, Ordering::SeqCst);
    assert!(start.elapsed() < Duration::from_secs(5));
    stopper.join().unwrap();
}

#[test]
fn malformed_frames_are_skipped() {
    let fwd = MockForwarder::start();
    let k = key();
    fwd.insert(signed(&k, "/after/garbage", b"ok"));
    let conn = Connection::open(fwd.config()).unwrap();
    assert!(fwd.wait_for(|f| f.peers() == 1));
    fwd.send_raw(&[4, 0, 0, 0, 0xff, 0xff, 0xff, 0xff]);
    let co = conn.get(&name("/after"), None, Duration::from_secs(2)).unwrap();
    assert_eq!(co.content(), b"ok");
}

#[test]
fn scheduled_work_reports_next_tick() {
    let fwd = MockForwarder::start();
    let conn = Connection::open(fwd.config()).unwrap();
    conn.set_tick_interval(Duration::from_millis(20));
    assert_eq!(conn.tick_interval(), Duration::from_millis(20));
    let wait = conn.process_scheduled().unwrap();
    assert!(wait <= Duration::from_millis(50));
    assert!(!conn.output_is_pending());
}
