use ramblr_stream::connection::ReconnectPolicy;
use ramblr_stream::{CloseReason, ConnectionManager, ConnectionState, Directive, HandshakeMethod};
use std::time::Duration;

const AUTH_RETRY: Duration = Duration::from_secs(2);
const RECONNECT: Duration = Duration::from_secs(3);

fn manager() -> ConnectionManager {
    ConnectionManager::new(ReconnectPolicy {
        max_attempts: 5,
        auth_retry_delay: AUTH_RETRY,
        reconnect_delay: RECONNECT,
    })
}

#[test]
fn rejected_handshakes_walk_every_method_then_give_up() {
    let mut conn = manager();
    assert_eq!(
        conn.initialize(),
        Directive::Open(HandshakeMethod::CombinedProtocol)
    );

    let mut tried = Vec::new();
    let mut last = Directive::Idle;
    for _ in 0..5 {
        let method = conn.begin_attempt().expect("attempt available");
        tried.push(method);
        assert_eq!(conn.state(), ConnectionState::Connecting(method));
        last = conn.on_close(&CloseReason::new(1006, "rejected"));
        assert!(!conn.is_ready());
    }

    assert_eq!(tried, HandshakeMethod::ALL.to_vec());
    assert_eq!(last, Directive::Fatal);
    assert_eq!(conn.state(), ConnectionState::Failed);
    assert_eq!(conn.attempts(), 5);
    assert_eq!(conn.begin_attempt(), None);
}

#[test]
fn close_before_open_retries_next_method_after_delay() {
    let mut conn = manager();
    conn.initialize();
    conn.begin_attempt();
    assert_eq!(
        conn.on_close(&CloseReason::new(1002, "protocol")),
        Directive::OpenAfter(AUTH_RETRY, HandshakeMethod::ProtocolList)
    );
    assert_eq!(conn.session().auth_attempt_index, 1);
}

#[test]
fn construct_failure_advances_immediately() {
    let mut conn = manager();
    conn.initialize();
    conn.begin_attempt();
    assert_eq!(
        conn.on_construct_failed("invalid header"),
        Directive::Open(HandshakeMethod::ProtocolList)
    );
}

#[test]
fn clean_close_of_open_session_stays_closed() {
    for code in [1000, 1001] {
        let mut conn = manager();
        conn.initialize();
        conn.begin_attempt();
        conn.on_open();
        assert!(conn.is_ready());

        assert_eq!(conn.on_close(&CloseReason::new(code, "bye")), Directive::Idle);
        assert!(!conn.is_ready());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }
}

#[test]
fn unclean_close_reconnects_with_the_method_that_worked() {
    let mut conn = manager();
    conn.initialize();
    conn.begin_attempt();
    conn.on_close(&CloseReason::abnormal("rejected"));
    assert_eq!(conn.begin_attempt(), Some(HandshakeMethod::ProtocolList));
    conn.on_open();
    assert_eq!(conn.state(), ConnectionState::Open(HandshakeMethod::ProtocolList));
    conn.session_mut().process_id = Some("p-1".to_string());

    assert_eq!(
        conn.on_close(&CloseReason::abnormal("network lost")),
        Directive::OpenAfter(RECONNECT, HandshakeMethod::ProtocolList)
    );
    assert!(!conn.is_ready());

    assert_eq!(conn.begin_attempt(), Some(HandshakeMethod::ProtocolList));
    assert_eq!(conn.session().process_id, None);
    assert!(!conn.is_ready());
}

#[test]
fn attempt_limit_below_method_count_fails_early() {
    let mut conn = ConnectionManager::new(ReconnectPolicy {
        max_attempts: 2,
        auth_retry_delay: AUTH_RETRY,
        reconnect_delay: RECONNECT,
    });
    conn.initialize();
    conn.begin_attempt();
    assert!(matches!(
        conn.on_close(&CloseReason::abnormal("x")),
        Directive::OpenAfter(_, HandshakeMethod::ProtocolList)
    ));
    conn.begin_attempt();
    assert_eq!(conn.on_close(&CloseReason::abnormal("x")), Directive::Fatal);
}

#[test]
fn shutdown_clears_readiness() {
    let mut conn = manager();
    conn.initialize();
    conn.begin_attempt();
    conn.on_open();
    conn.shutdown();
    assert!(!conn.is_ready());
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(conn.on_close(&CloseReason::abnormal("late")), Directive::Idle);
}
