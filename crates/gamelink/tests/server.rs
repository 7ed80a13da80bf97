//! Integration tests for the gamelink server, connection task, and full
//! client/server flow.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use gamelink::prelude::*;
use gamelink_protocol::{DEFAULT_MAX_FRAME_SIZE, FrameDecoder, FrameEncoder, JsonCodec};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

// =========================================================================
// Test user service
// =========================================================================

#[derive(Default)]
struct Session {
    user: Option<String>,
    requests: u32,
}

type Users = Arc<Mutex<HashMap<String, String>>>;

/// Register/login handlers over an in-memory user table.
fn user_service(users: Users) -> Arc<ServerDispatcher<Session>> {
    let dispatcher: Arc<ServerDispatcher<Session>> = Arc::new(Dispatcher::new());

    {
        let users = Arc::clone(&users);
        dispatcher.subscribe::<UserRegisterRequest, _>(move |conn, req| {
            conn.session().requests += 1;
            let mut users = users.lock().unwrap();
            let reply = if users.contains_key(&req.user) {
                UserRegisterResponse {
                    result: ResultCode::Failed,
                    errormsg: "user exists".into(),
                }
            } else {
                users.insert(req.user.clone(), req.password.clone());
                UserRegisterResponse {
                    result: ResultCode::Success,
                    errormsg: "None".into(),
                }
            };
            conn.send_envelope(&reply.into())?;
            Ok(())
        });
    }

    dispatcher.subscribe::<UserLoginRequest, _>(move |conn, req| {
        let known = users.lock().unwrap().get(&req.user).cloned();
        let reply = match known {
            Some(password) if password == req.password => {
                let mut session = conn.session();
                session.requests += 1;
                session.user = Some(req.user.clone());
                UserLoginResponse {
                    result: ResultCode::Success,
                    errormsg: "None".into(),
                    userinfo: Some(UserInfo {
                        id: conn.id().into_inner(),
                        player: PlayerInfo::default(),
                    }),
                }
            }
            Some(_) => UserLoginResponse {
                result: ResultCode::Failed,
                errormsg: "wrong password".into(),
                userinfo: None,
            },
            None => UserLoginResponse {
                result: ResultCode::Failed,
                errormsg: "no such user".into(),
                userinfo: None,
            },
        };
        conn.send_envelope(&reply.into())?;
        Ok(())
    });

    dispatcher.subscribe::<FirstTestRequest, _>(|conn, req| {
        let count = {
            let mut session = conn.session();
            session.requests += 1;
            session.requests
        };
        let echo = UserRegisterResponse {
            result: ResultCode::Success,
            errormsg: format!("{}#{count}", req.helloworld),
        };
        conn.send_envelope(&echo.into())?;
        Ok(())
    });

    dispatcher
}

async fn start_server(users: Users) -> (NetService<Session>, SocketAddr) {
    let mut server = NetService::builder()
        .bind("127.0.0.1:0")
        .workers(4)
        .build(user_service(users));
    let addr = server.start().await.unwrap();
    (server, addr)
}

// =========================================================================
// Client helpers
// =========================================================================

/// What a client saw, in arrival order.
#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Login(UserLoginResponse),
    Register(UserRegisterResponse),
}

/// Runs a `ClientTransport` on a blocking thread: sends `requests`, then
/// ticks until `expected` responses have been handled.
async fn run_client(
    addr: SocketAddr,
    requests: Vec<Envelope>,
    expected: usize,
) -> Vec<Seen> {
    tokio::task::spawn_blocking(move || {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher: Arc<Dispatcher<SocketAddr>> = Arc::new(Dispatcher::new());
        {
            let seen = Arc::clone(&seen);
            dispatcher.subscribe::<UserLoginResponse, _>(move |_, resp| {
                seen.lock().unwrap().push(Seen::Login(resp.clone()));
                Ok(())
            });
        }
        {
            let seen = Arc::clone(&seen);
            dispatcher.subscribe::<UserRegisterResponse, _>(move |_, resp| {
                seen.lock().unwrap().push(Seen::Register(resp.clone()));
                Ok(())
            });
        }

        let mut client = ClientTransport::new(ClientConfig::default(), dispatcher);
        client.init(&addr.to_string()).unwrap();
        for request in requests {
            client.send_message(request);
        }

        let deadline = Instant::now() + Duration::from_secs(10);
        while seen.lock().unwrap().len() < expected && Instant::now() < deadline {
            client.tick().unwrap();
            std::thread::sleep(Duration::from_millis(2));
        }
        client.shutdown();
        let seen = seen.lock().unwrap().clone();
        seen
    })
    .await
    .unwrap()
}

fn register(user: &str, password: &str) -> Envelope {
    UserRegisterRequest {
        user: user.into(),
        password: password.into(),
    }
    .into()
}

fn login(user: &str, password: &str) -> Envelope {
    UserLoginRequest {
        user: user.into(),
        password: password.into(),
    }
    .into()
}

async fn wait_for(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    done()
}

// =========================================================================
// End-to-end
// =========================================================================

#[tokio::test]
async fn test_login_scenario_end_to_end() {
    let users: Users = Arc::default();
    let (mut server, addr) = start_server(Arc::clone(&users)).await;

    // Workers may run one connection's messages concurrently, so wait for
    // the registration before logging in.
    let registered = run_client(addr, vec![register("alice", "pw")], 1).await;
    assert_eq!(
        registered,
        vec![Seen::Register(UserRegisterResponse {
            result: ResultCode::Success,
            errormsg: "None".into(),
        })]
    );
    assert_eq!(users.lock().unwrap().get("alice").map(String::as_str), Some("pw"));

    let logged_in = run_client(addr, vec![login("alice", "pw")], 1).await;
    match logged_in.as_slice() {
        [Seen::Login(resp)] => {
            assert_eq!(resp.result, ResultCode::Success);
            assert!(resp.userinfo.is_some());
        }
        other => panic!("expected one login response, got {other:?}"),
    }

    let again = run_client(addr, vec![register("alice", "other")], 1).await;
    assert_eq!(
        again,
        vec![Seen::Register(UserRegisterResponse {
            result: ResultCode::Failed,
            errormsg: "user exists".into(),
        })]
    );

    server.stop().await;
}

#[tokio::test]
async fn test_login_wrong_password_fails() {
    let users: Users = Arc::new(Mutex::new(HashMap::from([(
        "bob".to_string(),
        "secret".to_string(),
    )])));
    let (mut server, addr) = start_server(users).await;

    let seen = run_client(addr, vec![login("bob", "guess")], 1).await;
    assert_eq!(
        seen,
        vec![Seen::Login(UserLoginResponse {
            result: ResultCode::Failed,
            errormsg: "wrong password".into(),
            userinfo: None,
        })]
    );

    server.stop().await;
}

#[tokio::test]
async fn test_sessions_are_per_connection() {
    let (mut server, addr) = start_server(Arc::default()).await;

    let hello = |text: &str| -> Envelope {
        FirstTestRequest {
            helloworld: text.into(),
        }
        .into()
    };

    let first = run_client(addr, vec![hello("a")], 1).await;
    let second = run_client(addr, vec![hello("b")], 1).await;

    // Each connection starts from a fresh session.
    assert_eq!(
        first,
        vec![Seen::Register(UserRegisterResponse {
            result: ResultCode::Success,
            errormsg: "a#1".into(),
        })]
    );
    assert_eq!(
        second,
        vec![Seen::Register(UserRegisterResponse {
            result: ResultCode::Success,
            errormsg: "b#1".into(),
        })]
    );

    server.stop().await;
}

// =========================================================================
// Raw-socket behavior
// =========================================================================

async fn read_one_envelope(stream: &mut TcpStream) -> Envelope {
    let mut decoder = FrameDecoder::new(JsonCodec, DEFAULT_MAX_FRAME_SIZE);
    let mut out = Vec::new();
    let mut buf = [0u8; 1024];
    while out.is_empty() {
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("no reply")
            .unwrap();
        assert_ne!(n, 0, "server closed the connection");
        decoder.feed(&buf[..n], &mut out).unwrap();
    }
    out.remove(0)
}

#[tokio::test]
async fn test_negative_length_header_closes_only_that_connection() {
    let (mut server, addr) = start_server(Arc::default()).await;

    let mut bad = TcpStream::connect(addr).await.unwrap();
    let mut good = TcpStream::connect(addr).await.unwrap();
    assert!(wait_for(Duration::from_secs(5), || server.connection_count() == 2).await);

    bad.write_all(&(-1i32).to_le_bytes()).await.unwrap();
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(5), bad.read(&mut buf))
        .await
        .expect("server did not close the connection")
        .unwrap_or(0);
    assert_eq!(n, 0);
    assert!(wait_for(Duration::from_secs(5), || server.connection_count() == 1).await);

    // The other connection still works.
    let encoder = FrameEncoder::new(JsonCodec, DEFAULT_MAX_FRAME_SIZE);
    let frame = encoder
        .encode(&FirstTestRequest { helloworld: "still here".into() }.into())
        .unwrap();
    good.write_all(&frame).await.unwrap();
    let reply = read_one_envelope(&mut good).await;
    assert_eq!(
        reply,
        Envelope::from(UserRegisterResponse {
            result: ResultCode::Success,
            errormsg: "still here#1".into(),
        })
    );

    server.stop().await;
}

#[tokio::test]
async fn test_undecodable_frame_is_dropped_and_connection_survives() {
    let (mut server, addr) = start_server(Arc::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let garbage = b"{\"neither\":{}}";
    let mut bytes = (garbage.len() as i32).to_le_bytes().to_vec();
    bytes.extend_from_slice(garbage);
    let encoder = FrameEncoder::new(JsonCodec, DEFAULT_MAX_FRAME_SIZE);
    bytes.extend_from_slice(
        &encoder
            .encode(&FirstTestRequest { helloworld: "after".into() }.into())
            .unwrap(),
    );
    stream.write_all(&bytes).await.unwrap();

    let reply = read_one_envelope(&mut stream).await;
    assert_eq!(
        reply,
        Envelope::from(UserRegisterResponse {
            result: ResultCode::Success,
            errormsg: "after#1".into(),
        })
    );

    server.stop().await;
}

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test]
async fn test_start_twice_returns_error() {
    let (mut server, _addr) = start_server(Arc::default()).await;
    assert!(server.is_running());
    assert!(matches!(
        server.start().await,
        Err(GamelinkError::Transport(_))
    ));
    server.stop().await;
}

#[tokio::test]
async fn test_stop_closes_connections_and_is_idempotent() {
    let (mut server, addr) = start_server(Arc::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    assert!(wait_for(Duration::from_secs(5), || server.connection_count() == 1).await);

    server.stop().await;
    server.stop().await;

    assert!(!server.is_running());
    assert_eq!(server.local_addr(), None);
    assert_eq!(server.connection_count(), 0);
    assert_eq!(server.dispatcher().active_workers(), 0);

    let mut buf = [0u8; 8];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("connection was not closed")
        .unwrap_or(0);
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_start_after_stop_serves_again() {
    let (mut server, _) = start_server(Arc::default()).await;
    server.stop().await;

    let addr = server.start().await.unwrap();
    let seen = run_client(addr, vec![register("carol", "pw")], 1).await;
    assert_eq!(seen.len(), 1);
    server.stop().await;
}
