use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use gamelink::prelude::*;
use gamelink_protocol::Response;

// ---------------------------------------------------------------------------
// Server side: user service
// ---------------------------------------------------------------------------

/// Per-connection state: who logged in on this socket.
#[derive(Default)]
struct Session {
    user: Option<String>,
}

struct Account {
    id: u64,
    password: String,
    characters: Vec<CharacterInfo>,
}

/// In-memory account store shared by the handlers.
#[derive(Default)]
struct UserService {
    accounts: Mutex<HashMap<String, Account>>,
}

impl UserService {
    fn register(&self, req: &UserRegisterRequest) -> UserRegisterResponse {
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        if accounts.contains_key(&req.user) {
            return UserRegisterResponse {
                result: ResultCode::Failed,
                errormsg: "user already exists".into(),
            };
        }
        let id = accounts.len() as u64 + 1;
        accounts.insert(
            req.user.clone(),
            Account {
                id,
                password: req.password.clone(),
                characters: Vec::new(),
            },
        );
        tracing::info!(user = %req.user, id, "user registered");
        UserRegisterResponse {
            result: ResultCode::Success,
            errormsg: "None".into(),
        }
    }

    fn login(&self, session: &mut Session, req: &UserLoginRequest) -> UserLoginResponse {
        let accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        match accounts.get(&req.user) {
            Some(account) if account.password == req.password => {
                session.user = Some(req.user.clone());
                tracing::info!(user = %req.user, "user logged in");
                UserLoginResponse {
                    result: ResultCode::Success,
                    errormsg: "None".into(),
                    userinfo: Some(UserInfo {
                        id: account.id,
                        player: PlayerInfo {
                            id: account.id,
                            characters: account.characters.clone(),
                        },
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
                errormsg: "user does not exist".into(),
                userinfo: None,
            },
        }
    }

    fn create_character(
        &self,
        session: &Session,
        req: &UserCreateCharacterRequest,
    ) -> UserCreateCharacterResponse {
        let failed = |msg: &str| UserCreateCharacterResponse {
            result: ResultCode::Failed,
            errormsg: msg.into(),
            characters: Vec::new(),
        };
        let Some(user) = session.user.as_ref() else {
            return failed("not logged in");
        };
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        let Some(account) = accounts.get_mut(user) else {
            return failed("user does not exist");
        };
        let character = CharacterInfo {
            id: account.characters.len() as u64 + 1,
            tid: req.class as u32,
            name: req.name.clone(),
            class: req.class,
            level: 1,
        };
        account.characters.push(character);
        UserCreateCharacterResponse {
            result: ResultCode::Success,
            errormsg: "None".into(),
            characters: account.characters.clone(),
        }
    }

    /// Wires the service into a server dispatcher.
    fn subscribe(self: &Arc<Self>, dispatcher: &ServerDispatcher<Session>) {
        let svc = Arc::clone(self);
        dispatcher.subscribe::<UserRegisterRequest, _>(move |conn, req| {
            conn.send_envelope(&svc.register(req).into())?;
            Ok(())
        });
        let svc = Arc::clone(self);
        dispatcher.subscribe::<UserLoginRequest, _>(move |conn, req| {
            let reply = svc.login(&mut conn.session(), req);
            conn.send_envelope(&reply.into())?;
            Ok(())
        });
        let svc = Arc::clone(self);
        dispatcher.subscribe::<UserCreateCharacterRequest, _>(move |conn, req| {
            let reply = svc.create_character(&conn.session(), req);
            conn.send_envelope(&reply.into())?;
            Ok(())
        });
    }
}

// ---------------------------------------------------------------------------
// Client side: request/response over the tick loop
// ---------------------------------------------------------------------------

struct DemoClient {
    transport: ClientTransport,
    inbox: Arc<Mutex<Vec<Response>>>,
}

impl DemoClient {
    fn new(server: SocketAddr) -> Result<Self, GamelinkError> {
        let dispatcher: Arc<Dispatcher<SocketAddr>> = Arc::new(Dispatcher::new());
        let inbox = Arc::new(Mutex::new(Vec::new()));
        let push = |inbox: &Arc<Mutex<Vec<Response>>>| {
            let inbox = Arc::clone(inbox);
            move |resp: Response| {
                inbox.lock().unwrap_or_else(|e| e.into_inner()).push(resp);
            }
        };
        let on_register = push(&inbox);
        dispatcher.subscribe::<UserRegisterResponse, _>(move |_, r| {
            on_register(Response::UserRegister(r.clone()));
            Ok(())
        });
        let on_login = push(&inbox);
        dispatcher.subscribe::<UserLoginResponse, _>(move |_, r| {
            on_login(Response::UserLogin(r.clone()));
            Ok(())
        });
        let on_create = push(&inbox);
        dispatcher.subscribe::<UserCreateCharacterResponse, _>(move |_, r| {
            on_create(Response::UserCreateCharacter(r.clone()));
            Ok(())
        });

        let mut transport = ClientTransport::new(ClientConfig::default(), dispatcher);
        transport.init(&server.to_string())?;
        Ok(Self { transport, inbox })
    }

    /// Sends one request and ticks until a response arrives.
    fn request(
        &mut self,
        request: impl Into<Envelope>,
        timeout: Duration,
    ) -> Result<Option<Response>, GamelinkError> {
        self.transport.send_message(request.into());
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            self.transport.tick()?;
            for event in self.transport.drain_events() {
                tracing::info!(?event, "client event");
            }
            if let Some(resp) = self.inbox.lock().unwrap_or_else(|e| e.into_inner()).pop() {
                return Ok(Some(resp));
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(None)
    }
}

fn run_client(server: SocketAddr) -> Result<(), GamelinkError> {
    let mut client = DemoClient::new(server)?;
    let timeout = Duration::from_secs(5);

    let register = UserRegisterRequest {
        user: "demo".into(),
        password: "demo".into(),
    };
    let reply = client.request(register, timeout)?;
    tracing::info!(?reply, "register");

    let login = UserLoginRequest {
        user: "demo".into(),
        password: "demo".into(),
    };
    let reply = client.request(login, timeout)?;
    tracing::info!(?reply, "login");

    let create = UserCreateCharacterRequest {
        name: "Aria".into(),
        class: CharacterClass::Wizard,
    };
    let reply = client.request(create, timeout)?;
    tracing::info!(?reply, "create character");

    client.transport.shutdown();
    Ok(())
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    gamelink::init_tracing();
    let bind = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8000".to_string());

    let dispatcher: Arc<ServerDispatcher<Session>> = Arc::new(Dispatcher::new());
    Arc::new(UserService::default()).subscribe(&dispatcher);

    let mut server = NetService::builder().bind(&bind).build(dispatcher);
    let addr = server.start().await?;

    tokio::task::spawn_blocking(move || run_client(addr)).await??;

    server.stop().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(user: &str, password: &str) -> UserRegisterRequest {
        UserRegisterRequest {
            user: user.into(),
            password: password.into(),
        }
    }

    fn login(user: &str, password: &str) -> UserLoginRequest {
        UserLoginRequest {
            user: user.into(),
            password: password.into(),
        }
    }

    fn create(name: &str, class: CharacterClass) -> UserCreateCharacterRequest {
        UserCreateCharacterRequest {
            name: name.into(),
            class,
        }
    }

    #[test]
    fn test_register_duplicate_user_fails() {
        let svc = UserService::default();
        assert_eq!(svc.register(&register("a", "1")).result, ResultCode::Success);
        assert_eq!(svc.register(&register("a", "2")).result, ResultCode::Failed);
    }

    #[test]
    fn test_login_sets_session_user() {
        let svc = UserService::default();
        svc.register(&register("a", "1"));
        let mut session = Session::default();

        let resp = svc.login(&mut session, &login("a", "x"));
        assert_eq!(resp.result, ResultCode::Failed);
        assert!(session.user.is_none());

        let resp = svc.login(&mut session, &login("a", "1"));
        assert_eq!(resp.result, ResultCode::Success);
        assert_eq!(session.user.as_deref(), Some("a"));
    }

    #[test]
    fn test_create_character_requires_login() {
        let svc = UserService::default();
        let req = create("Bo", CharacterClass::Archer);
        let resp = svc.create_character(&Session::default(), &req);
        assert_eq!(resp.result, ResultCode::Failed);

        svc.register(&register("a", "1"));
        let mut session = Session::default();
        svc.login(&mut session, &login("a", "1"));
        let resp = svc.create_character(&session, &req);
        assert_eq!(resp.result, ResultCode::Success);
        assert_eq!(resp.characters.len(), 1);
        assert_eq!(resp.characters[0].class, CharacterClass::Archer);
    }

    #[tokio::test]
    async fn test_full_flow_over_tcp() {
        let dispatcher: Arc<ServerDispatcher<Session>> = Arc::new(Dispatcher::new());
        Arc::new(UserService::default()).subscribe(&dispatcher);
        let mut server = NetService::builder()
            .bind("127.0.0.1:0")
            .workers(2)
            .build(dispatcher);
        let addr = server.start().await.unwrap();

        let replies = tokio::task::spawn_blocking(move || {
            let mut client = DemoClient::new(addr).unwrap();
            let t = Duration::from_secs(5);
            let a = client.request(register("u", "p"), t).unwrap();
            let b = client.request(login("u", "p"), t).unwrap();
            let c = client
                .request(create("Z", CharacterClass::Warrior), t)
                .unwrap();
            client.transport.shutdown();
            (a, b, c)
        })
        .await
        .unwrap();

        assert!(matches!(
            replies.0,
            Some(Response::UserRegister(r)) if r.result == ResultCode::Success
        ));
        assert!(matches!(
            replies.1,
            Some(Response::UserLogin(r)) if r.userinfo.is_some()
        ));
        assert!(matches!(
            replies.2,
            Some(Response::UserCreateCharacter(r)) if r.characters.len() == 1
        ));

        server.stop().await;
    }
}
