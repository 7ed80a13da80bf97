//! Message schema: every type that travels on the wire.
//!
//! The top level is [`Envelope`], a sum type with exactly one of
//! [`Request`] or [`Response`]. Each of those is itself a sum type over
//! the concrete payloads. Because this is a Rust enum, an envelope with
//! neither or both halves populated cannot be constructed in memory, and
//! the decoder rejects one that arrives on the wire.
//!
//! ```text
//! Envelope
//! ├── Request
//! │   ├── firstTest            FirstTestRequest
//! │   ├── userRegister         UserRegisterRequest
//! │   ├── userLogin            UserLoginRequest
//! │   └── userCreateCharacter  UserCreateCharacterRequest
//! └── Response
//!     ├── userRegister         UserRegisterResponse
//!     ├── userLogin            UserLoginResponse
//!     └── userCreateCharacter  UserCreateCharacterResponse
//! ```
//!
//! Every payload implements [`Message`], whose `NAME` is the routing key
//! the dispatcher uses.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Message trait
// ---------------------------------------------------------------------------

/// A concrete payload that can be routed by type.
///
/// `NAME` is the stable logical name of the payload. The dispatcher keys
/// its subscription table on it, so it must be unique across the schema.
pub trait Message: Sized + Send + Sync + 'static {
    /// Stable routing name (the payload's type name).
    const NAME: &'static str;

    /// Borrows this payload out of an envelope, if that is what it carries.
    fn from_envelope(envelope: &Envelope) -> Option<&Self>;

    /// Wraps this payload into the matching envelope variant.
    fn into_envelope(self) -> Envelope;
}

/// Implements [`Message`] and `From<T> for Envelope` for one payload.
macro_rules! impl_message {
    ($ty:ident, $outer:ident :: $variant:ident) => {
        impl Message for $ty {
            const NAME: &'static str = stringify!($ty);

            fn from_envelope(envelope: &Envelope) -> Option<&Self> {
                match envelope {
                    Envelope::$outer($outer::$variant(msg)) => Some(msg),
                    _ => None,
                }
            }

            fn into_envelope(self) -> Envelope {
                Envelope::$outer($outer::$variant(self))
            }
        }

        impl From<$ty> for Envelope {
            fn from(msg: $ty) -> Self {
                msg.into_envelope()
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Shared value types
// ---------------------------------------------------------------------------

/// Outcome carried by every response.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default,
)]
pub enum ResultCode {
    #[default]
    Success,
    Failed,
}

/// Character archetype chosen at creation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default,
)]
pub enum CharacterClass {
    #[default]
    None,
    Warrior,
    Wizard,
    Archer,
}

/// A character owned by a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterInfo {
    pub id: u64,
    /// Template id in the character definition table.
    pub tid: u32,
    pub name: String,
    pub class: CharacterClass,
    pub level: u32,
}

/// The in-game player record attached to an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PlayerInfo {
    pub id: u64,
    pub characters: Vec<CharacterInfo>,
}

/// Account information returned on a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UserInfo {
    pub id: u64,
    pub player: PlayerInfo,
}

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Connectivity probe; the server just logs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirstTestRequest {
    pub helloworld: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRegisterRequest {
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLoginRequest {
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCreateCharacterRequest {
    pub name: String,
    pub class: CharacterClass,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRegisterResponse {
    pub result: ResultCode,
    pub errormsg: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLoginResponse {
    pub result: ResultCode,
    pub errormsg: String,
    /// Present only when `result` is `Success`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo: Option<UserInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCreateCharacterResponse {
    pub result: ResultCode,
    pub errormsg: String,
    /// The player's full character list after the creation.
    #[serde(default)]
    pub characters: Vec<CharacterInfo>,
}

// ---------------------------------------------------------------------------
// Request / Response unions
// ---------------------------------------------------------------------------

/// Every client → server payload.
///
/// Externally tagged with camelCase keys:
/// `{ "userLogin": { "user": "alice", "password": "pw" } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Request {
    FirstTest(FirstTestRequest),
    UserRegister(UserRegisterRequest),
    UserLogin(UserLoginRequest),
    UserCreateCharacter(UserCreateCharacterRequest),
}

/// Every server → client payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Response {
    UserRegister(UserRegisterResponse),
    UserLogin(UserLoginResponse),
    UserCreateCharacter(UserCreateCharacterResponse),
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The top-level message. Every frame on the wire carries one envelope.
///
/// Serialized as `{ "Request": { ... } }` or `{ "Response": { ... } }`.
/// A JSON object with both keys, or neither, fails to decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Envelope {
    Request(Request),
    Response(Response),
}

impl Envelope {
    /// Routing name of the payload inside this envelope.
    pub fn message_type(&self) -> &'static str {
        match self {
            Envelope::Request(req) => match req {
                Request::FirstTest(_) => FirstTestRequest::NAME,
                Request::UserRegister(_) => UserRegisterRequest::NAME,
                Request::UserLogin(_) => UserLoginRequest::NAME,
                Request::UserCreateCharacter(_) => {
                    UserCreateCharacterRequest::NAME
                }
            },
            Envelope::Response(resp) => match resp {
                Response::UserRegister(_) => UserRegisterResponse::NAME,
                Response::UserLogin(_) => UserLoginResponse::NAME,
                Response::UserCreateCharacter(_) => {
                    UserCreateCharacterResponse::NAME
                }
            },
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Envelope::Request(_))
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Envelope::Response(_))
    }
}

impl_message!(FirstTestRequest, Request::FirstTest);
impl_message!(UserRegisterRequest, Request::UserRegister);
impl_message!(UserLoginRequest, Request::UserLogin);
impl_message!(UserCreateCharacterRequest, Request::UserCreateCharacter);
impl_message!(UserRegisterResponse, Response::UserRegister);
impl_message!(UserLoginResponse, Response::UserLogin);
impl_message!(UserCreateCharacterResponse, Response::UserCreateCharacter);

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! The JSON shape is the wire contract with non-Rust clients, so
    //! these tests pin it down explicitly.

    use super::*;

    fn login() -> UserLoginRequest {
        UserLoginRequest {
            user: "alice".into(),
            password: "pw".into(),
        }
    }

    #[test]
    fn test_envelope_request_json_format() {
        let env = Envelope::from(login());
        let json: serde_json::Value = serde_json::to_value(&env).unwrap();

        assert_eq!(json["Request"]["userLogin"]["user"], "alice");
        assert_eq!(json["Request"]["userLogin"]["password"], "pw");
        assert!(json.get("Response").is_none());
    }

    #[test]
    fn test_envelope_response_json_format() {
        let env = Envelope::from(UserRegisterResponse {
            result: ResultCode::Failed,
            errormsg: "user exists".into(),
        });
        let json: serde_json::Value = serde_json::to_value(&env).unwrap();

        assert_eq!(json["Response"]["userRegister"]["result"], "Failed");
        assert_eq!(json["Response"]["userRegister"]["errormsg"], "user exists");
    }

    #[test]
    fn test_envelope_decode_with_both_halves_is_rejected() {
        let both = r#"{
            "Request": { "firstTest": { "helloworld": "a" } },
            "Response": { "userRegister": { "result": "Success", "errormsg": "" } }
        }"#;
        let result: Result<Envelope, _> = serde_json::from_str(both);
        assert!(result.is_err());
    }

    #[test]
    fn test_envelope_decode_with_neither_half_is_rejected() {
        let result: Result<Envelope, _> = serde_json::from_str("{}");
        assert!(result.is_err());
    }

    #[test]
    fn test_envelope_decode_unknown_payload_is_rejected() {
        let unknown = r#"{ "Request": { "flyToMoon": { "speed": 9000 } } }"#;
        let result: Result<Envelope, _> = serde_json::from_str(unknown);
        assert!(result.is_err());
    }

    #[test]
    fn test_message_type_matches_payload_name() {
        assert_eq!(Envelope::from(login()).message_type(), "UserLoginRequest");
        let resp = Envelope::from(UserCreateCharacterResponse {
            result: ResultCode::Success,
            errormsg: String::new(),
            characters: vec![],
        });
        assert_eq!(resp.message_type(), "UserCreateCharacterResponse");
        assert!(resp.is_response());
        assert!(!resp.is_request());
    }

    #[test]
    fn test_from_envelope_borrows_matching_payload() {
        let env = Envelope::from(login());
        assert_eq!(UserLoginRequest::from_envelope(&env), Some(&login()));
        assert!(UserRegisterRequest::from_envelope(&env).is_none());
        assert!(UserLoginResponse::from_envelope(&env).is_none());
    }

    #[test]
    fn test_login_response_without_userinfo_omits_field() {
        let resp = UserLoginResponse {
            result: ResultCode::Failed,
            errormsg: "no such user".into(),
            userinfo: None,
        };
        let json: serde_json::Value = serde_json::to_value(&resp).unwrap();
        assert!(json.get("userinfo").is_none());

        let back: UserLoginResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back, resp);
    }

    #[test]
    fn test_login_response_with_userinfo_round_trip() {
        let env = Envelope::from(UserLoginResponse {
            result: ResultCode::Success,
            errormsg: "None".into(),
            userinfo: Some(UserInfo {
                id: 1,
                player: PlayerInfo {
                    id: 7,
                    characters: vec![CharacterInfo {
                        id: 3,
                        tid: 1,
                        name: "Garrosh".into(),
                        class: CharacterClass::Warrior,
                        level: 1,
                    }],
                },
            }),
        });
        let bytes = serde_json::to_vec(&env).unwrap();
        let decoded: Envelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(env, decoded);
    }

    #[test]
    fn test_result_code_default_is_success() {
        assert_eq!(ResultCode::default(), ResultCode::Success);
        assert_eq!(CharacterClass::default(), CharacterClass::None);
    }
}
