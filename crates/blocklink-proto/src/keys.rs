//! Reserved message keys.
//!
//! A message key is an application-defined integer that routes a decoded
//! message to its subscribers. The transport treats every key as opaque
//! except [`IDENTITY`], which the server uses for the first frame of a
//! connection.
//!
//! The remaining constants are the chat protocol that ships with the server
//! binary. They must round-trip untouched.

/// Routing tag of a message.
pub type MessageKey = i32;

/// First frame of a connection: carries the server-assigned client id and no
/// payload.
pub const IDENTITY: MessageKey = -1;

/// Plain chat text.
pub const TEXT: MessageKey = 0;

/// Client is leaving.
pub const EXIT: MessageKey = 1;

/// Request a nickname change.
pub const CHANGE_NICK: MessageKey = 2;

/// Server asks the client for credentials.
pub const CREDENTIAL_REQUEST: MessageKey = 3;

/// Client answers a credential request.
pub const CREDENTIAL_RESPONSE: MessageKey = 4;

/// Credentials were accepted.
pub const CREDENTIAL_ACCEPT: MessageKey = 5;

/// Credentials were rejected.
pub const CREDENTIAL_REJECT: MessageKey = 6;

/// Client asks for a nickname.
pub const REQUEST_NICK: MessageKey = 7;

/// Request refused by the server.
pub const REQUEST_DENIED: MessageKey = 8;
