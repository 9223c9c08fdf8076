/// Path of the realtime socket endpoint.
pub const WS_PATH: &str = "/ws";

/// Query parameter carrying the identity on the socket handshake.
pub const WS_IDENTITY_PARAM: &str = "userId";

/// Header carrying the caller identity on REST requests.
/// Set by the auth layer in front of the server.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Default HTTP port (server)
pub const DEFAULT_HTTP_PORT: u16 = 5000;

/// Close code sent when the handshake names an identity the directory does not know.
pub const CLOSE_UNKNOWN_IDENTITY: u16 = 4001;

/// Close code sent to a socket whose identity connected again elsewhere.
pub const CLOSE_REPLACED: u16 = 4002;

/// Maximum message body length in characters.
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Idle window after the last keystroke before "stopped typing" is sent.
pub const TYPING_WINDOW_MS: u64 = 3_000;

/// How long a received "is typing" flag stays valid without a refresh.
pub const REMOTE_TYPING_TTL_MS: u64 = 5_000;

/// Client presence refresh interval in seconds
pub const PRESENCE_REFRESH_SECS: u64 = 15;

/// Client directory refresh interval in seconds
pub const DIRECTORY_REFRESH_SECS: u64 = 30;

/// A directory fetch younger than this is not repeated by the periodic refresh.
pub const DIRECTORY_STALE_SECS: u64 = 60;

/// Reconnection attempts before the client gives up
pub const RECONNECT_ATTEMPTS: u32 = 5;

/// Server ping interval in seconds
pub const PING_INTERVAL_SECS: u64 = 30;

/// Pong deadline after a ping, in seconds
pub const PONG_TIMEOUT_SECS: u64 = 10;
