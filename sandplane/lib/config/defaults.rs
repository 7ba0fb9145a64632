//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default number of CPUs given to a sandbox.
pub const DEFAULT_CPU: u32 = 1;

/// The default amount of memory in MiB given to a sandbox.
pub const DEFAULT_MEMORY_MIB: u32 = 1024;

/// The default login user of a sandbox.
pub const DEFAULT_SANDBOX_USER: &str = "sandbox";

/// Length of generated connection tokens.
pub const SANDBOX_TOKEN_LENGTH: usize = 32;

/// Default host for the HTTP server.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default port for the HTTP server.
pub const DEFAULT_SERVER_PORT: u16 = 3456;

/// How often the health sweep runs, in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Heartbeat age after which a running sandbox is considered stopped, in seconds.
pub const DEFAULT_HEARTBEAT_STALE_SECS: u64 = 120;

/// Time in `deleting` after which the periodic sweep purges a sandbox, in seconds.
pub const DEFAULT_STUCK_DELETING_SECS: u64 = 300;

/// Time in `deleting` after which a manual cleanup purges a sandbox, in seconds.
pub const DEFAULT_MANUAL_CLEANUP_SECS: u64 = 60;

/// Error recorded on an unclaimed `create` job when its sandbox is deleted.
pub const SUPERSEDED_BY_DELETE: &str = "superseded by delete";

/// Header carrying the runner identity.
pub const RUNNER_ID_HEADER: &str = "x-runner-id";

/// Header carrying a client API key, as an alternative to a bearer token.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Prefix for generated API keys.
pub const API_KEY_PREFIX: &str = "spk_";

/// Length of the random part of generated API keys.
pub const API_KEY_LENGTH: usize = 40;

/// Environment variable consulted for the config file path.
pub const CONFIG_FILE_ENV_VAR: &str = "SANDPLANE_CONFIG";
