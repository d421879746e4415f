/// Application name
pub const APP_NAME: &str = "Parley";

/// AES-GCM nonce size in bytes (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Symmetric key size in bytes (AES-256-GCM)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// SEC1 field element size for the protocol curve, in bytes (P-384)
pub const FIELD_ELEMENT_SIZE: usize = 48;

/// JWK key type for exchanged public keys
pub const JWK_KTY: &str = "EC";

/// JWK curve name for exchanged public keys
pub const JWK_CRV: &str = "P-384";

/// Placeholder uuid carried by an optimistic local message until the
/// server-confirmed copy arrives
pub const TEMP_MESSAGE_UUID: &str = "temp";

/// Base reconnection delay in milliseconds
pub const RECONNECT_BASE_DELAY_MS: u64 = 1_000;

/// Reconnection delay cap in milliseconds
pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;

/// Maximum number of automatic reconnection attempts
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;
