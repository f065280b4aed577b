//! Storage key constants.

/// Storage keys used by the engine
pub struct StorageKeys;

impl StorageKeys {
    /// Contact token stamped on authenticated requests
    pub const CONTACT_TOKEN: &'static str = "contact_token";

    /// Refresh token exchanged for a new contact token
    pub const REFRESH_TOKEN: &'static str = "refresh_token";

    /// Opaque client state echoed back to the client service
    pub const CLIENT_STATE: &'static str = "client_state";

    /// Currently identified contact, absent when anonymous
    pub const IDENTITY: &'static str = "identity";

    /// Open session (JSON), absent when no session is active
    pub const ACTIVE_SESSION: &'static str = "active_session";
}
