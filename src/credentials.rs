use std::fmt;

/// Account credentials used to authenticate a device session.
///
/// Immutable for the lifetime of a protocol instance; hashing happens at the
/// protocol layer, never here.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthCredential {
    pub username: String,
    pub password: String,
}

impl AuthCredential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for AuthCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthCredential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
