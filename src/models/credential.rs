use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub provider: String,
}

/// Tokens and profile of the signed-in user. Owned by the credential store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<UserProfile>,
}

/// Response shape of login, register and refresh calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

impl Credential {
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    /// Applies a refresh response. Fields the backend left out are kept.
    pub fn refreshed(mut self, auth: AuthResponse) -> Self {
        self.access_token = Some(auth.access_token);
        if auth.refresh_token.is_some() {
            self.refresh_token = auth.refresh_token;
        }
        if auth.user.is_some() {
            self.user = auth.user;
        }
        self
    }
}

impl From<AuthResponse> for Credential {
    fn from(auth: AuthResponse) -> Self {
        Self {
            access_token: Some(auth.access_token),
            refresh_token: auth.refresh_token,
            user: auth.user,
        }
    }
}
