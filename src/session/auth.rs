#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;

use serde_json::json;

use crate::models::{AuthResponse, Credential, UserProfile};

use super::{ApiError, ApiRequest, SessionClient};

impl SessionClient {
    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile, ApiError> {
        let request = ApiRequest::post("/auth/login")
            .with_json(json!({ "email": email, "password": password }))
            .auth_flow();
        self.sign_in(request).await
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<UserProfile, ApiError> {
        let request = ApiRequest::post("/auth/register")
            .with_json(json!({
                "email": email,
                "password": password,
                "full_name": full_name,
            }))
            .auth_flow();
        self.sign_in(request).await
    }

    pub async fn me(&self) -> Result<UserProfile, ApiError> {
        self.send_json(ApiRequest::get("/auth/me")).await
    }

    pub fn logout(&self) {
        log::info!("Signing out");
        self.store().clear();
    }

    /// Checks a stored credential against the backend at startup.
    ///
    /// Returns `None` when there is nothing stored or the backend no longer
    /// accepts it, in which case the store is cleared. Transport failures are
    /// returned so an offline start keeps the credential.
    pub async fn restore(&self) -> Result<Option<UserProfile>, ApiError> {
        if !self.store().get().is_authenticated() {
            return Ok(None);
        }

        match self.me().await {
            Ok(user) => {
                let credential = self.store().get();
                self.store().set(Credential {
                    user: Some(user.clone()),
                    ..credential
                });
                Ok(Some(user))
            }
            Err(err) if err.is_auth_failure() => {
                log::info!("Stored credential was rejected: {}", err);
                self.store().clear();
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn sign_in(&self, request: ApiRequest) -> Result<UserProfile, ApiError> {
        let path = request.path().to_string();
        let auth: AuthResponse = self.send_json(request).await?;
        let credential = Credential::from(auth);
        let Some(user) = credential.user.clone() else {
            return Err(ApiError::Decode(format!("{path} response has no user")));
        };

        log::info!("Signed in as {}", user.email);
        self.store().set(credential);
        Ok(user)
    }
}
