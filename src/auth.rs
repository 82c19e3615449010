use crate::error::{Result, RpcError};
use std::fmt;
use std::sync::Arc;

/// Supplies a bearer token on demand. Tokens are short-lived, so the provider
/// is called once per login or authenticated HTTP exchange.
pub type TokenProvider = Arc<dyn Fn() -> Result<String> + Send + Sync>;

/// Bearer-token credentials plus an optional account scope.
#[derive(Clone)]
pub struct Credentials {
    token_provider: TokenProvider,
    account: Option<String>,
}

impl Credentials {
    pub fn new(token_provider: TokenProvider) -> Self {
        Self {
            token_provider,
            account: None,
        }
    }

    /// Credentials backed by a fixed token.
    pub fn from_token(token: impl Into<String>) -> Self {
        let token = token.into();
        Self::new(Arc::new(move || Ok(token.clone())))
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    /// Fetches a fresh token from the provider.
    pub fn token(&self) -> Result<String> {
        let token = (self.token_provider)()?;
        if token.is_empty() {
            return Err(RpcError::AuthenticationError(
                "token provider returned an empty token".to_string(),
            ));
        }
        Ok(token)
    }

    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token_provider", &"<redacted>")
            .field("account", &self.account)
            .finish()
    }
}
