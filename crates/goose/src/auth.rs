//! Login and registration against the backend's auth routes. Only the HTTP
//! status is inspected; session cookies and tokens are left to the caller.

use std::error::Error;

use reqwest::StatusCode;
use serde::Serialize;

use crate::http::HttpChatClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Accepted,
    Rejected(StatusCode),
}

#[derive(Serialize)]
struct LoginForm<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RegisterBody<'a> {
    email: &'a str,
    password: &'a str,
}

impl HttpChatClient {
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<AuthOutcome, Box<dyn Error + Send + Sync>> {
        let response = self
            .client()
            .post(self.url("/auth/jwt/login"))
            .form(&LoginForm { username, password })
            .send()
            .await?;
        Ok(outcome("login", response.status()))
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthOutcome, Box<dyn Error + Send + Sync>> {
        let response = self
            .client()
            .post(self.url("/auth/register"))
            .json(&RegisterBody { email, password })
            .send()
            .await?;
        Ok(outcome("register", response.status()))
    }
}

fn outcome(action: &str, status: StatusCode) -> AuthOutcome {
    if status.is_success() {
        tracing::info!("{action} accepted");
        AuthOutcome::Accepted
    } else {
        tracing::warn!(%status, "{action} rejected");
        AuthOutcome::Rejected(status)
    }
}
