// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token authorities.
//!
//! The ttyd protocol requires a token in the client's first message; an
//! authority decides which requests may obtain a token (`authenticate`,
//! backing the `/token` endpoint) and which command a presented token maps
//! to (`get_command`, consulted by the session daemon before spawning).

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{header, Response, StatusCode};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::pty::SpawnCommand;

/// Maps requests to tokens and tokens to commands.
pub trait TokenHandler: Send + Sync {
    /// Decide whether the request is eligible for a token. On refusal the
    /// returned response has already been fully written (status, headers,
    /// body) and must be sent as-is.
    fn authenticate(&self, parts: &Parts) -> Result<String, Response<Body>>;

    /// The command to execute for the given token, or `None` to deny the
    /// session.
    fn get_command(&self, token: &str) -> Option<SpawnCommand>;
}

/// Serve the token endpoint: `{"token": "<token>"}` on success, the
/// authority's refusal response otherwise.
pub fn serve_token(handler: &dyn TokenHandler, parts: &Parts) -> Response<Body> {
    match handler.authenticate(parts) {
        Ok(token) => {
            let body = serde_json::json!({ "token": token }).to_string();
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
                .body(Body::from(body))
                .expect("static response must build")
        }
        Err(response) => response,
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ---------------------------------------------------------------------------
// Unprotected
// ---------------------------------------------------------------------------

/// No authentication; every token runs the same fixed command.
pub struct UnprotectedTokenHandler {
    command: SpawnCommand,
}

impl UnprotectedTokenHandler {
    pub fn new(command: SpawnCommand) -> Self {
        Self { command }
    }
}

impl TokenHandler for UnprotectedTokenHandler {
    fn authenticate(&self, _parts: &Parts) -> Result<String, Response<Body>> {
        Ok(String::new())
    }

    fn get_command(&self, _token: &str) -> Option<SpawnCommand> {
        Some(self.command.clone())
    }
}

// ---------------------------------------------------------------------------
// HTTP basic auth
// ---------------------------------------------------------------------------

/// HTTP Basic Auth; the issued token is the base64 credential pair and only
/// that token maps to the command.
pub struct BasicAuthTokenHandler {
    username: String,
    password: String,
    token: String,
    command: SpawnCommand,
}

impl BasicAuthTokenHandler {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        command: SpawnCommand,
    ) -> Self {
        let username = username.into();
        let password = password.into();
        let token = BASE64.encode(format!("{username}:{password}"));
        Self { username, password, token, command }
    }

    fn request_credentials(parts: &Parts) -> Option<(String, String)> {
        let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        let encoded = value.strip_prefix("Basic ")?;
        let decoded = BASE64.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, pass) = decoded.split_once(':')?;
        Some((user.to_owned(), pass.to_owned()))
    }

    fn unauthorized() -> Response<Body> {
        Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .header(header::WWW_AUTHENTICATE, "Basic realm=\"webtty\"")
            .body(Body::from("Unauthorized"))
            .expect("static response must build")
    }
}

impl TokenHandler for BasicAuthTokenHandler {
    fn authenticate(&self, parts: &Parts) -> Result<String, Response<Body>> {
        match Self::request_credentials(parts) {
            Some((user, pass))
                if constant_time_eq(&user, &self.username)
                    && constant_time_eq(&pass, &self.password) =>
            {
                Ok(self.token.clone())
            }
            _ => Err(Self::unauthorized()),
        }
    }

    fn get_command(&self, token: &str) -> Option<SpawnCommand> {
        if constant_time_eq(token, &self.token) {
            Some(self.command.clone())
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Reverse-proxy header
// ---------------------------------------------------------------------------

/// Authenticates by the presence of a header set by a trusting reverse
/// proxy. Intended for deployments listening on a unix socket behind that
/// proxy; any token maps to the command.
pub struct ProxyHeaderTokenHandler {
    auth_header: String,
    command: SpawnCommand,
}

impl ProxyHeaderTokenHandler {
    pub fn new(auth_header: impl Into<String>, command: SpawnCommand) -> Self {
        Self { auth_header: auth_header.into(), command }
    }
}

impl TokenHandler for ProxyHeaderTokenHandler {
    fn authenticate(&self, parts: &Parts) -> Result<String, Response<Body>> {
        let present = parts
            .headers
            .get(&self.auth_header)
            .map(|v| !v.is_empty())
            .unwrap_or(false);
        if present {
            Ok(String::new())
        } else {
            Err(Response::builder()
                .status(StatusCode::PROXY_AUTHENTICATION_REQUIRED)
                .header(header::PROXY_AUTHENTICATE, "Basic realm=\"webtty\"")
                .body(Body::from("Proxy Authentication Required"))
                .expect("static response must build"))
        }
    }

    fn get_command(&self, _token: &str) -> Option<SpawnCommand> {
        Some(self.command.clone())
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
