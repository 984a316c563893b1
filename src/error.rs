// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

/// Machine-readable error codes for the ArqonBus wire protocol (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArqonError {
    AuthRequired,
    AuthInvalid,
    ProtocolError,
    ValidationError,
    Oversize,
    RateLimited,
    SlowConsumer,
    AuthzDenied,
    CasilPolicyBlockedSecret,
    CasilPolicyOversize,
    CasilInternalBlock,
    CasilInternalAllow,
    ChannelNotEmpty,
    ChannelProtected,
    FeatureDisabled,
    StaleEvent,
    NotSupportedInDegraded,
    Timeout,
    Internal,
    SessionNotFound,
    ChannelNotFound,
    CasilReloadRejected,
}

impl ArqonError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::AuthRequired | Self::AuthInvalid => 401,
            Self::AuthzDenied => 403,
            Self::ValidationError
            | Self::ProtocolError
            | Self::Oversize
            | Self::ChannelNotEmpty
            | Self::ChannelProtected
            | Self::CasilReloadRejected => 400,
            Self::SessionNotFound | Self::ChannelNotFound => 404,
            Self::RateLimited | Self::SlowConsumer => 429,
            Self::FeatureDisabled | Self::NotSupportedInDegraded => 409,
            Self::Timeout => 504,
            Self::CasilPolicyBlockedSecret
            | Self::CasilPolicyOversize
            | Self::CasilInternalBlock
            | Self::CasilInternalAllow
            | Self::StaleEvent
            | Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::AuthInvalid => "AUTH_INVALID",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::Oversize => "OVERSIZE",
            Self::RateLimited => "RATE_LIMITED",
            Self::SlowConsumer => "SLOW_CONSUMER",
            Self::AuthzDenied => "AUTHZ_DENIED",
            Self::CasilPolicyBlockedSecret => "CASIL_POLICY_BLOCKED_SECRET",
            Self::CasilPolicyOversize => "CASIL_POLICY_OVERSIZE",
            Self::CasilInternalBlock => "CASIL_INTERNAL_BLOCK",
            Self::CasilInternalAllow => "CASIL_INTERNAL_ALLOW",
            Self::ChannelNotEmpty => "CHANNEL_NOT_EMPTY",
            Self::ChannelProtected => "CHANNEL_PROTECTED",
            Self::FeatureDisabled => "FEATURE_DISABLED",
            Self::StaleEvent => "STALE_EVENT",
            Self::NotSupportedInDegraded => "NOT_SUPPORTED_IN_DEGRADED",
            Self::Timeout => "TIMEOUT",
            Self::Internal => "INTERNAL_ERROR",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::ChannelNotFound => "CHANNEL_NOT_FOUND",
            Self::CasilReloadRejected => "CASIL_RELOAD_REJECTED",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }

    /// Build the canonical wire `error` envelope described in spec §6.
    pub fn to_envelope(
        &self,
        request_id: Option<&str>,
        message: impl Into<String>,
        room: Option<&str>,
        channel: Option<&str>,
        policy_id: Option<&str>,
    ) -> serde_json::Value {
        serde_json::json!({
            "type": "error",
            "request_id": request_id,
            "error": message.into(),
            "error_code": self.as_str(),
            "payload": { "reason": self.as_str(), "policy_id": policy_id },
            "room": room,
            "channel": channel,
            "sender": "arqonbus",
            "timestamp": crate::envelope::now_rfc3339(),
        })
    }
}

impl fmt::Display for ArqonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error response envelope (HTTP surface).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}
