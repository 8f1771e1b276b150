//! Outbound call collaborator used by `call` tasks.
//!
//! The engine only describes the request; performing it is delegated to a
//! `CallHandler` implementation supplied by the application (the infra
//! crate provides a reqwest-backed one).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

/// A fully resolved outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    pub method: String,
    pub endpoint: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

/// A successful response; `body` becomes the task output.
#[derive(Debug, Clone, PartialEq)]
pub struct CallResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Value,
}

/// A failed call, classified by transport status when one is known.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct CallError {
    pub status: Option<u16>,
    pub message: String,
}

impl CallError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Performs outbound calls on behalf of `call` tasks.
pub trait CallHandler: Send + Sync {
    fn call(
        &self,
        request: CallRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CallResponse, CallError>> + Send + '_>>;
}

/// Handler used when the application was built without one; every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredCallHandler;

impl CallHandler for UnconfiguredCallHandler {
    fn call(
        &self,
        request: CallRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CallResponse, CallError>> + Send + '_>> {
        Box::pin(async move {
            Err(CallError::new(
                None,
                format!(
                    "no call handler configured for {} {}",
                    request.method, request.endpoint
                ),
            ))
        })
    }
}
