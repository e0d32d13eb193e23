//! Named extension points fired by the engine.
//!
//! The engine fires a [`Hook`] at fixed points and hands the observer
//! mutable access to the data in flight, so an observer can rewrite
//! parameters before they are sent or adjust a response before the engine
//! inspects it. Registration and dispatch order belong to the [`Hooks`]
//! implementation the caller supplies; [`NoHooks`] is the default.
//!
//! | Hook | Payload | Fired |
//! |------|---------|-------|
//! | `PreLogin` | params | before each login submission |
//! | `PostLogin` | response | after each login submission |
//! | `PreMutate` | params | before a mutating call |
//! | `PostMutate` | response | after a mutating call |
//! | `PreList` | params | once per paginated list query |
//! | `GetTokens` | token cache | on every token read, cached or refreshed |

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::cache::TokenCache;
use crate::codec::Params;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    PreLogin,
    PostLogin,
    PreMutate,
    PostMutate,
    PreList,
    GetTokens,
}

impl Hook {
    pub fn name(&self) -> &'static str {
        match self {
            Hook::PreLogin => "PreLogin",
            Hook::PostLogin => "PostLogin",
            Hook::PreMutate => "PreMutate",
            Hook::PostMutate => "PostMutate",
            Hook::PreList => "PreList",
            Hook::GetTokens => "GetTokens",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Data handed to an observer, by mutable reference.
pub enum HookPayload<'a> {
    Params(&'a mut Params),
    Response(&'a mut Value),
    Tokens(&'a mut TokenCache),
}

/// An observer refused to let the operation continue.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("hook {hook} failed: {message}")]
pub struct HookError {
    pub hook: Hook,
    pub message: String,
}

impl HookError {
    pub fn new(hook: Hook, message: impl Into<String>) -> Self {
        Self {
            hook,
            message: message.into(),
        }
    }
}

/// Dispatcher for engine hooks.
pub trait Hooks: Send + Sync {
    fn fire(&self, hook: Hook, payload: HookPayload<'_>) -> Result<(), HookError>;
}

/// Dispatcher with no observers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl Hooks for NoHooks {
    fn fire(&self, _hook: Hook, _payload: HookPayload<'_>) -> Result<(), HookError> {
        Ok(())
    }
}
