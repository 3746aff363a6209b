//! Command registry.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use txnframe_protocol::Codec;

/// A synchronous command handler operating on encoded payloads.
///
/// Handlers run on the blocking thread pool, so they may wait on locks.
/// An `Err` is sent back to the caller as an error frame.
pub trait Handler: Send + Sync {
    /// Handles one encoded request and returns the encoded reply.
    fn handle(&self, codec: Codec, payload: &[u8]) -> Result<Vec<u8>, String>;
}

struct TypedHandler<F, Req, Res> {
    func: F,
    _marker: PhantomData<fn(Req) -> Res>,
}

impl<F, Req, Res> Handler for TypedHandler<F, Req, Res>
where
    F: Fn(Req) -> Result<Res, String> + Send + Sync,
    Req: DeserializeOwned,
    Res: Serialize,
{
    fn handle(&self, codec: Codec, payload: &[u8]) -> Result<Vec<u8>, String> {
        let request: Req = codec.decode(payload).map_err(|e| e.to_string())?;
        let response = (self.func)(request)?;
        codec.encode(&response).map_err(|e| e.to_string())
    }
}

/// Maps command names to handlers.
///
/// Built once at startup and shared read-only by every connection.
#[derive(Default)]
pub struct Router {
    routes: HashMap<String, Box<dyn Handler>>,
}

impl Router {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous one for `cmd`.
    pub fn register(&mut self, cmd: impl Into<String>, handler: Box<dyn Handler>) -> &mut Self {
        self.routes.insert(cmd.into(), handler);
        self
    }

    /// Registers a typed function. The request is decoded and the reply
    /// encoded with the codec of the incoming frame.
    pub fn route<Req, Res, F>(&mut self, cmd: impl Into<String>, func: F) -> &mut Self
    where
        Req: DeserializeOwned + 'static,
        Res: Serialize + 'static,
        F: Fn(Req) -> Result<Res, String> + Send + Sync + 'static,
    {
        self.register(
            cmd,
            Box::new(TypedHandler {
                func,
                _marker: PhantomData,
            }),
        )
    }

    /// Runs the handler registered for `cmd`.
    pub fn dispatch(&self, cmd: &str, codec: Codec, payload: &[u8]) -> Result<Vec<u8>, String> {
        match self.routes.get(cmd) {
            Some(handler) => handler.handle(codec, payload),
            None => Err(format!("unknown command: {cmd}")),
        }
    }

    /// Returns true if `cmd` has a handler.
    pub fn contains(&self, cmd: &str) -> bool {
        self.routes.contains_key(cmd)
    }

    /// Registered command names, sorted.
    pub fn commands(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("commands", &self.commands())
            .finish()
    }
}
