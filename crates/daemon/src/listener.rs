// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener seam: one ingress/egress adapter per platform.
//!
//! The Matrix and Discord SDK bindings live outside this workspace;
//! anything that can deliver `IncomingMessage`s and accept replies for
//! an `Origin` can participate.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// An inbound message in the neutral shape all platforms translate to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub platform: String,
    pub channel: String,
    pub sender: String,
    pub text: String,
}

/// Reply path for a message: the listener named `platform` owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub platform: String,
    pub channel: String,
}

impl IncomingMessage {
    pub fn origin(&self) -> Origin {
        Origin { platform: self.platform.clone(), channel: self.channel.clone() }
    }
}

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("listener send failed: {0}")]
    Send(String),

    #[error("listener connect failed: {0}")]
    Connect(String),
}

/// Platform adapter capability.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Platform label; the routing key for replies.
    fn name(&self) -> &str;

    /// Start delivering inbound messages to `inbox`.
    async fn connect(&self, inbox: mpsc::Sender<IncomingMessage>) -> Result<(), ListenerError>;

    async fn disconnect(&self) -> Result<(), ListenerError>;

    async fn send(&self, origin: &Origin, text: &str) -> Result<(), ListenerError>;

    /// Optional typing indicator; default is a no-op.
    async fn send_typing(&self, _origin: &Origin) -> Result<(), ListenerError> {
        Ok(())
    }
}

/// The set of connected listeners, addressable by platform name.
#[derive(Clone, Default)]
pub struct ListenerSet {
    listeners: Vec<Arc<dyn Listener>>,
}

impl ListenerSet {
    pub fn new(listeners: Vec<Arc<dyn Listener>>) -> Self {
        Self { listeners }
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<dyn Listener>> {
        self.listeners.iter().find(|l| l.name() == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Listener>> {
        self.listeners.iter()
    }

    /// Send through the listener that owns `origin.platform`. Errors are
    /// logged and swallowed; a down listener must not break the daemon.
    pub async fn deliver(&self, origin: &Origin, text: &str) {
        match self.by_name(&origin.platform) {
            Some(listener) => {
                if let Err(e) = listener.send(origin, text).await {
                    tracing::error!(platform = %origin.platform, error = %e, "listener send failed");
                }
            }
            None => {
                tracing::error!(platform = %origin.platform, "no listener for reply platform");
            }
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    //! Recording listener for tests.

    use super::*;
    use parking_lot::Mutex;

    /// Listener that records every outbound send.
    pub struct FakeListener {
        name: String,
        pub sent: Arc<Mutex<Vec<(Origin, String)>>>,
        /// When true, `send` fails (for swallow-errors tests).
        pub fail_sends: Arc<Mutex<bool>>,
    }

    impl FakeListener {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                sent: Arc::new(Mutex::new(Vec::new())),
                fail_sends: Arc::new(Mutex::new(false)),
            }
        }

        /// Texts sent so far, in order.
        pub fn texts(&self) -> Vec<String> {
            self.sent.lock().iter().map(|(_, text)| text.clone()).collect()
        }
    }

    #[async_trait]
    impl Listener for FakeListener {
        fn name(&self) -> &str {
            &self.name
        }

        async fn connect(
            &self,
            _inbox: mpsc::Sender<IncomingMessage>,
        ) -> Result<(), ListenerError> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), ListenerError> {
            Ok(())
        }

        async fn send(&self, origin: &Origin, text: &str) -> Result<(), ListenerError> {
            if *self.fail_sends.lock() {
                return Err(ListenerError::Send("fake listener down".into()));
            }
            self.sent.lock().push((origin.clone(), text.to_string()));
            Ok(())
        }
    }
}
