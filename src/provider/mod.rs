pub mod email;
pub mod push;
pub mod sms;
pub mod sse;
pub mod webhook;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::types::{Channel, Notification, SendOutcome, User};

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("a provider is already registered for channel {0:?}")]
    Duplicate(Channel),
    #[error("no provider registered for channel {0:?}")]
    NotFound(Channel),
}

/// Uniform send contract every channel adapter implements. Deliberately
/// narrow: the manager and orchestrator only ever call these four methods,
/// never anything adapter-specific.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn send(&self, notification: &Notification, user: &User, destination: &str) -> SendOutcome;
    fn supported_channel(&self) -> Channel;
    async fn is_healthy(&self) -> bool;
    async fn close(&self);
}

/// `channel -> provider` registry. Registration rejects duplicates per
/// channel; lookup returns the registered provider or `ErrNoProvider`.
/// Cascading fallback across multiple providers for one channel is an
/// explicit non-goal — this mandates single-provider dispatch.
#[derive(Default)]
pub struct ProviderManager {
    providers: HashMap<Channel, Arc<dyn Provider>>,
}

impl ProviderManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) -> Result<(), ProviderError> {
        let channel = provider.supported_channel();
        if self.providers.contains_key(&channel) {
            return Err(ProviderError::Duplicate(channel));
        }
        self.providers.insert(channel, provider);
        Ok(())
    }

    pub fn resolve(&self, channel: Channel) -> Result<Arc<dyn Provider>, ProviderError> {
        self.providers.get(&channel).cloned().ok_or(ProviderError::NotFound(channel))
    }

    pub async fn close_all(&self) {
        for provider in self.providers.values() {
            provider.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct StubProvider(Channel);

    #[async_trait]
    impl Provider for StubProvider {
        async fn send(&self, _: &Notification, _: &User, _: &str) -> SendOutcome {
            SendOutcome::Success {
                provider_message_id: "id".into(),
                delivery_time: Utc::now(),
                metadata: HashMap::new(),
            }
        }

        fn supported_channel(&self) -> Channel {
            self.0
        }

        async fn is_healthy(&self) -> bool {
            true
        }

        async fn close(&self) {}
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut manager = ProviderManager::new();
        manager.register(Arc::new(StubProvider(Channel::Email))).unwrap();
        let err = manager.register(Arc::new(StubProvider(Channel::Email))).unwrap_err();
        assert!(matches!(err, ProviderError::Duplicate(Channel::Email)));
    }

    #[test]
    fn missing_channel_is_not_found() {
        let manager = ProviderManager::new();
        let err = match manager.resolve(Channel::Sms) {
            Err(e) => e,
            Ok(_) => panic!("expected resolve to fail for unregistered channel"),
        };
        assert!(matches!(err, ProviderError::NotFound(Channel::Sms)));
    }
}
