use std::sync::Arc;

use dashmap::DashMap;

use crate::admission::AdmissionEngine;
use crate::broker::Broker;
use crate::config::Config;
use crate::limiter::RateLimiter;
use crate::metrics::Metrics;
use crate::presence::PresenceRegistry;
use crate::provider::ProviderManager;
use crate::store::Store;

/// Shared state handed to every ingest handler. `api_key_index` maps an
/// api key's cleartext prefix to its owning `app_id` so an inbound bearer
/// token can be routed to the one `Application` whose bcrypt hash it must
/// be checked against, without scanning every application on each request.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub broker: Arc<dyn Broker>,
    pub limiter: Arc<dyn RateLimiter>,
    pub presence: Arc<dyn PresenceRegistry>,
    pub providers: Arc<ProviderManager>,
    pub admission: Arc<AdmissionEngine>,
    pub metrics: Arc<Metrics>,
    pub config: Config,
    pub api_key_index: DashMap<String, String>,
}

/// Length of the cleartext prefix kept in `api_key_index`. Short enough to
/// keep the index small, long enough that prefix collisions are rare (a
/// collision only costs an extra failed bcrypt verify, never a security
/// hole, since the full key is still checked against the stored hash).
pub const API_KEY_PREFIX_LEN: usize = 12;
