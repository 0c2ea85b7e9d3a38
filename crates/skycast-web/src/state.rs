use std::sync::Arc;

use skycast_core::{
    GeocodingClient, HttpClient, MetricsRegistry, ModelArtifact, NextDayModel, PersistenceModel,
    ReqwestHttpClient, WeatherClient,
};

use crate::config::ServerConfig;
use crate::error::StartupError;
use crate::middleware::rate_limit::{IpRateLimitConfig, IpRateLimiter};

/// Shared handles for every request handler and middleware.
#[derive(Clone)]
pub struct AppState {
    pub geocoding: Arc<GeocodingClient>,
    pub weather: Arc<WeatherClient>,
    pub model: Arc<dyn NextDayModel>,
    pub metrics: Arc<MetricsRegistry>,
    pub rate_limiter: Arc<IpRateLimiter>,
}

impl AppState {
    /// State with the persistence model and an empty metrics registry.
    pub fn new(
        geocoding: GeocodingClient,
        weather: WeatherClient,
        rate_limit: IpRateLimitConfig,
    ) -> Self {
        Self {
            geocoding: Arc::new(geocoding),
            weather: Arc::new(weather),
            model: Arc::new(PersistenceModel),
            metrics: Arc::new(MetricsRegistry::default()),
            rate_limiter: Arc::new(IpRateLimiter::new(rate_limit)),
        }
    }

    pub fn with_model(mut self, model: Arc<dyn NextDayModel>) -> Self {
        self.model = model;
        self
    }

    /// Builds live clients from configuration. The model artifact, if any, is
    /// resolved once here.
    pub fn from_config(config: &ServerConfig) -> Result<Self, StartupError> {
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
        let state = Self::new(
            GeocodingClient::new(config.geocoding_config(), Arc::clone(&http)),
            WeatherClient::new(config.weather_config(), http),
            config.rate_limit_config(),
        );

        let Some(path) = &config.model_path else {
            return Ok(state);
        };
        let artifact = ModelArtifact::load_from_file(path).map_err(|source| StartupError::Model {
            path: path.display().to_string(),
            source,
        })?;
        Ok(state.with_model(Arc::new(artifact.into_model())))
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("model", &self.model.name())
            .field("rate_limiter", &self.rate_limiter)
            .finish_non_exhaustive()
    }
}
