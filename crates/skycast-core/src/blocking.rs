//! Synchronous facade over [`WeatherClient`].
//!
//! Both paths share one client, so cache keys and parsing are identical by
//! construction. Do not call these methods from inside an async runtime.

use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};

use crate::adapters::{HourlyRequest, HourlySeries, RecentDaily, WeatherClient, WeatherConfig};
use crate::http_client::HttpClient;
use crate::invoker::UpstreamError;
use crate::{Coordinates, CoreError, Timezone};

pub struct BlockingWeatherClient {
    inner: WeatherClient,
    runtime: Runtime,
}

impl BlockingWeatherClient {
    pub fn new(config: WeatherConfig, http_client: Arc<dyn HttpClient>) -> Result<Self, CoreError> {
        Self::from_client(WeatherClient::new(config, http_client))
    }

    pub fn from_client(inner: WeatherClient) -> Result<Self, CoreError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| CoreError::Runtime(error.to_string()))?;
        Ok(Self { inner, runtime })
    }

    pub fn client(&self) -> &WeatherClient {
        &self.inner
    }

    pub fn recent_daily(
        &self,
        coordinates: Coordinates,
        timezone: &Timezone,
        days: i64,
    ) -> Result<RecentDaily, UpstreamError> {
        self.runtime
            .block_on(self.inner.recent_daily(coordinates, timezone, days))
    }

    pub fn hourly(&self, request: &HourlyRequest) -> Result<HourlySeries, UpstreamError> {
        self.runtime.block_on(self.inner.hourly(request))
    }
}

impl std::fmt::Debug for BlockingWeatherClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingWeatherClient")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}
