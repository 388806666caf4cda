//! Method bridge between the application layer and the host relay
//!
//! Calls arrive as a method name plus a JSON argument map and are answered
//! with a JSON value, a coded error, or `NotImplemented` for unknown methods.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::capability::{self, ForegroundSlot, VendorSdkState};
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::query::HealthQueries;
use crate::store::HealthRecordStore;
use crate::types::TimeRange;

/// Named operation invoked by the application layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl MethodCall {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            arguments: Map::new(),
        }
    }

    pub fn with_range(mut self, start_ms: i64, end_ms: i64) -> Self {
        self.arguments.insert("startTime".to_string(), json!(start_ms));
        self.arguments.insert("endTime".to_string(), json!(end_ms));
        self
    }

    /// Integer argument by name; absent or non-integer is `None`
    fn millis(&self, key: &str) -> Option<i64> {
        self.arguments.get(key).and_then(Value::as_i64)
    }
}

/// Answer to a method call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodResponse {
    Success(Value),
    Error { code: String, message: String },
    NotImplemented,
}

impl From<Result<Value, RelayError>> for MethodResponse {
    fn from(result: Result<Value, RelayError>) -> Self {
        match result {
            Ok(value) => MethodResponse::Success(value),
            Err(e) => MethodResponse::Error {
                code: e.code().to_string(),
                message: e.to_string(),
            },
        }
    }
}

/// Host-side dispatcher for application method calls
pub struct MethodBridge {
    queries: HealthQueries,
    vendor: Arc<VendorSdkState>,
    foreground: ForegroundSlot,
}

impl MethodBridge {
    pub fn new(
        store: Arc<dyn HealthRecordStore>,
        vendor: Arc<VendorSdkState>,
        foreground: ForegroundSlot,
        config: &RelayConfig,
    ) -> Self {
        Self {
            queries: HealthQueries::new(store, config),
            vendor,
            foreground,
        }
    }

    /// Dispatch one call
    pub async fn handle(&self, call: MethodCall) -> MethodResponse {
        log::debug!("Method call: {}", call.method);
        match call.method.as_str() {
            "requestPermissions" => self.request_permissions().await.into(),
            "getRestingHeartRate" => self.resting_heart_rate(&call).await.into(),
            "getHeartRateVariability" => self.heart_rate_variability(&call).await.into(),
            "initializeVendorSdk" => MethodResponse::Success(json!(self.vendor.initialize().await)),
            "getVendorHeartRate" => self.vendor_heart_rate(&call).await.into(),
            "checkVendorSdkAvailable" => {
                MethodResponse::Success(json!(self.vendor.check_available()))
            }
            "getHealthSnapshot" => self.health_snapshot().await.into(),
            other => {
                log::debug!("Unknown method: {}", other);
                MethodResponse::NotImplemented
            }
        }
    }

    async fn request_permissions(&self) -> Result<Value, RelayError> {
        let opened = capability::request_permissions(&self.foreground).await?;
        Ok(json!(opened))
    }

    async fn resting_heart_rate(&self, call: &MethodCall) -> Result<Value, RelayError> {
        let records = self
            .queries
            .resting_heart_rate(call.millis("startTime"), call.millis("endTime"))
            .await?;
        Ok(records
            .iter()
            .map(|r| json!({ "bpm": r.bpm, "timestamp": r.time.timestamp_millis() }))
            .collect())
    }

    async fn heart_rate_variability(&self, call: &MethodCall) -> Result<Value, RelayError> {
        let samples = self
            .queries
            .heart_rate_variability(call.millis("startTime"), call.millis("endTime"))
            .await?;
        Ok(serde_json::to_value(samples)?)
    }

    async fn vendor_heart_rate(&self, call: &MethodCall) -> Result<Value, RelayError> {
        let range = TimeRange::from_millis(call.millis("startTime"), call.millis("endTime"))?;
        let samples = self.vendor.heart_rate(&range).await?;
        Ok(samples
            .iter()
            .map(|s| json!({ "bpm": s.bpm, "timestamp": s.time.timestamp_millis() }))
            .collect())
    }

    async fn health_snapshot(&self) -> Result<Value, RelayError> {
        let snapshot = self.queries.snapshot(Utc::now()).await;
        Ok(serde_json::to_value(snapshot)?)
    }
}
