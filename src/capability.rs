//! Optional capabilities on the host
//!
//! Two things the host may or may not have at runtime:
//!
//! - a vendor heart-rate SDK, resolved once by a feature-detection probe and
//!   cached for the life of the process;
//! - a foreground surface able to show the record store's permission screen,
//!   attached while a foreground context is alive.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock, RwLock};

use crate::error::RelayError;
use crate::types::{HeartRateSample, TimeRange};

// ============================================================================
// Vendor SDK
// ============================================================================

/// Outcome of probing for an optional external capability
#[derive(Clone)]
pub enum Capability<H> {
    Available(H),
    Unavailable,
}

impl<H> Capability<H> {
    pub fn is_available(&self) -> bool {
        matches!(self, Capability::Available(_))
    }
}

/// Vendor heart-rate SDK, once it is known to be present
#[async_trait]
pub trait VendorSdk: Send + Sync {
    /// Ask the SDK to request heart-rate read permission
    async fn request_permissions(&self) -> Result<(), RelayError>;

    /// Heart-rate samples in range; empty when the SDK cannot serve them
    async fn read_heart_rate(&self, range: &TimeRange)
        -> Result<Vec<HeartRateSample>, RelayError>;
}

/// Feature detection for the vendor SDK
pub trait VendorSdkProbe: Send + Sync {
    fn probe(&self) -> Capability<Arc<dyn VendorSdk>>;
}

impl<F> VendorSdkProbe for F
where
    F: Fn() -> Capability<Arc<dyn VendorSdk>> + Send + Sync,
{
    fn probe(&self) -> Capability<Arc<dyn VendorSdk>> {
        self()
    }
}

/// Probe for builds that link no vendor SDK
pub struct NoVendorSdk;

impl VendorSdkProbe for NoVendorSdk {
    fn probe(&self) -> Capability<Arc<dyn VendorSdk>> {
        Capability::Unavailable
    }
}

/// Process-wide vendor SDK state with a resolve-once lifecycle
pub struct VendorSdkState {
    probe: Box<dyn VendorSdkProbe>,
    resolved: OnceLock<Capability<Arc<dyn VendorSdk>>>,
}

impl VendorSdkState {
    pub fn new(probe: impl VendorSdkProbe + 'static) -> Self {
        Self {
            probe: Box::new(probe),
            resolved: OnceLock::new(),
        }
    }

    fn resolve(&self) -> &Capability<Arc<dyn VendorSdk>> {
        self.resolved.get_or_init(|| {
            let capability = self.probe.probe();
            if capability.is_available() {
                log::info!("Vendor SDK available");
            } else {
                log::info!("Vendor SDK not found");
            }
            capability
        })
    }

    /// Whether the SDK is present; probes on first call only
    pub fn check_available(&self) -> bool {
        self.resolve().is_available()
    }

    /// Resolve the SDK and request its heart-rate permission.
    ///
    /// Returns `false` when the SDK is absent or the request fails.
    pub async fn initialize(&self) -> bool {
        let sdk = match self.resolve() {
            Capability::Available(sdk) => Arc::clone(sdk),
            Capability::Unavailable => return false,
        };

        match sdk.request_permissions().await {
            Ok(()) => {
                log::info!("Vendor SDK initialized");
                true
            }
            Err(e) => {
                log::warn!("Vendor SDK permission request failed: {}", e);
                false
            }
        }
    }

    /// Heart-rate series from the SDK; `NotInitialized` until resolved as available
    pub async fn heart_rate(&self, range: &TimeRange) -> Result<Vec<HeartRateSample>, RelayError> {
        let sdk = match self.resolved.get() {
            Some(Capability::Available(sdk)) => Arc::clone(sdk),
            _ => return Err(RelayError::NotInitialized),
        };
        sdk.read_heart_rate(range).await
    }
}

impl Default for VendorSdkState {
    fn default() -> Self {
        Self::new(NoVendorSdk)
    }
}

// ============================================================================
// Record-store permissions
// ============================================================================

/// Record types the application reads from the health-record store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    HeartRate,
    RestingHeartRate,
    HeartRateVariability,
    BloodPressure,
    OxygenSaturation,
    Sleep,
    Steps,
    Distance,
    ActiveCalories,
    TotalCalories,
    Exercise,
    Vo2Max,
    Weight,
    Height,
    BodyFat,
    BasalMetabolicRate,
    Hydration,
    BloodGlucose,
    BodyTemperature,
    RespiratoryRate,
    Nutrition,
}

impl RecordType {
    pub const ALL: [RecordType; 21] = [
        RecordType::HeartRate,
        RecordType::RestingHeartRate,
        RecordType::HeartRateVariability,
        RecordType::BloodPressure,
        RecordType::OxygenSaturation,
        RecordType::Sleep,
        RecordType::Steps,
        RecordType::Distance,
        RecordType::ActiveCalories,
        RecordType::TotalCalories,
        RecordType::Exercise,
        RecordType::Vo2Max,
        RecordType::Weight,
        RecordType::Height,
        RecordType::BodyFat,
        RecordType::BasalMetabolicRate,
        RecordType::Hydration,
        RecordType::BloodGlucose,
        RecordType::BodyTemperature,
        RecordType::RespiratoryRate,
        RecordType::Nutrition,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub record: RecordType,
    pub access: Access,
}

/// Read access to every record type, plus write access to HRV
pub fn required_permissions() -> Vec<Permission> {
    let mut permissions: Vec<Permission> = RecordType::ALL
        .iter()
        .map(|&record| Permission {
            record,
            access: Access::Read,
        })
        .collect();
    permissions.push(Permission {
        record: RecordType::HeartRateVariability,
        access: Access::Write,
    });
    permissions
}

/// Foreground context able to show permission UI
#[async_trait]
pub trait PermissionSurface: Send + Sync {
    /// Open the store's permission screen for the given permissions
    async fn open_permission_request(&self, permissions: &[Permission]) -> Result<(), RelayError>;

    /// Open the record store's own app; `NoPermissionSurface` if it is not installed
    async fn open_store_app(&self) -> Result<(), RelayError>;
}

/// Slot holding the currently attached foreground surface, if any
#[derive(Clone, Default)]
pub struct ForegroundSlot {
    inner: Arc<RwLock<Option<Arc<dyn PermissionSurface>>>>,
}

impl ForegroundSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, surface: Arc<dyn PermissionSurface>) {
        if let Ok(mut slot) = self.inner.write() {
            *slot = Some(surface);
        }
    }

    pub fn detach(&self) {
        if let Ok(mut slot) = self.inner.write() {
            *slot = None;
        }
    }

    pub fn current(&self) -> Option<Arc<dyn PermissionSurface>> {
        self.inner.read().ok().and_then(|slot| slot.clone())
    }
}

/// Ask the attached surface to open the permission screen.
///
/// Falls back to opening the store app when the permission screen cannot be
/// shown. Returns `true` once either screen is open.
pub async fn request_permissions(slot: &ForegroundSlot) -> Result<bool, RelayError> {
    let surface = slot.current().ok_or(RelayError::NoPermissionSurface)?;
    let permissions = required_permissions();
    log::info!("Requesting {} record-store permissions", permissions.len());

    let e = match surface.open_permission_request(&permissions).await {
        Ok(()) => return Ok(true),
        Err(e) => e,
    };
    log::warn!("Permission screen unavailable ({}), opening store app", e);

    match surface.open_store_app().await {
        Ok(()) => Ok(true),
        Err(RelayError::NoPermissionSurface) => Err(RelayError::NoPermissionSurface),
        Err(e) => Err(RelayError::PermissionRequest(e.to_string())),
    }
}
