//! Core value types for location acquisition and delivery.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ParseError;
use crate::geo::haversine_distance;

/// One reading from the positioning subsystem.
///
/// Fixes are immutable once produced. Build them with
/// [`LocationFix::builder`] or [`LocationFix::new`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LocationFix {
    /// Latitude in decimal degrees (WGS84).
    pub latitude: f64,
    /// Longitude in decimal degrees (WGS84).
    pub longitude: f64,
    /// Horizontal accuracy radius in meters (lower is better).
    pub accuracy: f64,
    /// Altitude above the WGS84 ellipsoid in meters.
    #[cfg_attr(feature = "serde", serde(default))]
    pub altitude: Option<f64>,
    /// Ground speed in meters per second.
    #[cfg_attr(feature = "serde", serde(default))]
    pub speed: Option<f64>,
    /// Bearing in degrees clockwise from true north.
    #[cfg_attr(feature = "serde", serde(default))]
    pub bearing: Option<f64>,
    /// Provider tag reported by the platform (e.g. "gps", "fused", "network").
    pub provider: String,
    /// When the fix was captured.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
}

impl LocationFix {
    /// Create a fix with the mandatory fields; optional fields are left empty.
    pub fn new(
        latitude: f64,
        longitude: f64,
        accuracy: f64,
        provider: impl Into<String>,
        timestamp: OffsetDateTime,
    ) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
            altitude: None,
            speed: None,
            bearing: None,
            provider: provider.into(),
            timestamp,
        }
    }

    /// Create a builder for a fix at the given coordinates.
    pub fn builder(latitude: f64, longitude: f64) -> LocationFixBuilder {
        LocationFixBuilder {
            fix: Self::new(latitude, longitude, 0.0, "gps", OffsetDateTime::now_utc()),
        }
    }

    /// Great-circle distance to another fix in meters.
    #[must_use]
    pub fn distance_to(&self, other: &LocationFix) -> f64 {
        haversine_distance(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// Builder for [`LocationFix`].
///
/// Use [`build`](Self::build) for unchecked construction, or
/// [`try_build`](Self::try_build) to validate coordinate ranges.
#[derive(Debug)]
#[must_use]
pub struct LocationFixBuilder {
    fix: LocationFix,
}

impl LocationFixBuilder {
    /// Set horizontal accuracy in meters.
    pub fn accuracy(mut self, accuracy: f64) -> Self {
        self.fix.accuracy = accuracy;
        self
    }

    /// Set altitude in meters.
    pub fn altitude(mut self, altitude: f64) -> Self {
        self.fix.altitude = Some(altitude);
        self
    }

    /// Set speed in meters per second.
    pub fn speed(mut self, speed: f64) -> Self {
        self.fix.speed = Some(speed);
        self
    }

    /// Set bearing in degrees.
    pub fn bearing(mut self, bearing: f64) -> Self {
        self.fix.bearing = Some(bearing);
        self
    }

    /// Set the provider tag.
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.fix.provider = provider.into();
        self
    }

    /// Set the capture timestamp.
    pub fn timestamp(mut self, timestamp: OffsetDateTime) -> Self {
        self.fix.timestamp = timestamp;
        self
    }

    /// Build the fix without validation.
    #[must_use]
    pub fn build(self) -> LocationFix {
        self.fix
    }

    /// Build the fix with validation.
    ///
    /// Validates:
    /// - `latitude` is within -90..=90
    /// - `longitude` is within -180..=180
    /// - `accuracy` is finite and non-negative
    /// - `bearing` (if set) is within 0..360
    /// - `speed` (if set) is non-negative
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidValue`] if any field has an invalid value.
    pub fn try_build(self) -> Result<LocationFix, ParseError> {
        let fix = &self.fix;
        if !(-90.0..=90.0).contains(&fix.latitude) {
            return Err(ParseError::InvalidValue(format!(
                "latitude {} is outside valid range (-90 to 90)",
                fix.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&fix.longitude) {
            return Err(ParseError::InvalidValue(format!(
                "longitude {} is outside valid range (-180 to 180)",
                fix.longitude
            )));
        }
        if !fix.accuracy.is_finite() || fix.accuracy < 0.0 {
            return Err(ParseError::InvalidValue(format!(
                "accuracy {} must be a non-negative number of meters",
                fix.accuracy
            )));
        }
        if let Some(bearing) = fix.bearing
            && !(0.0..360.0).contains(&bearing)
        {
            return Err(ParseError::InvalidValue(format!(
                "bearing {} is outside valid range (0 to 360)",
                bearing
            )));
        }
        if let Some(speed) = fix.speed
            && speed < 0.0
        {
            return Err(ParseError::InvalidValue(format!(
                "speed {} cannot be negative",
                speed
            )));
        }
        Ok(self.fix)
    }
}

/// Radio posture requested from the positioning subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RadioPosture {
    /// Coarse, battery-friendly positioning (network/fused balanced power).
    #[default]
    LowPower,
    /// Full GPS, highest accuracy and highest drain.
    HighAccuracy,
}

impl fmt::Display for RadioPosture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioPosture::LowPower => write!(f, "low-power"),
            RadioPosture::HighAccuracy => write!(f, "high-accuracy"),
        }
    }
}

/// Top-level acquisition performance mode, chosen by the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PerformanceMode {
    /// Fixed 1 s cadence at high accuracy, for a visible live view.
    High,
    /// Duty-cycled background tracking keyed off the next log deadline.
    #[default]
    Normal,
    /// Fixed long cadence for critical battery.
    PowerSaver,
}

impl PerformanceMode {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceMode::High => "high",
            PerformanceMode::Normal => "normal",
            PerformanceMode::PowerSaver => "power_saver",
        }
    }
}

impl fmt::Display for PerformanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PerformanceMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "high" => Ok(PerformanceMode::High),
            "normal" => Ok(PerformanceMode::Normal),
            "power_saver" | "powersaver" => Ok(PerformanceMode::PowerSaver),
            _ => Err(ParseError::UnknownVariant {
                kind: "performance mode",
                value: s.to_string(),
            }),
        }
    }
}

/// Lifecycle state of the acquisition state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TrackingState {
    /// The host process has not activated the tracker yet.
    #[default]
    NotInitialized,
    /// Waiting for location permission to be confirmed.
    PermissionsNeeded,
    /// Permission confirmed; not running.
    Ready,
    /// Establishing the liveness indicator and engaging the radio.
    Starting,
    /// Acquiring fixes.
    Active,
    /// Resident but not acquiring.
    Paused,
    /// Releasing the radio, indicator and store handle.
    Stopping,
    /// Fully stopped; can be started again.
    Stopped,
    /// Unrecoverable fault; requires an explicit restart.
    Error,
}

impl TrackingState {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingState::NotInitialized => "not_initialized",
            TrackingState::PermissionsNeeded => "permissions_needed",
            TrackingState::Ready => "ready",
            TrackingState::Starting => "starting",
            TrackingState::Active => "active",
            TrackingState::Paused => "paused",
            TrackingState::Stopping => "stopping",
            TrackingState::Stopped => "stopped",
            TrackingState::Error => "error",
        }
    }

    /// Whether the radio is engaged in this state.
    pub fn is_acquiring(&self) -> bool {
        matches!(self, TrackingState::Active)
    }

    /// Whether the tracker holds its runtime resources (indicator, store handle).
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            TrackingState::Starting | TrackingState::Active | TrackingState::Paused
        )
    }
}

impl fmt::Display for TrackingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery lifecycle of a queued location row.
///
/// Rows move `Pending -> Syncing -> {Synced | Pending | Rejected}`.
/// `Synced` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DeliveryState {
    /// Waiting for a delivery attempt.
    Pending,
    /// Claimed by an in-flight delivery attempt.
    Syncing,
    /// Delivered successfully.
    Synced,
    /// Permanently refused; never retried.
    Rejected,
}

impl DeliveryState {
    /// All states, in lifecycle order.
    pub const ALL: [DeliveryState; 4] = [
        DeliveryState::Pending,
        DeliveryState::Syncing,
        DeliveryState::Synced,
        DeliveryState::Rejected,
    ];

    /// Stable lowercase name, also used as the persisted column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Syncing => "syncing",
            DeliveryState::Synced => "synced",
            DeliveryState::Rejected => "rejected",
        }
    }

    /// Whether no further transition is allowed out of this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryState::Synced | DeliveryState::Rejected)
    }

    /// Whether `self -> next` is a legal delivery transition.
    pub fn can_transition_to(&self, next: DeliveryState) -> bool {
        matches!(
            (self, next),
            (DeliveryState::Pending, DeliveryState::Syncing)
                | (DeliveryState::Syncing, DeliveryState::Synced)
                | (DeliveryState::Syncing, DeliveryState::Pending)
                | (DeliveryState::Syncing, DeliveryState::Rejected)
        )
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryState::Pending),
            "syncing" => Ok(DeliveryState::Syncing),
            "synced" => Ok(DeliveryState::Synced),
            "rejected" => Ok(DeliveryState::Rejected),
            _ => Err(ParseError::UnknownVariant {
                kind: "delivery state",
                value: s.to_string(),
            }),
        }
    }
}

/// Who initiated a queued entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum EntrySource {
    /// Logged by the acquisition state machine.
    #[default]
    Automatic,
    /// Logged on explicit user request.
    Manual,
}

impl EntrySource {
    /// Stable lowercase name, also used as the persisted column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntrySource::Automatic => "automatic",
            EntrySource::Manual => "manual",
        }
    }

    /// Whether the entry was produced without user action.
    pub fn is_automatic(&self) -> bool {
        matches!(self, EntrySource::Automatic)
    }
}

impl FromStr for EntrySource {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "automatic" => Ok(EntrySource::Automatic),
            "manual" => Ok(EntrySource::Manual),
            _ => Err(ParseError::UnknownVariant {
                kind: "entry source",
                value: s.to_string(),
            }),
        }
    }
}
