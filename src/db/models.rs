//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latency recorded for a probe that failed to connect.
pub const FAILED_LATENCY_MS: f64 = -1.0;

/// A monitored (public IP, port) endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub region: String,
    pub public_ip: String,
    pub port: u16,
    pub business_system: Option<String>,
    /// Informational only, never probed.
    pub internal_ip: Option<String>,
    pub internal_port: Option<u16>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when registering a target.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTarget {
    pub region: String,
    pub public_ip: String,
    pub port: u16,
    #[serde(default)]
    pub business_system: Option<String>,
    #[serde(default)]
    pub internal_ip: Option<String>,
    #[serde(default)]
    pub internal_port: Option<u16>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl NewTarget {
    #[cfg(test)]
    pub fn new(region: &str, public_ip: &str, port: u16) -> Self {
        Self {
            region: region.to_string(),
            public_ip: public_ip.to_string(),
            port,
            business_system: None,
            internal_ip: None,
            internal_port: None,
            is_active: true,
        }
    }

    /// Check the fields the prober and the unique index depend on.
    pub fn validate(&self) -> Result<(), String> {
        validate_region(&self.region)?;
        validate_host(&self.public_ip)?;
        validate_port("port", self.port)?;
        if let Some(p) = self.internal_port {
            validate_port("internal_port", p)?;
        }
        Ok(())
    }
}

/// Partial update of a target; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetUpdate {
    pub region: Option<String>,
    pub public_ip: Option<String>,
    pub port: Option<u16>,
    pub business_system: Option<String>,
    pub internal_ip: Option<String>,
    pub internal_port: Option<u16>,
    pub is_active: Option<bool>,
}

impl TargetUpdate {
    /// Apply the update on top of `target`, validating the result.
    pub fn apply(&self, target: &mut Target) -> Result<(), String> {
        if let Some(region) = &self.region {
            validate_region(region)?;
            target.region = region.trim().to_string();
        }
        if let Some(ip) = &self.public_ip {
            validate_host(ip)?;
            target.public_ip = ip.clone();
        }
        if let Some(port) = self.port {
            validate_port("port", port)?;
            target.port = port;
        }
        if self.business_system.is_some() {
            target.business_system = self.business_system.clone();
        }
        if self.internal_ip.is_some() {
            target.internal_ip = self.internal_ip.clone();
        }
        if let Some(port) = self.internal_port {
            validate_port("internal_port", port)?;
            target.internal_port = Some(port);
        }
        if let Some(active) = self.is_active {
            target.is_active = active;
        }
        Ok(())
    }
}

fn validate_region(region: &str) -> Result<(), String> {
    if region.trim().is_empty() {
        return Err("region must not be empty".to_string());
    }
    if region.len() > 100 {
        return Err("region is longer than 100 characters".to_string());
    }
    Ok(())
}

fn validate_host(host: &str) -> Result<(), String> {
    if host.is_empty() || host.chars().any(char::is_whitespace) {
        return Err(format!("invalid public address: {:?}", host));
    }
    if host.len() > 253 {
        return Err("public address is too long".to_string());
    }
    Ok(())
}

fn validate_port(field: &str, port: u16) -> Result<(), String> {
    if port == 0 {
        return Err(format!("{} must be between 1 and 65535", field));
    }
    Ok(())
}

/// One immutable probe outcome.
///
/// Region, address and port are copied from the target at probe time so later
/// edits to the target do not rewrite history. `target_id` becomes `None` once
/// the target is deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub target_id: Option<i64>,
    pub region: String,
    pub public_ip: String,
    pub port: u16,
    /// Milliseconds to establish the connection, or -1 when it failed.
    pub latency_ms: f64,
    pub is_successful: bool,
    pub probe_time: DateTime<Utc>,
}

impl ProbeResult {
    pub fn success(target: &Target, latency_ms: f64, probe_time: DateTime<Utc>) -> Self {
        Self {
            target_id: Some(target.id),
            region: target.region.clone(),
            public_ip: target.public_ip.clone(),
            port: target.port,
            latency_ms: latency_ms.max(0.0),
            is_successful: true,
            probe_time,
        }
    }

    pub fn failure(target: &Target, probe_time: DateTime<Utc>) -> Self {
        Self {
            target_id: Some(target.id),
            region: target.region.clone(),
            public_ip: target.public_ip.clone(),
            port: target.port,
            latency_ms: FAILED_LATENCY_MS,
            is_successful: false,
            probe_time,
        }
    }
}

/// Filter for range queries over probe results.
#[derive(Debug, Clone)]
pub struct ResultFilter {
    pub target_id: Option<i64>,
    pub region: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub limit: u32,
}

impl ResultFilter {
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            target_id: None,
            region: None,
            start,
            end,
            limit: 10_000,
        }
    }
}

/// Raw per-target counts as computed by the database.
#[derive(Debug, Clone)]
pub struct TargetAggregate {
    pub target_id: Option<i64>,
    pub region: String,
    pub public_ip: String,
    pub port: u16,
    pub business_system: Option<String>,
    pub total_probes: i64,
    pub successful_probes: i64,
    pub avg_latency_ms: Option<f64>,
}

/// Count of active targets in one region.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionCount {
    pub region: String,
    pub count: i64,
}
