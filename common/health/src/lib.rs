use std::collections::HashMap;
use std::ops::Add;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::warn;

/// Health reporting for components of a service.
///
/// Both pipeline services contain several long-lived asynchronous loops,
/// and the process can only be trusted with events if all of those loops
/// are running and reporting. HealthRegistry lets each loop register a
/// component with a deadline; the process health is the combination of
/// the individual statuses:
///   - if any component is unhealthy or stalled past its deadline, the
///     process is unhealthy and the probe fails
///   - if all components recently reported healthy, the process is healthy
#[derive(Default, Debug)]
pub struct HealthStatus {
    /// The overall status: true if all components are healthy
    pub healthy: bool,
    /// Current status of each registered component, for display
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    /// Computes the axum status code from the overall health status,
    /// and prints each component status in the body for debugging.
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Automatically set when a component is newly registered
    Starting,
    /// Recently reported healthy, will need to report again before the date
    HealthyUntil(time::OffsetDateTime),
    /// Reported unhealthy
    Unhealthy,
    /// Automatically set when the HealthyUntil deadline is reached
    Stalled,
}

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
}

impl HealthHandle {
    /// Report healthy. Must be called more frequently than the configured
    /// deadline for the component to stay healthy.
    pub fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            time::OffsetDateTime::now_utc().add(self.deadline),
        ))
    }

    pub fn report_status(&self, status: ComponentStatus) {
        match self.components.write() {
            Ok(mut map) => {
                map.insert(self.component.clone(), status);
            }
            Err(_) => {
                // Poisoned lock: just warn, the probe will fail and the process restart
                warn!("poisoned HealthRegistry lock");
            }
        }
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Default::default(),
        }
    }

    /// Registers a new component in the registry. The returned handle should
    /// be passed to the component, to allow it to frequently report its
    /// health status.
    pub fn register(&self, component: String, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component,
            deadline,
            components: self.components.clone(),
        };
        handle.report_status(ComponentStatus::Starting);
        handle
    }

    /// Returns the overall process status, computed from the status of all
    /// the components currently registered. Can be used as an axum handler.
    pub fn get_status(&self) -> HealthStatus {
        let components = match self.components.read() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };

        // Unhealthy until the first component registers, then healthy
        // unless a component is failing or stalled.
        let mut result = HealthStatus {
            healthy: !components.is_empty(),
            components: Default::default(),
        };
        let now = time::OffsetDateTime::now_utc();

        for (name, status) in components.iter() {
            match status {
                ComponentStatus::HealthyUntil(until) if until.gt(&now) => {
                    result.components.insert(name.clone(), status.clone());
                }
                ComponentStatus::HealthyUntil(_) => {
                    result.healthy = false;
                    result
                        .components
                        .insert(name.clone(), ComponentStatus::Stalled);
                }
                _ => {
                    result.healthy = false;
                    result.components.insert(name.clone(), status.clone());
                }
            }
        }

        if !result.healthy {
            warn!("{} health check failed: {:?}", self.name, result.components);
        }
        result
    }
}
