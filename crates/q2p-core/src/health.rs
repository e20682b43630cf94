//! Component health and worker lifecycle state.
//!
//! The worker marks gateways healthy or degraded as calls succeed or fail.
//! A systemic fault (missing permissions) halts intake and marks the
//! affected component unhealthy until the process is restarted.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;

/// Component names reported by the worker.
pub mod component {
    pub const QUEUE: &str = "queue";
    pub const SOURCE_STORE: &str = "source_store";
    pub const DESTINATION_STORE: &str = "destination_store";
    pub const CONVERTER: &str = "converter";
    pub const CATALOG: &str = "catalog";

    pub const ALL: [&str; 5] = [QUEUE, SOURCE_STORE, DESTINATION_STORE, CONVERTER, CATALOG];
}

/// Health status of a component.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ComponentStatus {
    Healthy,
    /// Operational, recent calls failed transiently
    Degraded(String),
    /// Not operational
    Unhealthy(String),
    Unknown,
}

/// Overall status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Worker lifecycle as seen by probes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "phase", content = "reason", rename_all = "snake_case")]
pub enum WorkerPhase {
    Idle,
    /// Receiving and processing
    Running,
    /// Cancellation requested; in-flight tasks finishing
    Draining,
    /// Intake stopped by a systemic fault
    Halted(String),
    Stopped,
}

/// Serializable health report.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub phase: WorkerPhase,
    pub components: BTreeMap<String, ComponentStatus>,
}

/// Health registry shared by the worker and the HTTP server.
pub struct HealthCheck {
    components: RwLock<BTreeMap<String, ComponentStatus>>,
    phase: RwLock<WorkerPhase>,
}

impl HealthCheck {
    pub fn new() -> Self {
        Self {
            components: RwLock::new(BTreeMap::new()),
            phase: RwLock::new(WorkerPhase::Idle),
        }
    }

    /// Registry with every worker component registered as unknown.
    pub fn for_worker() -> Self {
        let health = Self::new();
        for name in component::ALL {
            health.register_component(name);
        }
        health
    }

    pub fn register_component(&self, name: &str) {
        self.components
            .write()
            .insert(name.to_string(), ComponentStatus::Unknown);
    }

    pub fn mark_healthy(&self, name: &str) {
        let halted = self.is_halted();
        let mut components = self.components.write();
        // A halted component stays unhealthy until restart.
        if halted && matches!(components.get(name), Some(ComponentStatus::Unhealthy(_))) {
            return;
        }
        components.insert(name.to_string(), ComponentStatus::Healthy);
    }

    pub fn mark_degraded(&self, name: &str, reason: &str) {
        let mut components = self.components.write();
        if matches!(components.get(name), Some(ComponentStatus::Unhealthy(_))) {
            return;
        }
        components.insert(name.to_string(), ComponentStatus::Degraded(reason.to_string()));
    }

    pub fn mark_unhealthy(&self, name: &str, reason: &str) {
        self.components
            .write()
            .insert(name.to_string(), ComponentStatus::Unhealthy(reason.to_string()));
    }

    pub fn get_component_status(&self, name: &str) -> Option<ComponentStatus> {
        self.components.read().get(name).cloned()
    }

    pub fn overall_status(&self) -> HealthStatus {
        if self.is_halted() {
            return HealthStatus::Unhealthy;
        }

        let components = self.components.read();
        let mut has_degraded = false;
        for status in components.values() {
            match status {
                ComponentStatus::Unhealthy(_) => return HealthStatus::Unhealthy,
                ComponentStatus::Degraded(_) => has_degraded = true,
                _ => {}
            }
        }

        if has_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Healthy or degraded.
    pub fn is_operational(&self) -> bool {
        self.overall_status() != HealthStatus::Unhealthy
    }

    /// Ready to take work: running and operational.
    pub fn is_ready(&self) -> bool {
        let running = *self.phase.read() == WorkerPhase::Running;
        running && self.is_operational()
    }

    pub fn set_phase(&self, phase: WorkerPhase) {
        let mut current = self.phase.write();
        // Halted is sticky except for the final stop.
        if matches!(*current, WorkerPhase::Halted(_)) && phase != WorkerPhase::Stopped {
            return;
        }
        *current = phase;
    }

    /// Stop intake after a systemic fault in `component`.
    pub fn halt(&self, component: &str, reason: &str) {
        self.mark_unhealthy(component, reason);
        *self.phase.write() = WorkerPhase::Halted(format!("{component}: {reason}"));
    }

    pub fn phase(&self) -> WorkerPhase {
        self.phase.read().clone()
    }

    pub fn is_halted(&self) -> bool {
        matches!(*self.phase.read(), WorkerPhase::Halted(_))
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            status: self.overall_status(),
            phase: self.phase(),
            components: self.components.read().clone(),
        }
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new()
    }
}
