//! Capacity accounting for named resource kinds.
//!
//! Every mutation goes through one `parking_lot::Mutex`, so a reservation that
//! spans several kinds is applied all-or-nothing and no observer can see
//! `allocated > capacity` for any kind. Critical sections are pure
//! bookkeeping.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::core::error::{OrchestratorError, OrchestratorResult};
use crate::util::serde::{ResourceKind, ResourceRequirements};

/// Capacity and allocation snapshot for one resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Fixed capacity.
    pub capacity: u32,
    /// Units currently reserved.
    pub allocated: u32,
}

impl ResourceUsage {
    /// Units still free.
    #[must_use]
    pub const fn available(&self) -> u32 {
        self.capacity.saturating_sub(self.allocated)
    }

    /// Allocated fraction in `[0, 1]`.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        f64::from(self.allocated) / f64::from(self.capacity)
    }
}

/// Process-wide resource pool.
#[derive(Debug)]
pub struct ResourcePool {
    capacity: BTreeMap<ResourceKind, u32>,
    allocated: Mutex<BTreeMap<ResourceKind, u32>>,
}

impl ResourcePool {
    /// Create a pool with the given capacity per kind.
    pub fn new(capacity: impl IntoIterator<Item = (ResourceKind, u32)>) -> Self {
        let capacity: BTreeMap<_, _> = capacity.into_iter().collect();
        let allocated = capacity.keys().map(|k| (k.clone(), 0)).collect();
        Self {
            capacity,
            allocated: Mutex::new(allocated),
        }
    }

    /// Capacity of `kind`, if the pool tracks it.
    #[must_use]
    pub fn capacity(&self, kind: &ResourceKind) -> Option<u32> {
        self.capacity.get(kind).copied()
    }

    /// Units of `kind` currently reserved.
    #[must_use]
    pub fn allocated(&self, kind: &ResourceKind) -> u32 {
        self.allocated.lock().get(kind).copied().unwrap_or_default()
    }

    /// Check the requirement shape: non-empty, known kinds, positive quantities.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Validation`] describing the first problem.
    pub fn validate(&self, req: &ResourceRequirements) -> OrchestratorResult<()> {
        if req.is_empty() {
            return Err(OrchestratorError::Validation(
                "resource requirements must not be empty".into(),
            ));
        }
        for (kind, &qty) in req {
            if !self.capacity.contains_key(kind) {
                return Err(OrchestratorError::Validation(format!(
                    "unknown resource kind `{kind}`"
                )));
            }
            if qty == 0 {
                return Err(OrchestratorError::Validation(format!(
                    "requirement for `{kind}` must be greater than 0"
                )));
            }
        }
        Ok(())
    }

    /// Check that `req` could ever be satisfied, ignoring current allocation.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InsufficientResources`] when a quantity
    /// exceeds the kind's total capacity.
    pub fn fits_capacity(&self, req: &ResourceRequirements) -> OrchestratorResult<()> {
        let empty = BTreeMap::new();
        Self::shortfall(&self.capacity, &empty, req).map_or(Ok(()), Err)
    }

    /// Whether `req` could be reserved right now. Does not mutate.
    #[must_use]
    pub fn check_available(&self, req: &ResourceRequirements) -> bool {
        let allocated = self.allocated.lock();
        Self::shortfall(&self.capacity, &allocated, req).is_none()
    }

    /// Reserve `req` atomically.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InsufficientResources`] and leaves the
    /// pool untouched if any kind lacks room.
    pub fn reserve(&self, req: &ResourceRequirements) -> OrchestratorResult<()> {
        self.reserve_all(&[req])
    }

    /// Reserve several requirement sets as one all-or-nothing unit.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InsufficientResources`] and reserves
    /// nothing if the combined demand does not fit.
    pub fn reserve_all(&self, reqs: &[&ResourceRequirements]) -> OrchestratorResult<()> {
        let mut allocated = self.allocated.lock();
        let combined = match Self::combine(reqs) {
            Ok(combined) => combined,
            Err(kind) => {
                let cap = self.capacity.get(&kind).copied().unwrap_or_default();
                let used = allocated.get(&kind).copied().unwrap_or_default();
                let err = OrchestratorError::InsufficientResources {
                    kind,
                    requested: u32::MAX,
                    available: cap.saturating_sub(used),
                };
                debug!(error = %err, "combined demand overflows");
                return Err(err);
            }
        };
        if let Some(err) = Self::shortfall(&self.capacity, &allocated, &combined) {
            debug!(error = %err, "reservation refused");
            return Err(err);
        }
        for (kind, qty) in &combined {
            *allocated.entry(kind.clone()).or_default() += qty;
        }
        debug!(?combined, "reserved");
        Ok(())
    }

    /// Return `req` to the pool.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::ReleaseUnderflow`] without changing any
    /// counter if the release would drive a kind below zero. That is a
    /// bookkeeping bug in the caller.
    pub fn release(&self, req: &ResourceRequirements) -> OrchestratorResult<()> {
        let mut allocated = self.allocated.lock();
        for (kind, &qty) in req {
            let current = allocated.get(kind).copied().unwrap_or_default();
            if qty > current {
                let err = OrchestratorError::ReleaseUnderflow {
                    kind: kind.clone(),
                    allocated: current,
                    released: qty,
                };
                error!(error = %err, "resource release underflow");
                return Err(err);
            }
        }
        for (kind, qty) in req {
            if let Some(slot) = allocated.get_mut(kind) {
                *slot -= qty;
            }
        }
        debug!(?req, "released");
        Ok(())
    }

    /// Snapshot of every kind.
    #[must_use]
    pub fn usage(&self) -> BTreeMap<ResourceKind, ResourceUsage> {
        let allocated = self.allocated.lock();
        self.capacity
            .iter()
            .map(|(kind, &capacity)| {
                let used = allocated.get(kind).copied().unwrap_or_default();
                (kind.clone(), ResourceUsage { capacity, allocated: used })
            })
            .collect()
    }

    /// Sum requirement sets per kind; `Err(kind)` if a sum overflows `u32`.
    fn combine(reqs: &[&ResourceRequirements]) -> Result<ResourceRequirements, ResourceKind> {
        let mut combined = ResourceRequirements::new();
        for req in reqs {
            for (kind, &qty) in req.iter() {
                let slot = combined.entry(kind.clone()).or_default();
                *slot = slot.checked_add(qty).ok_or_else(|| kind.clone())?;
            }
        }
        Ok(combined)
    }

    fn shortfall(
        capacity: &BTreeMap<ResourceKind, u32>,
        allocated: &BTreeMap<ResourceKind, u32>,
        req: &ResourceRequirements,
    ) -> Option<OrchestratorError> {
        req.iter().find_map(|(kind, &requested)| {
            let cap = capacity.get(kind).copied().unwrap_or_default();
            let used = allocated.get(kind).copied().unwrap_or_default();
            let available = cap.saturating_sub(used);
            (requested > available).then(|| OrchestratorError::InsufficientResources {
                kind: kind.clone(),
                requested,
                available,
            })
        })
    }
}
