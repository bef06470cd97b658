use std::cmp::Ordering;
use std::collections::VecDeque;

use crate::models::{
    Capability, CoreError, CoreErrorKind, TaskId, WorkerDescriptor, WorkerId, WorkerSnapshot,
};
use crate::orchestration::OrchestrationResult;

#[derive(Debug)]
struct WorkerSlot {
    id: WorkerId,
    descriptor: WorkerDescriptor,
    current_active: usize,
    overflow: VecDeque<TaskId>,
}

impl WorkerSlot {
    fn has_capacity(&self) -> bool {
        self.current_active < self.descriptor.max_concurrent
    }

    fn utilization_cmp(&self, other: &WorkerSlot) -> Ordering {
        // a/b vs c/d without floats; max_concurrent is never zero.
        let left = self.current_active as u128 * other.descriptor.max_concurrent as u128;
        let right = other.current_active as u128 * self.descriptor.max_concurrent as u128;
        left.cmp(&right)
    }

    fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.id.clone(),
            display_name: self
                .descriptor
                .display_name
                .clone()
                .unwrap_or_else(|| self.id.0.clone()),
            capabilities: self.descriptor.capabilities.clone(),
            max_concurrent: self.descriptor.max_concurrent,
            current_active: self.current_active,
            overflow: self.overflow.iter().copied().collect(),
        }
    }
}

/// Catalog of worker types in registration order.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    slots: Vec<WorkerSlot>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a worker, or replaces the configuration of an existing one while
    /// keeping its active count and overflow queue.
    pub fn register(
        &mut self,
        id: WorkerId,
        descriptor: WorkerDescriptor,
    ) -> OrchestrationResult<WorkerSnapshot> {
        validate_descriptor(&id, &descriptor)?;

        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.id == id) {
            if descriptor.max_concurrent < slot.current_active {
                return Err(CoreError::new(
                    CoreErrorKind::InvalidConfiguration,
                    format!(
                        "cannot lower maxConcurrent of worker '{id}' to {} while {} tasks are active",
                        descriptor.max_concurrent, slot.current_active
                    ),
                )
                .with_worker(&id));
            }
            slot.descriptor = descriptor;
            return Ok(slot.snapshot());
        }

        let slot = WorkerSlot {
            id,
            descriptor,
            current_active: 0,
            overflow: VecDeque::new(),
        };
        let snapshot = slot.snapshot();
        self.slots.push(slot);
        Ok(snapshot)
    }

    pub fn contains(&self, id: &WorkerId) -> bool {
        self.slots.iter().any(|slot| &slot.id == id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Workers supporting `task_type`, least utilized first; ties keep
    /// registration order.
    pub fn find_eligible(&self, task_type: &Capability) -> Vec<WorkerId> {
        let mut eligible: Vec<&WorkerSlot> = self
            .slots
            .iter()
            .filter(|slot| slot.descriptor.supports(task_type))
            .collect();
        eligible.sort_by(|left, right| left.utilization_cmp(right));
        eligible.into_iter().map(|slot| slot.id.clone()).collect()
    }

    pub fn has_capacity(&self, id: &WorkerId) -> OrchestrationResult<bool> {
        Ok(self.slot(id)?.has_capacity())
    }

    pub fn reserve(&mut self, id: &WorkerId) -> OrchestrationResult<usize> {
        let slot = self.slot_mut(id)?;
        if !slot.has_capacity() {
            return Err(CoreError::new(
                CoreErrorKind::Internal,
                format!(
                    "worker '{id}' is already at its limit of {} active tasks",
                    slot.descriptor.max_concurrent
                ),
            )
            .with_worker(id));
        }
        slot.current_active += 1;
        Ok(slot.current_active)
    }

    pub fn release(&mut self, id: &WorkerId) -> OrchestrationResult<usize> {
        let slot = self.slot_mut(id)?;
        if slot.current_active == 0 {
            return Err(CoreError::new(
                CoreErrorKind::Internal,
                format!("worker '{id}' released more capacity than it reserved"),
            )
            .with_worker(id));
        }
        slot.current_active -= 1;
        Ok(slot.current_active)
    }

    /// Workers that hold parked tasks while slots sit free, with the number
    /// of free slots, in registration order.
    pub fn stranded(&self) -> Vec<(WorkerId, usize)> {
        self.slots
            .iter()
            .filter(|slot| slot.has_capacity() && !slot.overflow.is_empty())
            .map(|slot| {
                let spare = slot.descriptor.max_concurrent - slot.current_active;
                (slot.id.clone(), spare)
            })
            .collect()
    }

    pub fn park(&mut self, id: &WorkerId, task: TaskId) -> OrchestrationResult<()> {
        self.slot_mut(id)?.overflow.push_back(task);
        Ok(())
    }

    pub fn unpark(&mut self, id: &WorkerId) -> OrchestrationResult<Option<TaskId>> {
        Ok(self.slot_mut(id)?.overflow.pop_front())
    }

    pub fn remove_parked(&mut self, id: &WorkerId, task: TaskId) -> OrchestrationResult<bool> {
        let overflow = &mut self.slot_mut(id)?.overflow;
        let before = overflow.len();
        overflow.retain(|parked| *parked != task);
        Ok(overflow.len() != before)
    }

    pub fn snapshot(&self, id: &WorkerId) -> OrchestrationResult<WorkerSnapshot> {
        Ok(self.slot(id)?.snapshot())
    }

    pub fn snapshots(&self) -> Vec<WorkerSnapshot> {
        self.slots.iter().map(WorkerSlot::snapshot).collect()
    }

    fn slot(&self, id: &WorkerId) -> OrchestrationResult<&WorkerSlot> {
        self.slots
            .iter()
            .find(|slot| &slot.id == id)
            .ok_or_else(|| unknown_worker(id))
    }

    fn slot_mut(&mut self, id: &WorkerId) -> OrchestrationResult<&mut WorkerSlot> {
        self.slots
            .iter_mut()
            .find(|slot| &slot.id == id)
            .ok_or_else(|| unknown_worker(id))
    }
}

pub fn validate_descriptor(
    id: &WorkerId,
    descriptor: &WorkerDescriptor,
) -> OrchestrationResult<()> {
    let invalid = |message: String| -> OrchestrationResult<()> {
        Err(CoreError::new(CoreErrorKind::InvalidConfiguration, message).with_worker(id))
    };

    if id.as_str().trim().is_empty() {
        return invalid("worker id must not be empty".to_string());
    }
    if descriptor.max_concurrent == 0 {
        return invalid(format!("worker '{id}' must allow at least one concurrent task"));
    }
    if descriptor.capabilities.is_empty() {
        return invalid(format!("worker '{id}' must declare at least one capability"));
    }
    if descriptor.capabilities.iter().any(Capability::is_empty) {
        return invalid(format!("worker '{id}' declares an empty capability tag"));
    }
    Ok(())
}

fn unknown_worker(id: &WorkerId) -> CoreError {
    CoreError::new(
        CoreErrorKind::InvalidInput,
        format!("unknown worker id '{id}'"),
    )
    .with_worker(id)
}

#[cfg(test)]
mod tests {
    use super::WorkerRegistry;
    use crate::models::{Capability, CoreErrorKind, TaskId, WorkerDescriptor, WorkerId};

    fn id(raw: &str) -> WorkerId {
        WorkerId::from(raw)
    }

    #[test]
    fn eligible_workers_are_ranked_by_utilization_then_registration_order() {
        let mut registry = WorkerRegistry::new();
        registry
            .register(id("a"), WorkerDescriptor::new(["x"], 2))
            .unwrap();
        registry
            .register(id("b"), WorkerDescriptor::new(["x", "y"], 4))
            .unwrap();
        registry
            .register(id("c"), WorkerDescriptor::new(["y"], 1))
            .unwrap();

        let x = Capability::from("x");
        assert_eq!(registry.find_eligible(&x), vec![id("a"), id("b")]);

        registry.reserve(&id("a")).unwrap();
        assert_eq!(registry.find_eligible(&x), vec![id("b"), id("a")]);

        // 1/2 == 2/4: registration order decides.
        registry.reserve(&id("b")).unwrap();
        registry.reserve(&id("b")).unwrap();
        assert_eq!(registry.find_eligible(&x), vec![id("a"), id("b")]);

        assert!(registry.find_eligible(&Capability::from("z")).is_empty());
    }

    #[test]
    fn reserve_and_release_respect_bounds() {
        let mut registry = WorkerRegistry::new();
        registry
            .register(id("w"), WorkerDescriptor::new(["x"], 1))
            .unwrap();

        assert!(registry.has_capacity(&id("w")).unwrap());
        assert_eq!(registry.reserve(&id("w")).unwrap(), 1);
        assert!(!registry.has_capacity(&id("w")).unwrap());
        assert_eq!(
            registry.reserve(&id("w")).unwrap_err().kind,
            CoreErrorKind::Internal
        );
        assert_eq!(registry.release(&id("w")).unwrap(), 0);
        assert_eq!(
            registry.release(&id("w")).unwrap_err().kind,
            CoreErrorKind::Internal
        );
    }

    #[test]
    fn invalid_descriptors_are_rejected() {
        let mut registry = WorkerRegistry::new();
        for (worker, descriptor) in [
            (id("w"), WorkerDescriptor::new(["x"], 0)),
            (id("w"), WorkerDescriptor::new(Vec::<&str>::new(), 1)),
            (id("w"), WorkerDescriptor::new([""], 1)),
            (id(" "), WorkerDescriptor::new(["x"], 1)),
        ] {
            let error = registry.register(worker, descriptor).unwrap_err();
            assert_eq!(error.kind, CoreErrorKind::InvalidConfiguration);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn re_registration_preserves_accounting_and_overflow() {
        let mut registry = WorkerRegistry::new();
        registry
            .register(id("w"), WorkerDescriptor::new(["x"], 2))
            .unwrap();
        registry.reserve(&id("w")).unwrap();
        registry.park(&id("w"), TaskId(7)).unwrap();

        let snapshot = registry
            .register(
                id("w"),
                WorkerDescriptor::new(["x", "y"], 3).with_display_name("Widened"),
            )
            .unwrap();
        assert_eq!(snapshot.current_active, 1);
        assert_eq!(snapshot.overflow, vec![TaskId(7)]);
        assert_eq!(snapshot.max_concurrent, 3);
        assert_eq!(snapshot.display_name, "Widened");
        assert_eq!(registry.len(), 1);

        registry.reserve(&id("w")).unwrap();
        let error = registry
            .register(id("w"), WorkerDescriptor::new(["x"], 1))
            .unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::InvalidConfiguration);
        assert_eq!(registry.snapshot(&id("w")).unwrap().max_concurrent, 3);
    }

    #[test]
    fn stranded_lists_workers_idling_beside_parked_tasks() {
        let mut registry = WorkerRegistry::new();
        for (worker, max_concurrent) in [("a", 2), ("b", 1), ("c", 1)] {
            registry
                .register(id(worker), WorkerDescriptor::new(["x"], max_concurrent))
                .unwrap();
        }
        registry.reserve(&id("a")).unwrap();
        registry.park(&id("a"), TaskId(1)).unwrap();
        registry.reserve(&id("b")).unwrap();
        registry.park(&id("b"), TaskId(2)).unwrap();

        assert_eq!(registry.stranded(), vec![(id("a"), 1)]);
        registry.unpark(&id("a")).unwrap();
        assert!(registry.stranded().is_empty());
    }

    #[test]
    fn overflow_queue_is_fifo() {
        let mut registry = WorkerRegistry::new();
        registry
            .register(id("w"), WorkerDescriptor::new(["x"], 1))
            .unwrap();
        for task in [TaskId(3), TaskId(1), TaskId(2)] {
            registry.park(&id("w"), task).unwrap();
        }

        assert!(registry.remove_parked(&id("w"), TaskId(1)).unwrap());
        assert!(!registry.remove_parked(&id("w"), TaskId(1)).unwrap());
        assert_eq!(registry.unpark(&id("w")).unwrap(), Some(TaskId(3)));
        assert_eq!(registry.unpark(&id("w")).unwrap(), Some(TaskId(2)));
        assert_eq!(registry.unpark(&id("w")).unwrap(), None);
    }
}
