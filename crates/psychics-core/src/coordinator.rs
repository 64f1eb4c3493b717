//! Tick coordinator.
//!
//! Drives one update of every live instance per host tick. A failing or
//! panicking instance never stops the others from updating.

use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::host::PlayerId;
use crate::instance::{isolate, Directive, InstanceError};
use crate::projector::{FakeEntityProjector, FlushReport};
use crate::registry::InstanceRegistry;

/// Default tick budget.
pub const DEFAULT_TICK_BUDGET: Duration = Duration::from_millis(10);

/// One instance failure recorded during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceFailure {
    /// Owner of the failed instance.
    pub player: PlayerId,
    /// What went wrong.
    pub error: InstanceError,
}

/// Outcome of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Instances whose update was invoked.
    pub attempted: usize,
    /// Every recorded failure, in update order.
    pub failures: Vec<InstanceFailure>,
    /// Players detached by directives applied after the updates.
    pub detached: Vec<PlayerId>,
    /// Transport work done at the flush point.
    pub flush: FlushReport,
    /// Wall time of the tick.
    pub elapsed: Duration,
}

impl TickReport {
    /// Whether every update succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs ticks over an [`InstanceRegistry`].
///
/// Holds no state between ticks besides its configuration.
#[derive(Debug, Clone, Copy)]
pub struct TickCoordinator {
    budget: Duration,
}

impl Default for TickCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_BUDGET)
    }
}

impl TickCoordinator {
    /// Creates a coordinator that warns when a tick takes longer than `budget`.
    #[must_use]
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }

    /// The tick budget.
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Runs one tick.
    ///
    /// 1. Snapshot the live players.
    /// 2. Update each instance still present, catching errors and panics.
    /// 3. Apply queued directives (fatal failures queue a detach).
    /// 4. Flush the projector.
    pub fn run_tick(
        &self,
        registry: &mut InstanceRegistry,
        projector: &mut FakeEntityProjector,
    ) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::default();
        let mut directives = Vec::new();

        for player in &registry.live_snapshot() {
            let Some(instance) = registry.get_mut(player) else {
                continue;
            };
            report.attempted += 1;

            let result = isolate(|| instance.update(projector, &mut directives));

            if let Err(err) = result {
                if err.is_fatal() {
                    error!(%player, error = %err, "psychic failed fatally; detaching");
                    directives.push(Directive::Detach(player));
                } else {
                    warn!(%player, error = %err, "psychic update failed");
                }
                report.failures.push(InstanceFailure { player, error: err });
            }
        }

        for directive in directives {
            match directive {
                Directive::Detach(player) => {
                    if registry.detach(player, projector) {
                        report.detached.push(player);
                    }
                }
            }
        }

        report.flush = projector.flush();
        report.elapsed = started.elapsed();

        if report.elapsed > self.budget {
            warn!(
                elapsed_ms = report.elapsed.as_secs_f64() * 1000.0,
                budget_ms = self.budget.as_secs_f64() * 1000.0,
                instances = report.attempted,
                "tick over budget"
            );
        } else {
            debug!(
                instances = report.attempted,
                failures = report.failures.len(),
                "tick complete"
            );
        }
        report
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{AbilityBehavior, AbilityCatalog, AbilityContext, AbilityError};
    use crate::projector::FakeEntity;
    use crate::tests::helpers::{abc_store, recording_projector, store_with_behaviors};
    use glam::Vec3;

    struct Panicking;

    impl AbilityBehavior for Panicking {
        fn on_tick(&mut self, _ctx: &mut AbilityContext<'_>) -> Result<(), AbilityError> {
            panic!("ability exploded");
        }
    }

    struct Flaky;

    impl AbilityBehavior for Flaky {
        fn on_tick(&mut self, _ctx: &mut AbilityContext<'_>) -> Result<(), AbilityError> {
            Err(AbilityError::Recoverable("hiccup".into()))
        }
    }

    struct Corrupt;

    impl AbilityBehavior for Corrupt {
        fn on_tick(&mut self, ctx: &mut AbilityContext<'_>) -> Result<(), AbilityError> {
            ctx.projector
                .spawn(FakeEntity::new("marker", Vec3::ZERO).owned_by(ctx.player));
            Err(AbilityError::Fatal("state corrupted".into()))
        }
    }

    struct Rotten;

    impl AbilityBehavior for Rotten {
        fn on_tick(&mut self, ctx: &mut AbilityContext<'_>) -> Result<(), AbilityError> {
            ctx.projector
                .spawn(FakeEntity::new("marker", Vec3::ZERO).owned_by(ctx.player));
            panic!("rotten tick");
        }

        fn on_detach(&mut self, _ctx: &mut AbilityContext<'_>) {
            panic!("rotten detach");
        }
    }

    struct SelfDetaching;

    impl AbilityBehavior for SelfDetaching {
        fn on_tick(&mut self, ctx: &mut AbilityContext<'_>) -> Result<(), AbilityError> {
            ctx.directives.push(Directive::Detach(ctx.player));
            Ok(())
        }
    }

    fn catalog() -> AbilityCatalog {
        let mut catalog = AbilityCatalog::with_builtins();
        catalog.register("panicking", |_| Ok(Box::new(Panicking)));
        catalog.register("flaky", |_| Ok(Box::new(Flaky)));
        catalog.register("corrupt", |_| Ok(Box::new(Corrupt)));
        catalog.register("rotten", |_| Ok(Box::new(Rotten)));
        catalog.register("self_detaching", |_| Ok(Box::new(SelfDetaching)));
        catalog
    }

    #[test]
    fn empty_registry() {
        let mut registry = InstanceRegistry::new(catalog());
        let (mut projector, _) = recording_projector();
        let report = TickCoordinator::default().run_tick(&mut registry, &mut projector);
        assert_eq!(report.attempted, 0);
        assert!(report.is_clean());
    }

    #[test]
    fn recoverable_failure_keeps_instance() {
        let store = store_with_behaviors(&["flaky"]);
        let mut registry = InstanceRegistry::new(catalog());
        let (mut projector, _) = recording_projector();
        let player = PlayerId::random();
        registry
            .attach(&store, player, "flaky", &mut projector)
            .unwrap();

        let report = TickCoordinator::default().run_tick(&mut registry, &mut projector);

        assert_eq!(report.failures.len(), 1);
        assert!(report.detached.is_empty());
        assert!(registry.contains(player));
    }

    #[test]
    fn panic_is_isolated_and_fatal() {
        let store = store_with_behaviors(&["panicking"]);
        let mut registry = InstanceRegistry::new(catalog());
        let (mut projector, _) = recording_projector();
        let healthy: Vec<_> = (0..4).map(|_| PlayerId::random()).collect();
        for player in &healthy {
            registry
                .attach(&store, *player, "p", &mut projector)
                .unwrap();
        }
        let bad = PlayerId::random();
        registry
            .attach(&store, bad, "panicking", &mut projector)
            .unwrap();

        let report = TickCoordinator::default().run_tick(&mut registry, &mut projector);

        assert_eq!(report.attempted, 5);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            report.failures[0].error,
            InstanceError::Panicked(ref msg) if msg.contains("exploded")
        ));
        assert_eq!(report.detached, vec![bad]);
        for player in &healthy {
            assert_eq!(registry.get(*player).unwrap().ticks(), 1);
        }
    }

    #[test]
    fn fatal_failure_despawns_owned_entities() {
        let store = store_with_behaviors(&["corrupt"]);
        let mut registry = InstanceRegistry::new(catalog());
        let (mut projector, transport) = recording_projector();
        let player = PlayerId::random();
        projector.add_observer(player);
        registry
            .attach(&store, player, "corrupt", &mut projector)
            .unwrap();

        let report = TickCoordinator::default().run_tick(&mut registry, &mut projector);

        assert_eq!(report.detached, vec![player]);
        assert!(projector.is_empty());
        // Spawned and released within the same tick: never sent.
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn panicking_detach_stays_inside_tick() {
        let store = store_with_behaviors(&["rotten"]);
        let mut registry = InstanceRegistry::new(catalog());
        let (mut projector, transport) = recording_projector();
        let healthy = PlayerId::random();
        let bad = PlayerId::random();
        projector.add_observer(healthy);
        registry
            .attach(&store, healthy, "p", &mut projector)
            .unwrap();
        registry
            .attach(&store, bad, "rotten", &mut projector)
            .unwrap();

        let report = TickCoordinator::default().run_tick(&mut registry, &mut projector);

        assert_eq!(report.attempted, 2);
        assert_eq!(report.detached, vec![bad]);
        assert!(!registry.contains(bad));
        assert_eq!(registry.get(healthy).unwrap().ticks(), 1);
        assert!(projector.owned_by(bad).is_empty());
        assert!(transport.calls().is_empty());

        let next = TickCoordinator::default().run_tick(&mut registry, &mut projector);
        assert_eq!(next.attempted, 1);
        assert!(next.is_clean());
    }

    #[test]
    fn directives_apply_after_iteration() {
        let store = store_with_behaviors(&["self_detaching"]);
        let mut registry = InstanceRegistry::new(catalog());
        let (mut projector, _) = recording_projector();
        let player = PlayerId::random();
        registry
            .attach(&store, player, "self_detaching", &mut projector)
            .unwrap();

        let report = TickCoordinator::default().run_tick(&mut registry, &mut projector);

        assert!(report.is_clean());
        assert_eq!(report.detached, vec![player]);
        assert!(registry.is_empty());
    }

    #[test]
    fn over_budget_is_reported_not_fatal() {
        let store = abc_store();
        let mut registry = InstanceRegistry::new(catalog());
        let (mut projector, _) = recording_projector();
        registry
            .attach(&store, PlayerId::random(), "p", &mut projector)
            .unwrap();

        let report = TickCoordinator::new(Duration::ZERO).run_tick(&mut registry, &mut projector);

        assert_eq!(report.attempted, 1);
        assert!(report.is_clean());
    }
}
