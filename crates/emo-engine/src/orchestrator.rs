//! The public-facing memory orchestrator.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use emo_common::types::{AccessIntent, BufferRecord, BufferState, Handle, TierDescriptor, TierId};
use emo_common::utils::error::{Error, Result};
use emo_core::capacity::CapacityModel;
use emo_core::eviction::EvictionPlanner;
use emo_core::migration::MigrationEngine;
use emo_core::registry::BufferRegistry;
use emo_core::tier::{BlockTier, MemoryTier, Tier, TierSet};

use crate::access::AccessGuard;
use crate::config::{BusyPolicy, EngineConfig, TierBackend, TierSpec};
use crate::metrics::{Counters, MetricsSnapshot};

/// Bounded retries for admission decisions that lose a victim-claim race.
const ADMISSION_ATTEMPTS: u32 = 3;

/// Outcome of one admission decision taken under the global lock.
enum AdmissionPlan {
    /// Bytes reserved; no pressure relief needed.
    Reserved,
    /// Victims claimed and bytes reserved; demote these records.
    Demote(Vec<BufferRecord>),
    /// A concurrent operation stole the plan; decide again.
    Retry,
}

/// Tiered memory orchestrator.
///
/// Routes `allocate`/`access`/`release` calls, triggers eviction and
/// migration, and enforces the zero-OOM invariant: as long as the live
/// working set fits within total capacity across all tiers, no
/// allocation fails for lack of fast-tier room.
///
/// # Concurrency
///
/// Registry mutations use per-handle locks, so operations on different
/// handles proceed independently. A single global lock guards only the
/// brief admission-check-and-select-victims decision; migration I/O
/// always runs outside it. Operations on the same handle are strictly
/// ordered; operations on different handles are unordered.
pub struct MemoryOrchestrator {
    config: EngineConfig,
    registry: Arc<BufferRegistry>,
    tiers: Arc<TierSet>,
    capacity: Arc<CapacityModel>,
    planner: EvictionPlanner,
    engine: MigrationEngine,
    counters: Counters,
    /// Serializes admission decisions so two allocations never both
    /// believe they reserved the same freed capacity.
    admission: Mutex<()>,
}

impl MemoryOrchestrator {
    /// Builds an orchestrator from probed tier specs.
    ///
    /// # Errors
    ///
    /// Returns an error if the tier set is empty or inconsistent, or a
    /// block tier's spill directory cannot be prepared.
    pub fn new(config: EngineConfig, specs: Vec<TierSpec>) -> Result<Self> {
        if specs.is_empty() {
            return Err(Error::Internal("no tiers configured".into()));
        }

        let mut backends: Vec<Arc<dyn Tier>> = Vec::with_capacity(specs.len());
        let mut descriptors = Vec::with_capacity(specs.len());
        for spec in &specs {
            let threshold = spec
                .admission_threshold
                .unwrap_or(config.admission_threshold);
            // A threshold above 1.0 would let the ledger plan past the
            // hard capacity; reject it up front.
            if threshold <= 0.0 || threshold > 1.0 {
                return Err(Error::Internal(format!(
                    "admission threshold {threshold} for {} outside (0, 1]",
                    spec.id
                )));
            }
            let tier: Arc<dyn Tier> = match &spec.backend {
                TierBackend::Memory => {
                    Arc::new(MemoryTier::new(spec.id, spec.rank, spec.capacity))
                }
                TierBackend::Block { dir } => Arc::new(BlockTier::new(
                    spec.id,
                    spec.rank,
                    spec.capacity,
                    dir,
                    config.io_timeout,
                )?),
            };
            backends.push(tier);
            descriptors.push(TierDescriptor {
                id: spec.id,
                rank: spec.rank,
                capacity: spec.capacity,
                used: 0,
                admission_threshold: threshold,
            });
        }

        let registry = Arc::new(BufferRegistry::new());
        let tiers = Arc::new(TierSet::new(backends)?);
        let capacity = Arc::new(CapacityModel::new(&descriptors));
        let planner = EvictionPlanner::new(Arc::clone(&registry));
        let engine = MigrationEngine::new(
            Arc::clone(&registry),
            Arc::clone(&tiers),
            Arc::clone(&capacity),
            config.migration_retries,
        );

        Ok(Self {
            config,
            registry,
            tiers,
            capacity,
            planner,
            engine,
            counters: Counters::default(),
            admission: Mutex::new(()),
        })
    }

    pub(crate) fn registry(&self) -> &BufferRegistry {
        &self.registry
    }

    pub(crate) fn tier(&self, id: TierId) -> Result<&Arc<dyn Tier>> {
        self.tiers.get(id)
    }

    /// Allocates a zero-filled buffer of `size` bytes.
    ///
    /// The preferred tier is a hint: under pressure the orchestrator
    /// evicts colder buffers to make room there, and if the preferred
    /// tier cannot admit the bytes it falls through to the remaining
    /// tiers, slower first and then faster, before giving up.
    /// [`Error::InsufficientEvictable`] is the single terminal
    /// out-of-resources condition; it means no tier in the hierarchy
    /// could take the buffer.
    pub fn allocate(&self, size: u64, preferred: Option<TierId>) -> Result<Handle> {
        self.allocate_bytes(size, preferred, &|| Bytes::from(vec![0u8; size as usize]))
    }

    pub(crate) fn allocate_bytes(
        &self,
        size: u64,
        preferred: Option<TierId>,
        make_payload: &dyn Fn() -> Bytes,
    ) -> Result<Handle> {
        let start = match preferred {
            Some(id) => {
                self.tiers.get(id)?;
                id
            }
            None => self.tiers.fastest().id(),
        };

        // Candidate order: the hinted tier, then the slower tiers, then
        // the faster ones. A slow-hinted allocation that finds the slow
        // tier full must still land in an empty fast tier.
        let mut order = Vec::with_capacity(self.tiers.len());
        order.push(start);
        let mut cursor = start;
        while let Some(slower) = self.tiers.next_slower(cursor) {
            cursor = slower.id();
            order.push(cursor);
        }
        cursor = start;
        while let Some(faster) = self.tiers.next_faster(cursor) {
            cursor = faster.id();
            order.push(cursor);
        }

        let mut last_err = None;
        for tier in order {
            match self.try_allocate_at(tier, size, make_payload) {
                Ok(handle) => {
                    Counters::bump(&self.counters.allocations);
                    debug!(%handle, %tier, size, "allocated");
                    return Ok(handle);
                }
                Err(err @ Error::InsufficientEvictable { .. }) => last_err = Some(err),
                Err(other) => return Err(other),
            }
        }

        Counters::bump(&self.counters.insufficient_evictable);
        Err(last_err.unwrap_or_else(|| Error::Internal("no tiers configured".into())))
    }

    /// One allocation attempt at a specific tier, with the single
    /// TierFull re-run the error policy allows.
    ///
    /// The payload is materialized only after admission passes, so an
    /// absurd `size` surfaces the typed out-of-resources error instead
    /// of aborting on host memory exhaustion.
    fn try_allocate_at(
        &self,
        tier: TierId,
        size: u64,
        make_payload: &dyn Fn() -> Bytes,
    ) -> Result<Handle> {
        let mut last_full = None;
        for attempt in 0..2 {
            self.ensure_admission(tier, size)?;
            let handle = self.registry.create(size, tier);
            match self.tiers.get(tier)?.write(make_payload()) {
                Ok(addr) => {
                    self.registry.commit_initial(handle, tier, addr)?;
                    return Ok(handle);
                }
                Err(err) => {
                    self.registry.abort_create(handle);
                    self.capacity.release(tier, size)?;
                    if matches!(err, Error::TierFull { .. }) && attempt == 0 {
                        warn!(%tier, size, "admission passed but tier write raced full, re-running admission");
                        last_full = Some(err);
                        continue;
                    }
                    return Err(err);
                }
            }
        }
        // Unreachable in practice; the second pass returns either way.
        Err(last_full.unwrap_or_else(|| Error::Internal("allocation retry exhausted".into())))
    }

    /// Reserves `bytes` on `tier`, demoting victims first if the tier is
    /// over its admission threshold. Pressure relief is always serviced
    /// before the reservation lands, so resident-over-capacity never
    /// persists.
    fn ensure_admission(&self, tier: TierId, bytes: u64) -> Result<()> {
        for _ in 0..ADMISSION_ATTEMPTS {
            let plan = self.plan_admission(tier, bytes)?;
            let claimed = match plan {
                AdmissionPlan::Reserved => return Ok(()),
                AdmissionPlan::Retry => continue,
                AdmissionPlan::Demote(claimed) => claimed,
            };

            let slower = self
                .tiers
                .next_slower(tier)
                .map(|t| t.id())
                .ok_or_else(|| Error::Internal("demotion plan without a slower tier".into()))?;

            // Migration I/O for the plan runs outside the admission lock.
            let mut failure = None;
            for record in claimed {
                if failure.is_some() {
                    // Abandon the rest of the plan; these stay resident.
                    self.registry.abort_migration(record.handle)?;
                    continue;
                }
                if let Err(err) = self.demote_claimed(&record, slower) {
                    failure = Some(err);
                }
            }
            if let Some(err) = failure {
                self.capacity.release(tier, bytes)?;
                return Err(err);
            }
            return Ok(());
        }

        Err(Error::TierFull {
            tier,
            requested: bytes,
            available: self.capacity.available(tier)?,
        })
    }

    /// The admission decision itself: check, select victims, claim them,
    /// and reserve the bytes, all under the global admission lock.
    fn plan_admission(&self, tier: TierId, bytes: u64) -> Result<AdmissionPlan> {
        let _guard = self.admission.lock();

        if self.tiers.next_slower(tier).is_none() {
            // Slowest tier: there is nowhere to demote anything, so the
            // admission threshold is moot and the hard capacity decides.
            return match self.capacity.try_reserve(tier, bytes) {
                Ok(()) => Ok(AdmissionPlan::Reserved),
                Err(Error::TierFull { available, .. }) => Err(Error::InsufficientEvictable {
                    tier,
                    needed: bytes.saturating_sub(available),
                    reclaimable: 0,
                }),
                Err(err) => Err(err),
            };
        }

        if self.capacity.admission_ok(tier, bytes)? {
            self.capacity.try_reserve(tier, bytes)?;
            return Ok(AdmissionPlan::Reserved);
        }

        let deficit = self.capacity.admission_deficit(tier, bytes)?;
        let victims = match self.planner.select_victims(tier, deficit) {
            Ok(victims) => victims,
            Err(Error::InsufficientEvictable { reclaimable, .. }) => {
                // The unpinned bytes cannot get the tier back under its
                // threshold. The threshold only starts pressure; the
                // hard capacity decides admission, so demote what is
                // demotable and admit into the remaining headroom.
                return self.plan_overcommit(tier, bytes, deficit, reclaimable);
            }
            Err(err) => return Err(err),
        };

        let mut claimed = Vec::with_capacity(victims.len());
        let mut freed = 0u64;
        for victim in victims {
            // A victim may have been pinned or released since the scan;
            // claim what we can and re-plan if the total falls short.
            match self.registry.begin_migration(victim) {
                Ok(record) => {
                    freed += record.size;
                    claimed.push(record);
                }
                Err(Error::BufferBusy(_) | Error::UseAfterRelease(_) | Error::NotFound(_)) => {}
                Err(err) => {
                    for record in &claimed {
                        self.registry.abort_migration(record.handle)?;
                    }
                    return Err(err);
                }
            }
        }

        if freed < deficit {
            for record in &claimed {
                self.registry.abort_migration(record.handle)?;
            }
            return Ok(AdmissionPlan::Retry);
        }

        if let Err(err) = self.capacity.reserve_with_credit(tier, bytes, freed) {
            for record in &claimed {
                self.registry.abort_migration(record.handle)?;
            }
            return Err(err);
        }
        Ok(AdmissionPlan::Demote(claimed))
    }

    /// Admission past the threshold: claims every evictable buffer in
    /// `tier` and reserves against the hard capacity, crediting the
    /// claimed bytes. Called with the admission lock held.
    fn plan_overcommit(
        &self,
        tier: TierId,
        bytes: u64,
        deficit: u64,
        reclaimable: u64,
    ) -> Result<AdmissionPlan> {
        let mut claimed = Vec::new();
        let mut freed = 0u64;
        if reclaimable > 0 {
            for victim in self.planner.select_victims(tier, reclaimable)? {
                match self.registry.begin_migration(victim) {
                    Ok(record) => {
                        freed += record.size;
                        claimed.push(record);
                    }
                    Err(Error::BufferBusy(_)
                    | Error::UseAfterRelease(_)
                    | Error::NotFound(_)) => {}
                    Err(err) => {
                        for record in &claimed {
                            self.registry.abort_migration(record.handle)?;
                        }
                        return Err(err);
                    }
                }
            }
        }

        if self.capacity.reserve_with_credit(tier, bytes, freed).is_err() {
            for record in &claimed {
                self.registry.abort_migration(record.handle)?;
            }
            return Err(Error::InsufficientEvictable {
                tier,
                needed: deficit,
                reclaimable: freed,
            });
        }

        if claimed.is_empty() {
            Ok(AdmissionPlan::Reserved)
        } else {
            Ok(AdmissionPlan::Demote(claimed))
        }
    }

    /// Demotes an already-claimed victim one tier down, cascading
    /// pressure relief into that tier if needed. Recursion is bounded by
    /// the number of tiers.
    fn demote_claimed(&self, record: &BufferRecord, dest: TierId) -> Result<()> {
        if let Err(err) = self.ensure_admission(dest, record.size) {
            self.registry.abort_migration(record.handle)?;
            return Err(err);
        }
        match self.engine.migrate_claimed(record.clone(), dest) {
            Ok(()) => {
                Counters::bump(&self.counters.evictions);
                debug!(handle = %record.handle, from = %record.tier, to = %dest, "evicted");
                Ok(())
            }
            Err(err) => {
                Counters::bump(&self.counters.migration_failures);
                self.capacity.release(dest, record.size)?;
                Err(err)
            }
        }
    }

    /// Opens a scoped access to `handle`.
    ///
    /// The buffer is pinned for the lifetime of the returned guard and
    /// unpinned on every exit path, including drop during unwinding. The
    /// access stamps recency, and a buffer found below the fastest tier
    /// gets a best-effort promotion attempt first (so a failed
    /// [`MemoryOrchestrator::mark_hot`] is silently retried here).
    ///
    /// A buffer mid-migration blocks or fails with
    /// [`Error::BufferBusy`] depending on the configured busy policy.
    pub fn access(&self, handle: Handle, intent: AccessIntent) -> Result<AccessGuard<'_>> {
        let snapshot = self.registry.snapshot(handle)?;
        if snapshot.state == BufferState::Resident
            && self.tiers.get(snapshot.tier)?.rank() > self.tiers.fastest().rank()
        {
            self.promote_best_effort(handle);
        }

        let blocking = self.config.busy_policy == BusyPolicy::Blocking;
        let record = self.registry.pin_resident(handle, blocking)?;

        let data = match self.tiers.get(record.tier)?.read(record.addr, record.size) {
            Ok(data) => data,
            Err(err) => {
                self.registry.unpin(handle)?;
                return Err(err);
            }
        };

        Ok(AccessGuard::new(self, handle, intent, &record, data))
    }

    /// Advisory hint that `handle` is hot and belongs in the fastest
    /// tier. Promotion is best-effort: failures are non-fatal and
    /// retried silently on the next access. Invalid handles still
    /// surface immediately.
    pub fn mark_hot(&self, handle: Handle) -> Result<()> {
        // Validate the handle before going best-effort.
        self.registry.snapshot(handle)?;
        self.promote_best_effort(handle);
        Ok(())
    }

    fn promote_best_effort(&self, handle: Handle) {
        if let Err(err) = self.try_promote(handle) {
            debug!(%handle, %err, "promotion attempt failed, will retry on next access");
        }
    }

    /// Attempts to move `handle` into the fastest tier, evicting colder
    /// buffers from it if needed.
    fn try_promote(&self, handle: Handle) -> Result<()> {
        let snapshot = self.registry.snapshot(handle)?;
        let target = self.tiers.fastest().id();
        if snapshot.tier == target || snapshot.state != BufferState::Resident {
            return Ok(());
        }

        self.ensure_admission(target, snapshot.size)?;
        match self.engine.migrate(handle, target) {
            Ok(()) => {
                Counters::bump(&self.counters.promotions);
                debug!(%handle, to = %target, "promoted");
                Ok(())
            }
            Err(err) => {
                if matches!(err, Error::MigrationFailed { .. }) {
                    Counters::bump(&self.counters.migration_failures);
                }
                self.capacity.release(target, snapshot.size)?;
                Err(err)
            }
        }
    }

    /// Releases `handle`, freeing its tier storage and invalidating the
    /// handle forever.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BufferBusy`] while a scoped access holds the
    /// buffer pinned, and [`Error::UseAfterRelease`] on a double
    /// release.
    pub fn release(&self, handle: Handle) -> Result<()> {
        let record = self.registry.release(handle)?;
        self.tiers
            .get(record.tier)?
            .free(record.addr, record.size)?;
        self.capacity.release(record.tier, record.size)?;
        Counters::bump(&self.counters.releases);
        debug!(%handle, tier = %record.tier, size = record.size, "released");
        Ok(())
    }

    /// Refreshes tier capacities from a fresh hardware probe.
    ///
    /// Live reservations are preserved; only capacities and thresholds
    /// change. This is the one entry point that talks to the outside
    /// world between construction and shutdown.
    pub fn rescan(&self, descriptors: &[TierDescriptor]) {
        self.capacity.rescan(descriptors);
    }

    /// Current counters plus a per-tier usage snapshot, for an external
    /// observability collaborator to render.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.counters.snapshot(self.capacity.snapshot())
    }

    /// Number of live buffers.
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.registry.len()
    }

    /// Current record for `handle`: where it lives and what state it is
    /// in. Does not touch recency and never triggers promotion.
    pub fn inspect(&self, handle: Handle) -> Result<BufferRecord> {
        self.registry.snapshot(handle)
    }
}
