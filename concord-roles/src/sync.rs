//! Sync rule engine
//!
//! Maps a change on a source actor to propagation into target actors.
//! Immediate and conditional rules run inside the trigger call; batched and
//! scheduled rules wait in a priority queue until [`SyncRuleEngine::process_queue`].
//!
//! A committed propagation fires the target's own `state_change` rules
//! (synchronous ones only). Chains carry a hop counter and a visited set and
//! stop at the hop limit or before revisiting an actor.

use crate::conflict::{ConflictResolver, PropagationPlan};
use crate::store::RoleStateStore;
use chrono::Utc;
use concord_core::{
    ActorId, ConcordError, ConcordResult, ConflictNotice, ConflictPolicy, EngineConfig,
    QueuedSync, RoleState, StateData, StorageError, SyncError, SyncFilter, SyncResult,
    SyncRule, SyncStatus, SyncTrigger, SyncType, TransitionContext, WILDCARD_ACTOR,
};
use concord_events::{publish, SharedSink, Topic};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

const SOURCE: &str = "sync_engine";

/// Tunables the engine reads from [`EngineConfig`].
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub batch_size: usize,
    pub max_propagation_hops: usize,
    pub recent_conflict_window: std::time::Duration,
}

impl From<&EngineConfig> for SyncSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            batch_size: config.sync_batch_size,
            max_propagation_hops: config.max_propagation_hops,
            recent_conflict_window: config.recent_conflict_window,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

/// Outcome of a role update: the committed record plus every sync it fired.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleUpdate {
    pub role: RoleState,
    pub syncs: Vec<SyncResult>,
}

#[derive(Debug, Default)]
struct SyncQueue {
    items: Vec<QueuedSync>,
    next_seq: u64,
}

struct Step {
    actor: ActorId,
    trigger: SyncTrigger,
    hop: usize,
}

/// Tracks running syncs for the status view.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct SyncRuleEngine {
    store: Arc<RoleStateStore>,
    resolver: ConflictResolver,
    sink: SharedSink,
    settings: SyncSettings,
    rules: RwLock<HashMap<String, SyncRule>>,
    queue: Mutex<SyncQueue>,
    history: RwLock<Vec<SyncResult>>,
    in_flight: AtomicUsize,
}

impl SyncRuleEngine {
    pub fn new(store: Arc<RoleStateStore>, sink: SharedSink, settings: SyncSettings) -> Self {
        Self {
            store,
            resolver: ConflictResolver::new(),
            sink,
            settings,
            rules: RwLock::new(HashMap::new()),
            queue: Mutex::new(SyncQueue::default()),
            history: RwLock::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn store(&self) -> &Arc<RoleStateStore> {
        &self.store
    }

    // ------------------------------------------------------------------------
    // Rules
    // ------------------------------------------------------------------------

    /// Validate and store a rule. A rule with an existing id replaces it.
    pub fn add_rule(&self, rule: SyncRule) -> ConcordResult<()> {
        validate_rule(&rule)?;
        info!(
            rule_id = %rule.id,
            source = %rule.source_actor,
            trigger = rule.trigger.as_str(),
            "Sync rule added"
        );
        self.rules
            .write()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))?
            .insert(rule.id.clone(), rule);
        Ok(())
    }

    pub fn remove_rule(&self, rule_id: &str) -> ConcordResult<SyncRule> {
        self.rules
            .write()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))?
            .remove(rule_id)
            .ok_or_else(|| {
                SyncError::UnknownRule {
                    rule_id: rule_id.to_string(),
                }
                .into()
            })
    }

    pub fn rule(&self, rule_id: &str) -> ConcordResult<Option<SyncRule>> {
        Ok(self
            .rules
            .read()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))?
            .get(rule_id)
            .cloned())
    }

    /// All rules, highest priority first.
    pub fn rules(&self) -> ConcordResult<Vec<SyncRule>> {
        let mut rules: Vec<SyncRule> = self
            .rules
            .read()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))?
            .values()
            .cloned()
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(rules)
    }

    // ------------------------------------------------------------------------
    // Triggers
    // ------------------------------------------------------------------------

    /// Store update followed by `state_change` (and `data_update` when a
    /// non-empty patch was given) triggers.
    pub fn update_role(
        &self,
        actor_id: &str,
        new_state: &str,
        patch: Option<&StateData>,
        context: Option<&TransitionContext>,
    ) -> ConcordResult<RoleUpdate> {
        let role = self.store.update(actor_id, new_state, patch, context)?;

        let mut syncs = self.trigger(actor_id, SyncTrigger::StateChange)?;
        if patch.is_some_and(|p| !p.is_empty()) {
            syncs.extend(self.trigger(actor_id, SyncTrigger::DataUpdate)?);
        }
        Ok(RoleUpdate { role, syncs })
    }

    /// Capability write followed by `capability_change` triggers.
    pub fn update_capabilities(&self, actor_id: &str, capabilities: Vec<String>) -> ConcordResult<RoleUpdate> {
        let role = self.store.set_capabilities(actor_id, capabilities)?;
        let syncs = self.trigger(actor_id, SyncTrigger::CapabilityChange)?;
        Ok(RoleUpdate { role, syncs })
    }

    /// Workload write followed by `workload_change` triggers.
    pub fn update_workload(&self, actor_id: &str, workload: u32) -> ConcordResult<RoleUpdate> {
        let role = self.store.set_workload(actor_id, workload)?;
        let syncs = self.trigger(actor_id, SyncTrigger::WorkloadChange)?;
        Ok(RoleUpdate { role, syncs })
    }

    /// Fire every rule matching `(actor_id, kind)`.
    ///
    /// Returns the results of the rules that ran synchronously, including
    /// chained propagation. Queued rules produce no result until drained.
    pub fn trigger(&self, actor_id: &str, kind: SyncTrigger) -> ConcordResult<Vec<SyncResult>> {
        debug!(actor_id = %actor_id, trigger = kind.as_str(), "Sync triggered");

        let matching: Vec<SyncRule> = self
            .rules()?
            .into_iter()
            .filter(|r| r.fires_for(actor_id, kind))
            .collect();

        let mut synchronous = Vec::new();
        for rule in matching {
            if rule.sync_type.is_synchronous() {
                synchronous.push(rule);
            } else {
                self.enqueue(&rule, actor_id, kind)?;
            }
        }

        let mut visited = HashSet::from([actor_id.to_string()]);
        let mut results = Vec::new();
        for rule in synchronous {
            results.extend(self.run_chain(&rule, actor_id, kind, &mut visited)?);
        }
        Ok(results)
    }

    /// Propagate `source` into `targets` outside of any rule.
    ///
    /// With `manual_input`, state conflicts are settled with that payload;
    /// without it they resolve by merge.
    pub fn manual_sync(
        &self,
        source: &str,
        targets: &[ActorId],
        manual_input: Option<StateData>,
    ) -> ConcordResult<SyncResult> {
        let plan = PropagationPlan {
            rule_id: None,
            transformation: None,
            policy: if manual_input.is_some() {
                ConflictPolicy::Manual
            } else {
                ConflictPolicy::Detect
            },
            manual_input,
        };
        let targets = self.expand_targets(source, targets)?;
        let result = self.execute(&plan, None, source, &targets, SyncTrigger::Manual, 0)?;
        self.record(result.clone())?;
        Ok(result)
    }

    // ------------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------------

    /// Drain up to `batch_size` queued syncs, highest priority first, FIFO on
    /// ties.
    pub fn process_queue(&self) -> ConcordResult<Vec<SyncResult>> {
        let batch: Vec<QueuedSync> = {
            let mut queue = self
                .queue
                .lock()
                .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))?;
            queue
                .items
                .sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.seq.cmp(&b.seq)));
            let take = queue.items.len().min(self.settings.batch_size);
            queue.items.drain(..take).collect()
        };

        if batch.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = batch.len(), "Processing sync queue");

        let mut results = Vec::new();
        let mut pending = batch.into_iter();
        while let Some(item) = pending.next() {
            match self.run_queued(&item) {
                Ok(item_results) => results.extend(item_results),
                Err(err) => {
                    // The failed item and everything behind it go back in line.
                    let remainder: Vec<QueuedSync> = std::iter::once(item).chain(pending).collect();
                    warn!(error = %err, requeued = remainder.len(), "Sync queue processing aborted");
                    self.requeue(remainder);
                    return Err(err);
                }
            }
        }
        Ok(results)
    }

    fn run_queued(&self, item: &QueuedSync) -> ConcordResult<Vec<SyncResult>> {
        let Some(rule) = self.rule(&item.rule_id)? else {
            warn!(rule_id = %item.rule_id, queue_id = %item.id, "Queued sync references removed rule");
            let result = failed_result(
                Some(item.rule_id.clone()),
                &item.source_actor,
                item.trigger,
                SyncError::UnknownRule {
                    rule_id: item.rule_id.clone(),
                }
                .into(),
            );
            self.record(result.clone())?;
            return Ok(vec![result]);
        };
        let mut visited = HashSet::from([item.source_actor.clone()]);
        self.run_chain(&rule, &item.source_actor, item.trigger, &mut visited)
    }

    /// Put drained items back. They keep their priority and sequence, so the
    /// next drain sees them in their original order.
    fn requeue(&self, items: Vec<QueuedSync>) {
        match self.queue.lock() {
            Ok(mut queue) => queue.items.extend(items),
            Err(_) => warn!(dropped = items.len(), "Sync queue poisoned; queued syncs lost"),
        }
    }

    /// Remove a queued sync before it executes.
    pub fn cancel(&self, queue_id: concord_core::EntityId) -> ConcordResult<QueuedSync> {
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))?;
        let position = queue
            .items
            .iter()
            .position(|q| q.id == queue_id)
            .ok_or(SyncError::UnknownQueuedSync { queue_id })?;
        let item = queue.items.remove(position);
        info!(queue_id = %queue_id, rule_id = %item.rule_id, "Queued sync cancelled");
        Ok(item)
    }

    /// Queued syncs in drain order.
    pub fn queued(&self) -> ConcordResult<Vec<QueuedSync>> {
        let mut items = self
            .queue
            .lock()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))?
            .items
            .clone();
        items.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.seq.cmp(&b.seq)));
        Ok(items)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn status(&self) -> ConcordResult<SyncStatus> {
        let history = self
            .history
            .read()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))?;
        let window = chrono::Duration::from_std(self.settings.recent_conflict_window)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let cutoff = Utc::now() - window;
        let recent_conflicts = history
            .iter()
            .filter(|r| r.timestamp >= cutoff)
            .flat_map(|r| r.conflicts.iter().cloned())
            .collect();

        Ok(SyncStatus {
            total_roles: self.store.len()?,
            total_rules: self
                .rules
                .read()
                .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))?
                .len(),
            queue_size: self
                .queue
                .lock()
                .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))?
                .items
                .len(),
            last_sync_time: history.last().map(|r| r.timestamp),
            sync_in_progress: self.in_flight.load(Ordering::SeqCst) > 0,
            recent_conflicts,
        })
    }

    /// Sync results matching `filter`, oldest first.
    pub fn history(&self, filter: &SyncFilter) -> ConcordResult<Vec<SyncResult>> {
        let history = self
            .history
            .read()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))?;
        let mut matched: Vec<SyncResult> =
            history.iter().filter(|r| filter.matches(r)).cloned().collect();
        if let Some(limit) = filter.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        Ok(matched)
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    fn enqueue(&self, rule: &SyncRule, actor_id: &str, trigger: SyncTrigger) -> ConcordResult<()> {
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))?;
        let seq = queue.next_seq;
        queue.next_seq += 1;
        let item = QueuedSync {
            id: concord_core::new_entity_id(),
            rule_id: rule.id.clone(),
            source_actor: actor_id.to_string(),
            trigger,
            priority: rule.priority,
            seq,
            enqueued_at: Utc::now(),
        };
        debug!(queue_id = %item.id, rule_id = %rule.id, seq = seq, "Sync queued");
        queue.items.push(item);
        Ok(())
    }

    /// Execute `rule` from `source` and follow the resulting chain.
    fn run_chain(
        &self,
        rule: &SyncRule,
        source: &str,
        trigger: SyncTrigger,
        visited: &mut HashSet<ActorId>,
    ) -> ConcordResult<Vec<SyncResult>> {
        let mut results = Vec::new();
        let mut work: VecDeque<Step> = VecDeque::new();
        if let Some(first) = self.run_rule(rule, source, trigger, 0, visited)? {
            work = self.next_steps(&first, visited);
            results.push(first);
        }

        while let Some(step) = work.pop_front() {
            let chained: Vec<SyncRule> = self
                .rules()?
                .into_iter()
                .filter(|r| r.fires_for(&step.actor, step.trigger) && r.sync_type.is_synchronous())
                .collect();
            for rule in chained {
                // Nothing left to reach once visited targets are dropped.
                let Some(result) = self.run_rule(&rule, &step.actor, step.trigger, step.hop, visited)? else {
                    continue;
                };
                work.extend(self.next_steps(&result, visited));
                results.push(result);
            }
        }
        Ok(results)
    }

    /// Chained steps for every actor a result committed into.
    fn next_steps(&self, result: &SyncResult, visited: &mut HashSet<ActorId>) -> VecDeque<Step> {
        let hop = result.hop + 1;
        let mut steps = VecDeque::new();
        for actor in &result.synced_actors {
            if hop >= self.settings.max_propagation_hops {
                warn!(
                    actor_id = %actor,
                    max_hops = self.settings.max_propagation_hops,
                    "Propagation hop limit reached"
                );
                continue;
            }
            if visited.insert(actor.clone()) {
                steps.push_back(Step {
                    actor: actor.clone(),
                    trigger: SyncTrigger::StateChange,
                    hop,
                });
            }
        }
        steps
    }

    fn run_rule(
        &self,
        rule: &SyncRule,
        source: &str,
        trigger: SyncTrigger,
        hop: usize,
        visited: &HashSet<ActorId>,
    ) -> ConcordResult<Option<SyncResult>> {
        let mut targets = self.expand_targets(source, &rule.target_actors)?;
        if hop > 0 {
            targets.retain(|t| {
                let revisit = visited.contains(t);
                if revisit {
                    debug!(rule_id = %rule.id, target = %t, "Skipping revisit in propagation chain");
                }
                !revisit
            });
            if targets.is_empty() {
                return Ok(None);
            }
        }

        let plan = PropagationPlan {
            rule_id: Some(rule.id.clone()),
            transformation: rule.transformation.clone(),
            policy: rule.conflict_policy,
            manual_input: None,
        };
        let result = self.execute(&plan, Some(rule), source, &targets, trigger, hop)?;
        self.record(result.clone())?;
        Ok(Some(result))
    }

    /// Propagate into each target under its own lock. Per-target failures
    /// are collected; only storage failures abort.
    fn execute(
        &self,
        plan: &PropagationPlan,
        rule: Option<&SyncRule>,
        source: &str,
        targets: &[ActorId],
        trigger: SyncTrigger,
        hop: usize,
    ) -> ConcordResult<SyncResult> {
        let _in_flight = InFlight::enter(&self.in_flight);

        let Some(source_state) = self.store.get(source)? else {
            warn!(source = %source, "Sync source not registered");
            return Ok(failed_result(
                plan.rule_id.clone(),
                source,
                trigger,
                concord_core::RoleError::UnknownActor {
                    actor_id: source.to_string(),
                    session_id: None,
                }
                .into(),
            ));
        };

        let mut result = SyncResult {
            sync_id: concord_core::new_entity_id(),
            rule_id: plan.rule_id.clone(),
            trigger,
            source_actor: source.to_string(),
            target_actors: targets.to_vec(),
            synced_actors: Vec::new(),
            conflicts: Vec::new(),
            failures: Vec::new(),
            hop,
            timestamp: Utc::now(),
            success: true,
            error: None,
        };

        for target in targets {
            let outcome = self.store.apply(target, |target_state| {
                if let Some(condition) = rule.and_then(|r| r.condition.as_ref()) {
                    if !condition.matches(&source_state, target_state) {
                        debug!(source = %source, target = %target, "Sync condition not met");
                        return Ok((None, None));
                    }
                }
                match self.resolver.resolve(&source_state, target_state, plan) {
                    Ok(resolution) => Ok((Some(Ok(resolution.conflict)), resolution.write)),
                    Err(err) => Ok((Some(Err(err)), None)),
                }
            });

            match outcome {
                Ok((None, _)) => {}
                Ok((Some(Ok(conflict)), committed)) => {
                    if let Some(conflict) = conflict {
                        warn!(
                            source = %source,
                            target = %target,
                            conflict_type = ?conflict.conflict_type,
                            resolution = ?conflict.resolution,
                            "Sync conflict detected"
                        );
                        self.announce_conflict(plan, source, target, &conflict, true)?;
                        result.conflicts.push(conflict);
                    }
                    if committed.is_some() {
                        result.synced_actors.push(target.clone());
                    }
                }
                Ok((Some(Err(unresolved)), _)) => {
                    warn!(source = %source, target = %target, error = %unresolved.error, "Sync conflict left unresolved");
                    self.announce_conflict(plan, source, target, &unresolved.conflict, false)?;
                    result.conflicts.push(unresolved.conflict);
                    result.failures.push(concord_core::SyncFailure {
                        actor_id: target.clone(),
                        error: unresolved.error.to_string(),
                    });
                }
                Err(ConcordError::Storage(err)) => return Err(err.into()),
                Err(err) => {
                    warn!(source = %source, target = %target, error = %err, "Sync target skipped");
                    result.failures.push(concord_core::SyncFailure {
                        actor_id: target.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        result.success = result.failures.is_empty();
        info!(
            sync_id = %result.sync_id,
            rule_id = ?result.rule_id,
            source = %source,
            synced = result.synced_actors.len(),
            conflicts = result.conflicts.len(),
            failures = result.failures.len(),
            hop = hop,
            "Sync completed"
        );
        Ok(result)
    }

    fn announce_conflict(
        &self,
        plan: &PropagationPlan,
        source: &str,
        target: &str,
        conflict: &concord_core::Conflict,
        resolved: bool,
    ) -> ConcordResult<()> {
        let session_id = self
            .store
            .get(target)?
            .and_then(|r| r.metadata.session_id);
        let notice = ConflictNotice {
            rule_id: plan.rule_id.clone(),
            source_actor: source.to_string(),
            target_actor: target.to_string(),
            session_id,
            conflict: conflict.clone(),
            resolved,
        };
        publish(self.sink.as_ref(), Topic::ConflictDetected, SOURCE, &notice);
        Ok(())
    }

    fn record(&self, result: SyncResult) -> ConcordResult<()> {
        publish(self.sink.as_ref(), Topic::RoleSynced, SOURCE, &result);
        self.history
            .write()
            .map_err(|_| ConcordError::Storage(StorageError::LockPoisoned))?
            .push(result);
        Ok(())
    }

    /// Expand `*` to every registered actor but the source, drop the source
    /// itself and duplicates, keep order otherwise.
    fn expand_targets(&self, source: &str, targets: &[ActorId]) -> ConcordResult<Vec<ActorId>> {
        let mut expanded = Vec::new();
        let mut seen = HashSet::new();
        for target in targets {
            let candidates = if target == WILDCARD_ACTOR {
                self.store.actor_ids()?
            } else {
                vec![target.clone()]
            };
            for candidate in candidates {
                if candidate == source {
                    continue;
                }
                if seen.insert(candidate.clone()) {
                    expanded.push(candidate);
                }
            }
        }
        Ok(expanded)
    }
}

fn validate_rule(rule: &SyncRule) -> Result<(), SyncError> {
    let invalid = |reason: &str| SyncError::InvalidRule {
        rule_id: rule.id.clone(),
        reason: reason.to_string(),
    };

    if rule.id.trim().is_empty() {
        return Err(invalid("rule id must not be empty"));
    }
    if rule.source_actor.trim().is_empty() {
        return Err(invalid("source actor must not be empty"));
    }
    if rule.target_actors.is_empty() || rule.target_actors.iter().any(|t| t.trim().is_empty()) {
        return Err(invalid("target actors must be a non-empty list of actor ids"));
    }
    if rule.sync_type == SyncType::Conditional && rule.condition.is_none() {
        return Err(invalid("conditional rules require a condition"));
    }
    Ok(())
}

fn failed_result(
    rule_id: Option<String>,
    source: &str,
    trigger: SyncTrigger,
    error: ConcordError,
) -> SyncResult {
    SyncResult {
        sync_id: concord_core::new_entity_id(),
        rule_id,
        trigger,
        source_actor: source.to_string(),
        target_actors: Vec::new(),
        synced_actors: Vec::new(),
        conflicts: Vec::new(),
        failures: Vec::new(),
        hop: 0,
        timestamp: Utc::now(),
        success: false,
        error: Some(error.to_string()),
    }
}

// ============================================================================
// TESTS
// ============================================================================
