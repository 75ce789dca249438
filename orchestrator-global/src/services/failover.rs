use arc_swap::ArcSwap;
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::{FailoverConfig, FailoverGroupConfig};
use crate::error::{OrchestratorError, Result};
use crate::types::{
    FailoverEvent, FailoverGroup, FailoverState, FailoverStrategy, FailoverType, HealthStatus,
    NodeId,
};

const MAX_FAILOVER_HISTORY: usize = 1000;

/// Failover outcomes
#[derive(Debug, Clone)]
pub enum FailoverNotification {
    /// A backup took over as primary (also emitted on fail-back and manual failover)
    FailoverCompleted(FailoverEvent),
    /// A group lost its primary and no backup could be promoted
    FailoverFailed {
        group_id: String,
        failed_node_id: NodeId,
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverStats {
    pub enabled: bool,
    pub total_groups: usize,
    pub groups_by_state: BTreeMap<String, usize>,
    pub failover_events: u64,
    pub failed_failovers: u64,
    pub history_length: usize,
    pub average_recovery_time_ms: Option<f64>,
}

/// Keeps failover groups and promotes backups when primaries fail
pub struct FailoverService {
    config: ArcSwap<FailoverConfig>,
    groups: DashMap<String, FailoverGroup>,
    /// Definitions of the groups that came from configuration
    configured: DashMap<String, FailoverGroupConfig>,
    node_health: DashMap<NodeId, HealthStatus>,
    node_load: DashMap<NodeId, f64>,
    /// When each group left STABLE or FAILED_OVER, for recovery times
    transition_started: DashMap<String, Instant>,
    history: Mutex<VecDeque<FailoverEvent>>,
    events: broadcast::Sender<FailoverNotification>,
    failover_events: AtomicU64,
    failed_failovers: AtomicU64,
}

fn state_name(state: FailoverState) -> &'static str {
    match state {
        FailoverState::Stable => "stable",
        FailoverState::FailingOver => "failing_over",
        FailoverState::FailedOver => "failed_over",
        FailoverState::Recovering => "recovering",
    }
}

/// Move `backup` into the primary slot and the old primary to the end of the backup list
fn promote(group: &mut FailoverGroup, backup: &NodeId) -> NodeId {
    let previous = std::mem::replace(&mut group.primary_node_id, backup.clone());
    group.backup_node_ids.retain(|id| id != backup);
    group.backup_node_ids.push(previous.clone());
    previous
}

impl FailoverService {
    pub fn new(config: FailoverConfig) -> Result<Self> {
        let (events, _) = broadcast::channel(256);
        let groups = config.groups.clone();
        let service = Self {
            config: ArcSwap::from_pointee(config),
            groups: DashMap::new(),
            configured: DashMap::new(),
            node_health: DashMap::new(),
            node_load: DashMap::new(),
            transition_started: DashMap::new(),
            history: Mutex::new(VecDeque::new()),
            events,
            failover_events: AtomicU64::new(0),
            failed_failovers: AtomicU64::new(0),
        };
        service.initialize_failover_groups(&groups)?;
        Ok(service)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FailoverNotification> {
        self.events.subscribe()
    }

    /// Apply new settings and reconcile the configured groups
    pub fn update_config(&self, config: FailoverConfig) -> Result<()> {
        let groups = config.groups.clone();
        self.config.store(Arc::new(config));
        self.initialize_failover_groups(&groups)
    }

    /// Bring the configured groups in line with `groups`: new definitions are created,
    /// changed ones replaced and dropped ones removed. Unchanged groups keep their
    /// runtime state; groups created at runtime are left alone unless redefined here.
    pub fn initialize_failover_groups(&self, groups: &[FailoverGroupConfig]) -> Result<()> {
        let mut wanted = HashSet::new();
        for group in groups {
            group.validate()?;
            if !wanted.insert(group.group_id.as_str()) {
                return Err(OrchestratorError::config(format!(
                    "Failover group {} is defined twice",
                    group.group_id
                )));
            }
        }

        let dropped: Vec<String> = self
            .configured
            .iter()
            .filter(|entry| !wanted.contains(entry.key().as_str()))
            .map(|entry| entry.key().clone())
            .collect();
        for group_id in dropped {
            self.configured.remove(&group_id);
            self.remove_failover_group(&group_id);
        }

        for definition in groups {
            let unchanged = self
                .configured
                .get(&definition.group_id)
                .map(|current| *current == *definition)
                .unwrap_or(false)
                && self.groups.contains_key(&definition.group_id);
            if unchanged {
                continue;
            }
            if self.remove_failover_group(&definition.group_id) {
                info!(group_id = %definition.group_id, "Failover group redefined");
            }
            self.create_failover_group(definition.clone())?;
            self.configured
                .insert(definition.group_id.clone(), definition.clone());
        }
        Ok(())
    }

    pub fn create_failover_group(&self, definition: FailoverGroupConfig) -> Result<FailoverGroup> {
        definition.validate()?;
        let primary = NodeId::new(definition.primary_node_id);
        let backups: Vec<NodeId> = definition.backup_node_ids.into_iter().map(NodeId::new).collect();

        let group = FailoverGroup {
            group_id: definition.group_id.clone(),
            primary_node_id: primary,
            backup_node_ids: backups,
            failover_strategy: definition.failover_strategy,
            health_check_interval_ms: definition.health_check_interval_ms,
            state: FailoverState::Stable,
            original_primary_node_id: None,
        };

        match self.groups.entry(definition.group_id) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                return Err(OrchestratorError::config(format!(
                    "Failover group {} already exists",
                    entry.key()
                )));
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(group.clone());
            }
        }

        info!(
            group_id = %group.group_id,
            primary = %group.primary_node_id,
            backups = group.backup_node_ids.len(),
            strategy = ?group.failover_strategy,
            "Failover group created"
        );
        metrics::gauge!("orchestrator_failover_groups", self.groups.len() as f64);
        Ok(group)
    }

    pub fn remove_failover_group(&self, group_id: &str) -> bool {
        let removed = self.groups.remove(group_id).is_some();
        self.transition_started.remove(group_id);
        if removed {
            info!(group_id = %group_id, "Failover group removed");
            metrics::gauge!("orchestrator_failover_groups", self.groups.len() as f64);
        }
        removed
    }

    pub fn update_node_health(&self, node_id: &NodeId, status: HealthStatus) {
        self.node_health.insert(node_id.clone(), status);
    }

    pub fn update_node_load(&self, node_id: &NodeId, load: f64) {
        self.node_load.insert(node_id.clone(), load);
    }

    fn health_of(&self, node_id: &NodeId) -> HealthStatus {
        self.node_health
            .get(node_id)
            .map(|h| *h)
            .unwrap_or(HealthStatus::Unknown)
    }

    /// Pick the backup to promote; never the primary, never an unhealthy node
    pub fn select_backup_node(&self, group: &FailoverGroup) -> Option<NodeId> {
        let health_rank = |status: HealthStatus| match status {
            HealthStatus::Healthy => 0u8,
            HealthStatus::Unknown => 1,
            HealthStatus::Degraded => 2,
            HealthStatus::Unhealthy => 3,
        };

        let mut candidates: Vec<(u8, f64, usize, &NodeId)> = group
            .backup_node_ids
            .iter()
            .enumerate()
            .filter(|(_, id)| **id != group.primary_node_id)
            .map(|(index, id)| {
                let load = self.node_load.get(id).map(|l| *l).unwrap_or(0.0);
                (health_rank(self.health_of(id)), load, index, id)
            })
            .filter(|(rank, _, _, _)| *rank < 3)
            .collect();

        match group.failover_strategy {
            FailoverStrategy::LoadBalanced => candidates.sort_by(|a, b| {
                a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)).then(a.2.cmp(&b.2))
            }),
            FailoverStrategy::Automatic | FailoverStrategy::Manual => candidates.sort_by(|a, b| {
                a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)).then(a.2.cmp(&b.2))
            }),
        }

        candidates.first().map(|(_, _, _, id)| (*id).clone())
    }

    /// Fail over every group whose primary is `node_id`.
    /// Returns the completed failovers, or FAILOVER_FAILED if any group could not be protected.
    pub fn handle_node_failure(&self, node_id: &NodeId, reason: &str) -> Result<Vec<FailoverEvent>> {
        if !self.config.load().enabled {
            info!(node_id = %node_id, "Failover disabled, ignoring node failure");
            return Ok(Vec::new());
        }

        self.node_health.insert(node_id.clone(), HealthStatus::Unhealthy);

        let mut group_ids: Vec<String> = self
            .groups
            .iter()
            .filter(|g| &g.value().primary_node_id == node_id)
            .map(|g| g.key().clone())
            .collect();
        group_ids.sort();

        let mut completed = Vec::new();
        let mut unprotected = Vec::new();
        for group_id in group_ids {
            match self.fail_over_group(&group_id, node_id, reason) {
                Ok(Some(event)) => completed.push(event),
                Ok(None) => {}
                Err(e) => unprotected.push((group_id, e)),
            }
        }

        if unprotected.is_empty() {
            return Ok(completed);
        }

        let group_ids: Vec<&str> = unprotected.iter().map(|(id, _)| id.as_str()).collect();
        let first = &unprotected[0].1;
        Err(OrchestratorError::failover(first.message.clone())
            .with_node(node_id.clone())
            .with_details(serde_json::json!({
                "groupIds": group_ids,
                "completedFailovers": completed.len(),
            })))
    }

    fn fail_over_group(
        &self,
        group_id: &str,
        failed_node: &NodeId,
        reason: &str,
    ) -> Result<Option<FailoverEvent>> {
        let outcome = {
            let Some(mut group) = self.groups.get_mut(group_id) else {
                return Ok(None);
            };
            if &group.primary_node_id != failed_node {
                return Ok(None);
            }

            group.state = FailoverState::FailingOver;
            let started = *self
                .transition_started
                .entry(group_id.to_string())
                .or_insert_with(Instant::now);

            if group.failover_strategy == FailoverStrategy::Manual {
                Err("Group requires manual failover".to_string())
            } else {
                match self.select_backup_node(&group) {
                    Some(backup) => {
                        let previous = promote(&mut group, &backup);
                        if group.original_primary_node_id.is_none() {
                            group.original_primary_node_id = Some(previous.clone());
                        }
                        group.state = FailoverState::FailedOver;
                        Ok(FailoverEvent {
                            event_type: FailoverType::Automatic,
                            group_id: group_id.to_string(),
                            primary_node_id: previous,
                            backup_node_id: backup,
                            reason: reason.to_string(),
                            timestamp: Utc::now(),
                            recovery_time_ms: Some(started.elapsed().as_millis() as u64),
                        })
                    }
                    None => Err("No healthy backup nodes available".to_string()),
                }
            }
        };

        match outcome {
            Ok(event) => {
                self.transition_started.insert(group_id.to_string(), Instant::now());
                info!(
                    group_id = %group_id,
                    failed_primary = %event.primary_node_id,
                    new_primary = %event.backup_node_id,
                    reason = %reason,
                    "Failover completed"
                );
                self.record(event.clone());
                Ok(Some(event))
            }
            Err(message) => {
                self.failed_failovers.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("orchestrator_failover_failures_total", 1);
                error!(
                    group_id = %group_id,
                    failed_node = %failed_node,
                    reason = %message,
                    "Failover failed, group is unprotected"
                );
                let _ = self.events.send(FailoverNotification::FailoverFailed {
                    group_id: group_id.to_string(),
                    failed_node_id: failed_node.clone(),
                    reason: message.clone(),
                });
                Err(OrchestratorError::failover(message).with_node(failed_node.clone()))
            }
        }
    }

    fn record(&self, event: FailoverEvent) {
        self.failover_events.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("orchestrator_failover_events_total", 1);
        if let Ok(mut history) = self.history.lock() {
            history.push_back(event.clone());
            while history.len() > MAX_FAILOVER_HISTORY {
                history.pop_front();
            }
        }
        let _ = self.events.send(FailoverNotification::FailoverCompleted(event));
    }

    /// Promote `target` in `group_id` on operator request, regardless of health
    pub fn manual_failover(&self, group_id: &str, target: &NodeId, reason: &str) -> Result<FailoverEvent> {
        let event = {
            let mut group = self.groups.get_mut(group_id).ok_or_else(|| {
                OrchestratorError::failover(format!("Failover group {} not found", group_id))
            })?;

            if &group.primary_node_id == target {
                return Err(OrchestratorError::failover(format!(
                    "Node {} is already the primary of group {}",
                    target, group_id
                ))
                .with_node(target.clone()));
            }
            if !group.backup_node_ids.contains(target) {
                return Err(OrchestratorError::failover(format!(
                    "Node {} is not a backup of group {}",
                    target, group_id
                ))
                .with_node(target.clone()));
            }

            let previous = promote(&mut group, target);
            group.state = FailoverState::Stable;
            group.original_primary_node_id = None;
            FailoverEvent {
                event_type: FailoverType::Manual,
                group_id: group_id.to_string(),
                primary_node_id: previous,
                backup_node_id: target.clone(),
                reason: reason.to_string(),
                timestamp: Utc::now(),
                recovery_time_ms: None,
            }
        };

        self.transition_started.remove(group_id);
        info!(
            group_id = %group_id,
            previous_primary = %event.primary_node_id,
            new_primary = %target,
            "Manual failover completed"
        );
        self.record(event.clone());
        Ok(event)
    }

    /// Mark a node healthy and resolve the groups waiting on it
    pub fn recover_node(&self, node_id: &NodeId) -> Vec<FailoverEvent> {
        self.node_health.insert(node_id.clone(), HealthStatus::Healthy);
        let auto_recovery = self.config.load().auto_recovery;

        let mut group_ids: Vec<String> = self
            .groups
            .iter()
            .filter(|g| g.value().contains(node_id))
            .map(|g| g.key().clone())
            .collect();
        group_ids.sort();

        let mut events = Vec::new();
        for group_id in group_ids {
            let event = {
                let Some(mut group) = self.groups.get_mut(&group_id) else {
                    continue;
                };
                let state = group.state;
                match state {
                    FailoverState::FailedOver
                        if group.original_primary_node_id.as_ref() == Some(node_id) =>
                    {
                        group.state = FailoverState::Recovering;
                        group.original_primary_node_id = None;
                        let event = if auto_recovery {
                            let started = self.transition_started.get(&group_id).map(|s| *s);
                            let demoted = promote(&mut group, node_id);
                            Some(FailoverEvent {
                                event_type: FailoverType::Recovery,
                                group_id: group_id.clone(),
                                primary_node_id: node_id.clone(),
                                backup_node_id: demoted,
                                reason: "Original primary recovered".to_string(),
                                timestamp: Utc::now(),
                                recovery_time_ms: started.map(|s| s.elapsed().as_millis() as u64),
                            })
                        } else {
                            debug!(group_id = %group_id, node_id = %node_id, "Auto-recovery disabled, keeping promoted primary");
                            None
                        };
                        group.state = FailoverState::Stable;
                        event
                    }
                    FailoverState::FailingOver if group.primary_node_id == *node_id => {
                        info!(group_id = %group_id, node_id = %node_id, "Primary recovered before a backup could be promoted");
                        group.state = FailoverState::Stable;
                        group.original_primary_node_id = None;
                        None
                    }
                    FailoverState::FailingOver
                        if group.failover_strategy != FailoverStrategy::Manual =>
                    {
                        let started = self.transition_started.get(&group_id).map(|s| *s);
                        let previous = promote(&mut group, node_id);
                        if group.original_primary_node_id.is_none() {
                            group.original_primary_node_id = Some(previous.clone());
                        }
                        group.state = FailoverState::FailedOver;
                        Some(FailoverEvent {
                            event_type: FailoverType::Automatic,
                            group_id: group_id.clone(),
                            primary_node_id: previous,
                            backup_node_id: node_id.clone(),
                            reason: "Backup recovered while group was unprotected".to_string(),
                            timestamp: Utc::now(),
                            recovery_time_ms: started.map(|s| s.elapsed().as_millis() as u64),
                        })
                    }
                    _ => continue,
                }
            };

            match event {
                Some(event) => {
                    if event.event_type == FailoverType::Automatic {
                        self.transition_started.insert(group_id.clone(), Instant::now());
                    } else {
                        self.transition_started.remove(&group_id);
                    }
                    info!(
                        group_id = %group_id,
                        primary = %event.primary_node_id,
                        event_type = ?event.event_type,
                        "Failover group recovered"
                    );
                    self.record(event.clone());
                    events.push(event);
                }
                None => {
                    self.transition_started.remove(&group_id);
                }
            }
        }

        if events.is_empty() {
            debug!(node_id = %node_id, "Node recovered, no failover group changed primary");
        }
        events
    }

    pub fn get_failover_groups(&self) -> Vec<FailoverGroup> {
        let mut groups: Vec<_> = self.groups.iter().map(|g| g.value().clone()).collect();
        groups.sort_by(|a, b| a.group_id.cmp(&b.group_id));
        groups
    }

    pub fn get_group(&self, group_id: &str) -> Option<FailoverGroup> {
        self.groups.get(group_id).map(|g| g.value().clone())
    }

    /// Most recent events first
    pub fn get_failover_history(&self, limit: usize) -> Vec<FailoverEvent> {
        self.history
            .lock()
            .map(|h| h.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn total_failover_events(&self) -> u64 {
        self.failover_events.load(Ordering::Relaxed)
    }

    pub fn get_failover_stats(&self) -> FailoverStats {
        let mut groups_by_state = BTreeMap::new();
        for group in self.groups.iter() {
            *groups_by_state
                .entry(state_name(group.state).to_string())
                .or_insert(0) += 1;
        }

        let (history_length, average_recovery_time_ms) = match self.history.lock() {
            Ok(history) => {
                let times: Vec<u64> = history.iter().filter_map(|e| e.recovery_time_ms).collect();
                let average = if times.is_empty() {
                    None
                } else {
                    Some(times.iter().sum::<u64>() as f64 / times.len() as f64)
                };
                (history.len(), average)
            }
            Err(_) => {
                warn!("Failover history lock poisoned");
                (0, None)
            }
        };

        FailoverStats {
            enabled: self.config.load().enabled,
            total_groups: self.groups.len(),
            groups_by_state,
            failover_events: self.failover_events.load(Ordering::Relaxed),
            failed_failovers: self.failed_failovers.load(Ordering::Relaxed),
            history_length,
            average_recovery_time_ms,
        }
    }
}
