//! Server-side state of mounted dashboard views.
//!
//! Each view keeps the last stats it applied along with its own color map.
//! Refreshes of one view are neither queued nor de-duplicated; how
//! overlapping responses are applied depends on [`ResponseOrdering`].

use crate::aggregator::{aggregate, AggregatedStats};
use crate::backend::{MetricsQuery, MetricsSource};
use crate::colors::ColorRegistry;
use crate::config::{ResponseOrdering, ViewsConfig};
use chrono::FixedOffset;
use moka::sync::Cache;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStatus {
    /// Stats were recomputed from this refresh.
    Fresh,
    /// The fetch failed; the last good stats are returned.
    Stale,
    /// The fetch failed and nothing has ever been applied.
    NoData,
    /// The response arrived after the view closed or was superseded.
    Discarded,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewSnapshot {
    pub view_id: String,
    pub status: RefreshStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<AggregatedStats>,
    pub colors: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct ViewState {
    applied_seq: u64,
    stats: Option<AggregatedStats>,
    colors: ColorRegistry,
}

#[derive(Debug)]
pub struct ViewSession {
    id: String,
    mounted: AtomicBool,
    next_seq: AtomicU64,
    state: Mutex<ViewState>,
}

impl ViewSession {
    fn new(id: String) -> Self {
        Self {
            id,
            mounted: AtomicBool::new(true),
            next_seq: AtomicU64::new(0),
            state: Mutex::new(ViewState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }

    fn unmount(&self) {
        self.mounted.store(false, Ordering::Release);
    }

    /// Sequence number for a new refresh. Starts at 1.
    fn dispatch(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn latest_dispatched(&self) -> u64 {
        self.next_seq.load(Ordering::Acquire)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the stats wholesale. Returns false when the response is
    /// dropped under [`ResponseOrdering::LatestDispatched`].
    fn apply(&self, seq: u64, stats: AggregatedStats, ordering: ResponseOrdering) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;
        if ordering == ResponseOrdering::LatestDispatched
            && (seq < self.latest_dispatched() || seq < state.applied_seq)
        {
            return false;
        }
        state.colors.colors_for(stats.group_names());
        state.stats = Some(stats);
        state.applied_seq = seq;
        true
    }

    fn has_stats(&self) -> bool {
        self.lock().stats.is_some()
    }

    /// Sequence number of the refresh whose stats are currently held.
    pub fn applied_seq(&self) -> u64 {
        self.lock().applied_seq
    }

    pub fn snapshot(&self, status: RefreshStatus) -> ViewSnapshot {
        let mut guard = self.lock();
        let state = &mut *guard;
        let colors = match &state.stats {
            Some(stats) => state.colors.colors_for(stats.group_names()),
            None => BTreeMap::new(),
        };
        ViewSnapshot {
            view_id: self.id.clone(),
            status,
            stats: state.stats.clone(),
            colors,
        }
    }
}

/// All open views, expiring after an idle period.
pub struct ViewRegistry {
    sessions: Cache<String, Arc<ViewSession>>,
    source: Arc<dyn MetricsSource>,
    ordering: ResponseOrdering,
}

impl ViewRegistry {
    pub fn new(source: Arc<dyn MetricsSource>, config: &ViewsConfig) -> Self {
        let sessions = Cache::builder()
            .max_capacity(config.max_views)
            .time_to_idle(Duration::from_secs(config.idle_ttl_secs))
            .eviction_listener(|id: Arc<String>, session: Arc<ViewSession>, cause| {
                session.unmount();
                tracing::debug!(view_id = %id, cause = ?cause, "view session removed");
            })
            .build();
        Self {
            sessions,
            source,
            ordering: config.response_ordering,
        }
    }

    pub fn open(&self) -> Arc<ViewSession> {
        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(ViewSession::new(id.clone()));
        self.sessions.insert(id.clone(), session.clone());
        tracing::info!(view_id = %id, "view opened");
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<ViewSession>> {
        self.sessions.get(id)
    }

    /// Close a view. In-flight refreshes keep running but their responses are discarded.
    pub fn close(&self, id: &str) -> bool {
        match self.sessions.remove(id) {
            Some(session) => {
                session.unmount();
                tracing::info!(view_id = %id, "view closed");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> u64 {
        self.sessions.run_pending_tasks();
        self.sessions.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch, aggregate and apply fresh stats for `session`.
    pub async fn refresh(
        &self,
        session: &ViewSession,
        query: &MetricsQuery,
        zone: FixedOffset,
    ) -> ViewSnapshot {
        let seq = session.dispatch();
        let result = self.source.fetch(query).await;

        if !session.is_mounted() {
            tracing::debug!(view_id = %session.id, seq, "view closed before response arrived");
            return session.snapshot(RefreshStatus::Discarded);
        }

        match result {
            Ok(inputs) => {
                let stats = aggregate(&inputs, query.group_by, query.range, zone);
                if session.apply(seq, stats, self.ordering) {
                    session.snapshot(RefreshStatus::Fresh)
                } else {
                    tracing::debug!(
                        view_id = %session.id,
                        seq,
                        latest = session.latest_dispatched(),
                        "superseded response dropped"
                    );
                    session.snapshot(RefreshStatus::Discarded)
                }
            }
            Err(e) => {
                tracing::warn!(view_id = %session.id, seq, error = %e, "metrics fetch failed");
                if session.has_stats() {
                    session.snapshot(RefreshStatus::Stale)
                } else {
                    session.snapshot(RefreshStatus::NoData)
                }
            }
        }
    }
}
