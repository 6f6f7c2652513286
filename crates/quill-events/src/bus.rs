// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{error, warn};

use quill_config::EventBusConfig;

use crate::event::{Event, EventKind};

pub type SubscriptionId = u64;

type ListenerFn = Box<dyn Fn(&Event) + Send + Sync>;

/// Receives contiguous batches of events evicted from the bounded history.
pub type ArchiveSink = Box<dyn Fn(Vec<Event>) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    /// `None` subscribes to every kind ("any").
    kind: Option<EventKind>,
    listener: ListenerFn,
    /// Set when the listener asks to be dropped (closed fan-out channel);
    /// purged after the next dispatch.
    dead: Arc<AtomicBool>,
}

struct BusState {
    history: VecDeque<Event>,
    next_seq: u64,
    /// Clamp source for monotone non-decreasing timestamps.
    last_ts: u64,
}

/// Typed, append-only, bounded in-process publish/subscribe fabric.
///
/// `emit` is synchronous: listeners run inside the call, typed listeners
/// before "any" listeners, in registration order.  Listeners may emit
/// further events (dispatch holds no lock).  A panicking listener is
/// isolated and logged; it never prevents later listeners from running.
pub struct EventBus {
    state: Mutex<BusState>,
    subs: Mutex<Vec<Arc<Subscription>>>,
    archive_sink: Option<ArchiveSink>,
    cfg: EventBusConfig,
    next_sub_id: AtomicU64,
}

impl EventBus {
    pub fn new(cfg: EventBusConfig) -> Self {
        Self {
            state: Mutex::new(BusState {
                history: VecDeque::new(),
                next_seq: 1,
                last_ts: 0,
            }),
            subs: Mutex::new(Vec::new()),
            archive_sink: None,
            cfg,
            next_sub_id: AtomicU64::new(1),
        }
    }

    /// Install an archive sink.  With a sink configured, history overflow
    /// hands the oldest contiguous batch to the sink instead of dropping it,
    /// and an `EventArchive` event records the archived range.
    pub fn with_archive_sink(mut self, sink: ArchiveSink) -> Self {
        self.archive_sink = Some(sink);
        self
    }

    // ── Subscription management ───────────────────────────────────────────────

    /// Subscribe to one kind (`Some`) or to every event (`None`).
    pub fn on(
        &self,
        kind: Option<EventKind>,
        listener: impl Fn(&Event) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.register(kind, Box::new(listener), Arc::new(AtomicBool::new(false)))
    }

    fn register(
        &self,
        kind: Option<EventKind>,
        listener: ListenerFn,
        dead: Arc<AtomicBool>,
    ) -> SubscriptionId {
        let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        self.subs.lock().unwrap().push(Arc::new(Subscription {
            id,
            kind,
            listener,
            dead,
        }));
        id
    }

    /// Remove a subscription.  Safe concurrently with `emit`: a listener
    /// removed mid-dispatch may still receive the in-flight event.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subs.lock().unwrap();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Fan events out into a tokio channel without ever blocking `emit`.
    ///
    /// Uses `try_send`; when the receiver is gone or its buffer is full the
    /// subscription marks itself dead and is purged instead of stalling the
    /// emitter.
    pub fn forward(
        &self,
        kind: Option<EventKind>,
        tx: tokio::sync::mpsc::Sender<Event>,
    ) -> SubscriptionId {
        let dead = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&dead);
        let listener: ListenerFn = Box::new(move |event: &Event| {
            if let Err(e) = tx.try_send(event.clone()) {
                warn!(kind = %event.kind, "dropping event fan-out subscription: {e}");
                flag.store(true, Ordering::Relaxed);
            }
        });
        self.register(kind, listener, dead)
    }

    // ── Emission ──────────────────────────────────────────────────────────────

    pub fn emit(&self, kind: EventKind, payload: serde_json::Value) -> Event {
        self.emit_with_meta(kind, payload, None)
    }

    pub fn emit_with_meta(
        &self,
        kind: EventKind,
        payload: serde_json::Value,
        meta: Option<serde_json::Value>,
    ) -> Event {
        let (event, notice, batch) = {
            let mut st = self.state.lock().unwrap();
            let event = Self::stamp(&mut st, kind, payload, meta);
            st.history.push_back(event.clone());

            let mut batch = Vec::new();
            let mut notice = None;
            if st.history.len() > self.cfg.max_history {
                let overflow = st.history.len() - self.cfg.max_history;
                if self.archive_sink.is_some() {
                    // Drain one extra slot so the archive notice itself fits
                    // within the bound without re-triggering archival.
                    let n = (overflow + 1)
                        .max(self.cfg.archive_batch)
                        .min(st.history.len());
                    batch = st.history.drain(..n).collect::<Vec<_>>();
                    let range = serde_json::json!({
                        "from_seq": batch.first().map(|e| e.seq),
                        "to_seq": batch.last().map(|e| e.seq),
                        "count": batch.len(),
                    });
                    let archive_ev =
                        Self::stamp(&mut st, EventKind::EventArchive, range, None);
                    st.history.push_back(archive_ev.clone());
                    notice = Some(archive_ev);
                } else {
                    st.history.drain(..overflow);
                }
            }
            (event, notice, batch)
        };

        // The sink and the listeners run outside the state lock so that both
        // may emit further events.
        if !batch.is_empty() {
            if let Some(sink) = &self.archive_sink {
                sink(batch);
            }
        }
        self.dispatch(&event);
        if let Some(n) = &notice {
            self.dispatch(n);
        }
        event
    }

    fn stamp(
        st: &mut BusState,
        kind: EventKind,
        payload: serde_json::Value,
        meta: Option<serde_json::Value>,
    ) -> Event {
        let seq = st.next_seq;
        st.next_seq += 1;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let ts = now.max(st.last_ts);
        st.last_ts = ts;
        Event::stamp(seq, kind, ts, payload, meta)
    }

    fn dispatch(&self, event: &Event) {
        let subs: Vec<Arc<Subscription>> = self.subs.lock().unwrap().iter().cloned().collect();

        for sub in subs.iter().filter(|s| s.kind == Some(event.kind)) {
            Self::invoke(sub, event);
        }
        for sub in subs.iter().filter(|s| s.kind.is_none()) {
            Self::invoke(sub, event);
        }

        // Purge subscriptions that asked to be dropped during this dispatch.
        let mut subs = self.subs.lock().unwrap();
        subs.retain(|s| !s.dead.load(Ordering::Relaxed));
    }

    fn invoke(sub: &Arc<Subscription>, event: &Event) {
        if sub.dead.load(Ordering::Relaxed) {
            return;
        }
        let result = catch_unwind(AssertUnwindSafe(|| (sub.listener)(event)));
        if result.is_err() {
            error!(
                subscription = sub.id,
                kind = %event.kind,
                "event listener panicked; isolating and continuing"
            );
        }
    }

    // ── History ───────────────────────────────────────────────────────────────

    /// Snapshot read over the bounded history.
    pub fn history(&self, filter: HistoryFilter) -> Vec<Event> {
        let st = self.state.lock().unwrap();
        let mut out: Vec<Event> = st
            .history
            .iter()
            .filter(|e| filter.since_seq.map_or(true, |s| e.seq > s))
            .filter(|e| filter.kind.map_or(true, |k| e.kind == k))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            if out.len() > limit {
                out.drain(..out.len() - limit);
            }
        }
        out
    }

    pub fn history_len(&self) -> usize {
        self.state.lock().unwrap().history.len()
    }

    /// Sequence number of the most recently emitted event (0 when none).
    pub fn last_seq(&self) -> u64 {
        self.state.lock().unwrap().next_seq - 1
    }
}

/// Filter for [`EventBus::history`].  All fields optional; `limit` keeps the
/// most recent matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryFilter {
    pub since_seq: Option<u64>,
    pub kind: Option<EventKind>,
    pub limit: Option<usize>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
