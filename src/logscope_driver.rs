//! Executes app effects: one tokio task per lane plus the stream refresh timer.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::logscope_api::{ApiError, SearchApi};
use crate::logscope_app::{App, Effect};
use crate::logscope_core::ApiPayload;
use crate::logscope_dispatch::{Lane, Ticket, TicketId};

/// Upper bound on requests one `settle` call performs, against APIs that keep
/// announcing another graph segment.
const MAX_SETTLE_FETCHES: usize = 256;

#[derive(Debug)]
pub enum DriverEvent {
    Completed { ticket: Ticket, result: Result<ApiPayload, ApiError> },
    RefreshDue,
}

pub struct Driver {
    api: Arc<dyn SearchApi>,
    runtime: Handle,
    events: UnboundedSender<DriverEvent>,
    lanes: HashMap<Lane, (TicketId, JoinHandle<()>)>,
    refresh: Option<JoinHandle<()>>,
}

impl Driver {
    pub fn new(
        api: Arc<dyn SearchApi>,
        runtime: Handle,
        events: UnboundedSender<DriverEvent>,
    ) -> Self {
        Self { api, runtime, events, lanes: HashMap::new(), refresh: None }
    }

    pub fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Fetch { ticket, request } => {
                    if let Some((previous, handle)) = self.lanes.remove(&ticket.lane) {
                        debug!(ticket = previous, "aborting superseded request");
                        handle.abort();
                    }
                    let api = self.api.clone();
                    let events = self.events.clone();
                    let lane = ticket.lane;
                    let id = ticket.id;
                    let handle = self.runtime.spawn(async move {
                        let result = api.fetch(&request).await;
                        let _ = events.send(DriverEvent::Completed { ticket, result });
                    });
                    self.lanes.insert(lane, (id, handle));
                }
                Effect::Abort(id) => {
                    let lane = self
                        .lanes
                        .iter()
                        .find(|(_, (ticket, _))| *ticket == id)
                        .map(|(lane, _)| *lane);
                    if let Some((_, handle)) = lane.and_then(|lane| self.lanes.remove(&lane)) {
                        handle.abort();
                    }
                }
                Effect::ClearRefresh => self.clear_refresh(),
                Effect::ArmRefresh(delay) => {
                    self.clear_refresh();
                    let events = self.events.clone();
                    self.refresh = Some(self.runtime.spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = events.send(DriverEvent::RefreshDue);
                    }));
                }
            }
        }
    }

    fn clear_refresh(&mut self) {
        if let Some(timer) = self.refresh.take() {
            timer.abort();
        }
    }

    pub fn refresh_armed(&self) -> bool {
        self.refresh.as_ref().is_some_and(|timer| !timer.is_finished())
    }

    pub fn in_flight(&self, lane: Lane) -> bool {
        self.lanes.get(&lane).is_some_and(|(_, handle)| !handle.is_finished())
    }

    pub fn shutdown(&mut self) {
        for (_, (_, handle)) in self.lanes.drain() {
            handle.abort();
        }
        self.clear_refresh();
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs fetch effects to completion in order, feeding each result back into `app`,
/// until nothing is left in flight. Timers and aborts have no meaning here.
pub async fn settle<A: SearchApi + ?Sized>(
    app: &mut App,
    api: &A,
    effects: Vec<Effect>,
    now: DateTime<Utc>,
) {
    let mut queue: VecDeque<Effect> = effects.into();
    let mut fetched = 0usize;
    while let Some(effect) = queue.pop_front() {
        let Effect::Fetch { ticket, request } = effect else {
            continue;
        };
        if fetched == MAX_SETTLE_FETCHES {
            warn!(limit = MAX_SETTLE_FETCHES, "giving up on remaining requests");
            break;
        }
        fetched += 1;
        let result = api.fetch(&request).await;
        queue.extend(app.complete(ticket, result, now));
    }
}
