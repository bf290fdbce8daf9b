mod analytics;
mod availability;
mod bookings;
mod catalog;
mod conflict;
mod error;
mod queries;
mod reviews;
mod search;
mod store;
mod validate;
#[cfg(test)]
pub(crate) mod tests;

pub use analytics::{BookingStats, MonthlyTrend, ReviewStats, StatsFilter};
pub use bookings::BookingRequest;
pub use catalog::NewUser;
pub use availability::{free_windows, is_available, merge_overlapping, subtract_intervals};
pub use error::EngineError;
pub use queries::{PropertyView, Quote, UserView};
pub use reviews::NewReview;
pub use search::{SearchFilter, SearchHit, SearchPage, SortKey};
pub use store::{MarketStore, SharedPropertyState};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedRwLockWriteGuard, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::ratings::{Ratings, ReviewChanged};
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
    tracing::debug!("WAL writer stopped: {}", wal.path().display());
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush of {} events failed: {e}", batch.len());
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so buffered bytes never leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// One marketplace: listings, bookings, users and reviews, durable through its WAL.
pub struct Engine {
    pub(super) store: MarketStore,
    pub(super) ratings: Ratings,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Serialises user registration/updates and new listings (email and id uniqueness).
    pub(super) catalog: Mutex<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: MarketStore::new(),
            ratings: Ratings::new(),
            wal_tx,
            notify,
            catalog: Mutex::new(()),
        };

        // Sole owner of every Arc here, so try_write never contends. Never use
        // blocking_write: lazy tenant creation runs inside the runtime.
        for event in &events {
            engine.store.apply_catalog_event(event);
            if let Some(pid) = event.property_id()
                && let Some(ps) = engine.store.get_property(&pid)
            {
                let mut guard = ps
                    .try_write()
                    .map_err(|_| io::Error::other("replay: property lock contended"))?;
                engine.store.apply_property_event(&mut guard, event);
            }
        }
        for target in engine.store.rating_targets() {
            let change = ReviewChanged { target };
            engine
                .ratings
                .recalculate(&change, || engine.store.reviews_of(&target));
        }

        if !events.is_empty() {
            tracing::info!(
                "replayed {} events from {}: {} users, {} properties",
                events.len(),
                wal_path.display(),
                engine.store.user_count(),
                engine.store.property_count(),
            );
        }
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_property_state(&self, id: &Ulid) -> Option<SharedPropertyState> {
        self.store.get_property(id)
    }

    /// Resolve a property and take its write lock.
    pub(super) async fn property_write(
        &self,
        property_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<PropertyState>, EngineError> {
        let ps = self
            .store
            .get_property(&property_id)
            .ok_or(EngineError::NotFound("property", property_id))?;
        Ok(ps.write_owned().await)
    }

    /// Lookup booking/review → property, acquire the property's write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        kind: &'static str,
        entity_id: Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<PropertyState>), EngineError> {
        let property_id = self
            .store
            .property_for_entity(&entity_id)
            .ok_or(EngineError::NotFound(kind, entity_id))?;
        let guard = self.property_write(property_id).await?;
        Ok((property_id, guard))
    }

    /// WAL-append, apply under the held lock, refresh ratings, notify listeners.
    pub(super) async fn persist_and_apply(
        &self,
        ps: &mut PropertyState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        if let Some(change) = self.store.apply_property_event(ps, event) {
            self.on_review_changed(&change);
        }
        self.notify.send(ps.id(), event);
        Ok(())
    }

    /// Catalogue counterpart of `persist_and_apply`; caller holds `catalog`.
    pub(super) async fn persist_catalog(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_catalog_event(event);
        if let Some(pid) = event.property_id() {
            self.notify.send(pid, event);
        }
        Ok(())
    }

    fn on_review_changed(&self, change: &ReviewChanged) {
        self.ratings
            .recalculate(change, || self.store.reviews_of(&change.target));
    }

    /// Compact the WAL down to the events that recreate the current state.
    ///
    /// Holds the catalogue mutex and every property read lock until the
    /// rewritten log is in place, so no write can slip between snapshot and swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;
        let mut guards = Vec::new();
        for ps in self.store.property_states() {
            guards.push(ps.read_owned().await);
        }
        guards.sort_by_key(|g| g.id());

        let mut events = Vec::new();
        let mut users = self.store.users();
        users.sort_by_key(|u| u.id);
        events.extend(users.into_iter().map(|user| Event::UserRegistered { user }));
        for guard in &guards {
            events.push(Event::PropertyListed {
                property: guard.listing.clone(),
            });
            events.extend(
                guard
                    .bookings
                    .iter()
                    .map(|b| Event::BookingCreated { booking: b.clone() }),
            );
        }
        let mut reviews = self.store.reviews();
        reviews.sort_by_key(|r| r.id);
        events.extend(reviews.into_iter().map(|review| Event::ReviewPosted { review }));

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        drop(guards);
        tracing::info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
