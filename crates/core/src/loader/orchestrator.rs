//! The collection load orchestrator.
//!
//! Drives retrying fetches for collections, extended info and play history,
//! folds every completion into the merged view immediately, and notifies
//! subscribers. Remote "not ready" signals are data, not errors: every one of
//! them is retried until the source produces the goods, so the only
//! user-visible failure mode is a load that is still running.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use parking_lot::{Mutex, RwLock};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::collection::merge::{CollectionMap, CollectionMerger};
use crate::gateway::{
    CollectionGateway, CollectionResponse, ExtendedInfoResponse, PlaysResponse,
};
use crate::loader::chunk;
use crate::loader::status::{LoadingKind, LoadingStatus, RetryDiagnostics};
use crate::memo::{fingerprint, MemoSlot};
use crate::models::{
    ExtendedGameRecord, GameId, GamePlus, GameRecord, PlayRecord, PlayStats, UserValidity,
};
use crate::store::KeyValueStore;

/// Version tag gating reuse of persisted cache entries.
pub const STORAGE_VERSION: &str = "2";

const STORAGE_VERSION_KEY: &str = "storageVersion";
const COLLECTIONS_KEY: &str = "collections";
const EXTRA_INFO_KEY: &str = "extrainfo";

const PENDING_DELAY: Duration = Duration::from_millis(1_000);
const BACKOFF_DELAY: Duration = Duration::from_millis(10_000);
const EXTRA_INFO_DELAY: Duration = Duration::from_millis(3_000);

/// Games per extended-info request, matching the source's request-size limit.
const EXTRA_INFO_CHUNK_SIZE: usize = 50;
/// Fan-out width for extended-info chunks before any throttling.
const INITIAL_REQUEST_LIMIT: usize = 5;

#[derive(Default)]
struct StageVersions {
    names: u64,
    collections: u64,
    extra: u64,
    plays: u64,
}

#[derive(Default)]
struct LoaderState {
    collections: HashMap<String, Vec<GameRecord>>,
    extra_info: HashMap<GameId, ExtendedGameRecord>,
    plays: HashMap<String, Vec<PlayRecord>>,
    current_names: Vec<String>,
    loading: Vec<LoadingStatus>,
    versions: StageVersions,
}

/// Memoized derivation stages, each keyed on the versions of exactly the
/// state it reads, so unrelated updates leave it untouched.
struct Derivations {
    shown: MemoSlot<CollectionMap>,
    with_extra: MemoSlot<Vec<GamePlus>>,
    full: MemoSlot<Vec<GamePlus>>,
}

impl Derivations {
    fn new() -> Self {
        Self {
            shown: MemoSlot::new(),
            with_extra: MemoSlot::new(),
            full: MemoSlot::new(),
        }
    }
}

type GamesHandler = Arc<dyn Fn(&[GamePlus]) + Send + Sync>;
type LoadingHandler = Arc<dyn Fn(&[LoadingStatus]) + Send + Sync>;

#[derive(Default)]
struct Subscriptions {
    games: Mutex<Vec<GamesHandler>>,
    loading: Mutex<Vec<LoadingHandler>>,
}

/// Cheaply cloneable handle to the shared orchestration state.
#[derive(Clone)]
pub struct CollectionLoader {
    gateway: Arc<dyn CollectionGateway>,
    merger: CollectionMerger,
    state: Arc<RwLock<LoaderState>>,
    derived: Arc<Derivations>,
    subscriptions: Arc<Subscriptions>,
    store: Option<Arc<dyn KeyValueStore>>,
    request_limit: Arc<AtomicUsize>,
}

impl CollectionLoader {
    /// Create a loader with no client-side cache.
    pub fn new(gateway: Arc<dyn CollectionGateway>, merger: CollectionMerger) -> Self {
        Self::build(gateway, merger, None)
    }

    /// Create a loader that restores from and writes through the given store.
    pub fn with_store(
        gateway: Arc<dyn CollectionGateway>,
        merger: CollectionMerger,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self::build(gateway, merger, Some(store))
    }

    fn build(
        gateway: Arc<dyn CollectionGateway>,
        merger: CollectionMerger,
        store: Option<Arc<dyn KeyValueStore>>,
    ) -> Self {
        let loader = Self {
            gateway,
            merger,
            state: Arc::new(RwLock::new(LoaderState::default())),
            derived: Arc::new(Derivations::new()),
            subscriptions: Arc::new(Subscriptions::default()),
            store,
            request_limit: Arc::new(AtomicUsize::new(INITIAL_REQUEST_LIMIT)),
        };
        loader.restore_from_store();
        loader
    }

    /// Register a callback invoked whenever the merged game view changes.
    pub fn on_games_update(&self, handler: impl Fn(&[GamePlus]) + Send + Sync + 'static) {
        self.subscriptions.games.lock().push(Arc::new(handler));
    }

    /// Register a callback invoked whenever the loading-status list changes.
    pub fn on_loading_update(&self, handler: impl Fn(&[LoadingStatus]) + Send + Sync + 'static) {
        self.subscriptions.loading.lock().push(Arc::new(handler));
    }

    /// Current loading-status entries.
    pub fn loading_info(&self) -> Vec<LoadingStatus> {
        self.state.read().loading.clone()
    }

    /// Check a username against the remote source.
    pub async fn validate_user(&self, username: &str) -> UserValidity {
        self.gateway.fetch_user_validity(username).await
    }

    /// Load the collections of `usernames`, replacing the active username set.
    ///
    /// Fetches fan out per username and every completion becomes visible to
    /// subscribers immediately; the per-user result lists mirror the order of
    /// `usernames`. Superseded retries are not cancelled: a stale fetch may
    /// still land in the collection map, masked from view by the active set.
    pub async fn load_collections(&self, usernames: &[String]) -> Vec<Vec<GameRecord>> {
        {
            let mut state = self.state.write();
            state.current_names = usernames.to_vec();
            state.versions.names += 1;
        }
        self.notify_games();

        let mut handles = Vec::with_capacity(usernames.len());
        for username in usernames {
            let loader = self.clone();
            let username = username.clone();
            handles.push(tokio::spawn(async move {
                let games = loader.load_collection_with_retry(&username).await;
                info!("collection for {username} arrived with {} games", games.len());
                {
                    let mut state = loader.state.write();
                    state.collections.insert(username.clone(), games.clone());
                    state.versions.collections += 1;
                }
                loader.persist_collections();
                loader.notify_games();
                games
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(games) => results.push(games),
                Err(err) => {
                    warn!("collection load task failed: {err}");
                    results.push(Vec::new());
                }
            }
        }
        results
    }

    /// Fetch extended info for every merged game that has none cached yet.
    ///
    /// Unknown games are fetched in chunks of [`EXTRA_INFO_CHUNK_SIZE`];
    /// chunks dispatch in waves as wide as the current request limit, which a
    /// rate-limit signal narrows for future waves (never below one).
    pub async fn load_extended_info(&self) {
        let unknown: Vec<GameRecord> = {
            let merged = self.games();
            let state = self.state.read();
            merged
                .into_iter()
                .map(|game| game.game)
                .filter(|game| !state.extra_info.contains_key(&game.id))
                .collect()
        };

        {
            let mut state = self.state.write();
            let mut entries: Vec<LoadingStatus> = unknown
                .iter()
                .map(|game| LoadingStatus {
                    kind: LoadingKind::Game { game: game.clone() },
                    is_loading: false,
                    retry: None,
                })
                .collect();
            entries.append(&mut state.loading);
            state.loading = entries;
        }
        self.notify_loading();

        let mut queued: VecDeque<Vec<GameRecord>> =
            chunk(&unknown, EXTRA_INFO_CHUNK_SIZE).into();
        while !queued.is_empty() {
            let width = self.request_limit.load(Ordering::Relaxed).max(1);
            let mut handles = Vec::with_capacity(width);
            for _ in 0..width {
                let Some(games) = queued.pop_front() else {
                    break;
                };
                let loader = self.clone();
                handles.push(tokio::spawn(async move {
                    let infos = loader.load_games_with_retry(&games).await;
                    {
                        let mut state = loader.state.write();
                        for (game, info) in games.iter().zip(infos) {
                            state.extra_info.insert(game.id, info);
                        }
                        state.versions.extra += 1;
                    }
                    loader.notify_games();
                }));
            }
            for handle in handles {
                if let Err(err) = handle.await {
                    warn!("extended-info chunk task failed: {err}");
                }
            }
        }

        self.persist_extra_info();
    }

    /// Load play history for every active username.
    ///
    /// Users are fetched concurrently; on completion the per-game aggregates
    /// are recomputed against the merged set for the active usernames only.
    pub async fn load_plays(&self) {
        let names = self.state.read().current_names.clone();
        let mut handles = Vec::with_capacity(names.len());
        for name in names {
            let loader = self.clone();
            handles.push(tokio::spawn(async move {
                loader.replace_plays_status(&name);
                loader.notify_loading();

                let plays = loader.load_plays_with_retry(&name).await;
                info!("play history for {name} arrived with {} entries", plays.len());
                {
                    let mut state = loader.state.write();
                    state.plays.insert(name.clone(), plays);
                    state.versions.plays += 1;
                }
                loader.remove_plays_status(&name);
                loader.notify_loading();
                loader.notify_games();
            }));
        }
        for handle in handles {
            if let Err(err) = handle.await {
                warn!("plays load task failed: {err}");
            }
        }
    }

    /// The merged collection for the active usernames, enriched with whatever
    /// extended info and play aggregates have arrived so far.
    pub fn games(&self) -> Vec<GamePlus> {
        let state = self.state.read();
        self.games_locked(&state)
    }

    fn games_locked(&self, state: &LoaderState) -> Vec<GamePlus> {
        let versions = &state.versions;

        let shown = self.derived.shown.get_or_insert_with(
            fingerprint(&(versions.names, versions.collections)),
            || {
                let mut map = CollectionMap::new();
                for name in &state.current_names {
                    if let Some(games) = state.collections.get(name) {
                        map.insert(name.clone(), games.clone());
                    }
                }
                map
            },
        );

        let with_extra = self.derived.with_extra.get_or_insert_with(
            fingerprint(&(versions.names, versions.collections, versions.extra)),
            || {
                self.merger
                    .merge(&shown)
                    .into_iter()
                    .map(|game| {
                        let extra = state.extra_info.get(&game.id).cloned();
                        GamePlus {
                            game,
                            extra,
                            stats: None,
                        }
                    })
                    .collect()
            },
        );

        self.derived.full.get_or_insert_with(
            fingerprint(&(
                versions.names,
                versions.collections,
                versions.extra,
                versions.plays,
            )),
            || attach_play_stats(&state.current_names, with_extra, &state.plays),
        )
    }

    async fn load_collection_with_retry(&self, username: &str) -> Vec<GameRecord> {
        loop {
            self.upsert_collection_status(username, None);
            self.notify_loading();
            match self.gateway.fetch_collection(username).await {
                CollectionResponse::Ready(games) => {
                    self.remove_collection_status(username);
                    self.notify_loading();
                    return games;
                }
                CollectionResponse::Pending { backoff } => {
                    self.upsert_collection_status(username, Some(RetryDiagnostics { backoff }));
                    self.notify_loading();
                    let delay = if backoff { BACKOFF_DELAY } else { PENDING_DELAY };
                    debug!("collection for {username} not ready, retrying in {delay:?}");
                    sleep(delay).await;
                }
            }
        }
    }

    async fn load_plays_with_retry(&self, username: &str) -> Vec<PlayRecord> {
        loop {
            match self.gateway.fetch_plays(username).await {
                PlaysResponse::Ready(plays) => return plays,
                PlaysResponse::Pending { backoff } => {
                    let delay = if backoff { BACKOFF_DELAY } else { PENDING_DELAY };
                    debug!("plays for {username} not ready, retrying in {delay:?}");
                    sleep(delay).await;
                }
            }
        }
    }

    async fn load_games_with_retry(&self, games: &[GameRecord]) -> Vec<ExtendedGameRecord> {
        let ids: Vec<GameId> = games.iter().map(|game| game.id).collect();
        loop {
            self.mark_games_loading(&ids, None);
            self.notify_loading();
            match self.gateway.fetch_extended_info(&ids).await {
                ExtendedInfoResponse::Ready(infos) => {
                    self.remove_game_status(&ids);
                    self.notify_loading();
                    return infos;
                }
                ExtendedInfoResponse::RetryLater { backoff } => {
                    if backoff {
                        let narrowed = self
                            .request_limit
                            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |limit| {
                                Some(limit.saturating_sub(1).max(1))
                            })
                            .unwrap_or(1);
                        warn!(
                            "extended-info fetch rate limited, narrowing fan-out from {narrowed}"
                        );
                    }
                    self.mark_games_loading(&ids, Some(RetryDiagnostics { backoff }));
                    self.notify_loading();
                    let delay = if backoff { BACKOFF_DELAY } else { EXTRA_INFO_DELAY };
                    debug!("extended info for {} games not ready, retrying in {delay:?}", ids.len());
                    sleep(delay).await;
                }
            }
        }
    }

    fn upsert_collection_status(&self, username: &str, retry: Option<RetryDiagnostics>) {
        let mut state = self.state.write();
        state.loading.retain(|entry| !entry.is_collection_for(username));
        state.loading.push(LoadingStatus {
            kind: LoadingKind::Collection {
                username: username.to_string(),
            },
            is_loading: true,
            retry,
        });
    }

    fn remove_collection_status(&self, username: &str) {
        let mut state = self.state.write();
        state.loading.retain(|entry| !entry.is_collection_for(username));
    }

    fn replace_plays_status(&self, username: &str) {
        let mut state = self.state.write();
        state.loading.retain(|entry| !entry.is_plays_for(username));
        state.loading.push(LoadingStatus {
            kind: LoadingKind::Plays {
                username: username.to_string(),
            },
            is_loading: true,
            retry: None,
        });
    }

    fn remove_plays_status(&self, username: &str) {
        let mut state = self.state.write();
        state.loading.retain(|entry| !entry.is_plays_for(username));
    }

    fn mark_games_loading(&self, ids: &[GameId], retry: Option<RetryDiagnostics>) {
        let mut state = self.state.write();
        for entry in &mut state.loading {
            if ids.iter().any(|id| entry.is_game(*id)) {
                entry.is_loading = true;
                entry.retry = retry;
            }
        }
    }

    fn remove_game_status(&self, ids: &[GameId]) {
        let mut state = self.state.write();
        state
            .loading
            .retain(|entry| !ids.iter().any(|id| entry.is_game(*id)));
    }

    // Handlers run with the subscription lock released, so a callback may
    // itself register further handlers or query the loader.
    fn notify_games(&self) {
        let snapshot = self.games();
        let handlers: Vec<GamesHandler> = self.subscriptions.games.lock().clone();
        for handler in handlers {
            handler(&snapshot);
        }
    }

    fn notify_loading(&self) {
        let snapshot = self.loading_info();
        let handlers: Vec<LoadingHandler> = self.subscriptions.loading.lock().clone();
        for handler in handlers {
            handler(&snapshot);
        }
    }

    fn persist_collections(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let state = self.state.read();
        match serde_json::to_string(&state.collections) {
            Ok(serialized) => store.set(COLLECTIONS_KEY, &serialized),
            Err(err) => warn!("failed to serialize collections cache: {err}"),
        }
    }

    fn persist_extra_info(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let state = self.state.read();
        match serde_json::to_string(&state.extra_info) {
            Ok(serialized) => store.set(EXTRA_INFO_KEY, &serialized),
            Err(err) => warn!("failed to serialize extended-info cache: {err}"),
        }
    }

    fn restore_from_store(&self) {
        let Some(store) = &self.store else {
            return;
        };

        if store.get(STORAGE_VERSION_KEY).as_deref() != Some(STORAGE_VERSION) {
            info!("cache storage version changed, discarding cached entries");
            store.remove(COLLECTIONS_KEY);
            store.remove(EXTRA_INFO_KEY);
            store.set(STORAGE_VERSION_KEY, STORAGE_VERSION);
            return;
        }

        let mut state = self.state.write();
        if let Some(serialized) = store.get(COLLECTIONS_KEY) {
            match serde_json::from_str(&serialized) {
                Ok(collections) => {
                    state.collections = collections;
                    state.versions.collections += 1;
                }
                Err(err) => warn!("discarding unreadable collections cache: {err}"),
            }
        }
        if let Some(serialized) = store.get(EXTRA_INFO_KEY) {
            match serde_json::from_str(&serialized) {
                Ok(extra_info) => {
                    state.extra_info = extra_info;
                    state.versions.extra += 1;
                }
                Err(err) => warn!("discarding unreadable extended-info cache: {err}"),
            }
        }
    }
}

/// Join play records of the active usernames against the merged games.
fn attach_play_stats(
    current_names: &[String],
    games: Vec<GamePlus>,
    plays: &HashMap<String, Vec<PlayRecord>>,
) -> Vec<GamePlus> {
    if plays.is_empty() {
        return games;
    }

    let mut plays_by_game: HashMap<GameId, Vec<PlayRecord>> = HashMap::new();
    for name in current_names {
        let Some(user_plays) = plays.get(name) else {
            continue;
        };
        for play in user_plays {
            let mut play = play.clone();
            play.played_by = Some(name.clone());
            plays_by_game.entry(play.game_id).or_default().push(play);
        }
    }

    games
        .into_iter()
        .map(|mut game| {
            let game_plays = plays_by_game.remove(&game.game.id).unwrap_or_default();
            let last_played: Option<NaiveDate> =
                game_plays.iter().map(|play| play.date).max();
            let time_played_minutes = game_plays
                .iter()
                .map(|play| play.length.unwrap_or(0))
                .sum();
            game.stats = Some(PlayStats {
                plays: game_plays,
                last_played,
                time_played_minutes,
            });
            game
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    use async_trait::async_trait;

    use super::*;
    use crate::gateway::{CollectionResponse, ExtendedInfoResponse, PlaysResponse};
    use crate::store::MemoryStore;

    #[derive(Default)]
    struct ScriptedGateway {
        collections: Mutex<HashMap<String, VecDeque<CollectionResponse>>>,
        extended: Mutex<VecDeque<ExtendedInfoResponse>>,
        plays: Mutex<HashMap<String, VecDeque<PlaysResponse>>>,
        extended_calls: AtomicUsize,
    }

    impl ScriptedGateway {
        fn queue_collection(&self, username: &str, response: CollectionResponse) {
            self.collections
                .lock()
                .entry(username.to_string())
                .or_default()
                .push_back(response);
        }

        fn queue_extended(&self, response: ExtendedInfoResponse) {
            self.extended.lock().push_back(response);
        }

        fn queue_plays(&self, username: &str, response: PlaysResponse) {
            self.plays
                .lock()
                .entry(username.to_string())
                .or_default()
                .push_back(response);
        }
    }

    #[async_trait]
    impl CollectionGateway for ScriptedGateway {
        async fn fetch_collection(&self, username: &str) -> CollectionResponse {
            self.collections
                .lock()
                .get_mut(username)
                .and_then(|queue| queue.pop_front())
                .unwrap_or(CollectionResponse::Ready(Vec::new()))
        }

        async fn fetch_user_validity(&self, _username: &str) -> UserValidity {
            UserValidity::Valid
        }

        async fn fetch_extended_info(&self, ids: &[GameId]) -> ExtendedInfoResponse {
            self.extended_calls.fetch_add(1, Ordering::Relaxed);
            self.extended.lock().pop_front().unwrap_or_else(|| {
                ExtendedInfoResponse::Ready(
                    ids.iter().map(|_| ExtendedGameRecord::default()).collect(),
                )
            })
        }

        async fn fetch_plays(&self, username: &str) -> PlaysResponse {
            self.plays
                .lock()
                .get_mut(username)
                .and_then(|queue| queue.pop_front())
                .unwrap_or(PlaysResponse::Ready(Vec::new()))
        }
    }

    fn game(id: GameId, name: &str, rating: f64) -> GameRecord {
        GameRecord {
            id,
            name: name.to_string(),
            thumbnail_url: String::new(),
            image_url: String::new(),
            year_published: None,
            min_players: None,
            max_players: None,
            min_playtime: None,
            max_playtime: None,
            playing_time: None,
            average_rating: rating,
            families: Vec::new(),
            owners: Vec::new(),
            user_rating: None,
        }
    }

    fn rated(id: GameId, name: &str, user: &str, score: Option<f64>) -> GameRecord {
        let mut record = game(id, name, 0.0);
        let mut ratings = HashMap::new();
        ratings.insert(user.to_string(), score);
        record.user_rating = Some(ratings);
        record
    }

    fn play(play_id: u64, game_id: GameId, date: (i32, u32, u32), length: Option<u32>) -> PlayRecord {
        PlayRecord {
            play_id,
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            quantity: 1,
            length,
            game_id,
            played_by: None,
        }
    }

    fn extended(weight: f64) -> ExtendedGameRecord {
        ExtendedGameRecord {
            weight: Some(weight),
            ..ExtendedGameRecord::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn collection_retry_resolves_after_pending() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.queue_collection("alice", CollectionResponse::Pending { backoff: false });
        gateway.queue_collection("alice", CollectionResponse::Pending { backoff: false });
        gateway.queue_collection(
            "alice",
            CollectionResponse::Ready(vec![game(1, "Agricola", 8.0)]),
        );

        let loader = CollectionLoader::new(gateway, CollectionMerger::new());
        let snapshots = Arc::new(Mutex::new(Vec::new()));
        {
            let snapshots = Arc::clone(&snapshots);
            loader.on_loading_update(move |entries| snapshots.lock().push(entries.to_vec()));
        }

        let results = loader.load_collections(&["alice".to_string()]).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].len(), 1);
        assert_eq!(results[0][0].id, 1);

        // The entry disappears only after the final success.
        assert!(loader.loading_info().is_empty());
        let snapshots = snapshots.lock();
        assert!(snapshots
            .iter()
            .any(|s| s.iter().any(|e| e.is_collection_for("alice") && e.is_loading)));
        assert!(snapshots.iter().any(|s| s
            .iter()
            .any(|e| e.retry == Some(RetryDiagnostics { backoff: false }))));
        assert!(snapshots.last().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn end_to_end_merges_enriches_and_aggregates() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.queue_collection(
            "alice",
            CollectionResponse::Ready(vec![
                rated(1, "Agricola", "alice", Some(8.0)),
                game(2, "Brass", 7.0),
            ]),
        );
        gateway.queue_collection(
            "bob",
            CollectionResponse::Ready(vec![rated(1, "Agricola", "bob", None)]),
        );
        gateway.queue_extended(ExtendedInfoResponse::RetryLater { backoff: true });
        gateway.queue_extended(ExtendedInfoResponse::Ready(vec![
            extended(3.0),
            extended(2.0),
        ]));
        gateway.queue_plays(
            "alice",
            PlaysResponse::Ready(vec![play(100, 1, (2024, 1, 15), Some(60))]),
        );
        gateway.queue_plays(
            "bob",
            PlaysResponse::Ready(vec![play(200, 1, (2024, 3, 1), Some(30))]),
        );

        let loader = CollectionLoader::new(gateway, CollectionMerger::new());
        loader
            .load_collections(&["alice".to_string(), "bob".to_string()])
            .await;
        loader.load_extended_info().await;
        loader.load_plays().await;

        let games = loader.games();
        assert_eq!(games.len(), 2);

        let agricola = games.iter().find(|g| g.game.id == 1).unwrap();
        assert_eq!(agricola.game.owners, vec!["alice", "bob"]);
        let ratings = agricola.game.user_rating.as_ref().unwrap();
        assert_eq!(ratings["alice"], Some(8.0));
        assert_eq!(ratings["bob"], None);
        assert_eq!(agricola.weight(), Some(3.0));

        let stats = agricola.stats.as_ref().unwrap();
        assert_eq!(stats.plays.len(), 2);
        assert_eq!(stats.time_played_minutes, 90);
        assert_eq!(
            stats.last_played,
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        assert!(stats
            .plays
            .iter()
            .any(|p| p.played_by.as_deref() == Some("alice")));

        // The rate-limit signal narrowed the fan-out width for later waves.
        assert_eq!(loader.request_limit.load(Ordering::Relaxed), 4);
        assert!(loader.loading_info().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn extended_info_skips_already_cached_games() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.queue_collection(
            "alice",
            CollectionResponse::Ready(vec![game(1, "Agricola", 8.0)]),
        );

        let loader = CollectionLoader::new(Arc::clone(&gateway) as Arc<dyn CollectionGateway>, CollectionMerger::new());
        loader.load_collections(&["alice".to_string()]).await;
        loader.load_extended_info().await;
        let calls = gateway.extended_calls.load(Ordering::Relaxed);
        assert_eq!(calls, 1);

        // Everything is cached now, so another pass issues no requests.
        loader.load_extended_info().await;
        assert_eq!(gateway.extended_calls.load(Ordering::Relaxed), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn plays_of_inactive_usernames_are_masked() {
        let gateway = Arc::new(ScriptedGateway::default());
        let shared = vec![game(1, "Agricola", 8.0)];
        gateway.queue_collection("alice", CollectionResponse::Ready(shared.clone()));
        gateway.queue_collection("bob", CollectionResponse::Ready(shared.clone()));
        gateway.queue_collection("alice", CollectionResponse::Ready(shared));
        gateway.queue_plays(
            "alice",
            PlaysResponse::Ready(vec![play(100, 1, (2024, 1, 15), Some(60))]),
        );
        gateway.queue_plays(
            "bob",
            PlaysResponse::Ready(vec![play(200, 1, (2024, 3, 1), Some(30))]),
        );

        let loader = CollectionLoader::new(gateway, CollectionMerger::new());
        loader
            .load_collections(&["alice".to_string(), "bob".to_string()])
            .await;
        loader.load_plays().await;

        // Narrow the active set to alice; bob's plays stay in the map but
        // drop out of the aggregates.
        loader.load_collections(&["alice".to_string()]).await;
        let games = loader.games();
        let stats = games[0].stats.as_ref().unwrap();
        assert_eq!(stats.plays.len(), 1);
        assert_eq!(stats.plays[0].played_by.as_deref(), Some("alice"));
        assert_eq!(stats.time_played_minutes, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_storage_version_discards_cache() {
        let store = Arc::new(MemoryStore::new());
        store.set(STORAGE_VERSION_KEY, "1");
        store.set(COLLECTIONS_KEY, "{\"alice\":[]}");
        store.set(EXTRA_INFO_KEY, "{}");

        let gateway = Arc::new(ScriptedGateway::default());
        let _loader = CollectionLoader::with_store(
            gateway,
            CollectionMerger::new(),
            Arc::clone(&store) as Arc<dyn KeyValueStore>,
        );

        assert_eq!(store.get(COLLECTIONS_KEY), None);
        assert_eq!(store.get(EXTRA_INFO_KEY), None);
        assert_eq!(store.get(STORAGE_VERSION_KEY).as_deref(), Some(STORAGE_VERSION));
    }

    #[tokio::test(start_paused = true)]
    async fn cached_collections_are_visible_before_the_fetch_lands() {
        let store = Arc::new(MemoryStore::new());

        // First session persists alice's collection.
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.queue_collection(
            "alice",
            CollectionResponse::Ready(vec![game(1, "Agricola", 8.0)]),
        );
        let loader = CollectionLoader::with_store(
            gateway,
            CollectionMerger::new(),
            Arc::clone(&store) as Arc<dyn KeyValueStore>,
        );
        loader.load_collections(&["alice".to_string()]).await;

        // Second session: the cached game shows up immediately while the
        // fresh fetch is still pending.
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.queue_collection("alice", CollectionResponse::Pending { backoff: false });
        gateway.queue_collection(
            "alice",
            CollectionResponse::Ready(vec![game(2, "Brass", 7.0)]),
        );
        let loader = CollectionLoader::with_store(
            gateway,
            CollectionMerger::new(),
            Arc::clone(&store) as Arc<dyn KeyValueStore>,
        );

        let snapshots = Arc::new(Mutex::new(Vec::new()));
        {
            let snapshots = Arc::clone(&snapshots);
            loader.on_games_update(move |games| snapshots.lock().push(games.to_vec()));
        }

        let results = loader.load_collections(&["alice".to_string()]).await;
        let snapshots = snapshots.lock();
        assert_eq!(snapshots.first().unwrap()[0].game.id, 1);
        assert_eq!(results[0][0].id, 2);
        assert_eq!(snapshots.last().unwrap()[0].game.id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_narrowing_bottoms_out_at_one() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.queue_collection(
            "alice",
            CollectionResponse::Ready(vec![game(1, "Agricola", 8.0)]),
        );
        // More rate-limit signals than the fan-out width can absorb.
        for _ in 0..6 {
            gateway.queue_extended(ExtendedInfoResponse::RetryLater { backoff: true });
        }

        let loader = CollectionLoader::new(
            Arc::clone(&gateway) as Arc<dyn CollectionGateway>,
            CollectionMerger::new(),
        );
        loader.load_collections(&["alice".to_string()]).await;
        loader.load_extended_info().await;

        // 5 -> 4 -> 3 -> 2 -> 1 and no further.
        assert_eq!(loader.request_limit.load(Ordering::Relaxed), 1);
        assert_eq!(gateway.extended_calls.load(Ordering::Relaxed), 7);
        assert!(loader.games()[0].extra.is_some());

        // Dispatch still proceeds at the narrowed width.
        gateway.queue_collection(
            "bob",
            CollectionResponse::Ready(vec![game(2, "Brass", 7.0)]),
        );
        loader
            .load_collections(&["alice".to_string(), "bob".to_string()])
            .await;
        loader.load_extended_info().await;
        assert_eq!(gateway.extended_calls.load(Ordering::Relaxed), 8);
        assert_eq!(loader.request_limit.load(Ordering::Relaxed), 1);
        assert!(loader.games().iter().all(|g| g.extra.is_some()));
    }

    #[tokio::test(start_paused = true)]
    async fn plays_update_leaves_merge_stages_cached() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.queue_collection(
            "alice",
            CollectionResponse::Ready(vec![game(1, "Agricola", 8.0)]),
        );
        gateway.queue_plays(
            "alice",
            PlaysResponse::Ready(vec![play(100, 1, (2024, 1, 15), Some(60))]),
        );

        let loader = CollectionLoader::new(gateway, CollectionMerger::new());
        loader.load_collections(&["alice".to_string()]).await;
        loader.games();

        let shown_before = loader.derived.shown.computes();
        let with_extra_before = loader.derived.with_extra.computes();
        let full_before = loader.derived.full.computes();

        loader.load_plays().await;
        let games = loader.games();
        assert_eq!(games[0].play_count(), 1);

        // Only the play-aggregation stage reruns; the merge stages keep
        // their cached results.
        assert_eq!(loader.derived.shown.computes(), shown_before);
        assert_eq!(loader.derived.with_extra.computes(), with_extra_before);
        assert!(loader.derived.full.computes() > full_before);
    }

    #[tokio::test(start_paused = true)]
    async fn callbacks_may_register_further_handlers() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.queue_collection(
            "alice",
            CollectionResponse::Ready(vec![game(1, "Agricola", 8.0)]),
        );

        let loader = CollectionLoader::new(gateway, CollectionMerger::new());
        let late_hits = Arc::new(AtomicUsize::new(0));
        {
            let registrar = loader.clone();
            let late_hits = Arc::clone(&late_hits);
            let registered = AtomicBool::new(false);
            loader.on_games_update(move |_| {
                if !registered.swap(true, Ordering::Relaxed) {
                    let late_hits = Arc::clone(&late_hits);
                    registrar.on_games_update(move |_| {
                        late_hits.fetch_add(1, Ordering::Relaxed);
                    });
                }
            });
        }

        loader.load_collections(&["alice".to_string()]).await;
        // Registering from inside a callback neither deadlocks nor loses
        // the new handler: it sees the next update.
        assert!(late_hits.load(Ordering::Relaxed) >= 1);
    }
}
