//! Sync engine orchestrator.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;

use super::{Backoff, PassOutcome, StatusCallback, SyncConfig, SyncState, SyncStatus};
use crate::channel::{SubscriptionId, WakeChannel, WakeKind, WakeMessage};
use crate::clock::{self, Lt, LogicalClock, now_ms};
use crate::credentials::SyncCredentials;
use crate::envelope::{self, E2eeParams, Keyring};
use crate::error::{Result, SyncError};
use crate::leader::LeaderElection;
use crate::merge;
use crate::outbox::{OpMethod, Outbox, PendingOp};
use crate::pairing::{self, PairingInfo};
use crate::records::RecordKind;
use crate::remote::{DEFAULT_ENDPOINT, PutResult, RemoteStore};
use crate::store::{self, RecordStore};

/// Produces a protocol client bound to the given credentials.
///
/// Injected so hosts (and tests) choose the transport; the engine only ever
/// talks through the [`RemoteStore`] trait. For provisioning the factory is
/// called with placeholder credentials carrying just the endpoint.
pub type RemoteFactory = Arc<dyn Fn(&SyncCredentials) -> Arc<dyn RemoteStore> + Send + Sync>;

/// The sync engine.
///
/// One engine exists per instance (tab, window, process). All instances
/// share the record store; leader election decides which of them actually
/// talks to the network. Cheap to clone - clones share state.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    store: Arc<dyn RecordStore>,
    channel: Arc<dyn WakeChannel>,
    leader: Arc<LeaderElection>,
    outbox: Outbox,
    remote_factory: RemoteFactory,
    config: SyncConfig,

    clock: Mutex<LogicalClock>,
    clock_seeded: AtomicBool,
    keyring: Mutex<Option<Arc<Keyring>>>,

    online: AtomicBool,
    busy: AtomicBool,
    rerun: AtomicBool,
    provision_attempted: AtomicBool,
    unavailable: AtomicBool,

    backoff: Mutex<Backoff>,
    status: Mutex<SyncStatus>,
    on_status: Mutex<Option<StatusCallback>>,

    trigger_gen: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl SyncEngine {
    /// Create an engine over the shared store and wake channel.
    ///
    /// `actor` is this device's stable actor id (see
    /// [`crate::credentials::ensure_device_id`]); it appears in every
    /// logical timestamp the engine issues.
    pub fn new(
        store: Arc<dyn RecordStore>,
        channel: Arc<dyn WakeChannel>,
        remote_factory: RemoteFactory,
        config: SyncConfig,
        actor: impl Into<String>,
    ) -> Self {
        let leader = Arc::new(LeaderElection::new(
            Arc::clone(&store),
            Arc::clone(&channel),
            config.leader.clone(),
        ));
        let outbox = Outbox::new(Arc::clone(&store));
        Self {
            inner: Arc::new(EngineInner {
                store,
                channel,
                leader,
                outbox,
                remote_factory,
                config,
                clock: Mutex::new(LogicalClock::new(actor)),
                clock_seeded: AtomicBool::new(false),
                keyring: Mutex::new(None),
                online: AtomicBool::new(true),
                busy: AtomicBool::new(false),
                rerun: AtomicBool::new(false),
                provision_attempted: AtomicBool::new(false),
                unavailable: AtomicBool::new(false),
                backoff: Mutex::new(Backoff::default()),
                status: Mutex::new(SyncStatus::default()),
                on_status: Mutex::new(None),
                trigger_gen: AtomicU64::new(0),
                tasks: Mutex::new(Vec::new()),
                subscription: Mutex::new(None),
            }),
        }
    }

    /// This instance's leader election handle.
    pub fn leader(&self) -> &Arc<LeaderElection> {
        &self.inner.leader
    }

    /// Handle over the pending-write queue.
    pub fn outbox(&self) -> Outbox {
        self.inner.outbox.clone()
    }

    /// Current status snapshot.
    pub fn status(&self) -> SyncStatus {
        self.inner.status.lock().unwrap().clone()
    }

    /// Register the status callback. Replaces any previous one.
    pub fn on_status(&self, callback: StatusCallback) {
        *self.inner.on_status.lock().unwrap() = Some(callback);
    }

    /// Start background operation: leader election, wake subscriptions, and
    /// trigger-driven passes. Must be called from within a tokio runtime.
    pub fn start(&self) {
        let inner = &self.inner;

        // Leadership just acquired: run a pass if configured to.
        let weak = Arc::downgrade(inner);
        inner.leader.on_change(Arc::new(move |is_leader, _| {
            if !is_leader {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                if inner.config.sync_on_start {
                    EngineInner::schedule(&inner, Duration::ZERO);
                }
            }
        }));
        inner.leader.start();

        // Outbox hints from other instances, while we are leader.
        let weak = Arc::downgrade(inner);
        let subscription = inner
            .channel
            .subscribe(Arc::new(move |message: &WakeMessage| {
                if message.kind != WakeKind::Outbox {
                    return;
                }
                if let Some(inner) = weak.upgrade() {
                    if inner.leader.is_leader() {
                        EngineInner::schedule(&inner, Duration::from_millis(250));
                    }
                }
            }));
        *inner.subscription.lock().unwrap() = Some(subscription);

        // Seed the clock and the pending count in the background.
        let bootstrap = Arc::clone(inner);
        let handle = tokio::spawn(async move {
            if let Err(e) = bootstrap.seed_clock().await {
                log::warn!("clock seeding failed: {}", e);
            }
            bootstrap.refresh_pending().await;
        });
        inner.tasks.lock().unwrap().push(handle);
    }

    /// Tear down timers and subscriptions.
    ///
    /// There is no mid-pass abort: an in-flight pass finishes or fails
    /// naturally. The leader lock is not released; it expires on its own.
    pub fn stop(&self) {
        self.inner.leader.stop();
        if let Some(id) = self.inner.subscription.lock().unwrap().take() {
            self.inner.channel.unsubscribe(id);
        }
        for task in self.inner.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    /// Record a local edit: stamp it with a fresh logical timestamp, write
    /// it through to the store, and queue it for push.
    ///
    /// Returns the queued operation. Triggers a debounced pass.
    pub async fn enqueue_put(&self, key: &str, payload: Value) -> Result<PendingOp> {
        self.inner.enqueue(key, payload, OpMethod::Put).await
    }

    /// Record a local deletion. The tombstone payload travels through the
    /// same conditional put as any other write.
    pub async fn enqueue_delete(&self, key: &str, tombstone: Value) -> Result<PendingOp> {
        self.inner.enqueue(key, tombstone, OpMethod::Delete).await
    }

    /// Run one sync pass now (pull, then drain the outbox).
    ///
    /// If a pass is already running the trigger is coalesced into exactly
    /// one deferred re-run and this call returns with `ran == false`.
    pub async fn sync_now(&self) -> Result<PassOutcome> {
        EngineInner::sync_now(&self.inner).await
    }

    /// Report a connectivity transition. Going back online triggers a pass.
    pub fn set_online(&self, online: bool) {
        let was = self.inner.online.swap(online, Ordering::SeqCst);
        if online && !was {
            self.inner.publish_status(|s| {
                if s.state == SyncState::Offline {
                    s.state = SyncState::Idle;
                }
            });
            EngineInner::schedule(&self.inner, Duration::ZERO);
        } else if !online {
            self.inner.publish_status(|s| s.state = SyncState::Offline);
        }
    }

    /// Hold the space passphrase in memory for this session.
    ///
    /// Required before encrypted records can be read or written. Never
    /// persisted.
    pub fn set_passphrase(&self, passphrase: &str) {
        *self.inner.keyring.lock().unwrap() = Some(Arc::new(Keyring::new(passphrase)));
    }

    /// Drop the session passphrase.
    pub fn clear_passphrase(&self) {
        *self.inner.keyring.lock().unwrap() = None;
    }

    /// Turn on end-to-end encryption for the connected space.
    ///
    /// Generates per-space parameters (salt, iteration count) and holds the
    /// passphrase for the session. Already-enabled spaces keep their
    /// existing parameters.
    pub async fn enable_encryption(&self, passphrase: &str, iterations: u32) -> Result<()> {
        let store = self.inner.store.as_ref();
        let mut credentials = SyncCredentials::load(store)
            .await?
            .ok_or(SyncError::MissingCredentials)?;
        if credentials.e2ee.is_none() {
            credentials.e2ee = Some(E2eeParams::generate(iterations));
            credentials.save(store).await?;
        }
        self.set_passphrase(passphrase);
        Ok(())
    }

    /// A shareable link for connecting another device to this space.
    pub async fn pairing_link(&self) -> Result<String> {
        let credentials = SyncCredentials::load(self.inner.store.as_ref())
            .await?
            .ok_or(SyncError::MissingCredentials)?;
        pairing::encode_pairing_link(&PairingInfo::from(&credentials))
    }

    /// Join the space described by a pairing link.
    pub async fn connect_with_link(&self, link: &str) -> Result<()> {
        let info = pairing::parse_pairing_link(link)?;
        info.into_credentials().save(self.inner.store.as_ref()).await?;
        self.inner.unavailable.store(false, Ordering::SeqCst);
        EngineInner::schedule(&self.inner, Duration::ZERO);
        Ok(())
    }

    /// Disconnect from the space: forget credentials and the passphrase.
    ///
    /// Local records are left untouched.
    pub async fn disconnect(&self) -> Result<()> {
        SyncCredentials::clear(self.inner.store.as_ref()).await?;
        self.clear_passphrase();
        self.inner.publish_status(|s| *s = SyncStatus::default());
        Ok(())
    }
}

impl EngineInner {
    // ==================== triggers & scheduling ====================

    /// Schedule a pass after `delay`. A newer trigger supersedes an older
    /// pending one, which is what debounces bursts of local edits.
    fn schedule(self: &Arc<Self>, delay: Duration) {
        let generation = self.trigger_gen.fetch_add(1, Ordering::SeqCst) + 1;
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::debug!("sync trigger outside a runtime; waiting for an explicit pass");
            return;
        };

        let inner = Arc::clone(self);
        let task = handle.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if inner.trigger_gen.load(Ordering::SeqCst) != generation {
                return; // superseded by a later trigger
            }
            if let Err(e) = EngineInner::sync_now(&inner).await {
                log::debug!("scheduled sync pass failed: {}", e);
            }
        });

        let mut tasks = self.tasks.lock().unwrap();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    async fn enqueue(
        self: &Arc<Self>,
        key: &str,
        mut payload: Value,
        method: OpMethod,
    ) -> Result<PendingOp> {
        self.seed_clock().await?;

        let lt = self.tick_clock();
        stamp_value(RecordKind::for_key(key), &mut payload, &lt);
        self.store.set_record(key, &payload).await?;

        // Remember the version this edit was based on, and persist the new
        // clock position.
        let mut based_on = None;
        if let Some(mut credentials) = SyncCredentials::load(self.store.as_ref()).await? {
            based_on = credentials.meta(key).and_then(|m| m.etag.clone());
            credentials.last_lt = Some(lt.to_string());
            credentials.save(self.store.as_ref()).await?;
        }

        let actor = self.clock.lock().unwrap().actor().to_string();
        let op = match method {
            OpMethod::Put => PendingOp::put(key, payload),
            OpMethod::Delete => PendingOp::delete(key, payload),
        }
        .stamped(lt.to_string(), actor)
        .based_on(based_on);

        self.outbox.enqueue(op.clone()).await?;
        self.refresh_pending().await;
        self.channel.publish(&WakeMessage::new(WakeKind::Outbox));
        self.schedule(self.config.debounce);
        Ok(op)
    }

    // ==================== the pass ====================

    async fn sync_now(self: &Arc<Self>) -> Result<PassOutcome> {
        if self.busy.swap(true, Ordering::SeqCst) {
            // Coalesce into exactly one deferred re-run, never a second
            // concurrent pass.
            self.rerun.store(true, Ordering::SeqCst);
            return Ok(PassOutcome::skipped());
        }

        let mut result = self.run_pass().await;
        while self.rerun.swap(false, Ordering::SeqCst) {
            result = self.run_pass().await;
        }
        self.busy.store(false, Ordering::SeqCst);

        self.refresh_pending().await;
        match &result {
            Ok(outcome) => {
                if outcome.ran {
                    self.backoff.lock().unwrap().reset();
                    self.publish_status(|s| {
                        s.state = SyncState::Idle;
                        s.last_sync = Some(chrono::Utc::now());
                        s.last_error = None;
                    });
                }
            }
            Err(e) => {
                let message = e.to_string();
                self.publish_status(|s| {
                    s.state = SyncState::Error;
                    s.last_error = Some(message.clone());
                });
                if e.is_transient() {
                    let delay = self.backoff.lock().unwrap().next_delay();
                    log::info!("sync pass failed ({}); retrying in {:?}", e, delay);
                    self.schedule(delay);
                } else {
                    // Cryptographic and terminal failures are never retried
                    // automatically.
                    log::warn!("sync pass failed without retry: {}", e);
                }
            }
        }
        result
    }

    async fn run_pass(self: &Arc<Self>) -> Result<PassOutcome> {
        if !self.config.enabled || self.unavailable.load(Ordering::SeqCst) {
            return Ok(PassOutcome::skipped());
        }
        if !self.online.load(Ordering::SeqCst) {
            self.publish_status(|s| s.state = SyncState::Offline);
            return Ok(PassOutcome::skipped());
        }
        if !self.leader.is_leader() {
            return Ok(PassOutcome::skipped());
        }

        let mut credentials = match SyncCredentials::load(self.store.as_ref()).await? {
            Some(credentials) => credentials,
            None => match self.provision().await? {
                Some(credentials) => credentials,
                None => return Ok(PassOutcome::skipped()),
            },
        };
        self.seed_clock().await?;

        let remote = (self.remote_factory)(&credentials);
        self.publish_status(|s| s.state = SyncState::Syncing);

        let result = self.pass_inner(remote.as_ref(), &mut credentials).await;

        // Version knowledge learned before a failure is still knowledge.
        if let Err(e) = credentials.save(self.store.as_ref()).await {
            log::warn!("failed to persist sync credentials: {}", e);
            if result.is_ok() {
                return Err(e);
            }
        }
        result
    }

    async fn pass_inner(
        &self,
        remote: &dyn RemoteStore,
        credentials: &mut SyncCredentials,
    ) -> Result<PassOutcome> {
        let mut outcome = PassOutcome {
            ran: true,
            ..Default::default()
        };

        // Pull: fetch every record whose remote clock is ahead of what we
        // have seen, merging it with local content. A record that fails to
        // decrypt is left untouched (fail closed) without wedging the rest
        // of the pass; the first such failure is reported at the end.
        let mut crypto_failure: Option<SyncError> = None;
        let index = remote.get_index().await?;
        for entry in &index {
            let known = credentials.meta(&entry.key).and_then(|m| m.lt.clone());
            if !clock::is_newer(&entry.lt, known.as_deref()) {
                continue;
            }
            let Some(item) = remote.get_item(&entry.key).await? else {
                continue;
            };
            let (_, remote_value) =
                match self.open_payload(credentials, &entry.key, &item.payload) {
                    Ok(opened) => opened,
                    Err(e @ (SyncError::Crypto(_) | SyncError::PassphraseRequired)) => {
                        log::warn!("cannot decrypt {}; record skipped", entry.key);
                        crypto_failure.get_or_insert(e);
                        continue;
                    }
                    Err(e) => return Err(e),
                };

            self.apply_pulled(credentials, &entry.key, remote_value, item.etag.clone())
                .await?;
            credentials.update_meta(&entry.key, item.etag, Some(entry.lt.clone()));
            outcome.pulled += 1;
        }

        // Push: drain the outbox strictly in queue order.
        for op in self.outbox.list().await? {
            let precondition = op
                .etag
                .clone()
                .or_else(|| credentials.meta(&op.key).and_then(|m| m.etag.clone()));
            let wire = self.seal_payload(credentials, &op.key, op.lt.as_deref(), &op.payload)?;

            match remote
                .put_item(&op.key, &wire, precondition.as_deref(), &op.id)
                .await
            {
                Ok(PutResult::Stored { etag }) => {
                    credentials.update_meta(&op.key, etag, op.lt.clone());
                    self.outbox.remove(&op.id).await?;
                    outcome.pushed += 1;
                }
                Ok(PutResult::Conflict) => {
                    self.resolve_push_conflict(remote, credentials, &op).await?;
                    self.outbox.remove(&op.id).await?;
                    self.note_conflict();
                    outcome.merged += 1;
                }
                Err(e) => {
                    // Leave this and everything behind it queued; the pass
                    // fails and backoff takes over.
                    let message = e.to_string();
                    self.outbox
                        .update(&op.id, |op| {
                            op.attempts += 1;
                            op.last_error = Some(message.clone());
                        })
                        .await?;
                    return Err(e);
                }
            }
        }

        if let Some(e) = crypto_failure {
            return Err(e);
        }
        Ok(outcome)
    }

    /// Fold a freshly pulled remote record into local state.
    ///
    /// A key without local content just takes the remote value. A key with
    /// local content is merged through the record resolvers; if the merge
    /// carries anything the remote lacks, a write-back operation is queued
    /// (coalescing with any pending edit) so the union propagates upward.
    async fn apply_pulled(
        &self,
        credentials: &mut SyncCredentials,
        key: &str,
        remote_value: Value,
        etag: Option<String>,
    ) -> Result<()> {
        let Some(local_value) = self.store.get_record(key).await? else {
            self.store.set_record(key, &remote_value).await?;
            return Ok(());
        };

        let kind = RecordKind::for_key(key);
        let mut merged = merge::resolve_record(kind, &local_value, &remote_value);
        let pending = self.outbox.get(key).await?;
        let had_pending = pending.is_some();

        if merged == remote_value {
            // Remote subsumes local; any pending edit has nothing left to
            // say.
            if let Some(pending) = pending {
                log::debug!("pending write for {} subsumed by remote", key);
                self.outbox.remove(&pending.id).await?;
            }
            if merged != local_value {
                store::save_snapshot(self.store.as_ref(), "presync", key, &local_value).await?;
                self.store.set_record(key, &merged).await?;
            }
            return Ok(());
        }

        // Local content the remote lacks: stamp the union and queue it.
        let lt = self.tick_clock();
        credentials.last_lt = Some(lt.to_string());
        stamp_value(kind, &mut merged, &lt);

        if merged != local_value {
            store::save_snapshot(self.store.as_ref(), "presync", key, &local_value).await?;
        }
        self.store.set_record(key, &merged).await?;

        let actor = self.clock.lock().unwrap().actor().to_string();
        let op = match pending {
            Some(mut pending) => {
                pending.payload = merged;
                pending.etag = etag;
                pending.lt = Some(lt.to_string());
                pending
            }
            None => PendingOp::put(key, merged)
                .stamped(lt.to_string(), actor)
                .based_on(etag),
        };
        self.outbox.enqueue(op).await?;

        if had_pending {
            // Two sides really edited concurrently.
            self.note_conflict();
        }
        Ok(())
    }

    /// Handle a push precondition conflict (the remote moved since we last
    /// looked): fetch the current remote version, merge, and write back
    /// under the just-fetched etag.
    async fn resolve_push_conflict(
        &self,
        remote: &dyn RemoteStore,
        credentials: &mut SyncCredentials,
        op: &PendingOp,
    ) -> Result<()> {
        let Some(item) = remote.get_item(&op.key).await? else {
            // The record vanished remotely; rewrite it unconditionally.
            let wire = self.seal_payload(credentials, &op.key, op.lt.as_deref(), &op.payload)?;
            return match remote.put_item(&op.key, &wire, None, &op.id).await? {
                PutResult::Stored { etag } => {
                    credentials.update_meta(&op.key, etag, op.lt.clone());
                    Ok(())
                }
                PutResult::Conflict => Err(SyncError::Http {
                    status: 412,
                    message: "conflict retry rejected".into(),
                }),
            };
        };

        let (_, remote_value) = self.open_payload(credentials, &op.key, &item.payload)?;
        let local_value = self
            .store
            .get_record(&op.key)
            .await?
            .unwrap_or_else(|| op.payload.clone());

        let kind = RecordKind::for_key(&op.key);
        let mut merged = merge::resolve_record(kind, &local_value, &remote_value);
        let lt = self.tick_clock();
        credentials.last_lt = Some(lt.to_string());
        stamp_value(kind, &mut merged, &lt);

        let wire = self.seal_payload(credentials, &op.key, Some(&lt.to_string()), &merged)?;
        let retry_key = uuid::Uuid::new_v4().to_string();
        match remote
            .put_item(&op.key, &wire, item.etag.as_deref(), &retry_key)
            .await?
        {
            PutResult::Stored { etag } => {
                store::save_snapshot(self.store.as_ref(), "conflict", &op.key, &local_value)
                    .await?;
                self.store.set_record(&op.key, &merged).await?;
                credentials.update_meta(&op.key, etag, Some(lt.to_string()));
                log::info!("resolved sync conflict on {}", op.key);
                Ok(())
            }
            // Lost the race again; treat as transient and let backoff retry.
            PutResult::Conflict => Err(SyncError::Http {
                status: 412,
                message: "conflict write-back lost a second race".into(),
            }),
        }
    }

    // ==================== provisioning ====================

    /// One provisioning attempt per session. A rejection from the default
    /// endpoint means the sync service is confirmed unavailable: all further
    /// passes short-circuit silently instead of nagging the user.
    async fn provision(&self) -> Result<Option<SyncCredentials>> {
        if self.provision_attempted.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }

        let placeholder = SyncCredentials::new("", "", &self.config.endpoint);
        let remote = (self.remote_factory)(&placeholder);
        match remote.create_space().await {
            Ok(identity) => {
                let credentials = SyncCredentials::new(
                    identity.space_id,
                    identity.auth_token,
                    &self.config.endpoint,
                );
                credentials.save(self.store.as_ref()).await?;
                log::info!("provisioned sync space {}", credentials.space_id);
                Ok(Some(credentials))
            }
            Err(e) if self.config.endpoint == DEFAULT_ENDPOINT => {
                log::info!("sync service unavailable, disabling for this session: {}", e);
                self.unavailable.store(true, Ordering::SeqCst);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    // ==================== payload sealing ====================

    /// Build the wire wrapper `{lt, data}`, encrypting `data` when the
    /// space calls for it. The logical timestamp stays cleartext so the
    /// server can serve the index without reading payloads.
    fn seal_payload(
        &self,
        credentials: &SyncCredentials,
        key: &str,
        lt: Option<&str>,
        value: &Value,
    ) -> Result<Value> {
        let data = match &credentials.e2ee {
            Some(params) if params.enabled => {
                let keyring = self
                    .keyring
                    .lock()
                    .unwrap()
                    .clone()
                    .ok_or(SyncError::PassphraseRequired)?;
                envelope::encrypt_record(&keyring, params, &credentials.space_id, key, value)?
            }
            _ => value.clone(),
        };
        Ok(serde_json::json!({
            "lt": lt.unwrap_or_default(),
            "data": data,
        }))
    }

    /// Unwrap (and if needed decrypt) a fetched wire payload.
    fn open_payload(
        &self,
        credentials: &SyncCredentials,
        key: &str,
        wire: &Value,
    ) -> Result<(Option<String>, Value)> {
        let lt = wire.get("lt").and_then(|v| v.as_str()).map(String::from);
        let data = wire.get("data").cloned().unwrap_or_else(|| wire.clone());

        let value = if envelope::is_envelope(&data) {
            let keyring = self
                .keyring
                .lock()
                .unwrap()
                .clone()
                .ok_or(SyncError::PassphraseRequired)?;
            envelope::decrypt_record(&keyring, &credentials.space_id, key, &data)?
        } else {
            data
        };
        Ok((lt, value))
    }

    // ==================== clock & status ====================

    /// Seed the clock from the persisted last-issued timestamp, once.
    async fn seed_clock(&self) -> Result<()> {
        if self.clock_seeded.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let credentials = SyncCredentials::load(self.store.as_ref()).await?;
        if let Some(last_lt) = credentials.and_then(|c| c.last_lt) {
            let mut clock = self.clock.lock().unwrap();
            let actor = clock.actor().to_string();
            *clock = LogicalClock::seeded(actor, Some(&last_lt));
        }
        Ok(())
    }

    fn tick_clock(&self) -> Lt {
        self.clock.lock().unwrap().tick(now_ms())
    }

    fn publish_status(&self, mutate: impl FnOnce(&mut SyncStatus)) {
        let snapshot = {
            let mut status = self.status.lock().unwrap();
            mutate(&mut status);
            status.clone()
        };
        let callback = self.on_status.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(&snapshot);
        }
    }

    async fn refresh_pending(&self) {
        match self.outbox.len().await {
            Ok(pending) => self.publish_status(|s| s.pending = pending),
            Err(e) => log::debug!("could not refresh pending count: {}", e),
        }
    }

    fn note_conflict(&self) {
        self.publish_status(|s| {
            s.conflicts += 1;
            s.last_conflict = Some(chrono::Utc::now());
        });
    }
}

/// Stamp a record payload with the logical timestamp of its latest edit.
/// Only day records embed the stamp; everything else carries it solely in
/// the wire wrapper and the outbox operation.
fn stamp_value(kind: RecordKind, value: &mut Value, lt: &Lt) {
    if kind == RecordKind::Day {
        if let Value::Object(object) = value {
            object.insert("updated_at".to_string(), Value::String(lt.to_string()));
        }
    }
}
