//! Side-effect queue: role rewards and announcements.
//!
//! Effects are produced after the ledger write has committed and run off the
//! critical path. The queue is bounded; an effect that does not fit is dropped
//! and counted. Each effect runs in isolation: a failure is logged at `warn`,
//! counted, and never touches ledger state.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tracing::{debug, info_span, warn, Instrument};

use xpz_core::config::RewardConfig;
use xpz_core::metrics::{spans, XpzCounters};
use xpz_core::rewards;
use xpz_core::types::{ChannelId, CommunityId, MemberId};

use crate::ports::{Notification, NotificationSink, PortError, RoleGateway};

/// One deferred side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Bring the member's threshold roles in line with `level`.
    ApplyRewards {
        /// Community of the member.
        community: CommunityId,
        /// The member.
        member: MemberId,
        /// Level just reached.
        level: u32,
    },
    /// Post an announcement.
    Notify {
        /// Community to post in.
        community: CommunityId,
        /// Channel to post in.
        channel: ChannelId,
        /// What to post.
        notification: Notification,
    },
}

impl Effect {
    fn kind(&self) -> &'static str {
        match self {
            Self::ApplyRewards { .. } => "apply_rewards",
            Self::Notify { .. } => "notify",
        }
    }
}

/// Statistics about the effect queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Current queue depth.
    pub depth: usize,
    /// Total effects accepted.
    pub total_enqueued: u64,
    /// Total effects dropped (queue full).
    pub total_dropped: u64,
}

struct EffectQueueInner {
    items: VecDeque<Effect>,
    max_queue_size: usize,
    total_enqueued: u64,
    total_dropped: u64,
}

/// Bounded FIFO of pending effects, shared between producers and the worker.
#[derive(Clone)]
pub struct EffectQueue {
    inner: Arc<Mutex<EffectQueueInner>>,
    ready: Arc<Notify>,
}

impl std::fmt::Debug for EffectQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectQueue").field("stats", &self.stats()).finish()
    }
}

impl EffectQueue {
    /// Create a queue holding at most `max_queue_size` pending effects.
    #[must_use]
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EffectQueueInner {
                items: VecDeque::new(),
                max_queue_size,
                total_enqueued: 0,
                total_dropped: 0,
            })),
            ready: Arc::new(Notify::new()),
        }
    }

    /// Append an effect. Returns `false` if the queue was full.
    pub fn enqueue(&self, effect: Effect) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.items.len() >= inner.max_queue_size {
                inner.total_dropped += 1;
                return false;
            }
            inner.total_enqueued += 1;
            inner.items.push_back(effect);
        }
        self.ready.notify_one();
        true
    }

    /// Take the oldest pending effect.
    pub fn dequeue(&self) -> Option<Effect> {
        self.inner.lock().items.pop_front()
    }

    /// Current queue depth.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Get queue statistics.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        QueueStats {
            depth: inner.items.len(),
            total_enqueued: inner.total_enqueued,
            total_dropped: inner.total_dropped,
        }
    }

    async fn wait(&self) {
        self.ready.notified().await;
    }
}

/// Executes queued effects against the platform.
pub struct EffectWorker {
    queue: EffectQueue,
    roles: Arc<dyn RoleGateway>,
    sink: Arc<dyn NotificationSink>,
    rewards: RewardConfig,
    counters: Arc<XpzCounters>,
    call_timeout: Duration,
}

impl std::fmt::Debug for EffectWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectWorker")
            .field("queue", &self.queue)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl EffectWorker {
    /// Build a worker draining `queue`.
    #[must_use]
    pub fn new(
        queue: EffectQueue,
        roles: Arc<dyn RoleGateway>,
        sink: Arc<dyn NotificationSink>,
        rewards: RewardConfig,
        counters: Arc<XpzCounters>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            roles,
            sink,
            rewards,
            counters,
            call_timeout,
        }
    }

    /// Run every effect currently queued. Returns how many ran.
    pub async fn drain(&self) -> usize {
        let mut ran = 0;
        while let Some(effect) = self.queue.dequeue() {
            let kind = effect.kind();
            if let Err(err) = self.execute(effect).await {
                XpzCounters::bump(&self.counters.effect_failures);
                warn!(effect = kind, error = %err, "Side effect failed");
            }
            ran += 1;
        }
        ran
    }

    /// Process effects until `shutdown` flips to `true` (or its sender drops),
    /// then drain what is left.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let span = info_span!(spans::EFFECTS);
        async move {
            loop {
                self.drain().await;
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    () = self.queue.wait() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            let ran = self.drain().await;
            debug!(ran, "Effect worker stopped");
        }
        .instrument(span)
        .await;
    }

    async fn execute(&self, effect: Effect) -> Result<(), PortError> {
        match effect {
            Effect::ApplyRewards { community, member, level } => {
                self.apply_rewards(community, member, level).await
            }
            Effect::Notify { community, channel, notification } => {
                self.bounded(self.sink.deliver(community, channel, notification)).await
            }
        }
    }

    async fn apply_rewards(
        &self,
        community: CommunityId,
        member: MemberId,
        level: u32,
    ) -> Result<(), PortError> {
        if rewards::eligible(&self.rewards.roles, level).is_empty() {
            return Ok(());
        }
        let held = self.bounded(self.roles.member_roles(community, member)).await?;
        let plan = rewards::plan(&self.rewards.roles, self.rewards.mode, level, &held);

        // Keep going after a single failed role change; report the last error.
        let mut outcome = Ok(());
        for role in plan.grant {
            if let Err(err) = self.bounded(self.roles.grant_role(community, member, role)).await {
                warn!(%community, %member, %role, error = %err, "Role grant failed");
                outcome = Err(err);
            }
        }
        for role in plan.revoke {
            if let Err(err) = self.bounded(self.roles.revoke_role(community, member, role)).await {
                warn!(%community, %member, %role, error = %err, "Role revoke failed");
                outcome = Err(err);
            }
        }
        outcome
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, PortError>>,
    ) -> Result<T, PortError> {
        let millis = u64::try_from(self.call_timeout.as_millis()).unwrap_or(u64::MAX);
        tokio::time::timeout(self.call_timeout, call)
            .await
            .unwrap_or(Err(PortError::Timeout(millis)))
    }
}
