use super::ConnectionState;
use crate::config::ReconnectConfig;
use crate::error::Result;
use crate::models::PushEvent;
use crate::store::NotificationStore;
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// An established push-channel session.
///
/// `frames` yields raw event payloads until the transport drops, at which
/// point the sender side is closed and the manager enters its reconnect
/// loop.
pub struct PushSession {
    pub frames: mpsc::UnboundedReceiver<String>,
}

/// Transport seam for the push channel.
///
/// `connect` performs the handshake and hands back the live session. The
/// manager bounds each handshake with a timeout, so implementations do not
/// need their own.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self, token: &str) -> Result<PushSession>;
}

struct Shared {
    state: StdRwLock<ConnectionState>,
    subscribers: StdMutex<Vec<mpsc::UnboundedSender<ConnectionState>>>,
    /// Bumped on every connect/disconnect; fences driver tasks from a
    /// previous session so they cannot touch state after being replaced.
    generation: AtomicU64,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        let prev = {
            let mut state = self.state.write().unwrap();
            let prev = *state;
            if prev == next {
                return;
            }
            if !prev.can_transition_to(next) {
                warn!(from = prev.as_str(), to = next.as_str(), "invalid state transition ignored");
                return;
            }
            *state = next;
            prev
        };

        debug!(from = prev.as_str(), to = next.as_str(), "connection state changed");

        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(next).is_ok());
    }

    fn current(&self) -> ConnectionState {
        *self.state.read().unwrap()
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }
}

/// Owns the single push-channel session per authenticated identity.
///
/// Never mutates notification data directly; parsed events are forwarded to
/// the store, which runs them through the reconciler.
pub struct ConnectionManager {
    transport: Arc<dyn PushTransport>,
    store: Arc<NotificationStore>,
    config: ReconnectConfig,
    shared: Arc<Shared>,
    /// Serializes connect/disconnect so concurrent calls cannot create
    /// duplicate underlying sessions
    lifecycle: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn PushTransport>,
        store: Arc<NotificationStore>,
        config: ReconnectConfig,
    ) -> Self {
        Self {
            transport,
            store,
            config,
            shared: Arc::new(Shared {
                state: StdRwLock::new(ConnectionState::Disconnected),
                subscribers: StdMutex::new(Vec::new()),
                generation: AtomicU64::new(0),
            }),
            lifecycle: Mutex::new(None),
        }
    }

    /// Establish the session, or reuse it if one is already connecting or
    /// connected. Handshake and transport failures are never returned from
    /// here; they surface as state-change events.
    pub async fn connect(&self, token: &str) {
        let mut lifecycle = self.lifecycle.lock().await;

        if self.shared.current().is_active() {
            debug!("connect() ignored, session already active");
            return;
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.set_state(ConnectionState::Connecting);

        let transport = Arc::clone(&self.transport);
        let store = Arc::clone(&self.store);
        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let token = token.to_string();

        let handle = tokio::spawn(async move {
            run_session(transport, store, shared, config, generation, token).await;
        });

        *lifecycle = Some(handle);
    }

    /// Release the session. A later `connect()` starts fresh; no stale
    /// handle is retained.
    pub async fn disconnect(&self) {
        let mut lifecycle = self.lifecycle.lock().await;

        // Fence the driver task before aborting so a half-finished state
        // write cannot land after Closed.
        self.shared.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(handle) = lifecycle.take() {
            handle.abort();
        }

        self.shared.set_state(ConnectionState::Closed);
        info!("push channel disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.shared.current() == ConnectionState::Connected
    }

    pub fn current_state(&self) -> ConnectionState {
        self.shared.current()
    }

    /// Subscribe to connection state transitions
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectionState> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.subscribers.lock().unwrap().push(tx);
        rx
    }
}

/// Delay before the given (1-based) reconnect attempt: grows linearly from
/// the initial delay up to the cap, with optional jitter.
fn backoff_delay(config: &ReconnectConfig, attempt: u32) -> Duration {
    let base = (config.initial_delay_ms.saturating_mul(attempt as u64)).min(config.max_delay_ms);
    if config.jitter {
        let jitter = rand::thread_rng().gen_range(0..=base / 3 + 1);
        Duration::from_millis(base + jitter)
    } else {
        Duration::from_millis(base)
    }
}

/// Session driver: handshake with timeout, pump frames into the store,
/// reconnect with bounded backoff on drop.
async fn run_session(
    transport: Arc<dyn PushTransport>,
    store: Arc<NotificationStore>,
    shared: Arc<Shared>,
    config: ReconnectConfig,
    generation: u64,
    token: String,
) {
    let mut attempt: u32 = 0;

    loop {
        if shared.is_stale(generation) {
            return;
        }

        attempt += 1;

        match timeout(config.handshake_timeout(), transport.connect(&token)).await {
            Ok(Ok(session)) => {
                if shared.is_stale(generation) {
                    return;
                }

                let resync = shared.current() == ConnectionState::Reconnecting;
                attempt = 0;
                shared.set_state(ConnectionState::Connected);
                info!("push channel connected");

                // Bound the drift accumulated during the disconnect window
                if resync {
                    if let Err(e) = store.reconcile_unread_count().await {
                        warn!("post-reconnect reconciliation failed: {}", e);
                    }
                }

                pump_frames(session, &store, &shared, generation).await;

                if shared.is_stale(generation) {
                    return;
                }

                warn!("push channel dropped, reconnecting");
                shared.set_state(ConnectionState::Reconnecting);
            }
            Ok(Err(e)) => {
                warn!(attempt, "push handshake failed: {}", e);
                if !retry_or_give_up(&shared, &config, generation, attempt).await {
                    return;
                }
            }
            Err(_) => {
                warn!(attempt, "push handshake timed out");
                if !retry_or_give_up(&shared, &config, generation, attempt).await {
                    return;
                }
            }
        }
    }
}

async fn pump_frames(
    mut session: PushSession,
    store: &NotificationStore,
    shared: &Shared,
    generation: u64,
) {
    while let Some(frame) = session.frames.recv().await {
        if shared.is_stale(generation) {
            return;
        }

        // Malformed payloads are dropped before they can touch the cache
        match PushEvent::from_json(&frame) {
            Ok(event) => store.apply_push_event(event).await,
            Err(e) => warn!("dropping malformed push payload: {}", e),
        }
    }
}

/// Returns false once the attempt budget is exhausted and the session has
/// been parked in terminal Disconnected.
async fn retry_or_give_up(
    shared: &Shared,
    config: &ReconnectConfig,
    generation: u64,
    attempt: u32,
) -> bool {
    if attempt >= config.max_attempts {
        warn!(
            attempts = attempt,
            "reconnect attempts exhausted, giving up until manual retry"
        );
        if !shared.is_stale(generation) {
            shared.set_state(ConnectionState::Disconnected);
        }
        return false;
    }

    if !shared.is_stale(generation) {
        shared.set_state(ConnectionState::Reconnecting);
    }
    sleep(backoff_delay(config, attempt)).await;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_grows_to_cap() {
        let config = ReconnectConfig {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 5_000,
            handshake_timeout_secs: 20,
            jitter: false,
        };

        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(&config, 3), Duration::from_millis(3_000));
        assert_eq!(backoff_delay(&config, 5), Duration::from_millis(5_000));
        // Capped past the schedule
        assert_eq!(backoff_delay(&config, 9), Duration::from_millis(5_000));
    }

    #[test]
    fn test_backoff_jitter_stays_bounded() {
        let config = ReconnectConfig {
            jitter: true,
            ..ReconnectConfig::default()
        };

        for attempt in 1..=5 {
            let delay = backoff_delay(&config, attempt);
            let base = (config.initial_delay_ms * attempt as u64).min(config.max_delay_ms);
            assert!(delay >= Duration::from_millis(base));
            assert!(delay <= Duration::from_millis(base + base / 3 + 1));
        }
    }
}
