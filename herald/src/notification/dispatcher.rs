//! Notification dispatcher.
//!
//! The [`Dispatcher`] is the single entry point for sending notifications:
//! - validates synchronously on the caller's side, before anything is queued
//! - hands accepted notifications to a fixed pool of worker tasks
//! - picks the first matching delivery strategy on the worker
//! - publishes one terminal lifecycle event per delivery
//! - resolves the caller's [`DispatchHandle`] with the outcome
//!
//! Registrations (strategies, validators, listeners) are frozen at
//! construction and shared read-only with the workers.

use std::any::Any;
use std::future::Future;
use std::panic::{AssertUnwindSafe, resume_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures::FutureExt;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::channels::DeliveryStrategy;
use super::domain::Notification;
use super::events::{NotificationEvent, NotificationListener, panic_message, publish};
use super::retry::with_cancellation;
use super::validation::NotificationValidator;
use crate::{Error, Result};

/// Outcome delivered from a worker back to the caller's handle.
enum Outcome {
    Finished(Result<NotificationEvent>),
    /// A strategy panicked; re-raised when the handle is awaited.
    Panicked(Box<dyn Any + Send>),
}

/// A unit of work consumed by workers.
struct Job {
    notification: Notification,
    cancel: CancellationToken,
    reply: oneshot::Sender<Outcome>,
}

/// Shared, read-only state for all workers.
struct Registry {
    strategies: Vec<Arc<dyn DeliveryStrategy>>,
    listeners: Vec<Arc<dyn NotificationListener>>,
}

impl Registry {
    /// Deliver one notification and publish its terminal event.
    async fn deliver(&self, notification: &Notification) -> Result<NotificationEvent> {
        let kind = notification.kind();
        let strategy = self
            .strategies
            .iter()
            .find(|s| s.matches(kind))
            .ok_or(Error::NoMatchingStrategy { kind })?;

        debug!(
            notification_id = %notification.id(),
            provider = %strategy.name(),
            "Delivering notification"
        );

        match strategy.send(notification).await {
            Ok(()) => {
                let event = NotificationEvent::sent(
                    notification.id(),
                    strategy.name(),
                    "Delivery completed successfully",
                );
                publish(&self.listeners, &event);
                info!(
                    notification_id = %notification.id(),
                    provider = %strategy.name(),
                    "Notification delivered"
                );
                Ok(event)
            }
            Err(e) => {
                let event =
                    NotificationEvent::failed(notification.id(), strategy.name(), e.to_string());
                publish(&self.listeners, &event);
                error!(
                    notification_id = %notification.id(),
                    provider = %strategy.name(),
                    "Notification delivery failed: {}",
                    e
                );
                Err(Error::Delivery(e))
            }
        }
    }

    async fn run(&self, job: Job) {
        let Job {
            notification,
            cancel,
            reply,
        } = job;

        if cancel.is_cancelled() {
            debug!(
                notification_id = %notification.id(),
                "Dispatch cancelled before a worker picked it up"
            );
            let _ = reply.send(Outcome::Finished(Err(Error::Cancelled)));
            return;
        }

        let delivery = with_cancellation(cancel, self.deliver(&notification));
        let outcome = match AssertUnwindSafe(delivery).catch_unwind().await {
            Ok(result) => Outcome::Finished(result),
            Err(payload) => {
                error!(
                    notification_id = %notification.id(),
                    "Delivery strategy panicked: {}",
                    panic_message(payload.as_ref())
                );
                Outcome::Panicked(payload)
            }
        };

        // The caller may have dropped the handle; the dispatch still counts.
        let _ = reply.send(outcome);
    }
}

/// Main worker loop: pull jobs until the queue is closed and drained.
async fn worker_loop(id: usize, rx: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>, registry: Arc<Registry>) {
    debug!("Dispatch worker {} started", id);

    loop {
        let job = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };

        let Some(job) = job else { break };
        registry.run(job).await;
    }

    debug!("Dispatch worker {} stopped", id);
}

/// Asynchronous dispatcher with a fixed-size worker pool.
pub struct Dispatcher {
    validators: Vec<Arc<dyn NotificationValidator>>,
    queue: parking_lot::Mutex<Option<mpsc::UnboundedSender<Job>>>,
    workers: parking_lot::Mutex<Option<JoinSet<()>>>,
    pool_size: usize,
}

impl Dispatcher {
    /// Create a dispatcher and start its workers.
    ///
    /// Must be called from within a Tokio runtime; the workers are spawned on
    /// it. Fails with a configuration error when `strategies` is empty or
    /// `pool_size` is zero.
    pub fn new(
        strategies: Vec<Arc<dyn DeliveryStrategy>>,
        validators: Vec<Arc<dyn NotificationValidator>>,
        listeners: Vec<Arc<dyn NotificationListener>>,
        pool_size: usize,
    ) -> Result<Self> {
        if strategies.is_empty() {
            return Err(Error::config(
                "at least one delivery strategy must be registered",
            ));
        }
        if pool_size == 0 {
            return Err(Error::config("worker pool size must be greater than zero"));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::config("dispatcher must be created inside a Tokio runtime"))?;

        let registry = Arc::new(Registry {
            strategies,
            listeners,
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = JoinSet::new();
        for id in 0..pool_size {
            workers.spawn_on(worker_loop(id, rx.clone(), registry.clone()), &runtime);
        }

        info!(
            "Dispatcher started with {} workers, {} strategies, {} validators, {} listeners",
            pool_size,
            registry.strategies.len(),
            validators.len(),
            registry.listeners.len()
        );

        Ok(Self {
            validators,
            queue: parking_lot::Mutex::new(Some(tx)),
            workers: parking_lot::Mutex::new(Some(workers)),
            pool_size,
        })
    }

    /// Validate `notification` and queue it for delivery.
    ///
    /// Validation and shutdown errors are returned immediately; everything
    /// after the handoff is reported through the returned handle.
    pub fn send(&self, notification: impl Into<Notification>) -> Result<DispatchHandle> {
        let notification = notification.into();
        let kind = notification.kind();
        info!(
            notification_id = %notification.id(),
            kind = %kind,
            "Dispatch requested"
        );

        for validator in self.validators.iter().filter(|v| v.matches(kind)) {
            if let Err(e) = validator.validate(&notification) {
                warn!(
                    notification_id = %notification.id(),
                    kind = %kind,
                    "Notification rejected: {}",
                    e
                );
                return Err(Error::Validation(e));
            }
        }

        let tx = self.queue.lock().clone().ok_or(Error::Shutdown)?;

        let notification_id = notification.id().to_string();
        let cancel = CancellationToken::new();
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(Job {
            notification,
            cancel: cancel.clone(),
            reply: reply_tx,
        })
        .map_err(|_| Error::Shutdown)?;

        Ok(DispatchHandle {
            notification_id,
            cancel,
            reply: reply_rx,
        })
    }

    /// Stop accepting dispatches and wait for queued and in-flight ones to
    /// finish. Calling it again is a no-op once the pool has drained.
    ///
    /// If this future is dropped early (e.g. under a timeout) the workers keep
    /// running and a later call resumes waiting for them.
    pub async fn shutdown(&self) {
        // Dropping the sender lets workers drain the queue, then exit.
        if self.queue.lock().take().is_some() {
            info!("Dispatcher shutting down, draining {} workers", self.pool_size);
        }

        // Take the join set out of the mutex before awaiting.
        let Some(workers) = self.workers.lock().take() else {
            return;
        };
        let mut drain = DrainGuard {
            slot: &self.workers,
            workers: Some(workers),
        };
        if let Some(workers) = drain.workers.as_mut() {
            while let Some(result) = workers.join_next().await {
                if let Err(e) = result {
                    warn!("Dispatch worker ended abnormally: {}", e);
                }
            }
        }

        info!("Dispatcher stopped");
    }

    /// Whether new dispatches are still accepted.
    pub fn is_running(&self) -> bool {
        self.queue.lock().is_some()
    }

    /// Number of worker tasks serving the queue.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }
}

/// Hands unfinished workers back to the dispatcher if a drain is abandoned,
/// so they are never aborted by dropping the join set.
struct DrainGuard<'a> {
    slot: &'a parking_lot::Mutex<Option<JoinSet<()>>>,
    workers: Option<JoinSet<()>>,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if let Some(workers) = self.workers.take()
            && !workers.is_empty()
        {
            *self.slot.lock() = Some(workers);
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Without an explicit shutdown, close the queue and let workers finish
        // accepted dispatches in the background.
        self.queue.get_mut().take();
        if let Some(mut workers) = self.workers.get_mut().take() {
            workers.detach_all();
        }
    }
}

/// Completion handle for one dispatch.
///
/// Resolves to the `SENT` event on success, or to the error that ended the
/// dispatch. Dropping the handle does not cancel the dispatch; call
/// [`DispatchHandle::cancel`] for that.
#[must_use = "a dispatch handle reports the delivery outcome"]
pub struct DispatchHandle {
    notification_id: String,
    cancel: CancellationToken,
    reply: oneshot::Receiver<Outcome>,
}

impl DispatchHandle {
    /// Id of the notification this handle tracks.
    pub fn notification_id(&self) -> &str {
        &self.notification_id
    }

    /// Request cancellation. A dispatch not yet picked up by a worker is
    /// skipped; one waiting in a retry backoff stops waiting and fails.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Future for DispatchHandle {
    type Output = Result<NotificationEvent>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match ready!(Pin::new(&mut this.reply).poll(cx)) {
            Ok(Outcome::Finished(result)) => Poll::Ready(result),
            Ok(Outcome::Panicked(payload)) => resume_unwind(payload),
            // The worker went away without answering (runtime shut down).
            Err(_) => Poll::Ready(Err(Error::Shutdown)),
        }
    }
}

impl std::fmt::Debug for DispatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchHandle")
            .field("notification_id", &self.notification_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeliveryError;
    use crate::notification::channels::{SendGridEmailStrategy, TwilioSmsStrategy};
    use crate::notification::domain::{EmailNotification, NotificationKind, SmsNotification};
    use crate::notification::events::BroadcastListener;
    use crate::notification::retry::{ExponentialBackoff, RetryingStrategy};
    use crate::notification::validation::SmsValidator;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct AlwaysFailing {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl DeliveryStrategy for AlwaysFailing {
        fn matches(&self, kind: NotificationKind) -> bool {
            kind == NotificationKind::Sms
        }

        async fn send(&self, _: &Notification) -> std::result::Result<(), DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(DeliveryError::transient("Broken", "gateway unreachable"))
        }

        fn name(&self) -> &str {
            "Broken"
        }
    }

    struct Panicking;

    #[async_trait]
    impl DeliveryStrategy for Panicking {
        fn matches(&self, _: NotificationKind) -> bool {
            true
        }

        async fn send(&self, _: &Notification) -> std::result::Result<(), DeliveryError> {
            panic!("transport bug");
        }

        fn name(&self) -> &str {
            "Panicking"
        }
    }

    fn sms() -> SmsNotification {
        SmsNotification::new("+51999888777", "Test Msg").unwrap()
    }

    fn twilio() -> Arc<dyn DeliveryStrategy> {
        Arc::new(TwilioSmsStrategy::new("AC1", "t"))
    }

    fn sendgrid() -> Arc<dyn DeliveryStrategy> {
        Arc::new(SendGridEmailStrategy::new("SG.key"))
    }

    fn dispatcher_with(strategies: Vec<Arc<dyn DeliveryStrategy>>, pool_size: usize) -> Dispatcher {
        Dispatcher::new(strategies, vec![], vec![], pool_size).unwrap()
    }

    #[tokio::test]
    async fn test_rejects_empty_strategies_and_zero_pool() {
        let err = Dispatcher::new(vec![], vec![], vec![], 2).err().unwrap();
        assert!(err.is_configuration());

        let err = Dispatcher::new(vec![twilio()], vec![], vec![], 0).err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_requires_runtime() {
        let err = Dispatcher::new(vec![twilio()], vec![], vec![], 1).err().unwrap();
        assert!(err.to_string().contains("Tokio runtime"));
    }

    #[tokio::test]
    async fn test_send_resolves_with_sent_event() {
        let validators: Vec<Arc<dyn NotificationValidator>> = vec![Arc::new(SmsValidator)];
        let dispatcher = Dispatcher::new(vec![twilio()], validators, vec![], 2).unwrap();

        let notification = sms();
        let handle = dispatcher.send(notification.clone()).unwrap();
        assert_eq!(handle.notification_id(), notification.id());

        let event = handle.await.unwrap();
        assert_eq!(event.notification_id(), notification.id());
        assert_eq!(event.provider_name(), "Twilio-SMS-Service");

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_first_matching_strategy_wins() {
        let calls = Arc::new(AtomicU32::new(0));
        let broken: Arc<dyn DeliveryStrategy> = Arc::new(AlwaysFailing {
            calls: calls.clone(),
        });
        let dispatcher = dispatcher_with(vec![twilio(), broken], 1);

        let event = dispatcher.send(sms()).unwrap().await.unwrap();
        assert_eq!(event.provider_name(), "Twilio-SMS-Service");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_matching_strategy_is_configuration_error() {
        let dispatcher = dispatcher_with(vec![sendgrid()], 1);

        let err = dispatcher.send(sms()).unwrap().await.unwrap_err();
        assert!(matches!(
            err,
            Error::NoMatchingStrategy {
                kind: NotificationKind::Sms
            }
        ));
    }

    #[tokio::test]
    async fn test_send_after_shutdown_rejected() {
        let dispatcher = dispatcher_with(vec![twilio()], 1);

        assert!(dispatcher.is_running());
        dispatcher.shutdown().await;
        dispatcher.shutdown().await;
        assert!(!dispatcher.is_running());

        assert!(matches!(dispatcher.send(sms()), Err(Error::Shutdown)));
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_dispatches() {
        let dispatcher = dispatcher_with(vec![twilio()], 1);

        let handles: Vec<_> = (0..5).map(|_| dispatcher.send(sms()).unwrap()).collect();
        dispatcher.shutdown().await;

        for handle in handles {
            assert!(handle.await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_strategy_panic_reraised_and_worker_survives() {
        let panicking: Arc<dyn DeliveryStrategy> = Arc::new(Panicking);
        let dispatcher = dispatcher_with(vec![panicking], 1);

        let handle = dispatcher.send(sms()).unwrap();
        let result = tokio::spawn(handle).await;
        let join_err = result.unwrap_err();
        assert!(join_err.is_panic());

        // The single worker is still alive and serving.
        let handle = dispatcher.send(sms()).unwrap();
        assert!(tokio::spawn(handle).await.unwrap_err().is_panic());
    }

    #[tokio::test]
    async fn test_cancel_before_pickup() {
        let dispatcher = dispatcher_with(vec![twilio()], 1);

        // current_thread runtime: the worker cannot run before we yield.
        let handle = dispatcher.send(sms()).unwrap();
        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(matches!(handle.await, Err(Error::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_fails_dispatch() {
        let calls = Arc::new(AtomicU32::new(0));
        let strategy = RetryingStrategy::new(
            AlwaysFailing {
                calls: calls.clone(),
            },
            ExponentialBackoff::new(5, Duration::from_secs(60)).unwrap(),
        );
        let strategy: Arc<dyn DeliveryStrategy> = Arc::new(strategy);
        let dispatcher = dispatcher_with(vec![strategy], 1);

        let handle = dispatcher.send(sms()).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        handle.cancel();

        match handle.await {
            Err(Error::Delivery(DeliveryError::Cancelled { attempts, .. })) => {
                assert_eq!(attempts, 1)
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_dispatcher_finishes_accepted_work() {
        let dispatcher = dispatcher_with(vec![sendgrid()], 1);

        let email = EmailNotification::new("ana@example.com", "Hi", "Body").unwrap();
        let handle = dispatcher.send(email).unwrap();
        drop(dispatcher);

        assert!(handle.await.is_ok());
    }

    struct Slow;

    #[async_trait]
    impl DeliveryStrategy for Slow {
        fn matches(&self, _: NotificationKind) -> bool {
            true
        }

        async fn send(&self, _: &Notification) -> std::result::Result<(), DeliveryError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }

        fn name(&self) -> &str {
            "Slow"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_shutdown_keeps_workers_running() {
        let broadcast = Arc::new(BroadcastListener::default());
        let mut events = broadcast.subscribe();
        let listeners: Vec<Arc<dyn NotificationListener>> = vec![broadcast.clone()];
        let slow: Arc<dyn DeliveryStrategy> = Arc::new(Slow);
        let dispatcher = Dispatcher::new(vec![slow], vec![], listeners, 1).unwrap();

        let handle = dispatcher.send(sms()).unwrap();
        let timed_out = tokio::time::timeout(Duration::from_millis(10), dispatcher.shutdown()).await;
        assert!(timed_out.is_err());
        assert!(!dispatcher.is_running());

        let event = handle.await.unwrap();
        assert_eq!(event.provider_name(), "Slow");
        assert_eq!(events.recv().await.unwrap(), event);

        // The second call still owns the workers and waits for them to exit.
        dispatcher.shutdown().await;
        assert!(dispatcher.workers.lock().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_shutdown_waits_for_in_flight_work() {
        let slow: Arc<dyn DeliveryStrategy> = Arc::new(Slow);
        let dispatcher = dispatcher_with(vec![slow], 1);

        let first = dispatcher.send(sms()).unwrap();
        let second = dispatcher.send(sms()).unwrap();
        let _ = tokio::time::timeout(Duration::from_millis(10), dispatcher.shutdown()).await;

        let started = tokio::time::Instant::now();
        dispatcher.shutdown().await;
        // Both queued sends finish before the retried shutdown returns.
        assert!(started.elapsed() >= Duration::from_millis(390));
        assert!(first.await.is_ok());
        assert!(second.await.is_ok());
    }
}
