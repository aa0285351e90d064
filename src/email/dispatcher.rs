//! Bounded in-process queue in front of an [`EmailSender`].
//!
//! `enqueue` never waits on the network. A worker task drains the queue and runs
//! each delivery in its own task (bounded by a semaphore), retrying failures with
//! exponential backoff and jitter until `max_attempts` is reached.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::Rng;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, Semaphore},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tracing::{error, info, warn};

use super::{EmailMessage, EmailSender, EmailTemplates, Notifier};

#[derive(Clone, Copy, Debug)]
pub struct EmailWorkerConfig {
    queue_capacity: usize,
    concurrency: usize,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
    send_timeout: Duration,
}

impl EmailWorkerConfig {
    /// Default worker config: 1024 queued messages, 4 concurrent deliveries,
    /// 5 max attempts, 5s->5m exponential backoff with jitter and a 30s send timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue_capacity: 1024,
            concurrency: 4,
            max_attempts: 5,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
            send_timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff_base_seconds(mut self, seconds: u64) -> Self {
        self.backoff_base = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_backoff_max_seconds(mut self, seconds: u64) -> Self {
        self.backoff_max = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_send_timeout_seconds(mut self, seconds: u64) -> Self {
        self.send_timeout = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let backoff_base = if self.backoff_base.is_zero() {
            Duration::from_secs(1)
        } else {
            self.backoff_base
        };
        let backoff_max = if self.backoff_max < backoff_base {
            backoff_base
        } else {
            self.backoff_max
        };
        let send_timeout = if self.send_timeout.is_zero() {
            Duration::from_secs(1)
        } else {
            self.send_timeout
        };
        Self {
            queue_capacity: self.queue_capacity.max(1),
            concurrency: self.concurrency.max(1),
            max_attempts: self.max_attempts.max(1),
            backoff_base,
            backoff_max,
            send_timeout,
        }
    }

    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        self.backoff_max
    }

    #[must_use]
    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }
}

impl Default for EmailWorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// [`Notifier`] that renders messages and queues them for the background worker.
#[derive(Clone)]
pub struct EmailDispatcher {
    queue: mpsc::Sender<EmailMessage>,
    templates: Arc<EmailTemplates>,
}

impl EmailDispatcher {
    /// Start the worker. It stops once every dispatcher clone is dropped and the
    /// queue has drained.
    pub fn spawn(
        sender: Arc<dyn EmailSender>,
        templates: EmailTemplates,
        config: EmailWorkerConfig,
    ) -> (Self, JoinHandle<()>) {
        let config = config.normalize();
        let (queue, receiver) = mpsc::channel(config.queue_capacity());
        let worker = tokio::spawn(run_worker(receiver, sender, config));
        (
            Self {
                queue,
                templates: Arc::new(templates),
            },
            worker,
        )
    }

    /// Queue a message without waiting for capacity.
    ///
    /// # Errors
    /// Returns an error when the queue is full or the worker has stopped.
    pub fn enqueue(&self, message: EmailMessage) -> Result<()> {
        self.queue.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(message) => {
                anyhow!("email queue is full, dropping message to {}", message.to_email)
            }
            mpsc::error::TrySendError::Closed(message) => {
                anyhow!("email worker stopped, dropping message to {}", message.to_email)
            }
        })
    }
}

#[async_trait]
impl Notifier for EmailDispatcher {
    async fn send_verification_email(
        &self,
        email: &str,
        link_token: &str,
        otp: &str,
    ) -> Result<()> {
        self.enqueue(self.templates.verification(email, link_token, otp))
    }

    async fn send_password_reset_email(&self, email: &str, token: &str) -> Result<()> {
        self.enqueue(self.templates.password_reset(email, token))
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<EmailMessage>,
    sender: Arc<dyn EmailSender>,
    config: EmailWorkerConfig,
) {
    let permits = Arc::new(Semaphore::new(config.concurrency()));

    while let Some(message) = receiver.recv().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let sender = Arc::clone(&sender);
        tokio::spawn(async move {
            deliver(sender.as_ref(), &message, &config).await;
            drop(permit);
        });
    }

    // Wait for in-flight deliveries before reporting the worker as finished.
    let total = u32::try_from(config.concurrency()).unwrap_or(u32::MAX);
    let _ = permits.acquire_many(total).await;
    info!("email worker stopped");
}

/// Returns the number of attempts made and whether the message was delivered.
async fn deliver(
    sender: &dyn EmailSender,
    message: &EmailMessage,
    config: &EmailWorkerConfig,
) -> (u32, bool) {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let err = match timeout(config.send_timeout(), sender.send(message)).await {
            Ok(Ok(())) => return (attempt, true),
            Ok(Err(err)) => err,
            Err(_) => anyhow!("send timed out after {:?}", config.send_timeout()),
        };

        if attempt >= config.max_attempts() {
            error!(
                to_email = %message.to_email,
                attempts = attempt,
                "email delivery failed permanently: {err:#}"
            );
            return (attempt, false);
        }

        let delay = backoff_delay(attempt, config.backoff_base(), config.backoff_max());
        warn!(
            to_email = %message.to_email,
            attempt,
            retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "email delivery failed, retrying: {err:#}"
        );
        sleep(delay).await;
    }
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << shift;
    let delay = base.checked_mul(factor).unwrap_or(max);
    let capped = if delay > max { max } else { delay };
    jitter_delay(capped)
}

fn jitter_delay(delay: Duration) -> Duration {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms < 2 {
        return delay;
    }
    let half = delay_ms / 2;
    let jitter = rand::thread_rng().gen_range(0..=half);
    Duration::from_millis(half + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` sends, then forwards messages to the test.
    struct FlakySender {
        failures: u32,
        calls: AtomicU32,
        delivered: mpsc::UnboundedSender<EmailMessage>,
    }

    #[async_trait]
    impl EmailSender for FlakySender {
        async fn send(&self, message: &EmailMessage) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(anyhow!("smtp unavailable"));
            }
            let _ = self.delivered.send(message.clone());
            Ok(())
        }
    }

    fn flaky(failures: u32) -> (Arc<FlakySender>, mpsc::UnboundedReceiver<EmailMessage>) {
        let (delivered, receiver) = mpsc::unbounded_channel();
        (
            Arc::new(FlakySender {
                failures,
                calls: AtomicU32::new(0),
                delivered,
            }),
            receiver,
        )
    }

    fn message() -> EmailMessage {
        EmailMessage {
            to_email: "a@x.com".to_string(),
            subject: "hi".to_string(),
            html_body: String::new(),
            text_body: String::new(),
        }
    }

    #[test]
    fn normalize_enforces_minimums() {
        let config = EmailWorkerConfig::new()
            .with_queue_capacity(0)
            .with_concurrency(0)
            .with_max_attempts(0)
            .with_backoff_base_seconds(0)
            .with_backoff_max_seconds(0)
            .with_send_timeout_seconds(0)
            .normalize();
        assert_eq!(config.queue_capacity(), 1);
        assert_eq!(config.concurrency(), 1);
        assert_eq!(config.max_attempts(), 1);
        assert_eq!(config.backoff_base(), Duration::from_secs(1));
        assert_eq!(config.backoff_max(), Duration::from_secs(1));
        assert_eq!(config.send_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let base = Duration::from_secs(4);
        let max = Duration::from_secs(10);
        let first = backoff_delay(1, base, max);
        assert!(first >= Duration::from_secs(2) && first <= base);
        let third = backoff_delay(3, base, max);
        assert!(third >= Duration::from_secs(5) && third <= max);
        let huge = backoff_delay(40, base, max);
        assert!(huge <= max);
    }

    #[tokio::test(start_paused = true)]
    async fn deliver_retries_until_success() {
        let (sender, mut delivered) = flaky(2);
        let config = EmailWorkerConfig::new().with_max_attempts(5);
        assert_eq!(deliver(sender.as_ref(), &message(), &config).await, (3, true));
        assert_eq!(delivered.recv().await, Some(message()));
    }

    #[tokio::test(start_paused = true)]
    async fn deliver_gives_up_after_max_attempts() {
        let (sender, _delivered) = flaky(10);
        let config = EmailWorkerConfig::new().with_max_attempts(3);
        assert_eq!(deliver(sender.as_ref(), &message(), &config).await, (3, false));
        assert_eq!(sender.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatcher_renders_and_delivers() -> Result<()> {
        let (sender, mut delivered) = flaky(1);
        let (dispatcher, worker) = EmailDispatcher::spawn(
            sender,
            EmailTemplates::new("http://localhost:3000"),
            EmailWorkerConfig::new(),
        );

        dispatcher
            .send_password_reset_email("bob@x.com", "reset-token")
            .await?;
        let message = delivered.recv().await.ok_or_else(|| anyhow!("no delivery"))?;
        assert_eq!(message.to_email, "bob@x.com");
        assert!(message.text_body.contains("reset-password?token=reset-token"));

        drop(dispatcher);
        worker.await?;
        Ok(())
    }

    #[tokio::test]
    async fn full_queue_is_reported() -> Result<()> {
        // Nothing drains this queue.
        let (queue, _receiver) = mpsc::channel(1);
        let dispatcher = EmailDispatcher {
            queue,
            templates: Arc::new(EmailTemplates::new("http://localhost:3000")),
        };
        dispatcher.enqueue(message())?;
        assert!(dispatcher.enqueue(message()).is_err());
        Ok(())
    }
}
