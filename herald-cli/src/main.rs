use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use herald::logging;
use herald::notification::{
    DeliveryStrategy, DispatchHandle, DispatcherBuilder, EmailNotification, Notification,
    NotificationEvent, NotificationKind, PushNotification, SendGridEmailStrategy,
    SmsNotification, TwilioSmsStrategy,
};
use herald::{DeliveryError, DispatcherConfig};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Dispatch sample notifications through herald", long_about = None)]
struct Args {
    /// Number of delivery workers (defaults to HERALD_POOL_SIZE or the CPU count)
    #[arg(long)]
    pool_size: Option<usize>,

    /// Total delivery attempts per notification, including the first
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Delay before the first retry, doubled on each further retry
    #[arg(long)]
    initial_delay_ms: Option<u64>,

    /// Make the demo push transport fail this many times before succeeding
    #[arg(long, default_value_t = 0)]
    flaky_failures: u32,

    /// Log filter directive, e.g. "herald=debug"
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

/// Demo push transport that fails a fixed number of times first.
struct FlakyPushStrategy {
    failures: u32,
    calls: AtomicU32,
}

#[async_trait]
impl DeliveryStrategy for FlakyPushStrategy {
    fn matches(&self, kind: NotificationKind) -> bool {
        kind == NotificationKind::Push
    }

    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(DeliveryError::transient(
                self.name(),
                format!("push gateway timeout (call {})", call),
            ));
        }
        info!(notification_id = %notification.id(), "Push delivered to device");
        Ok(())
    }

    fn name(&self) -> &str {
        "Demo-Push-Gateway"
    }
}

fn log_event(event: &NotificationEvent) -> anyhow::Result<()> {
    info!(
        notification_id = %event.notification_id(),
        status = %event.status(),
        provider = %event.provider_name(),
        "{}",
        event.detail()
    );
    Ok(())
}

async fn report(label: &str, handle: DispatchHandle) {
    match handle.await {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(json) => println!("{label}: {json}"),
            Err(e) => println!("{label}: sent ({e})"),
        },
        Err(e) => println!("{label}: failed: {e}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logging::init(args.log_level.as_deref(), args.json_logs)?;

    let mut config = DispatcherConfig::from_env().context("Failed to load configuration")?;
    if let Some(pool_size) = args.pool_size {
        config.pool_size = pool_size;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.retry.max_attempts = max_attempts;
    }
    if let Some(initial_delay_ms) = args.initial_delay_ms {
        config.retry.initial_delay_ms = initial_delay_ms;
    }

    let dispatcher = DispatcherBuilder::from_config(&config)
        .context("Invalid dispatcher configuration")?
        .with_configured_retry(SendGridEmailStrategy::new("SG.demo-api-key"))
        .with_configured_retry(TwilioSmsStrategy::new("AC-demo-account", "demo-auth-token"))
        .with_configured_retry(FlakyPushStrategy {
            failures: args.flaky_failures,
            calls: AtomicU32::new(0),
        })
        .with_default_validators()
        .with_listener(log_event)
        .build()?;

    info!(
        "Dispatching samples with {} workers, {} attempts",
        dispatcher.pool_size(),
        config.retry.max_attempts
    );

    let email = EmailNotification::new("ana@example.com", "Welcome", "Thanks for signing up")?;
    let sms = SmsNotification::new("+51999888777", "Your code is 4821")?;
    let push = PushNotification::new("device-token-42", "Order shipped", "Arriving Tuesday")?;
    let invalid_sms = SmsNotification::new("999-888-777", "Never sent")?;

    let email = dispatcher.send(email)?;
    let sms = dispatcher.send(sms)?;
    let push = dispatcher.send(push)?;

    match dispatcher.send(invalid_sms) {
        Ok(handle) => report("invalid sms", handle).await,
        Err(e) => println!("invalid sms: rejected: {e}"),
    }

    report("email", email).await;
    report("sms", sms).await;
    report("push", push).await;

    dispatcher.shutdown().await;
    Ok(())
}
