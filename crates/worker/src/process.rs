//! Consumer processes: pull messages off a queue and process each one inside
//! a unit of work, reporting failures to the admins.
//!
//! For every message:
//! 1. decode the body,
//! 2. begin a unit of work and hand the message to the processor,
//! 3. commit and acknowledge on success,
//! 4. on failure roll back, log the traceback and email it to the admins.
//!    Fault-tolerant processes then move on; otherwise the error is returned
//!    and the process stops. Failed messages are never acknowledged.

use std::future::Future;

use hare_common::types::Message;
use hare_mq::{Codec, Consumer, IteratorOptions};
use hare_notifier::{AdminNotifier, ReportedMessage, SUBJECT, WorkerErrorReport};

use crate::source::MessageSource;
use crate::unit_of_work::UnitOfWork;

/// The application-specific work done for each message.
pub trait MessageProcessor<W: UnitOfWork> {
    type Codec: Codec;

    fn process_message(
        &mut self,
        message: &Message<<Self::Codec as Codec>::Item>,
        work: &mut W::Handle,
    ) -> impl Future<Output = anyhow::Result<()>>;
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Keep running after a message fails (default: true).
    pub fault_tolerant: bool,
    /// Let the broker consider messages acknowledged on delivery.
    pub no_ack: bool,
    /// Stop after this many messages.
    pub limit: Option<usize>,
    /// Broker prefetch window. Failed messages stay unacknowledged and keep
    /// their slot, so once this many have failed no more are delivered.
    pub prefetch: Option<u16>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            fault_tolerant: true,
            no_ack: false,
            limit: None,
            prefetch: None,
        }
    }
}

impl RunOptions {
    /// Subscription settings for the broker side of a run.
    pub fn iterator_options(&self) -> IteratorOptions {
        IteratorOptions {
            no_ack: self.no_ack,
            limit: self.limit,
            prefetch: self.prefetch,
        }
    }
}

/// Outcome counts of a run that ended without a fatal error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: u64,
    pub failed: u64,
}

/// Processing and failure handling, independent of where messages come from.
pub struct MessageHandler<P, W, N> {
    processor: P,
    work: W,
    notifier: N,
    auto_ack: bool,
}

impl<P, W, N> MessageHandler<P, W, N>
where
    P: MessageProcessor<W>,
    W: UnitOfWork,
    N: AdminNotifier,
{
    pub fn new(processor: P, work: W, notifier: N) -> Self {
        Self {
            processor,
            work,
            notifier,
            auto_ack: true,
        }
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Process every message from `source` until it is exhausted.
    pub async fn drive<S>(&mut self, source: &mut S, options: RunOptions) -> anyhow::Result<RunSummary>
    where
        S: MessageSource<Codec = P::Codec>,
    {
        let mut summary = RunSummary::default();

        while let Some(raw) = source.next_raw().await {
            let raw = raw?;
            let delivery_tag = raw.delivery_tag;

            let body = match source.codec().decode(&raw.body) {
                Ok(body) => body,
                Err(e) => {
                    summary.failed += 1;
                    let error = anyhow::Error::new(e).context("failed to decode message body");
                    let reported = ReportedMessage::from_message(
                        &raw,
                        Some(String::from_utf8_lossy(&raw.body).into_owned()),
                    );
                    self.handle_failure(source, error, reported, options).await?;
                    continue;
                }
            };
            let message = raw.map_body(|_| body);

            match self.process(&message).await {
                Ok(()) => {
                    summary.processed += 1;
                    if self.auto_ack && !options.no_ack {
                        source.acknowledge(delivery_tag).await?;
                    }
                }
                Err(error) => {
                    summary.failed += 1;
                    let reported = ReportedMessage::from_message(
                        &message,
                        Some(source.codec().render(&message.body)),
                    );
                    self.handle_failure(source, error, reported, options).await?;
                }
            }
        }

        Ok(summary)
    }

    /// Run the processor inside a unit of work: commit on success, roll back
    /// on failure.
    async fn process(&mut self, message: &Message<<P::Codec as Codec>::Item>) -> anyhow::Result<()> {
        let mut handle = self.work.begin().await?;

        match self.processor.process_message(message, &mut handle).await {
            Ok(()) => {
                self.work.commit(handle).await?;
                Ok(())
            }
            Err(error) => {
                if let Err(e) = self.work.rollback(handle).await {
                    tracing::warn!(error = %e, "Rollback failed");
                }
                Err(error)
            }
        }
    }

    /// Log and email the failure, then decide whether the run continues.
    async fn handle_failure<S: MessageSource>(
        &self,
        source: &mut S,
        error: anyhow::Error,
        message: ReportedMessage,
        options: RunOptions,
    ) -> anyhow::Result<()> {
        let traceback = format!("{:?}", error);
        tracing::error!(
            traceback = %traceback,
            fault_tolerant = options.fault_tolerant,
            "Queue worker error"
        );

        let report = WorkerErrorReport::new(message, traceback, options.fault_tolerant).render()?;
        // Without this email nobody learns about the failure, so its error
        // ends the run regardless of fault tolerance.
        self.notifier.mail_admins(SUBJECT, &report).await?;
        tracing::info!("Traceback has been emailed to the admins");

        if options.fault_tolerant {
            return Ok(());
        }

        if let Err(e) = source.cancel().await {
            tracing::warn!(error = %e, "Failed to cancel message subscription");
        }
        Err(error)
    }
}

/// A consumer bound to a processor, a unit of work and an admin notifier.
pub struct ConsumerProcess<P, W, N>
where
    P: MessageProcessor<W>,
    W: UnitOfWork,
{
    consumer: Consumer<P::Codec>,
    handler: MessageHandler<P, W, N>,
}

impl<P, W, N> ConsumerProcess<P, W, N>
where
    P: MessageProcessor<W>,
    W: UnitOfWork,
    N: AdminNotifier,
{
    pub fn new(consumer: Consumer<P::Codec>, processor: P, work: W, notifier: N) -> Self {
        Self {
            consumer,
            handler: MessageHandler::new(processor, work, notifier),
        }
    }

    /// Acknowledge successfully processed messages (default: true).
    pub fn with_auto_ack(mut self, auto_ack: bool) -> Self {
        self.handler.auto_ack = auto_ack;
        self
    }

    pub fn consumer(&self) -> &Consumer<P::Codec> {
        &self.consumer
    }

    pub fn handler(&self) -> &MessageHandler<P, W, N> {
        &self.handler
    }

    /// Consume until the subscription ends, the limit is reached, or a
    /// failure stops a non fault-tolerant process.
    pub async fn run(&mut self, options: RunOptions) -> anyhow::Result<RunSummary> {
        tracing::info!(
            queue = self.consumer.queue(),
            fault_tolerant = options.fault_tolerant,
            no_ack = options.no_ack,
            prefetch = ?options.prefetch,
            "Consumer process started"
        );

        let mut messages = self
            .consumer
            .message_iterator(options.iterator_options())
            .await?;

        let summary = self.handler.drive(&mut messages, options).await?;
        messages.cancel().await?;

        tracing::info!(
            processed = summary.processed,
            failed = summary.failed,
            "Consumer process finished"
        );
        Ok(summary)
    }
}
