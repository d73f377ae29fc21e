//! Consumer handler trait.

use crate::message::Message;
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use tokio_util::sync::CancellationToken;

/// Handles messages delivered to a registered consumer.
///
/// Invoked once per delivery. In persistent mode an `Err` naks the message so
/// the broker redelivers it; in core mode the error is only logged.
///
/// `cancel` fires when the consumer is stopped or the process shuts down.
/// The loop still waits for `handle` to return, so long-running work should
/// watch it and give up early.
///
/// # Example
///
/// ```rust,ignore
/// struct BillingHandler { invoices: Arc<InvoiceService> }
///
/// #[async_trait]
/// impl ConsumerHandler for BillingHandler {
///     async fn handle(&self, message: Message, cancel: CancellationToken) -> eyre::Result<()> {
///         let order: OrderCreated = serde_json::from_slice(&message.body)?;
///         tokio::select! {
///             result = self.invoices.issue(order) => result?,
///             _ = cancel.cancelled() => eyre::bail!("shutting down before invoice was issued"),
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait ConsumerHandler: Send + Sync {
    /// Handle one delivered message.
    async fn handle(&self, message: Message, cancel: CancellationToken) -> eyre::Result<()>;
}

/// Handler backed by an async closure. See [`handler_fn`].
pub struct FnHandler<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

/// Wrap an async closure as a [`ConsumerHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F, Fut>
where
    F: Fn(Message, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = eyre::Result<()>> + Send,
{
    FnHandler {
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> ConsumerHandler for FnHandler<F, Fut>
where
    F: Fn(Message, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = eyre::Result<()>> + Send,
{
    async fn handle(&self, message: Message, cancel: CancellationToken) -> eyre::Result<()> {
        (self.f)(message, cancel).await
    }
}
