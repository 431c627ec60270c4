use async_trait::async_trait;

use crate::domain::ValueResponse;

/// Error a subscriber may report; it is logged and never stops dispatch.
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

/// Synchronous observer of delivered response batches.
///
/// Any `Fn(&[ValueResponse])` closure qualifies via the blanket impl.
pub trait Subscriber: Send + Sync {
    fn on_batch(&self, batch: &[ValueResponse]) -> Result<(), SubscriberError>;
}

impl<F> Subscriber for F
where
    F: Fn(&[ValueResponse]) + Send + Sync,
{
    fn on_batch(&self, batch: &[ValueResponse]) -> Result<(), SubscriberError> {
        self(batch);
        Ok(())
    }
}

/// Asynchronous observer of delivered response batches.
#[async_trait]
pub trait AsyncSubscriber: Send + Sync {
    async fn on_batch(&self, batch: &[ValueResponse]) -> Result<(), SubscriberError>;
}
