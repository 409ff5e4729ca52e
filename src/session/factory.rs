use async_trait::async_trait;
use futures::stream::Stream;

use super::AsyncSession;
use crate::core::Result;

/// Produces session handles bound to some engine.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: AsyncSession;

    async fn session(&self) -> Result<Self::Session>;
}

/// Adapt a factory into a lazy stream of session handles.
///
/// Each poll asks the factory for a fresh session; nothing is created up
/// front.
///
/// # Examples
///
/// ```ignore
/// use futures::StreamExt;
///
/// let mut sessions = session_stream(engine);
/// let session = sessions.next().await.unwrap()?;
/// ```
pub fn session_stream<F>(factory: F) -> impl Stream<Item = Result<F::Session>>
where
    F: SessionFactory + 'static,
{
    futures::stream::unfold(factory, |factory| async move {
        let session = factory.session().await;
        Some((session, factory))
    })
}
