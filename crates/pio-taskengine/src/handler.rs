use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),
}

/// Executes one task kind. Registered once per process at
/// [`crate::TaskEngine::new`] time, the way the teacher's `CommandRegistry`
/// maps a name to a boxed handler.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, payload: Value) -> Result<Value, HandlerError>;
}

/// Wraps an async closure as a [`TaskHandler`], for handlers simple enough
/// not to warrant a dedicated type.
pub struct FnTaskHandler<F>
where
    F: Fn(Value) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value, HandlerError>> + Send>>
        + Send
        + Sync
        + 'static,
{
    f: F,
}

impl<F> FnTaskHandler<F>
where
    F: Fn(Value) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value, HandlerError>> + Send>>
        + Send
        + Sync
        + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> TaskHandler for FnTaskHandler<F>
where
    F: Fn(Value) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value, HandlerError>> + Send>>
        + Send
        + Sync
        + 'static,
{
    async fn handle(&self, payload: Value) -> Result<Value, HandlerError> {
        (self.f)(payload).await
    }
}
