//! Transport trait and dynamic dispatch companion.

use crate::InboundMessage;
use crate::error::Result;

use futures::Stream;
use std::future::Future;
use std::pin::Pin;

/// Inbound messages in arrival order.
pub type InboundStream = Pin<Box<dyn Stream<Item = InboundMessage> + Send>>;

/// Static trait for transports.
pub trait Transport: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Start receiving. Messages arrive on the stream in delivery order.
    fn start(&self) -> impl Future<Output = Result<InboundStream>> + Send;

    /// Send `text` to a chat and return the transport's id for the new message.
    fn send(&self, chat_id: &str, text: &str) -> impl Future<Output = Result<String>> + Send;

    fn shutdown(&self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}

/// Dynamic trait for `Arc<dyn TransportDyn>` storage.
pub trait TransportDyn: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn start<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<InboundStream>> + Send + 'a>>;

    fn send<'a>(
        &'a self,
        chat_id: &'a str,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

    fn shutdown<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Any `Transport` is automatically a `TransportDyn`.
impl<T: Transport> TransportDyn for T {
    fn name(&self) -> &str {
        Transport::name(self)
    }

    fn start<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<InboundStream>> + Send + 'a>> {
        Box::pin(Transport::start(self))
    }

    fn send<'a>(
        &'a self,
        chat_id: &'a str,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(Transport::send(self, chat_id, text))
    }

    fn shutdown<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Transport::shutdown(self))
    }
}
