mod event_consumer_impl;
mod event_dispatcher;
mod event_handler_impl;
mod event_publisher_impl;
mod memory_broker;
mod outbox_publisher;
mod port;
mod server;
mod token_sweeper;

pub use event_consumer_impl::*;
pub use event_dispatcher::*;
pub use event_handler_impl::*;
pub use event_publisher_impl::*;
pub use memory_broker::*;
pub use outbox_publisher::*;
pub use port::*;
pub use server::*;
pub use token_sweeper::*;
