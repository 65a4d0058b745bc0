//! # thingworks-server
//!
//! Serves [`Thing`]s: registers them, runs their actions in the background and
//! turns invocations into the models an HTTP layer sends to clients.
//!
//! The HTTP routing itself lives elsewhere. Each route maps onto one
//! [`ThingServer`] method, and every error carries the status code it should
//! be answered with ([`Error::status_code`]):
//!
//! | Route                                   | Method                                |
//! |-----------------------------------------|---------------------------------------|
//! | `POST /{thing}/{action}`                | [`ThingServer::invoke_action`]        |
//! | `GET /action_invocations`               | [`ThingServer::invocations`]          |
//! | `GET /action_invocations/{id}`          | [`ThingServer::invocation`]           |
//! | `GET /action_invocations/{id}/output`   | [`ThingServer::invocation_output`]    |
//! | `DELETE /action_invocations/{id}`       | [`ThingServer::delete_or_cancel`]     |
//! | `GET /blob/{id}`                        | [`ThingServer::read_blob`]            |
//!
//! ## Lifecycle
//!
//! [`ThingServer::start`] starts the event loop, calls [`Thing::setup`] on
//! every thing and begins periodic eviction of finished invocations.
//! [`ThingServer::shutdown`] (or dropping the server) reverses this.

pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod server;
pub mod thing;

pub use config::ServerConfig;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use model::{
    invocation_href, BlobModel, InvocationModel, LinkElement, OutputModel, INVOCATIONS_PATH,
};
pub use server::ThingServer;
pub use thing::{ActionContext, ActionDescription, Thing};
