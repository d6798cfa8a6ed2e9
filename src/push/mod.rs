//! PubSubHubbub subscriber.
//!
//! [`HubClient`] asks a hub (Superfeedr by default) to push updates of a
//! feed to `/subscriber/{id}/`. The hub first confirms intent with a GET on
//! that URL ([`verify_intent`]) and later POSTs new entries to it
//! ([`receive_content`]).

mod callback;
mod hub;

pub use callback::{receive_content, verify_intent, verify_signature, Delivery, VerifyParams};
pub use hub::{push_credentials, HubClient, HubError};
