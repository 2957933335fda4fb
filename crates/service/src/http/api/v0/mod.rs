use axum::routing::{get, post};
use axum::Router;

pub mod devices;
pub mod envelopes;
pub mod handshake;
pub mod pairing;
pub mod recipients;

pub use devices::{RegisterDeviceRequest, RemoveDeviceRequest};
pub use envelopes::{AppendWrapRequest, AuthoredRequest, GetEnvelopeRequest, PutEnvelopeRequest};
pub use handshake::{CompleteHandshakeRequest, InitHandshakeRequest, RetrieveHandshakeRequest};
pub use pairing::{ClaimPairingRequest, InitPairingRequest};
pub use recipients::RecipientsRequest;

use crate::ServiceState;

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .route("/devices", post(devices::register_handler))
        .route(
            "/devices/:device_id",
            axum::routing::delete(devices::remove_handler),
        )
        .route("/recipients", get(recipients::handler))
        .route("/handshake", post(handshake::init_handler))
        .route("/handshake/:id", get(handshake::retrieve_handler))
        .route("/handshake/:id/complete", post(handshake::complete_handler))
        .route("/pairing", post(pairing::init_handler))
        .route("/pairing/claim", post(pairing::claim_handler))
        .route(
            "/envelopes",
            post(envelopes::put_handler).get(envelopes::authored_handler),
        )
        .route("/envelopes/:id", get(envelopes::get_handler))
        .route("/envelopes/:id/wraps", post(envelopes::append_wrap_handler))
        .with_state(state)
}
