// Envelope model and wire codec

pub mod types;
pub mod codec;

pub use types::{
    is_reserved_id, Envelope, Heartbeat, Hello, Payload, PayloadKind, ResponseStatus, Target,
    BROADCAST_TARGET, MASTER_TARGET,
};
pub use codec::{decode_envelope, encode_envelope, MAX_ENVELOPE_SIZE};
