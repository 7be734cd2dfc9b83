//! lifeline endpoint-resolution core.
//! Host-driven: no I/O; the client crate probes the network and feeds results back.

pub mod envelope;
pub mod host;
pub mod identity;
pub mod store;

pub use envelope::{
    build_envelope, build_envelope_with, open_envelope, seal_host, unix_timestamp, unseal_host,
    Envelope, EnvelopeError,
};
pub use host::{fastest, merge_hosts, Host, HostStatus};
pub use identity::{generate_device_id, is_usable_device_id, DeviceIdentity};
pub use store::{
    Advertisement, CandidateStore, CloudRegistry, FrontUpdate, ResolutionOutcome, StoreSnapshot,
};
