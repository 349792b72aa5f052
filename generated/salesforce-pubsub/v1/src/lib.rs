//! Generated gRPC bindings for the Salesforce Pub/Sub API.
//!
//! `eventbus.v1.rs` is produced by `build.rs` from `proto/pubsub_api.proto`.

#![allow(clippy::doc_lazy_continuation)]

pub mod eventbus {
    pub mod v1 {
        include!("eventbus.v1.rs");
    }
    pub const ENDPOINT: &str = "https://api.pubsub.salesforce.com:7443";
    pub const DE_ENDPOINT: &str = "https://api.deu.pubsub.salesforce.com:7443";
}
