//! ACL-based policy forwarding engine with multi-link path selection.
//!
//! For every packet entering a designated ingress interface, the engine
//! classifies it via an ACL lookup, resolves a policy into an ordered or
//! randomized set of labeled egress links, and intersects the policy's
//! labeled links with the forwarding-table's equal-cost next-hops so that
//! routing correctness and policy intent are both respected.
//!
//! The datapath (`datapath` module) is synchronous, allocation-free, and
//! safe to call concurrently from multiple worker threads. Control-plane
//! mutation (`links`, `policy`, `attachment`, `locals`) is expected to run
//! from a single thread; see [`engine::Engine`] for the composed entry
//! point most consumers should use.

pub mod acl;
pub mod attachment;
pub mod config;
pub mod counters;
pub mod datapath;
pub mod default_route;
pub mod dpo;
pub mod engine;
pub mod error;
pub mod flow_hash;
pub mod label;
pub mod links;
pub mod locals;
pub mod packet;
pub mod policy;
pub mod quality;
pub mod routing;

pub use config::EngineConfig;
pub use dpo::{Dpo, DpoType};
pub use engine::Engine;
pub use error::EngineError;
pub use label::Label;
pub use quality::Quality;

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a default `tracing` subscriber if the embedding application
/// hasn't configured one already. Safe to call multiple times; only the
/// first call has any effect.
pub fn init() {
    INIT.call_once(|| {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .compact()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
