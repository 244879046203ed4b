//! store-core prelude

pub use crate::{
    anyhow::{self, Context, Result},
    tokio,
    tokio_util::sync::CancellationToken,
    tracing::{self, debug, error, info, instrument, trace, warn},
};

pub use std::sync::Arc;
