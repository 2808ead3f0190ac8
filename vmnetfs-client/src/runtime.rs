//! On-demand shared tokio runtime, so the synchronous image I/O core can
//! call into an async HTTP client without every caller spinning up its own
//! executor. Mirrors the on-demand `get_runtime`/`block_on` pair the
//! teacher's own `tools::runtime` module provides, minus the worker-thread
//! bookkeeping that module needs for its CLI's more complex call graph.

use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Builder, Runtime};

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

fn runtime() -> &'static Runtime {
    RUNTIME.get_or_init(|| {
        Builder::new_multi_thread()
            .enable_all()
            .thread_name("vmnetfs-transport")
            .build()
            .expect("failed to start transport runtime")
    })
}

/// Runs `fut` to completion on the shared transport runtime, blocking the
/// calling (FUSE worker) thread.
pub fn block_on<F: Future>(fut: F) -> F::Output {
    runtime().block_on(fut)
}
