// Interrupt flag shared by workers, the local pool and the indexer.
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use signal_hook::consts::TERM_SIGNALS;
use signal_hook::flag;

use crate::api::queue::ApiResult;
use crate::core::error::{Error, ErrorKind};

/// Raises the returned flag on SIGINT/SIGTERM/SIGQUIT; a second signal exits immediately.
pub fn install_interrupt_flag() -> ApiResult<Arc<AtomicBool>> {
    let interrupted = Arc::new(AtomicBool::new(false));
    for signal in TERM_SIGNALS {
        // Registered first so it only fires once the flag below is already set.
        flag::register_conditional_shutdown(*signal, 130, Arc::clone(&interrupted)).map_err(install_error)?;
        flag::register(*signal, Arc::clone(&interrupted)).map_err(install_error)?;
    }
    Ok(interrupted)
}

fn install_error(err: std::io::Error) -> Error {
    Error::new(ErrorKind::Internal)
        .with_message("failed to install signal handler")
        .with_source(err)
}
