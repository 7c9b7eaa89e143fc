use std::future::Future;

use crate::StoreError;

/// Runs `fut` to completion from sync code.
///
/// Inside a multi-thread tokio runtime the current worker is handed off with
/// `block_in_place`; otherwise a throwaway current-thread runtime drives it.
pub fn block_on<Fut>(fut: Fut) -> Result<Fut::Output, StoreError>
where
    Fut: Future,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Ok(tokio::task::block_in_place(|| handle.block_on(fut))),
        Err(_) => {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| StoreError::Runtime(format!("tokio runtime init failed: {e}")))?;
            Ok(rt.block_on(fut))
        }
    }
}
