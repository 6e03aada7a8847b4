//! Repetition.

use crate::cx::Cx;
use crate::types::Cause;
use std::future::Future;

/// Runs `step` over and over until it fails or the fiber is interrupted.
///
/// The fiber yields between iterations, which is also where an interrupt
/// is observed, so even a step that never suspends cannot starve other
/// fibers or ignore interruption.
pub async fn forever<A, E, F, Fut>(cx: &Cx, mut step: F) -> Result<A, Cause<E>>
where
    F: FnMut(Cx) -> Fut,
    Fut: Future<Output = Result<(), Cause<E>>>,
{
    loop {
        step(cx.clone()).await?;
        cx.yield_now().await?;
    }
}
