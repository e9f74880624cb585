use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

use crate::error::GwCloudError;

/// Runs `work` over `items` on at most `width` scoped threads and returns the
/// results in input order.
///
/// The first failure stops workers from taking further items; items already
/// in flight run to completion and their results are dropped.
pub fn run_ordered<T, R, F>(items: Vec<T>, width: usize, work: F) -> Result<Vec<R>, GwCloudError>
where
    T: Send,
    R: Send,
    F: Fn(T) -> Result<R, GwCloudError> + Sync,
{
    let count = items.len();
    if count == 0 {
        return Ok(Vec::new());
    }

    let queue = Mutex::new(items.into_iter().enumerate());
    let slots: Mutex<Vec<Option<R>>> = Mutex::new((0..count).map(|_| None).collect());
    let failure: Mutex<Option<GwCloudError>> = Mutex::new(None);
    let failed = AtomicBool::new(false);

    thread::scope(|scope| {
        for _ in 0..width.clamp(1, count) {
            scope.spawn(|| {
                loop {
                    if failed.load(Ordering::Acquire) {
                        break;
                    }
                    let next = queue
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .next();
                    let Some((index, item)) = next else {
                        break;
                    };
                    match work(item) {
                        Ok(result) => {
                            slots.lock().unwrap_or_else(PoisonError::into_inner)[index] =
                                Some(result);
                        }
                        Err(err) => {
                            failed.store(true, Ordering::Release);
                            failure
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .get_or_insert(err);
                            break;
                        }
                    }
                }
            });
        }
    });

    if let Some(err) = failure
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner)
    {
        return Err(err);
    }

    Ok(slots
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner)
        .into_iter()
        .flatten()
        .collect())
}
