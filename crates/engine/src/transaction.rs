//! Running a state invocation inside a retryable transaction
//!
//! The commit protocol may abort and restart a transaction any number of
//! times. To keep the model consistent, every attempt runs against a fresh
//! clone of the model, and the clone replaces the model only after the
//! commit succeeds. Mutations made by aborted attempts are dropped with
//! their clone.
//!
//! If an attempt fails because the operation cannot run inside a
//! transaction (per the `FallbackPolicy`), the transactional path is
//! abandoned and the state function runs once more, directly, against the
//! original model and the real connection cache.

use crate::cache::TransactionCacheGuard;
use crate::retry::{FallbackPolicy, RetryConfig};
use crate::state::{StateContext, StateFn};
use churn_core::{ChurnResult, Session};
use tracing::{debug, warn};

/// How a transactional invocation completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionOutcome {
    /// Number of attempts that were aborted and retried
    pub retries: usize,
    /// True if the invocation finally ran outside of a transaction
    pub fell_back: bool,
}

/// Run `state_fn` as the body of a transaction on `session`
///
/// # Arguments
/// * `session` - Session owning the transaction
/// * `retry` - Which failures restart the transaction, and how often
/// * `fallback` - Which failures abandon the transaction for a direct call
/// * `state_fn` - The state to run
/// * `data` - The thread's model; only replaced after a successful commit
/// * `ctx` - Non-transactional context; used as-is for the fallback call
///
/// # Returns
/// * `Ok(TransactionOutcome)` - committed, or completed by fallback
/// * `Err` - any other failure, or transient failures past `max_retries`
pub fn run_in_transaction<M: Clone>(
    session: &dyn Session,
    retry: &RetryConfig,
    fallback: &FallbackPolicy,
    state_fn: &StateFn<M>,
    data: &mut M,
    ctx: &StateContext<'_>,
) -> ChurnResult<TransactionOutcome> {
    let guard = TransactionCacheGuard;
    let txn_ctx = ctx.transactional(&guard);

    let mut attempt = 0;
    loop {
        let mut speculative = data.clone();
        let result = session
            .start_transaction()
            .and_then(|()| state_fn(&mut speculative, &txn_ctx))
            .and_then(|()| session.commit_transaction());

        let err = match result {
            Ok(()) => {
                *data = speculative;
                debug!(
                    target: "churn::txn",
                    tid = ctx.tid(),
                    state = ctx.state(),
                    attempt,
                    "Transaction committed"
                );
                return Ok(TransactionOutcome {
                    retries: attempt,
                    fell_back: false,
                });
            }
            Err(err) => err,
        };
        drop(speculative);

        if session.in_transaction() {
            if let Err(abort_err) = session.abort_transaction() {
                debug!(target: "churn::txn", error = %abort_err, "Abort after failed attempt failed");
            }
        }

        if fallback.should_fall_back(&err) {
            warn!(
                target: "churn::txn",
                tid = ctx.tid(),
                state = ctx.state(),
                error = %err,
                "Operation not supported in transaction, running it directly"
            );
            state_fn(data, ctx)?;
            return Ok(TransactionOutcome {
                retries: attempt,
                fell_back: true,
            });
        }

        if retry.is_retryable(&err) && attempt < retry.max_retries {
            warn!(
                target: "churn::txn",
                tid = ctx.tid(),
                state = ctx.state(),
                attempt,
                error = %err,
                "Retrying transaction"
            );
            std::thread::sleep(retry.calculate_delay(attempt));
            attempt += 1;
            continue;
        }

        return Err(err);
    }
}
