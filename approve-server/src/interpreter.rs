//! Effect interpreter that executes planned effects against a `Platform`.
//!
//! The interpreter is the boundary between the pure planner and the impure
//! world of I/O. It is the only code that mutates the platform.

use anyhow::{Context, Result};
use approve_core::{Effect, PullRequestId};
use tracing::{error, info};

use crate::platform::Platform;

/// Execute effects in order, stopping at the first failure.
///
/// Nothing is recorded locally, so a failed run is repaired by the next
/// evaluation recomputing the same plan. Returns the number of effects
/// executed.
pub async fn execute_effects<P: Platform + ?Sized>(
    platform: &P,
    pr: &PullRequestId,
    effects: &[Effect],
) -> Result<usize> {
    for (index, effect) in effects.iter().enumerate() {
        if let Err(err) = execute_effect(platform, pr, effect).await {
            error!(
                "{}: effect {} of {} failed: {:#}",
                pr,
                index + 1,
                effects.len(),
                err
            );
            return Err(err);
        }
    }
    Ok(effects.len())
}

async fn execute_effect<P: Platform + ?Sized>(
    platform: &P,
    pr: &PullRequestId,
    effect: &Effect,
) -> Result<()> {
    match effect {
        Effect::AddLabel { label } => {
            info!("{}: adding label '{}'", pr, label);
            platform
                .add_label(pr, label)
                .await
                .with_context(|| format!("Failed to add label '{}' to {}", label, pr))
        }
        Effect::RemoveLabel { label } => {
            info!("{}: removing label '{}'", pr, label);
            platform
                .remove_label(pr, label)
                .await
                .with_context(|| format!("Failed to remove label '{}' from {}", label, pr))
        }
        Effect::DeleteComment { comment_id } => {
            info!("{}: deleting stale notification {}", pr, comment_id);
            platform
                .delete_comment(pr, *comment_id)
                .await
                .with_context(|| format!("Failed to delete comment {} on {}", comment_id, pr))
        }
        Effect::CreateComment { body } => {
            let comment = platform
                .create_comment(pr, body)
                .await
                .with_context(|| format!("Failed to post notification on {}", pr))?;
            info!("{}: posted notification {}", pr, comment.id);
            Ok(())
        }
    }
}
