//! Token budget allocation across scored files.
//!
//! The allocator reserves template overhead first, then checks the
//! pass-through fast path: when every file fits at full fidelity, no lossy
//! step may run at all. Otherwise the effective budget is distributed
//! proportionally to score, with a floor per file: enough quota to show at
//! least its highest-density hunk, falling back to a header-only quota,
//! or dropping the file entirely. Partial hunks are never allocated.

use thiserror::Error;
use tracing::debug;

use crate::fit::{SECTION_SEPARATOR, render_floor, render_full};
use crate::patch::PatchSet;
use crate::tokens::{TokenBudget, TokenEstimator, estimate_or_max};

/// Raised when reserving overhead leaves no budget for content. Fatal for
/// the pass: no meaningful prompt can be built.
#[derive(Debug, Error)]
#[error("no token budget remains after reserving {reserved} of {max_tokens} tokens")]
pub struct BudgetExhaustedError {
    pub max_tokens: usize,
    pub reserved: usize,
}

/// Per-file token quotas, index-aligned with `PatchSet::files`.
/// `None` means the file is dropped (hard-excluded, or unaffordable).
#[derive(Debug, Clone)]
pub struct Allocation {
    /// Everything fit without compression; the fitter must render verbatim.
    pub pass_through: bool,
    pub quotas: Vec<Option<usize>>,
}

/// Trimmed-context window used when costing the per-file floor. Matches the
/// fitter's default so the floor is achievable at the hunk-pruned level.
const FLOOR_CONTEXT_LINES: usize = 3;

/// Distribute the budget across the set.
///
/// Units the estimator cannot measure are costed as over-budget
/// (fail-safe overestimate), so budgeting stays conservative.
pub fn allocate(
    set: &PatchSet,
    budget: &TokenBudget,
    estimator: &dyn TokenEstimator,
) -> Result<Allocation, BudgetExhaustedError> {
    let effective = budget.effective();
    if effective == 0 {
        return Err(BudgetExhaustedError {
            max_tokens: budget.max_tokens(),
            reserved: budget.reserved(),
        });
    }
    // Strictly over budget, so an unmeasurable unit can never pass the
    // fast path or satisfy a floor.
    let fail_safe = budget.max_tokens().saturating_add(1);

    let mut quotas: Vec<Option<usize>> = vec![None; set.files.len()];
    let eligible: Vec<usize> = set
        .files
        .iter()
        .enumerate()
        .filter(|(_, f)| !f.excluded)
        .map(|(i, _)| i)
        .collect();

    // Joiner between rendered file sections; reserved up front so the
    // assembled body stays within budget even at exact-fit sizes.
    let sep_cost = estimate_or_max(estimator, SECTION_SEPARATOR, fail_safe);
    let sep_total = sep_cost.saturating_mul(eligible.len().saturating_sub(1));

    // Pass-through fast path, checked before any lossy step.
    let full_costs: Vec<usize> = eligible
        .iter()
        .map(|&i| estimate_or_max(estimator, &render_full(&set.files[i]), fail_safe))
        .collect();
    let total: usize = full_costs
        .iter()
        .fold(sep_total, |acc, c| acc.saturating_add(*c));
    if total <= effective {
        for (&i, &cost) in eligible.iter().zip(&full_costs) {
            quotas[i] = Some(cost);
        }
        debug!("allocate: pass-through ({total} of {effective} tokens)");
        return Ok(Allocation {
            pass_through: true,
            quotas,
        });
    }

    // Lossy path: proportional shares in descending score order, so the
    // most important files claim their share first. Section separators are
    // paid for before any content share is handed out.
    let score_sum: f64 = eligible.iter().map(|&i| set.files[i].score.max(0.0)).sum();
    let spendable = effective.saturating_sub(sep_total);
    let mut remaining = spendable;

    for &idx in &set.by_score_desc() {
        let file = &set.files[idx];
        if file.excluded {
            continue;
        }

        let share = if score_sum > 0.0 {
            (spendable as f64 * file.score.max(0.0) / score_sum) as usize
        } else {
            spendable / eligible.len().max(1)
        };

        let hunk_floor =
            estimate_or_max(estimator, &render_floor(file, FLOOR_CONTEXT_LINES), fail_safe);
        let header_floor = estimate_or_max(estimator, &file.summary_line(), fail_safe);

        // All-or-nothing: grant at least the best hunk, else a header line,
        // else drop the file.
        let quota = if hunk_floor <= remaining {
            share.max(hunk_floor).min(remaining)
        } else if header_floor <= remaining {
            share.max(header_floor).min(remaining)
        } else {
            debug!("allocate: dropping '{}' (floor {hunk_floor} > {remaining})", file.path);
            continue;
        };

        quotas[idx] = Some(quota);
        remaining -= quota;
    }

    debug!(
        "allocate: lossy, {} of {} file(s) granted, {remaining} tokens unassigned",
        quotas.iter().filter(|q| q.is_some()).count(),
        set.files.len(),
    );
    Ok(Allocation {
        pass_through: false,
        quotas,
    })
}
