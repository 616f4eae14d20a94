//! Splitting a material-level request across its price variants.

use serde::{Deserialize, Serialize};

use stockyard_core::{DomainError, DomainResult, MaterialCostId, Quantity};

use crate::material::MaterialCost;

/// Which price variants are consumed first.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationOrder {
    /// Lowest `cost_m19` first (issuing stock out).
    CheapestFirst,
    /// Highest `cost_m19` first (taking stock back).
    MostExpensiveFirst,
}

/// A price variant and how much of it is available at the source.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub cost: MaterialCost,
    pub available: Quantity,
}

/// Split `requested` across `candidates` in price order.
///
/// Ties on price are broken by cost id so the split is deterministic.
pub fn allocate(
    mut candidates: Vec<Candidate>,
    requested: Quantity,
    order: AllocationOrder,
    source: &str,
) -> DomainResult<Vec<(MaterialCostId, Quantity)>> {
    if requested.is_zero() {
        return Err(DomainError::validation("requested amount must be positive"));
    }
    candidates.sort_by(|a, b| {
        let by_price = a.cost.cost_m19.cmp(&b.cost.cost_m19);
        let by_price = match order {
            AllocationOrder::CheapestFirst => by_price,
            AllocationOrder::MostExpensiveFirst => by_price.reverse(),
        };
        by_price.then_with(|| a.cost.id.cmp(&b.cost.id))
    });

    // Saturating: `requested` is itself bounded, so the comparison stays exact.
    let total = candidates
        .iter()
        .fold(Quantity::ZERO, |acc, c| acc.saturating_add(c.available));
    if total < requested {
        return Err(DomainError::insufficient_stock(
            source,
            total.value(),
            requested.value(),
        ));
    }

    let mut remaining = requested;
    let mut parts = Vec::new();
    for candidate in candidates {
        if remaining.is_zero() {
            break;
        }
        let take = candidate.available.min(remaining);
        if take.is_zero() {
            continue;
        }
        parts.push((candidate.cost.id, take));
        remaining = remaining.checked_sub(take).unwrap_or(Quantity::ZERO);
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use stockyard_core::MaterialId;

    fn candidate(price: Decimal, available: u64) -> Candidate {
        Candidate {
            cost: MaterialCost::new(MaterialCostId::new(), MaterialId::new(), price, price, price)
                .unwrap(),
            available: Quantity::from_units(available),
        }
    }

    #[test]
    fn cheapest_first_drains_low_prices() {
        let cheap = candidate(dec!(1), 5);
        let mid = candidate(dec!(2), 5);
        let dear = candidate(dec!(3), 5);
        let parts = allocate(
            vec![dear.clone(), cheap.clone(), mid.clone()],
            Quantity::from_units(7),
            AllocationOrder::CheapestFirst,
            "wh",
        )
        .unwrap();
        assert_eq!(
            parts,
            vec![
                (cheap.cost.id, Quantity::from_units(5)),
                (mid.cost.id, Quantity::from_units(2)),
            ]
        );
    }

    #[test]
    fn most_expensive_first_for_returns() {
        let cheap = candidate(dec!(1), 5);
        let dear = candidate(dec!(3), 5);
        let parts = allocate(
            vec![cheap.clone(), dear.clone()],
            Quantity::from_units(6),
            AllocationOrder::MostExpensiveFirst,
            "team",
        )
        .unwrap();
        assert_eq!(parts[0], (dear.cost.id, Quantity::from_units(5)));
        assert_eq!(parts[1], (cheap.cost.id, Quantity::from_units(1)));
    }

    #[test]
    fn shortfall_reports_total_available() {
        let err = allocate(
            vec![candidate(dec!(1), 2), candidate(dec!(2), 3)],
            Quantity::from_units(6),
            AllocationOrder::CheapestFirst,
            "wh",
        )
        .unwrap_err();
        match err {
            DomainError::InsufficientStock {
                available,
                requested,
                ..
            } => {
                assert_eq!(available, dec!(5));
                assert_eq!(requested, dec!(6));
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
    }

    #[test]
    fn empty_variants_are_skipped() {
        let empty = candidate(dec!(0.5), 0);
        let full = candidate(dec!(1), 4);
        let parts = allocate(
            vec![empty, full.clone()],
            Quantity::from_units(4),
            AllocationOrder::CheapestFirst,
            "wh",
        )
        .unwrap();
        assert_eq!(parts, vec![(full.cost.id, Quantity::from_units(4))]);
    }
}
