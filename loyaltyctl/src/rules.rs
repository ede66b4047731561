//! Points arithmetic shared by the ledger: what an order earns, what a redemption costs, and
//! how the first-purchase bonus applies. Everything here is pure so the ledger's transactional
//! code only has to fetch inputs and persist results.

use crate::db::models::points::RedemptionItem;

/// Breakdown of the points credited for one completed order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditAmount {
    pub earned: i64,
    pub bonus: i64,
}

impl CreditAmount {
    pub fn total(&self) -> i64 {
        self.earned + self.bonus
    }
}

/// Units counted for a line. Missing, zero or negative quantities count as one.
pub fn effective_quantity(quantity: Option<i32>) -> i64 {
    i64::from(quantity.unwrap_or(1).max(1))
}

/// Sum of `points_per_unit * quantity` over an order's lines. `None` on overflow.
pub fn earned_points<I>(lines: I) -> Option<i64>
where
    I: IntoIterator<Item = (i64, i32)>,
{
    lines.into_iter().try_fold(0i64, |acc, (per_unit, quantity)| {
        per_unit.checked_mul(i64::from(quantity)).and_then(|line| acc.checked_add(line))
    })
}

/// Points to credit for an order. The bonus applies only to a user with no balance and no
/// ledger history, and only when the order itself earns something.
pub fn credit_amount(earned: i64, current_balance: i64, has_history: bool, first_purchase_bonus: i64) -> CreditAmount {
    let is_first = current_balance == 0 && !has_history;
    let bonus = if is_first && earned > 0 { first_purchase_bonus } else { 0 };
    CreditAmount { earned, bonus }
}

/// Total redemption cost given `(cost_per_unit, requested_quantity)` lines. `None` on overflow.
pub fn redemption_cost<I>(lines: I) -> Option<i64>
where
    I: IntoIterator<Item = (i64, Option<i32>)>,
{
    lines.into_iter().try_fold(0i64, |acc, (per_unit, quantity)| {
        per_unit
            .checked_mul(effective_quantity(quantity))
            .and_then(|line| acc.checked_add(line))
    })
}

/// Human-readable note stored on a redemption entry
pub fn redemption_note(items: &[RedemptionItem]) -> String {
    let listed: Vec<serde_json::Value> = items
        .iter()
        .map(|item| {
            serde_json::json!({
                "product_id": item.product_id,
                "quantity": effective_quantity(item.quantity),
            })
        })
        .collect();
    format!("Redeemed for products: {}", serde_json::Value::Array(listed))
}

/// Note stored on a credit entry
pub fn credit_note(order_id: uuid::Uuid, amount: &CreditAmount) -> String {
    if amount.bonus > 0 {
        format!(
            "Points credited for order {order_id} (includes first purchase bonus of {})",
            amount.bonus
        )
    } else {
        format!("Points credited for order {order_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_earned_points_sums_lines() {
        assert_eq!(earned_points([(50, 2)]), Some(100));
        assert_eq!(earned_points([(50, 2), (10, 3), (0, 7)]), Some(130));
        assert_eq!(earned_points(std::iter::empty()), Some(0));
    }

    #[test]
    fn test_earned_points_overflow() {
        assert_eq!(earned_points([(i64::MAX, 2)]), None);
        assert_eq!(earned_points([(i64::MAX, 1), (1, 1)]), None);
    }

    #[test]
    fn test_first_purchase_bonus() {
        // Fresh user: 2 x 50 points + 100 bonus
        let amount = credit_amount(100, 0, false, 100);
        assert_eq!(amount, CreditAmount { earned: 100, bonus: 100 });
        assert_eq!(amount.total(), 200);

        // Any prior entry means no bonus, even at zero balance
        assert_eq!(credit_amount(100, 0, true, 100).bonus, 0);

        // Non-zero balance means no bonus
        assert_eq!(credit_amount(100, 200, true, 100).bonus, 0);

        // Orders that earn nothing never trigger the bonus
        assert_eq!(credit_amount(0, 0, false, 100).total(), 0);
    }

    #[test]
    fn test_effective_quantity_floor() {
        assert_eq!(effective_quantity(None), 1);
        assert_eq!(effective_quantity(Some(0)), 1);
        assert_eq!(effective_quantity(Some(-4)), 1);
        assert_eq!(effective_quantity(Some(3)), 3);
    }

    #[test]
    fn test_redemption_cost() {
        assert_eq!(redemption_cost([(150, Some(1))]), Some(150));
        assert_eq!(redemption_cost([(150, None), (20, Some(0)), (5, Some(4))]), Some(190));
        assert_eq!(redemption_cost([(i64::MAX, Some(2))]), None);
    }

    #[test]
    fn test_notes() {
        let order_id = Uuid::nil();
        let with_bonus = credit_note(order_id, &CreditAmount { earned: 100, bonus: 100 });
        assert!(with_bonus.contains("first purchase bonus of 100"));
        assert!(!credit_note(order_id, &CreditAmount { earned: 100, bonus: 0 }).contains("bonus"));

        let product_id = Uuid::new_v4();
        let note = redemption_note(&[RedemptionItem {
            product_id,
            quantity: None,
        }]);
        assert!(note.starts_with("Redeemed for products: "));
        assert!(note.contains(&product_id.to_string()));
        assert!(note.contains("\"quantity\":1"));
    }
}
