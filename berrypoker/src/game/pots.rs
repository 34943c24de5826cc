//! Main and side pot construction and award arithmetic.

use serde::{Deserialize, Serialize};

/// Whole chips. Stacks, bets, and pots never go fractional.
pub type Chips = u32;

/// Maximum seats at a table.
pub const MAX_SEATS: usize = 9;

/// A pot tier with the players eligible to win it. Folded players
/// contribute to the amount but never appear in the eligible set.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Pot {
    pub amount: Chips,
    pub eligible_players: Vec<String>,
}

/// One player's total contribution to the current hand.
#[derive(Clone, Debug)]
pub struct Contribution {
    pub name: String,
    pub seat: usize,
    pub total: Chips,
    pub folded: bool,
}

/// Refund the uncalled excess to the last aggressor: when exactly one
/// non-folded player put in more than everyone else could match, the
/// difference over the second-highest contribution goes back to them.
///
/// Returns `(name, amount)` when a refund applies; `contributions` are
/// adjusted in place.
pub fn refund_uncalled(contributions: &mut [Contribution]) -> Option<(String, Chips)> {
    let top_idx = contributions
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.folded)
        .max_by_key(|(_, c)| c.total)
        .map(|(i, _)| i)?;

    let second = contributions
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != top_idx)
        .map(|(_, c)| c.total)
        .max()
        .unwrap_or(0);

    let excess = contributions[top_idx].total.saturating_sub(second);
    if excess == 0 {
        return None;
    }
    contributions[top_idx].total -= excess;
    Some((contributions[top_idx].name.clone(), excess))
}

/// Build the ordered pot list from per-player hand contributions.
///
/// Tiers are cut at every distinct non-zero contribution level. A tier
/// whose contributors all folded is merged into the next tier with a
/// non-empty eligible set (or the last pot if none follows).
#[must_use]
pub fn build_pots(contributions: &[Contribution]) -> Vec<Pot> {
    let mut levels: Vec<Chips> = contributions
        .iter()
        .filter(|c| c.total > 0)
        .map(|c| c.total)
        .collect();
    levels.sort_unstable();
    levels.dedup();

    let mut pots: Vec<Pot> = Vec::new();
    let mut carry: Chips = 0;
    let mut prev: Chips = 0;

    for level in levels {
        let contributors = contributions.iter().filter(|c| c.total >= level).count() as Chips;
        let amount = (level - prev) * contributors + carry;
        carry = 0;

        let mut eligible: Vec<&Contribution> = contributions
            .iter()
            .filter(|c| c.total >= level && !c.folded)
            .collect();
        eligible.sort_unstable_by_key(|c| c.seat);

        if eligible.is_empty() {
            carry = amount;
        } else {
            pots.push(Pot {
                amount,
                eligible_players: eligible.iter().map(|c| c.name.clone()).collect(),
            });
        }
        prev = level;
    }

    if carry > 0 {
        if let Some(last) = pots.last_mut() {
            last.amount += carry;
        } else {
            // Every contributor folded: only reachable through pathological
            // inputs, but chips must not vanish.
            pots.push(Pot {
                amount: carry,
                eligible_players: contributions.iter().map(|c| c.name.clone()).collect(),
            });
        }
    }

    pots
}

/// Clockwise distance of `seat` from the first seat left of the dealer.
/// Used as the deterministic tie-break when walking odd chips.
#[must_use]
pub fn distance_from_dealer(seat: usize, dealer_seat: usize) -> usize {
    (seat + MAX_SEATS - dealer_seat - 1) % MAX_SEATS
}

/// Split `amount` equally among `winners`, walking the remainder one chip
/// at a time in the given order. Returns per-winner payouts.
#[must_use]
pub fn split_pot(amount: Chips, winners: usize) -> Vec<Chips> {
    if winners == 0 {
        return Vec::new();
    }
    let share = amount / winners as Chips;
    let remainder = amount % winners as Chips;
    (0..winners)
        .map(|i| share + Chips::from((i as Chips) < remainder))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contribution(name: &str, seat: usize, total: Chips, folded: bool) -> Contribution {
        Contribution {
            name: name.to_string(),
            seat,
            total,
            folded,
        }
    }

    #[test]
    fn single_level_yields_one_pot() {
        let contributions = vec![
            contribution("alice", 0, 50, false),
            contribution("bob", 1, 50, false),
            contribution("carol", 2, 50, false),
        ];
        let pots = build_pots(&contributions);
        assert_eq!(pots.len(), 1);
        assert_eq!(pots[0].amount, 150);
        assert_eq!(pots[0].eligible_players, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn all_in_ladder_with_refund() {
        // Stacks 50/100/200 all in pre-flop. The 100 chips nobody could
        // call go back to the deep stack before pots are built.
        let mut contributions = vec![
            contribution("short", 0, 50, false),
            contribution("mid", 1, 100, false),
            contribution("deep", 2, 200, false),
        ];
        let refund = refund_uncalled(&mut contributions);
        assert_eq!(refund, Some(("deep".to_string(), 100)));

        let pots = build_pots(&contributions);
        assert_eq!(pots.len(), 2);
        assert_eq!(pots[0].amount, 150);
        assert_eq!(pots[0].eligible_players, vec!["short", "mid", "deep"]);
        assert_eq!(pots[1].amount, 100);
        assert_eq!(pots[1].eligible_players, vec!["mid", "deep"]);
    }

    #[test]
    fn folded_players_fund_but_cannot_win() {
        let contributions = vec![
            contribution("folder", 0, 50, true),
            contribution("alice", 1, 100, false),
            contribution("bob", 2, 100, false),
        ];
        let pots = build_pots(&contributions);
        let total: Chips = pots.iter().map(|p| p.amount).sum();
        assert_eq!(total, 250);
        for pot in &pots {
            assert!(!pot.eligible_players.contains(&"folder".to_string()));
        }
    }

    #[test]
    fn folded_only_tier_merges_forward() {
        // The folder contributed the least, so the first tier includes them;
        // a tier where only folders reach the level merges into the next.
        let contributions = vec![
            contribution("folder", 0, 80, true),
            contribution("alice", 1, 50, false),
            contribution("bob", 2, 100, false),
        ];
        let pots = build_pots(&contributions);
        let total: Chips = pots.iter().map(|p| p.amount).sum();
        assert_eq!(total, 230);
        // Level 50: 150 to {alice, bob}. Level 80: 60 folder-only, merged
        // into level 100's 20 for {bob}.
        assert_eq!(pots[0].amount, 150);
        assert_eq!(pots[0].eligible_players, vec!["alice", "bob"]);
        assert_eq!(pots[1].amount, 80);
        assert_eq!(pots[1].eligible_players, vec!["bob"]);
    }

    #[test]
    fn no_refund_when_top_bet_is_matched() {
        let mut contributions = vec![
            contribution("alice", 0, 100, false),
            contribution("bob", 1, 100, false),
        ];
        assert_eq!(refund_uncalled(&mut contributions), None);
    }

    #[test]
    fn refund_when_everyone_folds_to_a_raise() {
        let mut contributions = vec![
            contribution("sb", 0, 1, true),
            contribution("bb", 1, 2, true),
            contribution("raiser", 2, 10, false),
        ];
        let refund = refund_uncalled(&mut contributions);
        assert_eq!(refund, Some(("raiser".to_string(), 8)));
        let pots = build_pots(&contributions);
        let total: Chips = pots.iter().map(|p| p.amount).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn split_pot_walks_odd_chips_to_the_front() {
        assert_eq!(split_pot(101, 2), vec![51, 50]);
        assert_eq!(split_pot(100, 3), vec![34, 33, 33]);
        assert_eq!(split_pot(99, 3), vec![33, 33, 33]);
    }

    #[test]
    fn distance_orders_from_left_of_dealer() {
        assert_eq!(distance_from_dealer(1, 0), 0);
        assert_eq!(distance_from_dealer(0, 0), 8);
        assert_eq!(distance_from_dealer(0, 8), 0);
        assert!(distance_from_dealer(2, 0) < distance_from_dealer(8, 0));
    }
}
