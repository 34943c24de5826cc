//! Hand evaluation.
//!
//! Ranks the best five-card selection out of up to seven cards into a
//! totally ordered (category, tiebreakers) pair. Identical card multisets
//! always evaluate identically.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::cards::Card;

/// Hand categories in ascending strength. The derived `Ord` gives the
/// total order; a royal flush is an ace-high straight flush.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HandCategory {
    HighCard,
    OnePair,
    TwoPair,
    ThreeOfAKind,
    Straight,
    Flush,
    FullHouse,
    FourOfAKind,
    StraightFlush,
}

impl fmt::Display for HandCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = match self {
            Self::HighCard => "High Card",
            Self::OnePair => "Pair",
            Self::TwoPair => "Two Pair",
            Self::ThreeOfAKind => "Three of a Kind",
            Self::Straight => "Straight",
            Self::Flush => "Flush",
            Self::FullHouse => "Full House",
            Self::FourOfAKind => "Four of a Kind",
            Self::StraightFlush => "Straight Flush",
        };
        write!(f, "{repr}")
    }
}

/// A fully comparable hand value. Tiebreakers are card values in decreasing
/// significance and have a fixed length within a category, so the derived
/// lexicographic `Ord` is the poker order.
#[derive(Clone, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
pub struct HandRank {
    pub category: HandCategory,
    pub tiebreakers: Vec<u8>,
}

impl HandRank {
    /// Human description for the hand-ended envelope, e.g.
    /// "Full House, Kings full of Threes" or "Flush, Ace high".
    #[must_use]
    pub fn description(&self) -> String {
        let tb = &self.tiebreakers;
        match self.category {
            HandCategory::HighCard => format!("High Card, {}", value_name(tb[0])),
            HandCategory::OnePair => format!("Pair of {}s", value_name(tb[0])),
            HandCategory::TwoPair => format!(
                "Two Pair, {}s and {}s",
                value_name(tb[0]),
                value_name(tb[1])
            ),
            HandCategory::ThreeOfAKind => {
                format!("Three of a Kind, {}s", value_name(tb[0]))
            }
            HandCategory::Straight => format!("Straight, {} high", value_name(tb[0])),
            HandCategory::Flush => format!("Flush, {} high", value_name(tb[0])),
            HandCategory::FullHouse => format!(
                "Full House, {}s full of {}s",
                value_name(tb[0]),
                value_name(tb[1])
            ),
            HandCategory::FourOfAKind => {
                format!("Four of a Kind, {}s", value_name(tb[0]))
            }
            HandCategory::StraightFlush => {
                if tb[0] == 14 {
                    "Royal Flush".to_string()
                } else {
                    format!("Straight Flush, {} high", value_name(tb[0]))
                }
            }
        }
    }
}

fn value_name(value: u8) -> String {
    match value {
        11 => "Jack".to_string(),
        12 => "Queen".to_string(),
        13 => "King".to_string(),
        14 => "Ace".to_string(),
        v => v.to_string(),
    }
}

/// Detect a straight among five distinct, descending values. The wheel
/// (A-2-3-4-5) counts as a 5-high straight.
fn check_straight(values: &[u8]) -> Option<u8> {
    let mut distinct: Vec<u8> = values.to_vec();
    distinct.dedup();
    if distinct.len() != 5 {
        return None;
    }
    if distinct[0] - distinct[4] == 4 {
        return Some(distinct[0]);
    }
    if distinct == [14, 5, 4, 3, 2] {
        return Some(5);
    }
    None
}

/// Evaluate exactly five cards.
#[must_use]
pub fn evaluate_five(cards: &[Card; 5]) -> HandRank {
    let mut values: Vec<u8> = cards.iter().map(Card::value).collect();
    values.sort_unstable_by(|a, b| b.cmp(a));

    let is_flush = cards.iter().all(|c| c.suit == cards[0].suit);
    let straight_high = check_straight(&values);

    if let (true, Some(high)) = (is_flush, straight_high) {
        return HandRank {
            category: HandCategory::StraightFlush,
            tiebreakers: vec![high],
        };
    }

    // Group values by multiplicity: (count, value) sorted so the most
    // significant group comes first.
    let mut groups: Vec<(u8, u8)> = Vec::with_capacity(5);
    for &v in &values {
        match groups.iter_mut().find(|(_, gv)| *gv == v) {
            Some((count, _)) => *count += 1,
            None => groups.push((1, v)),
        }
    }
    groups.sort_unstable_by(|a, b| b.cmp(a));

    let counts: Vec<u8> = groups.iter().map(|(c, _)| *c).collect();
    let ordered: Vec<u8> = groups.iter().map(|(_, v)| *v).collect();

    let (category, tiebreakers) = match counts.as_slice() {
        [4, 1] => (HandCategory::FourOfAKind, ordered),
        [3, 2] => (HandCategory::FullHouse, ordered),
        _ if is_flush => (HandCategory::Flush, values),
        _ if straight_high.is_some() => (
            HandCategory::Straight,
            vec![straight_high.unwrap_or_default()],
        ),
        [3, 1, 1] => (HandCategory::ThreeOfAKind, ordered),
        [2, 2, 1] => (HandCategory::TwoPair, ordered),
        [2, 1, 1, 1] => (HandCategory::OnePair, ordered),
        _ => (HandCategory::HighCard, values),
    };

    HandRank {
        category,
        tiebreakers,
    }
}

/// Find the best five-card hand among all 5-card subsets of the given cards
/// (typically two hole cards plus the board). Returns `None` when fewer than
/// five cards are available.
#[must_use]
pub fn best_hand(cards: &[Card]) -> Option<HandRank> {
    let n = cards.len();
    if n < 5 {
        return None;
    }

    let mut best: Option<HandRank> = None;
    for a in 0..n - 4 {
        for b in a + 1..n - 3 {
            for c in b + 1..n - 2 {
                for d in c + 1..n - 1 {
                    for e in d + 1..n {
                        let five = [cards[a], cards[b], cards[c], cards[d], cards[e]];
                        let rank = evaluate_five(&five);
                        if best.as_ref().is_none_or(|current| rank > *current) {
                            best = Some(rank);
                        }
                    }
                }
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::cards::{Rank, Suit};

    fn card(rank: Rank, suit: Suit) -> Card {
        Card::new(rank, suit)
    }

    fn hand(specs: [(Rank, Suit); 5]) -> [Card; 5] {
        specs.map(|(r, s)| card(r, s))
    }

    #[test]
    fn royal_flush_is_ace_high_straight_flush() {
        let rank = evaluate_five(&hand([
            (Rank::Ace, Suit::Spades),
            (Rank::King, Suit::Spades),
            (Rank::Queen, Suit::Spades),
            (Rank::Jack, Suit::Spades),
            (Rank::Ten, Suit::Spades),
        ]));
        assert_eq!(rank.category, HandCategory::StraightFlush);
        assert_eq!(rank.tiebreakers, vec![14]);
        assert_eq!(rank.description(), "Royal Flush");
    }

    #[test]
    fn straight_flush_beats_four_of_a_kind() {
        let straight_flush = evaluate_five(&hand([
            (Rank::Nine, Suit::Hearts),
            (Rank::Eight, Suit::Hearts),
            (Rank::Seven, Suit::Hearts),
            (Rank::Six, Suit::Hearts),
            (Rank::Five, Suit::Hearts),
        ]));
        let quads = evaluate_five(&hand([
            (Rank::Ace, Suit::Spades),
            (Rank::Ace, Suit::Hearts),
            (Rank::Ace, Suit::Diamonds),
            (Rank::Ace, Suit::Clubs),
            (Rank::King, Suit::Spades),
        ]));
        assert!(straight_flush > quads);
    }

    #[test]
    fn wheel_ranks_below_six_high_straight() {
        let wheel = evaluate_five(&hand([
            (Rank::Ace, Suit::Clubs),
            (Rank::Two, Suit::Diamonds),
            (Rank::Three, Suit::Spades),
            (Rank::Four, Suit::Hearts),
            (Rank::Five, Suit::Clubs),
        ]));
        let six_high = evaluate_five(&hand([
            (Rank::Two, Suit::Clubs),
            (Rank::Three, Suit::Diamonds),
            (Rank::Four, Suit::Spades),
            (Rank::Five, Suit::Hearts),
            (Rank::Six, Suit::Clubs),
        ]));
        assert_eq!(wheel.category, HandCategory::Straight);
        assert_eq!(wheel.tiebreakers, vec![5]);
        assert!(wheel < six_high);
    }

    #[test]
    fn full_house_description_reads_naturally() {
        let rank = evaluate_five(&hand([
            (Rank::King, Suit::Spades),
            (Rank::King, Suit::Hearts),
            (Rank::King, Suit::Diamonds),
            (Rank::Three, Suit::Clubs),
            (Rank::Three, Suit::Spades),
        ]));
        assert_eq!(rank.category, HandCategory::FullHouse);
        assert_eq!(rank.tiebreakers, vec![13, 3]);
        assert_eq!(rank.description(), "Full House, Kings full of Threes");
    }

    #[test]
    fn two_pair_kicker_breaks_ties() {
        let with_ace = evaluate_five(&hand([
            (Rank::Queen, Suit::Spades),
            (Rank::Queen, Suit::Hearts),
            (Rank::Seven, Suit::Diamonds),
            (Rank::Seven, Suit::Clubs),
            (Rank::Ace, Suit::Spades),
        ]));
        let with_king = evaluate_five(&hand([
            (Rank::Queen, Suit::Diamonds),
            (Rank::Queen, Suit::Clubs),
            (Rank::Seven, Suit::Spades),
            (Rank::Seven, Suit::Hearts),
            (Rank::King, Suit::Diamonds),
        ]));
        assert_eq!(with_ace.category, HandCategory::TwoPair);
        assert!(with_ace > with_king);
    }

    #[test]
    fn pair_kickers_ordered_by_significance() {
        let rank = evaluate_five(&hand([
            (Rank::Nine, Suit::Spades),
            (Rank::Nine, Suit::Hearts),
            (Rank::Ace, Suit::Diamonds),
            (Rank::Four, Suit::Clubs),
            (Rank::Jack, Suit::Spades),
        ]));
        assert_eq!(rank.category, HandCategory::OnePair);
        assert_eq!(rank.tiebreakers, vec![9, 14, 11, 4]);
    }

    #[test]
    fn best_hand_picks_flush_over_straight() {
        // Seven cards containing both a straight and a flush.
        let cards = vec![
            card(Rank::Two, Suit::Hearts),
            card(Rank::Five, Suit::Hearts),
            card(Rank::Nine, Suit::Hearts),
            card(Rank::Jack, Suit::Hearts),
            card(Rank::King, Suit::Hearts),
            card(Rank::Queen, Suit::Spades),
            card(Rank::Ten, Suit::Clubs),
        ];
        let rank = best_hand(&cards).unwrap();
        assert_eq!(rank.category, HandCategory::Flush);
        assert_eq!(rank.tiebreakers[0], 13);
    }

    #[test]
    fn best_hand_requires_five_cards() {
        let cards = vec![
            card(Rank::Ace, Suit::Spades),
            card(Rank::King, Suit::Spades),
        ];
        assert!(best_hand(&cards).is_none());
    }

    #[test]
    fn wheel_from_seven_cards() {
        // Hole A♣2♦ on a 3♠4♥5♣K♦Q♥ board.
        let cards = vec![
            card(Rank::Ace, Suit::Clubs),
            card(Rank::Two, Suit::Diamonds),
            card(Rank::Three, Suit::Spades),
            card(Rank::Four, Suit::Hearts),
            card(Rank::Five, Suit::Clubs),
            card(Rank::King, Suit::Diamonds),
            card(Rank::Queen, Suit::Hearts),
        ];
        let rank = best_hand(&cards).unwrap();
        assert_eq!(rank.category, HandCategory::Straight);
        assert_eq!(rank.tiebreakers, vec![5]);
    }

    #[test]
    fn identical_multisets_evaluate_identically() {
        let cards = hand([
            (Rank::Ten, Suit::Spades),
            (Rank::Ten, Suit::Hearts),
            (Rank::Four, Suit::Diamonds),
            (Rank::Eight, Suit::Clubs),
            (Rank::Two, Suit::Spades),
        ]);
        assert_eq!(evaluate_five(&cards), evaluate_five(&cards));
    }
}
