//! Property-based checks for the hand evaluator.

use berrypoker::game::cards::{Card, Rank, Suit};
use berrypoker::game::eval::{best_hand, evaluate_five, HandCategory};
use proptest::prelude::*;

fn full_deck() -> Vec<Card> {
    Suit::ALL
        .iter()
        .flat_map(|&suit| Rank::ALL.iter().map(move |&rank| Card::new(rank, suit)))
        .collect()
}

fn seven_distinct_cards() -> impl Strategy<Value = Vec<Card>> {
    proptest::sample::subsequence(full_deck(), 7)
}

fn five_distinct_cards() -> impl Strategy<Value = Vec<Card>> {
    proptest::sample::subsequence(full_deck(), 5)
}

proptest! {
    /// The same seven cards always evaluate to the same rank.
    #[test]
    fn evaluation_is_deterministic(cards in seven_distinct_cards()) {
        let first = best_hand(&cards).unwrap();
        let second = best_hand(&cards).unwrap();
        prop_assert_eq!(first, second);
    }

    /// The best-of-seven rank is at least as good as any particular
    /// five-card subset.
    #[test]
    fn best_hand_dominates_subsets(cards in seven_distinct_cards()) {
        let best = best_hand(&cards).unwrap();
        let five = [cards[0], cards[1], cards[2], cards[3], cards[4]];
        prop_assert!(best >= evaluate_five(&five));
    }

    /// Card order never matters.
    #[test]
    fn evaluation_ignores_order(cards in five_distinct_cards()) {
        let forward = [cards[0], cards[1], cards[2], cards[3], cards[4]];
        let reversed = [cards[4], cards[3], cards[2], cards[1], cards[0]];
        prop_assert_eq!(evaluate_five(&forward), evaluate_five(&reversed));
    }

    /// Tiebreaker vectors have the right arity for their category.
    #[test]
    fn tiebreaker_lengths_are_fixed(cards in five_distinct_cards()) {
        let five = [cards[0], cards[1], cards[2], cards[3], cards[4]];
        let rank = evaluate_five(&five);
        let expected = match rank.category {
            HandCategory::HighCard | HandCategory::Flush => 5,
            HandCategory::OnePair => 4,
            HandCategory::TwoPair | HandCategory::ThreeOfAKind => 3,
            HandCategory::FourOfAKind | HandCategory::FullHouse => 2,
            HandCategory::Straight | HandCategory::StraightFlush => 1,
        };
        prop_assert_eq!(rank.tiebreakers.len(), expected);
    }

    /// Every tiebreaker is a real card value.
    #[test]
    fn tiebreakers_are_card_values(cards in seven_distinct_cards()) {
        let rank = best_hand(&cards).unwrap();
        for &value in &rank.tiebreakers {
            prop_assert!((2..=14).contains(&value));
        }
    }

    /// Adding cards can only improve a hand.
    #[test]
    fn extra_cards_never_hurt(cards in seven_distinct_cards()) {
        let five = &cards[..5];
        let six = &cards[..6];
        let five_rank = best_hand(five).unwrap();
        let six_rank = best_hand(six).unwrap();
        let seven_rank = best_hand(&cards).unwrap();
        prop_assert!(six_rank >= five_rank);
        prop_assert!(seven_rank >= six_rank);
    }
}

#[test]
fn category_order_is_the_poker_order() {
    assert!(HandCategory::HighCard < HandCategory::OnePair);
    assert!(HandCategory::OnePair < HandCategory::TwoPair);
    assert!(HandCategory::TwoPair < HandCategory::ThreeOfAKind);
    assert!(HandCategory::ThreeOfAKind < HandCategory::Straight);
    assert!(HandCategory::Straight < HandCategory::Flush);
    assert!(HandCategory::Flush < HandCategory::FullHouse);
    assert!(HandCategory::FullHouse < HandCategory::FourOfAKind);
    assert!(HandCategory::FourOfAKind < HandCategory::StraightFlush);
}
