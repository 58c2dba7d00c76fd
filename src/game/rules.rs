//! Duel Rules
//!
//! Pure state transitions for a single action. The engine's worker is the
//! only caller in production; tests drive these functions directly.

use thiserror::Error;

use crate::game::action::{Action, ActionKind};
use crate::game::card::CardId;
use crate::game::state::{opponent_of, Duel, EndReason, Identity};
use crate::{
    DECK_SIZE, MAX_MANA, OPENING_HAND_SIZE, STARTING_HIT_POINTS, STARTING_MANA, TURN_LIMIT,
};

/// Configuration for duel rules.
#[derive(Debug, Clone)]
pub struct DuelConfig {
    /// Hit points each player starts with.
    pub starting_hit_points: i32,
    /// Mana on the first turn.
    pub starting_mana: u32,
    /// Mana ceiling.
    pub max_mana: u32,
    /// Cards dealt to each player.
    pub opening_hand_size: usize,
    /// Notional deck size shown to clients.
    pub deck_size: u32,
    /// Passes after which the duel ends without a winner.
    pub turn_limit: u32,
    /// Capacity of the engine's action queue.
    pub action_queue_capacity: usize,
}

impl Default for DuelConfig {
    fn default() -> Self {
        Self {
            starting_hit_points: STARTING_HIT_POINTS,
            starting_mana: STARTING_MANA,
            max_mana: MAX_MANA,
            opening_hand_size: OPENING_HAND_SIZE,
            deck_size: DECK_SIZE,
            turn_limit: TURN_LIMIT,
            action_queue_capacity: 100,
        }
    }
}

/// Why an action was discarded.
///
/// Never surfaced to the submitter, which has already returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionRejected {
    /// Duel already finished.
    #[error("duel already finished")]
    DuelFinished,
    /// Actor has no seat in this duel.
    #[error("{0} is not part of this duel")]
    NotParticipant(Identity),
    /// Actor is not the active player.
    #[error("not {0}'s turn")]
    OutOfTurn(Identity),
    /// Action needs a card id and none was given.
    #[error("action requires a card id")]
    MissingCard,
    /// Attacking card is neither in play nor in hand.
    #[error("card {0} is not available to attack")]
    CardNotAvailable(CardId),
    /// Card to play is not in hand.
    #[error("card {0} is not in hand")]
    CardNotInHand(CardId),
    /// Not enough mana to play the card.
    #[error("card {card_id} costs {cost}, only {mana} mana available")]
    InsufficientMana {
        /// Card that was played.
        card_id: CardId,
        /// Its cost.
        cost: u32,
        /// Mana the player had.
        mana: u32,
    },
}

/// What an applied action did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionEffect {
    /// A card moved from hand to play area.
    CardPlayed {
        /// Card played.
        card_id: CardId,
        /// Mana left afterwards.
        mana_left: u32,
    },
    /// Card-vs-card attack destroyed the target.
    CardDestroyed {
        /// Attacking card.
        attacker: CardId,
        /// Destroyed card.
        target: CardId,
    },
    /// Card-vs-card attack did not get through the target's defense.
    AttackBlocked {
        /// Attacking card.
        attacker: CardId,
        /// Target card.
        target: CardId,
    },
    /// Damage dealt straight to the opponent.
    DirectHit {
        /// Attacking card.
        attacker: CardId,
        /// Damage dealt.
        damage: i32,
    },
    /// Turn handed over.
    TurnPassed {
        /// New turn number.
        turn: u32,
    },
}

/// Result of applying one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    /// What happened.
    pub effect: ActionEffect,
    /// Set when this action ended the duel.
    pub ended: Option<EndReason>,
    /// Winner, if it ended by knockout.
    pub winner: Option<Identity>,
}

/// Apply `action` to `duel`, then evaluate termination.
///
/// Rejected actions leave the duel untouched.
pub fn apply_action(
    duel: &mut Duel,
    action: &Action,
    config: &DuelConfig,
) -> Result<ActionResult, ActionRejected> {
    if duel.is_finished() {
        return Err(ActionRejected::DuelFinished);
    }

    let seat = duel
        .seat_of(&action.actor)
        .ok_or_else(|| ActionRejected::NotParticipant(action.actor.clone()))?;

    if seat != duel.active_player_index {
        return Err(ActionRejected::OutOfTurn(action.actor.clone()));
    }

    let effect = match action.kind {
        ActionKind::PlayCard => play_card(duel, seat, action.card_id)?,
        ActionKind::Attack => attack(duel, seat, action.card_id, action.target_card_id)?,
        ActionKind::Pass => pass_turn(duel),
    };

    let ended = check_duel_end(duel, config);

    Ok(ActionResult {
        effect,
        ended,
        winner: duel.winner.clone(),
    })
}

fn play_card(
    duel: &mut Duel,
    seat: usize,
    card_id: Option<CardId>,
) -> Result<ActionEffect, ActionRejected> {
    let card_id = card_id.ok_or(ActionRejected::MissingCard)?;
    let player = &mut duel.players[seat];

    let pos = player
        .hand
        .iter()
        .position(|c| c.id == card_id)
        .ok_or(ActionRejected::CardNotInHand(card_id))?;

    let cost = player.hand[pos].cost;
    if cost > player.mana {
        return Err(ActionRejected::InsufficientMana {
            card_id,
            cost,
            mana: player.mana,
        });
    }

    player.mana -= cost;
    let card = player.hand.remove(pos);
    player.play_area.push(card);

    Ok(ActionEffect::CardPlayed {
        card_id,
        mana_left: player.mana,
    })
}

fn attack(
    duel: &mut Duel,
    seat: usize,
    card_id: Option<CardId>,
    target_id: Option<CardId>,
) -> Result<ActionEffect, ActionRejected> {
    let card_id = card_id.ok_or(ActionRejected::MissingCard)?;

    // Board first, then hand
    let attack_pts = {
        let attacker = &duel.players[seat];
        attacker
            .board_card(card_id)
            .or_else(|| attacker.hand_card(card_id))
            .map(|c| c.attack)
            .ok_or(ActionRejected::CardNotAvailable(card_id))?
    };

    let defender = &mut duel.players[opponent_of(seat)];
    let target_pos =
        target_id.and_then(|t| defender.play_area.iter().position(|c| c.id == t));

    let effect = match target_pos {
        Some(pos) => {
            let target = defender.play_area[pos].id;
            if attack_pts.saturating_sub(defender.play_area[pos].defense) > 0 {
                defender.play_area.remove(pos);
                ActionEffect::CardDestroyed {
                    attacker: card_id,
                    target,
                }
            } else {
                ActionEffect::AttackBlocked {
                    attacker: card_id,
                    target,
                }
            }
        }
        None => {
            // Negative attack never heals
            let damage = attack_pts.max(0);
            defender.hit_points = defender.hit_points.saturating_sub(damage);
            ActionEffect::DirectHit {
                attacker: card_id,
                damage,
            }
        }
    };

    Ok(effect)
}

fn pass_turn(duel: &mut Duel) -> ActionEffect {
    duel.active_player_index = opponent_of(duel.active_player_index);
    duel.turn_count += 1;

    // Incoming player's mana grows by one every full round
    let round = (duel.turn_count + 1) / 2;
    let incoming = &mut duel.players[duel.active_player_index];
    incoming.mana = round.min(incoming.max_mana);

    ActionEffect::TurnPassed {
        turn: duel.turn_count,
    }
}

/// Finish the duel if a player is down or the turn ceiling is passed.
///
/// Returns the reason when this call ended the duel.
pub fn check_duel_end(duel: &mut Duel, config: &DuelConfig) -> Option<EndReason> {
    if duel.is_finished() {
        return None;
    }

    if let Some(loser) = duel.players.iter().position(|p| p.is_defeated()) {
        let winner = duel.players[opponent_of(loser)].identity.clone();
        duel.finish(EndReason::Knockout, Some(winner));
        return Some(EndReason::Knockout);
    }

    // turn_count starts at 1, so this trips on pass number `turn_limit`
    if duel.turn_count > config.turn_limit {
        duel.finish(EndReason::TurnLimit, None);
        return Some(EndReason::TurnLimit);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::card::Card;
    use crate::game::state::{DuelStatus, PlayerState};
    use proptest::prelude::*;
    use uuid::Uuid;

    fn duel_with_hands(hand_a: Vec<Card>, hand_b: Vec<Card>) -> Duel {
        let config = DuelConfig::default();
        Duel::new(
            Uuid::new_v4(),
            PlayerState::new("alice".into(), hand_a, &config),
            PlayerState::new("bob".into(), hand_b, &config),
        )
    }

    fn striker() -> Card {
        Card::new(1, "Striker", 5, 2)
    }

    #[test]
    fn test_direct_attack_from_hand() {
        let config = DuelConfig::default();
        let mut duel = duel_with_hands(vec![striker()], vec![striker()]);
        let id = duel.id;

        let result = apply_action(&mut duel, &Action::attack(id, "alice", 1, None), &config).unwrap();
        assert_eq!(result.effect, ActionEffect::DirectHit { attacker: 1, damage: 5 });
        assert_eq!(duel.players[1].hit_points, 25);
        assert!(result.ended.is_none());
    }

    #[test]
    fn test_scenario_alternating_direct_attacks() {
        let config = DuelConfig::default();
        let mut duel = duel_with_hands(vec![striker()], vec![striker()]);
        let id = duel.id;

        apply_action(&mut duel, &Action::attack(id, "alice", 1, None), &config).unwrap();
        apply_action(&mut duel, &Action::pass(id, "alice"), &config).unwrap();
        apply_action(&mut duel, &Action::attack(id, "bob", 1, None), &config).unwrap();

        assert_eq!(duel.players[0].hit_points, 25);
        assert_eq!(duel.players[1].hit_points, 25);
        assert_eq!(duel.status, DuelStatus::Active);
    }

    #[test]
    fn test_lethal_direct_attack_finishes_duel() {
        let config = DuelConfig::default();
        let mut duel = duel_with_hands(vec![striker()], Vec::new());
        duel.players[1].hit_points = 5;
        let id = duel.id;

        let result = apply_action(&mut duel, &Action::attack(id, "alice", 1, None), &config).unwrap();
        assert_eq!(result.ended, Some(EndReason::Knockout));
        assert_eq!(result.winner, Some(Identity::from("alice")));
        assert_eq!(duel.status, DuelStatus::Finished);
        assert!(duel.ended_at.is_some());
    }

    #[test]
    fn test_finished_duel_discards_actions() {
        let config = DuelConfig::default();
        let mut duel = duel_with_hands(vec![striker()], Vec::new());
        duel.players[1].hit_points = 1;
        let id = duel.id;
        apply_action(&mut duel, &Action::attack(id, "alice", 1, None), &config).unwrap();

        let before = duel.clone();
        let err = apply_action(&mut duel, &Action::pass(id, "alice"), &config).unwrap_err();
        assert_eq!(err, ActionRejected::DuelFinished);
        assert_eq!(duel, before);
    }

    #[test]
    fn test_card_attack_destroys_weaker_target() {
        let config = DuelConfig::default();
        let mut duel = duel_with_hands(Vec::new(), Vec::new());
        duel.players[0].play_area.push(Card::new(7, "Assassin", 6, 2));
        duel.players[1].play_area.push(Card::new(3, "Knight", 2, 4));
        let id = duel.id;

        let result = apply_action(&mut duel, &Action::attack(id, "alice", 7, Some(3)), &config).unwrap();
        assert_eq!(result.effect, ActionEffect::CardDestroyed { attacker: 7, target: 3 });
        assert!(duel.players[1].play_area.is_empty());
        assert_eq!(duel.players[1].hit_points, STARTING_HIT_POINTS);
    }

    #[test]
    fn test_card_attack_blocked_by_defense() {
        let config = DuelConfig::default();
        let mut duel = duel_with_hands(Vec::new(), Vec::new());
        duel.players[0].play_area.push(Card::new(1, "Goblin", 2, 1));
        duel.players[1].play_area.push(Card::new(6, "Golem", 4, 6));
        let id = duel.id;

        let result = apply_action(&mut duel, &Action::attack(id, "alice", 1, Some(6)), &config).unwrap();
        assert_eq!(result.effect, ActionEffect::AttackBlocked { attacker: 1, target: 6 });
        assert_eq!(duel.players[1].play_area.len(), 1);
    }

    #[test]
    fn test_extreme_stats_do_not_overflow() {
        let config = DuelConfig::default();
        let mut duel = duel_with_hands(Vec::new(), Vec::new());
        duel.players[0].play_area.push(Card::new(1, "Titan", i32::MAX, 0));
        duel.players[0].play_area.push(Card::new(2, "Leech", -5, 0));
        duel.players[1].play_area.push(Card::new(3, "Odd", 0, -1));
        let id = duel.id;

        let result = apply_action(&mut duel, &Action::attack(id, "alice", 1, Some(3)), &config).unwrap();
        assert_eq!(result.effect, ActionEffect::CardDestroyed { attacker: 1, target: 3 });

        let result = apply_action(&mut duel, &Action::attack(id, "alice", 2, None), &config).unwrap();
        assert_eq!(result.effect, ActionEffect::DirectHit { attacker: 2, damage: 0 });
        assert_eq!(duel.players[1].hit_points, STARTING_HIT_POINTS);

        duel.players[1].hit_points = i32::MIN + 1;
        apply_action(&mut duel, &Action::attack(id, "alice", 1, None), &config).unwrap();
        assert_eq!(duel.players[1].hit_points, i32::MIN);
    }

    #[test]
    fn test_missing_target_falls_back_to_direct_hit() {
        let config = DuelConfig::default();
        let mut duel = duel_with_hands(Vec::new(), Vec::new());
        duel.players[0].play_area.push(Card::new(1, "Goblin", 2, 1));
        let id = duel.id;

        apply_action(&mut duel, &Action::attack(id, "alice", 1, Some(99)), &config).unwrap();
        assert_eq!(duel.players[1].hit_points, STARTING_HIT_POINTS - 2);
    }

    #[test]
    fn test_attack_with_unknown_card_is_rejected() {
        let config = DuelConfig::default();
        let mut duel = duel_with_hands(Vec::new(), Vec::new());
        let id = duel.id;

        let err = apply_action(&mut duel, &Action::attack(id, "alice", 4, None), &config).unwrap_err();
        assert_eq!(err, ActionRejected::CardNotAvailable(4));
    }

    #[test]
    fn test_play_card_spends_mana() {
        let config = DuelConfig::default();
        let mut duel = duel_with_hands(vec![Card::new(1, "Goblin", 2, 1).with_cost(1)], Vec::new());
        let id = duel.id;

        let result = apply_action(&mut duel, &Action::play_card(id, "alice", 1), &config).unwrap();
        assert_eq!(result.effect, ActionEffect::CardPlayed { card_id: 1, mana_left: 0 });
        assert!(duel.players[0].hand.is_empty());
        assert_eq!(duel.players[0].play_area.len(), 1);
    }

    #[test]
    fn test_play_card_needs_mana() {
        let config = DuelConfig::default();
        let mut duel = duel_with_hands(vec![Card::new(8, "Dragon Lord", 8, 6).with_cost(7)], Vec::new());
        let id = duel.id;

        let err = apply_action(&mut duel, &Action::play_card(id, "alice", 8), &config).unwrap_err();
        assert_eq!(err, ActionRejected::InsufficientMana { card_id: 8, cost: 7, mana: 1 });
        assert_eq!(duel.players[0].hand.len(), 1);
    }

    #[test]
    fn test_mana_grows_each_round() {
        let config = DuelConfig::default();
        let mut duel = duel_with_hands(Vec::new(), Vec::new());
        let id = duel.id;

        apply_action(&mut duel, &Action::pass(id, "alice"), &config).unwrap();
        assert_eq!(duel.players[1].mana, 1);
        apply_action(&mut duel, &Action::pass(id, "bob"), &config).unwrap();
        assert_eq!(duel.players[0].mana, 2);
        apply_action(&mut duel, &Action::pass(id, "alice"), &config).unwrap();
        assert_eq!(duel.players[1].mana, 2);
    }

    #[test]
    fn test_non_participant_rejected() {
        let config = DuelConfig::default();
        let mut duel = duel_with_hands(Vec::new(), Vec::new());
        let id = duel.id;

        let err = apply_action(&mut duel, &Action::pass(id, "mallory"), &config).unwrap_err();
        assert_eq!(err, ActionRejected::NotParticipant("mallory".into()));
    }

    #[test]
    fn test_turn_ceiling() {
        let config = DuelConfig::default();
        let mut duel = duel_with_hands(Vec::new(), Vec::new());
        let id = duel.id;

        for n in 0..TURN_LIMIT {
            assert_eq!(duel.status, DuelStatus::Active, "finished early after {n} passes");
            let actor = duel.active_player().identity.clone();
            apply_action(&mut duel, &Action::pass(id, actor), &config).unwrap();
        }

        assert_eq!(duel.status, DuelStatus::Finished);
        assert_eq!(duel.end_reason, Some(EndReason::TurnLimit));
        assert!(duel.winner.is_none());
    }

    proptest! {
        #[test]
        fn prop_off_turn_pass_is_noop(passes in 0u32..(TURN_LIMIT - 1)) {
            let config = DuelConfig::default();
            let mut duel = duel_with_hands(Vec::new(), Vec::new());
            let id = duel.id;

            for _ in 0..passes {
                let actor = duel.active_player().identity.clone();
                apply_action(&mut duel, &Action::pass(id, actor), &config).unwrap();
            }

            let idle = duel.players[opponent_of(duel.active_player_index)].identity.clone();
            let before = (duel.turn_count, duel.active_player_index);
            let result = apply_action(&mut duel, &Action::pass(id, idle.clone()), &config);

            prop_assert_eq!(result, Err(ActionRejected::OutOfTurn(idle)));
            prop_assert_eq!((duel.turn_count, duel.active_player_index), before);
        }

        #[test]
        fn prop_direct_hit_of_exact_hp_is_lethal(hp in 1i32..50) {
            let config = DuelConfig::default();
            let mut duel = duel_with_hands(vec![Card::new(1, "Exact", hp, 0)], Vec::new());
            let id = duel.id;
            duel.players[1].hit_points = hp;

            let result = apply_action(&mut duel, &Action::attack(id, "alice", 1, None), &config).unwrap();

            prop_assert_eq!(result.ended, Some(EndReason::Knockout));
            prop_assert_eq!(duel.winner, Some(Identity::from("alice")));
        }
    }
}
