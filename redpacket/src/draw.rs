//! Draw lifecycle: request randomness, distribute, and the manual
//! emergency fulfillment.
//!
//! The lifecycle state lives in the contract. Every transition re-reads its
//! guard right before submitting and never reuses an earlier read.

use crate::error::{Error, Precondition, Result};
use crate::events::{self, DrawCompleted};
use crate::gateway::{submit_included, ChainGateway, ContractCall, TxReceipt};
use crate::utils::{format_ether, unix_now};
use crate::FailurePolicy;
use derive_more::Display;
use log::{info, warn};
use web3::types::U256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DrawState {
    #[display(fmt = "idle")]
    Idle,
    #[display(fmt = "draw requested")]
    DrawRequested,
    #[display(fmt = "random ready")]
    RandomReady,
    #[display(fmt = "distributed")]
    Distributed,
}

impl DrawState {
    /// `Distributed` is never read back: once paid out the contract is idle
    /// again, so it only appears as the result of [`distribute`].
    pub fn from_flags(draw_in_progress: bool, random_ready: bool) -> Self {
        match (draw_in_progress, random_ready) {
            (_, true) => DrawState::RandomReady,
            (true, false) => DrawState::DrawRequested,
            (false, false) => DrawState::Idle,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawStatus {
    pub state: DrawState,
    pub draw_in_progress: bool,
    pub random_ready: bool,
    pub last_random_word: U256,
}

pub async fn read_state<G: ChainGateway + ?Sized>(gw: &G) -> Result<DrawState> {
    let in_progress = gw.draw_in_progress().await?;
    let ready = gw.random_ready().await?;
    Ok(DrawState::from_flags(in_progress, ready))
}

pub async fn status<G: ChainGateway + ?Sized>(gw: &G) -> Result<DrawStatus> {
    let draw_in_progress = gw.draw_in_progress().await?;
    let random_ready = gw.random_ready().await?;
    let last_random_word = gw.last_random_word().await?;
    Ok(DrawStatus {
        state: DrawState::from_flags(draw_in_progress, random_ready),
        draw_in_progress,
        random_ready,
        last_random_word,
    })
}

#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub price: U256,
    pub receipt: TxReceipt,
    /// from the DrawRequested log, when it decodes
    pub request_id: Option<U256>,
}

#[derive(Debug, Clone)]
pub struct DistributeOutcome {
    pub state: DrawState,
    pub receipt: TxReceipt,
    pub completed: Option<DrawCompleted>,
}

#[derive(Debug, Clone)]
pub struct FulfillOutcome {
    pub random_word: U256,
    pub receipt: TxReceipt,
    pub last_random_word: U256,
    pub random_ready: bool,
}

/// Idle -> DrawRequested. `ceiling` of `None` accepts any quote.
pub async fn request_draw<G: ChainGateway + ?Sized>(gw: &G, ceiling: Option<U256>) -> Result<RequestOutcome> {
    if gw.draw_in_progress().await? {
        return Err(Precondition::DrawInProgress.into());
    }

    let params = gw.vrf_params().await?;
    info!(
        "vrf wrapper={:?} callback_gas_limit={} num_words={}",
        params.wrapper, params.callback_gas_limit, params.num_words
    );
    if gw.code_at(params.wrapper).await?.is_empty() {
        return Err(Precondition::WrapperHasNoCode(params.wrapper).into());
    }

    let price = gw.request_price(&params).await?;
    match ceiling {
        Some(ceiling) => info!(
            "vrf price {} ETH, ceiling {} ETH",
            format_ether(price),
            format_ether(ceiling)
        ),
        None => info!("vrf price {} ETH, no ceiling", format_ether(price)),
    }
    if let Some(ceiling) = ceiling {
        if price > ceiling {
            return Err(Precondition::FeeExceedsCeiling { price, ceiling }.into());
        }
    }

    let receipt = submit_included(gw, ContractCall::RequestDraw).await?;
    let request_id = events::draw_requested(&receipt.logs).map(|e| e.request_id);
    match request_id {
        Some(id) => info!("draw requested, request_id={}", id),
        None => warn!("requestDraw included but no DrawRequested event decoded"),
    }
    Ok(RequestOutcome {
        price,
        receipt,
        request_id,
    })
}

/// RandomReady -> Distributed.
pub async fn distribute<G: ChainGateway + ?Sized>(gw: &G) -> Result<DistributeOutcome> {
    if !gw.random_ready().await? {
        return Err(Precondition::RandomNotReady.into());
    }

    let receipt = submit_included(gw, ContractCall::Distribute).await?;
    let completed = events::draw_completed(&receipt.logs);
    match &completed {
        Some(done) => info!(
            "distributed request_id={} total={} ETH participants={}",
            done.request_id,
            format_ether(done.total_amount),
            done.participant_count
        ),
        None => warn!("distribute included but no DrawCompleted event decoded"),
    }
    Ok(DistributeOutcome {
        state: DrawState::Distributed,
        receipt,
        completed,
    })
}

/// Operator override for a callback that never arrived. Requires an active
/// draw; leaves the contract in the same "random ready" state a real
/// fulfillment would. Under `Skip` a readiness read-back that still shows
/// `false` is only logged.
pub async fn emergency_fulfill<G: ChainGateway + ?Sized>(
    gw: &G,
    random_word: Option<U256>,
    policy: FailurePolicy,
) -> Result<FulfillOutcome> {
    if !gw.draw_in_progress().await? {
        return Err(Precondition::NoActiveDraw.into());
    }

    let random_word = random_word.unwrap_or_else(|| U256::from(unix_now()));
    info!("emergency fulfill with random word {}", random_word);
    let receipt = submit_included(gw, ContractCall::EmergencyFulfill(vec![random_word])).await?;

    let last_random_word = gw.last_random_word().await?;
    let random_ready = gw.random_ready().await?;
    info!("last_random_word={} random_ready={}", last_random_word, random_ready);
    if !random_ready {
        let reason = format!(
            "included in tx {:?} but randomReady is still false",
            receipt.tx_hash
        );
        if !policy.is_skip() {
            return Err(Error::Submission {
                call: ContractCall::EmergencyFulfill(Vec::new()).name().to_string(),
                reason,
            });
        }
        warn!("{}", reason);
    }
    Ok(FulfillOutcome {
        random_word,
        receipt,
        last_random_word,
        random_ready,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGateway;
    use web3::types::Address;

    fn gateway() -> MockGateway {
        let gw = MockGateway::new(Address::repeat_byte(0xaa), Address::repeat_byte(0xcc));
        gw.with_state(|s| {
            s.participants.insert(U256::from(1u64), Address::repeat_byte(1));
            s.participants.insert(U256::from(2u64), Address::repeat_byte(2));
        });
        gw
    }

    #[test]
    fn state_from_flags() {
        assert_eq!(DrawState::from_flags(false, false), DrawState::Idle);
        assert_eq!(DrawState::from_flags(true, false), DrawState::DrawRequested);
        assert_eq!(DrawState::from_flags(true, true), DrawState::RandomReady);
        assert_eq!(DrawState::RandomReady.to_string(), "random ready");
    }

    #[tokio::test]
    async fn request_refused_while_in_progress() {
        let gw = gateway();
        gw.with_state(|s| s.draw_in_progress = true);
        let err = request_draw(&gw, None).await.unwrap_err();
        assert!(matches!(err, Error::Precondition(Precondition::DrawInProgress)));
        assert!(gw.submitted().is_empty());
    }

    #[tokio::test]
    async fn fee_ceiling_is_inclusive() {
        let gw = gateway();
        let price = gw.with_state(|s| s.price);

        let err = request_draw(&gw, Some(price - U256::one())).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("precondition failed: VRF fee {} wei exceeds ceiling {} wei", price, price - U256::one())
        );
        assert!(gw.submitted().is_empty());

        let outcome = request_draw(&gw, Some(price)).await.unwrap();
        assert_eq!(outcome.price, price);
        assert_eq!(outcome.request_id, Some(U256::one()));
        assert_eq!(gw.submitted(), vec![ContractCall::RequestDraw]);
        assert_eq!(read_state(&gw).await.unwrap(), DrawState::DrawRequested);
    }

    #[tokio::test]
    async fn wrapper_without_code_is_refused() {
        let gw = gateway();
        let wrapper = gw.with_state(|s| {
            s.code.remove(&s.vrf.wrapper);
            s.vrf.wrapper
        });
        let err = request_draw(&gw, None).await.unwrap_err();
        assert!(matches!(err, Error::Precondition(Precondition::WrapperHasNoCode(a)) if a == wrapper));
        assert!(gw.submitted().is_empty());
    }

    #[tokio::test]
    async fn distribute_requires_random_ready() {
        let gw = gateway();
        gw.with_state(|s| s.draw_in_progress = true);
        let err = distribute(&gw).await.unwrap_err();
        assert!(matches!(err, Error::Precondition(Precondition::RandomNotReady)));
        assert!(gw.submitted().is_empty());
    }

    #[tokio::test]
    async fn emergency_fulfill_then_distribute() {
        let gw = gateway();
        gw.with_state(|s| s.balances.insert(Address::repeat_byte(0xcc), U256::from(1000u64)));

        let err = emergency_fulfill(&gw, None, FailurePolicy::Abort).await.unwrap_err();
        assert!(matches!(err, Error::Precondition(Precondition::NoActiveDraw)));

        request_draw(&gw, None).await.unwrap();
        let word = U256::from(424242u64);
        let fulfilled = emergency_fulfill(&gw, Some(word), FailurePolicy::Abort).await.unwrap();
        assert_eq!(fulfilled.last_random_word, word);
        assert!(fulfilled.random_ready);
        assert_eq!(read_state(&gw).await.unwrap(), DrawState::RandomReady);

        let done = distribute(&gw).await.unwrap();
        assert_eq!(done.state, DrawState::Distributed);
        let completed = done.completed.unwrap();
        assert_eq!(completed.participant_count, U256::from(2u64));
        assert_eq!(completed.total_amount, U256::from(1000u64));
        assert_eq!(read_state(&gw).await.unwrap(), DrawState::Idle);
    }

    #[tokio::test]
    async fn unready_read_back_follows_the_policy() {
        let gw = gateway();
        gw.with_state(|s| {
            s.draw_in_progress = true;
            s.fulfill_leaves_unready = true;
        });
        let word = U256::from(99u64);

        let err = emergency_fulfill(&gw, Some(word), FailurePolicy::Abort).await.unwrap_err();
        match err {
            Error::Submission { call, reason } => {
                assert_eq!(call, "emergencyFulfillRandomWords");
                assert!(reason.contains("randomReady is still false"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let out = emergency_fulfill(&gw, Some(word), FailurePolicy::Skip).await.unwrap();
        assert!(!out.random_ready);
        assert_eq!(out.last_random_word, word);
        assert_eq!(read_state(&gw).await.unwrap(), DrawState::DrawRequested);
        assert_eq!(gw.submitted().len(), 2);
    }

    #[tokio::test]
    async fn default_word_is_the_current_time() {
        let gw = gateway();
        gw.with_state(|s| s.draw_in_progress = true);
        let before = unix_now();
        let fulfilled = emergency_fulfill(&gw, None, FailurePolicy::Abort).await.unwrap();
        assert!(fulfilled.random_word >= U256::from(before));
        assert!(fulfilled.random_word <= U256::from(unix_now()));
    }

    #[tokio::test]
    async fn reverted_request_is_a_submission_error() {
        let gw = gateway();
        gw.fail_submission(0, crate::mock::Failure::Revert);
        let err = request_draw(&gw, None).await.unwrap_err();
        assert!(matches!(err, Error::Submission { ref call, .. } if call == "requestDraw"));
        assert_eq!(read_state(&gw).await.unwrap(), DrawState::Idle);
    }
}
