//! Chunked participant registration.
//!
//! Chunks go out strictly one after another: chunk N+1 is not signed until
//! chunk N has a receipt or a recorded failure. Nothing is rolled back, the
//! progress log is what a re-run over the remainder starts from.

use crate::error::{Error, Precondition, Result};
use crate::gateway::{submit_included, ChainGateway, ContractCall};
use crate::roster::{self, ParticipantRecord, RosterPolicy, RosterSummary};
use crate::FailurePolicy;
use derive_more::Display;
use log::{error, info, warn};
use std::io::Read;
use web3::types::{H256, U256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ChunkStatus {
    #[display(fmt = "included")]
    Included,
    #[display(fmt = "failed")]
    Failed,
}

/// One line of the append-only progress log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkProgress {
    pub index: usize,
    pub first_id: u64,
    pub last_id: u64,
    pub size: usize,
    pub status: ChunkStatus,
    pub tx_hash: Option<H256>,
    pub block_number: Option<u64>,
    pub gas_used: Option<U256>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFailure {
    pub index: usize,
    pub first_id: u64,
    pub last_id: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub total_chunks: usize,
    pub succeeded_chunks: usize,
    pub records_submitted: usize,
    pub failures: Vec<ChunkFailure>,
    pub progress: Vec<ChunkProgress>,
}

/// Contiguous slices of at most `chunk_size` records, input order kept.
pub fn partition(records: &[ParticipantRecord], chunk_size: usize) -> Result<Vec<&[ParticipantRecord]>> {
    if chunk_size == 0 {
        return Err(Error::Config("batch size must be at least 1".to_string()));
    }
    Ok(records.chunks(chunk_size).collect())
}

pub fn chunk_call(chunk: &[ParticipantRecord]) -> ContractCall {
    ContractCall::SetParticipantsBatch {
        employee_ids: chunk.iter().map(|r| r.employee_id_u256()).collect(),
        participants: chunk.iter().map(|r| r.wallet_address).collect(),
    }
}

fn id_range(chunk: &[ParticipantRecord]) -> (u64, u64) {
    let first = chunk.first().map(|r| r.employee_id).unwrap_or_default();
    let last = chunk.last().map(|r| r.employee_id).unwrap_or_default();
    (first, last)
}

/// Registration is only open while no draw is running.
pub async fn ensure_registration_open<G: ChainGateway + ?Sized>(gw: &G) -> Result<()> {
    if gw.draw_in_progress().await? {
        return Err(Precondition::DrawInProgress.into());
    }
    Ok(())
}

/// Load the roster and register what it accepts. A closed registration is
/// detected before the first row is read, so a doomed run costs one chain
/// read instead of one per row.
pub async fn register<G, R>(
    gw: &G,
    input: R,
    roster_policy: RosterPolicy,
    chunk_size: usize,
    policy: FailurePolicy,
) -> Result<(RosterSummary, BatchReport)>
where
    G: ChainGateway + ?Sized,
    R: Read,
{
    partition(&[], chunk_size)?;
    ensure_registration_open(gw).await?;
    let roster = roster::load_participants(gw, input, roster_policy).await?;
    if roster.accepted.is_empty() {
        warn!("roster has no valid participants, nothing to register");
        return Ok((roster, BatchReport::default()));
    }
    let report = submit_batches(gw, &roster.accepted, chunk_size, policy).await?;
    Ok((roster, report))
}

pub async fn submit_batches<G: ChainGateway + ?Sized>(
    gw: &G,
    records: &[ParticipantRecord],
    chunk_size: usize,
    policy: FailurePolicy,
) -> Result<BatchReport> {
    let chunks = partition(records, chunk_size)?;
    ensure_registration_open(gw).await?;

    let mut report = BatchReport {
        total_chunks: chunks.len(),
        ..Default::default()
    };
    info!(
        "registering {} participants in {} chunks of at most {}",
        records.len(),
        report.total_chunks,
        chunk_size
    );

    for (index, chunk) in chunks.into_iter().enumerate() {
        let (first_id, last_id) = id_range(chunk);
        info!(
            "chunk {}/{} ids {}..={} ({} records)",
            index + 1,
            report.total_chunks,
            first_id,
            last_id,
            chunk.len()
        );
        match submit_included(gw, chunk_call(chunk)).await {
            Ok(receipt) => {
                info!(
                    "chunk {} included, tx={:?} block={} gas_used={}",
                    index + 1,
                    receipt.tx_hash,
                    receipt.block_number,
                    receipt.gas_used
                );
                report.succeeded_chunks += 1;
                report.records_submitted += chunk.len();
                report.progress.push(ChunkProgress {
                    index,
                    first_id,
                    last_id,
                    size: chunk.len(),
                    status: ChunkStatus::Included,
                    tx_hash: Some(receipt.tx_hash),
                    block_number: Some(receipt.block_number),
                    gas_used: Some(receipt.gas_used),
                });
            }
            Err(e) => {
                if !policy.is_skip() {
                    error!(
                        "chunk {} failed, {} of {} chunks already included: {}",
                        index + 1,
                        report.succeeded_chunks,
                        report.total_chunks,
                        e
                    );
                    return Err(e);
                }
                warn!("chunk {} failed, continuing: {}", index + 1, e);
                report.progress.push(ChunkProgress {
                    index,
                    first_id,
                    last_id,
                    size: chunk.len(),
                    status: ChunkStatus::Failed,
                    tx_hash: None,
                    block_number: None,
                    gas_used: None,
                });
                report.failures.push(ChunkFailure {
                    index,
                    first_id,
                    last_id,
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        "registration done: chunks={}/{} records={}",
        report.succeeded_chunks, report.total_chunks, report.records_submitted
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Failure, MockGateway};
    use web3::types::Address;

    fn records(n: u64) -> Vec<ParticipantRecord> {
        (1..=n)
            .map(|i| ParticipantRecord {
                employee_id: 100_000 + i,
                wallet_address: Address::from_low_u64_be(i),
            })
            .collect()
    }

    fn gateway() -> MockGateway {
        MockGateway::new(Address::repeat_byte(0xaa), Address::repeat_byte(0xcc))
    }

    fn chunk_sizes(gw: &MockGateway) -> Vec<usize> {
        gw.submitted()
            .iter()
            .map(|c| match c {
                ContractCall::SetParticipantsBatch { participants, .. } => participants.len(),
                other => panic!("unexpected call {:?}", other),
            })
            .collect()
    }

    #[test]
    fn partition_is_ceil_and_ordered() {
        let all = records(247);
        for k in [1usize, 7, 100, 247, 500] {
            let chunks = partition(&all, k).unwrap();
            assert_eq!(chunks.len(), (all.len() + k - 1) / k);
            assert!(chunks[..chunks.len() - 1].iter().all(|c| c.len() == k));
            let joined: Vec<_> = chunks.concat();
            assert_eq!(joined, all);
        }
        assert!(partition(&all, 0).is_err());
        assert!(partition(&[], 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn submits_every_chunk_in_order() {
        let gw = gateway();
        let all = records(247);
        let report = submit_batches(&gw, &all, 100, FailurePolicy::Abort).await.unwrap();
        assert_eq!(report.total_chunks, 3);
        assert_eq!(report.succeeded_chunks, 3);
        assert_eq!(report.records_submitted, 247);
        assert_eq!(chunk_sizes(&gw), vec![100, 100, 47]);
        assert_eq!(
            report.progress.iter().map(|p| (p.first_id, p.last_id)).collect::<Vec<_>>(),
            vec![(100_001, 100_100), (100_101, 100_200), (100_201, 100_247)]
        );
        // the parallel arrays line up
        if let ContractCall::SetParticipantsBatch {
            employee_ids,
            participants,
        } = &gw.submitted()[2]
        {
            assert_eq!(employee_ids[0], U256::from(100_201u64));
            assert_eq!(participants[0], Address::from_low_u64_be(201));
        }
        assert_eq!(gw.with_state(|s| s.participants.len()), 247);
    }

    #[tokio::test]
    async fn refuses_while_a_draw_is_in_progress() {
        let gw = gateway();
        gw.with_state(|s| s.draw_in_progress = true);
        let err = submit_batches(&gw, &records(5), 2, FailurePolicy::Skip).await.unwrap_err();
        assert!(matches!(err, Error::Precondition(Precondition::DrawInProgress)));
        assert!(gw.submitted().is_empty());
    }

    #[tokio::test]
    async fn skip_records_the_failed_chunk_and_continues() {
        let gw = gateway();
        gw.fail_submission(1, Failure::Revert);
        let report = submit_batches(&gw, &records(25), 10, FailurePolicy::Skip).await.unwrap();
        assert_eq!(report.total_chunks, 3);
        assert_eq!(report.succeeded_chunks, 2);
        assert_eq!(report.records_submitted, 15);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 1);
        assert_eq!(report.failures[0].first_id, 100_011);
        assert_eq!(
            report.progress.iter().map(|p| p.status).collect::<Vec<_>>(),
            vec![ChunkStatus::Included, ChunkStatus::Failed, ChunkStatus::Included]
        );
        assert_eq!(gw.submitted().len(), 3);
    }

    #[tokio::test]
    async fn abort_stops_after_the_failed_chunk() {
        let gw = gateway();
        gw.fail_submission(1, Failure::Reject("nonce too low".to_string()));
        let err = submit_batches(&gw, &records(25), 10, FailurePolicy::Abort).await.unwrap_err();
        match err {
            Error::Submission { call, reason } => {
                assert_eq!(call, "setParticipantsBatch");
                assert_eq!(reason, "nonce too low");
            }
            other => panic!("unexpected {:?}", other),
        }
        // first chunk stays included, third never sent
        assert_eq!(gw.submitted().len(), 2);
        assert_eq!(gw.with_state(|s| s.participants.len()), 10);
    }

    #[tokio::test]
    async fn transport_failure_follows_the_policy() {
        let gw = gateway();
        gw.fail_submission(1, Failure::Transport("connection refused".to_string()));
        let err = submit_batches(&gw, &records(25), 10, FailurePolicy::Abort).await.unwrap_err();
        assert!(matches!(err, Error::Collaborator(ref e) if e == "connection refused"));
        assert_eq!(gw.submitted().len(), 2);

        let gw = gateway();
        gw.fail_submission(0, Failure::Transport("connection reset".to_string()));
        let report = submit_batches(&gw, &records(25), 10, FailurePolicy::Skip).await.unwrap();
        assert_eq!(report.succeeded_chunks, 2);
        assert_eq!(report.records_submitted, 15);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 0);
        assert_eq!(report.failures[0].reason, "chain gateway error: connection reset");
        assert_eq!(report.progress[0].status, ChunkStatus::Failed);
        assert_eq!(gw.with_state(|s| s.participants.len()), 15);
    }

    #[tokio::test]
    async fn register_checks_the_draw_before_reading_rows() {
        let csv = "id,user_id,user_name,wallet_address\n\
                   1,100001,a,0x0101010101010101010101010101010101010101\n\
                   2,100002,b,0x0202020202020202020202020202020202020202\n";
        let gw = gateway();
        gw.with_state(|s| s.draw_in_progress = true);
        let err = register(&gw, csv.as_bytes(), RosterPolicy::default(), 100, FailurePolicy::Abort)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Precondition(Precondition::DrawInProgress)));
        assert_eq!(gw.with_state(|s| s.code_reads), 0);
        assert!(gw.submitted().is_empty());

        let gw = gateway();
        let (roster, report) = register(&gw, csv.as_bytes(), RosterPolicy::default(), 100, FailurePolicy::Abort)
            .await
            .unwrap();
        assert_eq!(roster.accepted.len(), 2);
        assert_eq!(gw.with_state(|s| s.code_reads), 2);
        assert_eq!(report.records_submitted, 2);

        let err = register(&gateway(), csv.as_bytes(), RosterPolicy::default(), 0, FailurePolicy::Abort)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
