use chrono::{TimeZone, Utc};
use redpacket::{
    batch, draw,
    draw::DrawState,
    error::{Error, RejectReason},
    gateway::ContractCall,
    mock::MockGateway,
    reconcile::{self, SqlOptions},
    roster::{self, RosterPolicy},
    ChainGateway, FailurePolicy,
};
use web3::types::{Address, U256};

const BAD_ROWS: [u64; 3] = [10, 120, 249];

fn roster_csv() -> String {
    let mut csv = String::from("id,user_id,user_name,wallet_address,lottery_status\n");
    for i in 1..=250u64 {
        let wallet = if BAD_ROWS.contains(&i) {
            format!("0x{:x}zz", i)
        } else {
            format!("{:?}", Address::from_low_u64_be(i))
        };
        csv.push_str(&format!("{},{},user{},{},ADDRESS_LOADED\n", i, 100_000 + i, i, wallet));
    }
    csv
}

fn gateway() -> MockGateway {
    MockGateway::new(Address::repeat_byte(0xaa), Address::repeat_byte(0xcc))
}

#[tokio::test]
async fn full_lifecycle_with_skipped_rows() {
    let gw = gateway();
    let contract = gw.contract_address();

    let policy = RosterPolicy {
        eoa_check: true,
        on_invalid: FailurePolicy::Skip,
    };
    let roster = roster::load_participants(&gw, roster_csv().as_bytes(), policy).await.unwrap();
    assert_eq!(roster.total_rows, 250);
    assert_eq!(roster.accepted.len(), 247);
    assert_eq!(roster.rejected_count(), 3);
    // data row i sits on line i + 1
    assert_eq!(
        roster.rejected.iter().map(|(line, _)| *line).collect::<Vec<_>>(),
        vec![11, 121, 250]
    );
    assert!(roster
        .rejected
        .iter()
        .all(|(_, r)| matches!(r, RejectReason::InvalidAddress(_))));

    let report = batch::submit_batches(&gw, &roster.accepted, 100, FailurePolicy::Skip)
        .await
        .unwrap();
    assert_eq!(report.total_chunks, 3);
    assert_eq!(report.succeeded_chunks, 3);
    assert_eq!(report.records_submitted, 247);
    let sizes: Vec<usize> = gw
        .submitted()
        .iter()
        .map(|c| match c {
            ContractCall::SetParticipantsBatch { participants, .. } => participants.len(),
            other => panic!("unexpected {:?}", other),
        })
        .collect();
    assert_eq!(sizes, vec![100, 100, 47]);
    let submitted_ids: Vec<U256> = gw
        .submitted()
        .into_iter()
        .flat_map(|c| match c {
            ContractCall::SetParticipantsBatch { employee_ids, .. } => employee_ids,
            _ => Vec::new(),
        })
        .collect();
    let accepted_ids: Vec<U256> = roster.accepted.iter().map(|r| r.employee_id_u256()).collect();
    assert_eq!(submitted_ids, accepted_ids);

    gw.with_state(|s| s.balances.insert(contract, U256::from(247_000u64)));
    let requested = draw::request_draw(&gw, None).await.unwrap();
    assert!(requested.request_id.is_some());

    // registration is closed while the draw runs
    let err = batch::submit_batches(&gw, &roster.accepted, 100, FailurePolicy::Skip)
        .await
        .unwrap_err();
    assert!(err.is_precondition());
    assert!(draw::distribute(&gw).await.unwrap_err().is_precondition());

    draw::emergency_fulfill(&gw, Some(U256::from(7u64)), FailurePolicy::Abort)
        .await
        .unwrap();
    let done = draw::distribute(&gw).await.unwrap();
    assert_eq!(done.state, DrawState::Distributed);
    assert_eq!(draw::read_state(&gw).await.unwrap(), DrawState::Idle);

    let rec = reconcile::reconcile(&gw, 0, None).await.unwrap();
    assert_eq!(rec.total_events, 247);
    assert_eq!(rec.success_events, 247);
    assert_eq!(rec.totals.len(), 247);
    assert!(rec.totals.values().all(|v| *v == U256::from(1000u64)));
    assert_eq!(reconcile::reconcile(&gw, 0, None).await.unwrap(), rec);

    let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let sql = reconcile::render_sql(&rec, &SqlOptions::default(), contract, at).unwrap();
    assert_eq!(sql.lines().filter(|l| l.starts_with("UPDATE")).count(), 247);
}

#[tokio::test]
async fn abort_policy_registers_nothing() {
    let gw = gateway();
    let err = roster::load_participants(&gw, roster_csv().as_bytes(), RosterPolicy::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation { line: 11, .. }));
    // rows 1..=9 were checked for code, nothing after row 10
    assert_eq!(gw.with_state(|s| s.code_reads), 9);
    assert!(gw.submitted().is_empty());
}
