// SPDX-License-Identifier: MIT
// End-to-end run of the TWAP pipeline against an on-disk database, a fixed-price
// venue and a scripted chain. Nothing leaves the process.

use alloy::primitives::{Address, B256, Bytes, U256, keccak256};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use treasury_twap::common::error::AppError;
use treasury_twap::data::db::Database;
use treasury_twap::domain::swap::{FillReceipt, PreparedTx, Quote, SignedTx, SwapRequest};
use treasury_twap::domain::tranche::{PlanStatus, TrancheStatus};
use treasury_twap::network::gas::GasFees;
use treasury_twap::services::twap::report::{TokenLabel, build_report, render_table, write_json};
use treasury_twap::services::twap::{
    ChainGateway, ExecutorConfig, PlanRequest, SafetyGuard, SchedulerConfig, SwapVenue,
    TrancheExecutor, TwapPlanner, TwapScheduler, TwapStats,
};

const USDC: Address = Address::with_last_byte(0x0c);
const WETH: Address = Address::with_last_byte(0x0e);
const ROUTER: Address = Address::with_last_byte(0x1d);
const WALLET: Address = Address::with_last_byte(0x77);

/// 1 WETH (18 decimals) per 2000 USDC (6 decimals), scaled by `bps / 10_000`.
struct FixedVenue {
    bps: Mutex<u64>,
}

impl FixedVenue {
    fn new() -> Self {
        Self {
            bps: Mutex::new(10_000),
        }
    }

    fn out(&self, usdc: U256) -> U256 {
        let bps = U256::from(*self.bps.lock().unwrap());
        usdc * U256::from(500_000_000u64) * bps / U256::from(10_000u64)
    }
}

impl SwapVenue for FixedVenue {
    async fn quote(&self, src: Address, dst: Address, amount: U256) -> Result<Quote, AppError> {
        Ok(Quote {
            src,
            dst,
            amount_in: amount,
            amount_out: self.out(amount),
            gas: None,
        })
    }

    async fn build_swap(&self, req: &SwapRequest) -> Result<PreparedTx, AppError> {
        assert_eq!(req.from, WALLET);
        Ok(PreparedTx {
            to: ROUTER,
            data: Bytes::from(req.amount.to_be_bytes_vec()),
            value: U256::ZERO,
            gas: 180_000,
            expected_out: self.out(req.amount),
        })
    }

    async fn spender(&self) -> Result<Address, AppError> {
        Ok(ROUTER)
    }

    async fn allowance(&self, _token: Address, _wallet: Address) -> Result<U256, AppError> {
        Ok(U256::MAX)
    }

    async fn approve_transaction(&self, _token: Address, _amount: U256) -> Result<PreparedTx, AppError> {
        Err(AppError::Strategy("approval not expected".into()))
    }
}

/// Chain state shared across scheduler restarts.
#[derive(Default)]
struct ScriptedChain {
    nonce: Mutex<u64>,
    sent: Mutex<Vec<B256>>,
    mined: Mutex<HashMap<B256, FillReceipt>>,
    /// Hashes that stay in the mempool until `mine` is called.
    hold: Mutex<HashSet<u64>>,
    held: Mutex<HashSet<B256>>,
}

impl ScriptedChain {
    fn hold_nonce(&self, nonce: u64) {
        self.hold.lock().unwrap().insert(nonce);
    }

    fn mine_held(&self) {
        let held: Vec<B256> = self.held.lock().unwrap().drain().collect();
        let mut mined = self.mined.lock().unwrap();
        for hash in held {
            mined.insert(
                hash,
                FillReceipt {
                    success: true,
                    block_number: Some(20),
                    gas_used: 170_000,
                    amount_out: None,
                },
            );
        }
    }

    fn sent(&self) -> Vec<B256> {
        self.sent.lock().unwrap().clone()
    }
}

impl ChainGateway for ScriptedChain {
    fn wallet(&self) -> Address {
        WALLET
    }

    async fn balance_of(&self, _token: Address) -> Result<U256, AppError> {
        Ok(U256::from(1_000_000_000_000u64))
    }

    async fn fees(&self) -> Result<GasFees, AppError> {
        Ok(GasFees {
            max_fee_per_gas: 21_000_000_000,
            max_priority_fee_per_gas: 1_000_000_000,
            next_base_fee_per_gas: 10_000_000_000,
            base_fee_per_gas: 10_000_000_000,
            gas_used_ratio: Some(0.5),
        })
    }

    async fn sign(&self, tx: &PreparedTx, _fees: &GasFees) -> Result<SignedTx, AppError> {
        let mut nonce = self.nonce.lock().unwrap();
        let mut raw = nonce.to_be_bytes().to_vec();
        raw.extend_from_slice(&tx.data);
        let signed = SignedTx {
            hash: keccak256(&raw),
            raw,
            nonce: *nonce,
        };
        *nonce += 1;
        Ok(signed)
    }

    async fn broadcast(&self, raw: &[u8]) -> Result<B256, AppError> {
        let hash = keccak256(raw);
        let mut nonce_bytes = [0u8; 8];
        nonce_bytes.copy_from_slice(&raw[..8]);
        let nonce = u64::from_be_bytes(nonce_bytes);
        self.sent.lock().unwrap().push(hash);
        if self.hold.lock().unwrap().contains(&nonce) {
            self.held.lock().unwrap().insert(hash);
        } else {
            self.mined.lock().unwrap().insert(
                hash,
                FillReceipt {
                    success: true,
                    block_number: Some(10),
                    gas_used: 170_000,
                    amount_out: None,
                },
            );
        }
        Ok(hash)
    }

    async fn receipt(&self, hash: B256, _dst_token: Address) -> Result<Option<FillReceipt>, AppError> {
        Ok(self.mined.lock().unwrap().get(&hash).cloned())
    }
}

fn temp_db_url(name: &str) -> (std::path::PathBuf, String) {
    let dir = std::env::temp_dir().join(format!("twap-it-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    let url = format!("sqlite://{}", dir.join("twap.db").display());
    (dir, url)
}

fn request(start: u64) -> PlanRequest {
    PlanRequest {
        chain_id: 1,
        src_token: USDC,
        dst_token: WETH,
        // 10_000.000001 USDC over 4 slices: one base unit of remainder.
        total_amount: U256::from(10_000_000_001u64),
        slices: 4,
        interval_secs: 3_600,
        start_at: Some(start),
        slippage_bps: 50,
        max_drift_bps: 200,
    }
}

fn scheduler(
    db: &Database,
    venue: Arc<FixedVenue>,
    chain: Arc<ScriptedChain>,
) -> TwapScheduler<FixedVenue, ScriptedChain> {
    let exec = TrancheExecutor::new(
        db.clone(),
        venue,
        chain,
        ExecutorConfig {
            receipt_poll: Duration::from_millis(5),
            receipt_timeout: Duration::from_millis(25),
            ..ExecutorConfig::default()
        },
        Arc::new(TwapStats::default()),
    );
    TwapScheduler::new(
        db.clone(),
        exec,
        SafetyGuard::new(3, 600),
        SchedulerConfig {
            poll_interval: Duration::from_millis(10),
            rebroadcast_after_secs: 300,
            batch_limit: 8,
            plan_filter: None,
            until_done: true,
        },
    )
}

#[tokio::test]
async fn plan_survives_restart_with_transaction_in_flight() {
    let (dir, url) = temp_db_url("restart");
    let venue = Arc::new(FixedVenue::new());
    let chain = Arc::new(ScriptedChain::default());
    chain.hold_nonce(1);

    let plan_id = {
        let db = Database::new(&url).await.unwrap();
        let created = TwapPlanner::new(db.clone(), venue.clone())
            .create(&request(10_000), 9_000)
            .await
            .unwrap();
        assert!(created.created);
        let sizes: Vec<U256> = created.tranches.iter().map(|t| t.source_amount).collect();
        assert_eq!(sizes[0], U256::from(2_500_000_001u64));
        assert!(sizes[1..].iter().all(|s| *s == U256::from(2_500_000_000u64)));

        let sched = scheduler(&db, venue.clone(), chain.clone());
        let s = sched.tick(13_700).await.unwrap();
        assert_eq!(s.filled, 1);
        assert!(s.waiting_on_inflight);

        let t1 = db.load_tranche(&created.plan.id, 1).await.unwrap().unwrap();
        assert_eq!(t1.status, TrancheStatus::Submitted);
        assert!(t1.raw_tx.is_some());
        created.plan.id
    };

    // New process over the same file: the held transaction must be picked up, not re-signed.
    let db = Database::new(&url).await.unwrap();
    let again = TwapPlanner::new(db.clone(), venue.clone())
        .create(&request(10_000), 20_000)
        .await
        .unwrap();
    assert!(!again.created);
    assert_eq!(again.plan.id, plan_id);

    let sched = scheduler(&db, venue.clone(), chain.clone());
    sched.startup().await.unwrap();
    let s = sched.tick(13_800).await.unwrap();
    assert!(s.waiting_on_inflight);
    assert_eq!(chain.sent().len(), 2);

    chain.mine_held();
    let s = sched.tick(13_900).await.unwrap();
    assert_eq!(s.filled, 1);
    assert_eq!(s.active_plans, 1);

    let s = sched.tick(21_000).await.unwrap();
    assert_eq!(s.filled, 2);
    assert_eq!(s.finalized, vec![plan_id.clone()]);

    let unique: HashSet<B256> = chain.sent().into_iter().collect();
    assert_eq!(unique.len(), 4);

    let plan = db.load_plan(&plan_id).await.unwrap().unwrap();
    assert_eq!(plan.status, PlanStatus::Completed);
    let tranches = db.load_tranches(&plan_id).await.unwrap();
    assert!(tranches.iter().all(|t| t.filled()));
    let spent: U256 = tranches.iter().map(|t| t.source_amount).sum();
    assert_eq!(spent, U256::from(10_000_000_001u64));

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn price_drop_defers_tranche_until_recovery() {
    let (dir, url) = temp_db_url("drift");
    let db = Database::new(&url).await.unwrap();
    let venue = Arc::new(FixedVenue::new());
    let chain = Arc::new(ScriptedChain::default());
    let created = TwapPlanner::new(db.clone(), venue.clone())
        .create(&request(1_000), 1_000)
        .await
        .unwrap();
    let sched = scheduler(&db, venue.clone(), chain.clone());

    let s = sched.tick(1_000).await.unwrap();
    assert_eq!(s.filled, 1);

    // 3% worse than planned: outside the 2% drift allowance.
    *venue.bps.lock().unwrap() = 9_700;
    let s = sched.tick(4_600).await.unwrap();
    assert_eq!(s.deferred, 1);
    assert_eq!(s.filled, 0);
    let t1 = db.load_tranche(&created.plan.id, 1).await.unwrap().unwrap();
    assert_eq!(t1.status, TrancheStatus::Pending);
    assert_eq!(t1.attempts, 0);
    assert!(t1.last_error.is_some());

    *venue.bps.lock().unwrap() = 9_900;
    let s = sched.tick(4_700).await.unwrap();
    assert_eq!(s.filled, 1);
    assert_eq!(chain.sent().len(), 2);

    let events = db.fill_events(&created.plan.id).await.unwrap();
    assert!(events.iter().any(|e| e.event == "filled"));

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn completed_plan_reports_totals() {
    let (dir, url) = temp_db_url("report");
    let db = Database::new(&url).await.unwrap();
    let venue = Arc::new(FixedVenue::new());
    let chain = Arc::new(ScriptedChain::default());
    let created = TwapPlanner::new(db.clone(), venue.clone())
        .create(&request(0), 0)
        .await
        .unwrap();
    let sched = scheduler(&db, venue, chain);
    for now in [0, 3_600, 7_200, 10_800] {
        sched.tick(now).await.unwrap();
    }

    let plan = db.load_plan(&created.plan.id).await.unwrap().unwrap();
    let tranches = db.load_tranches(&plan.id).await.unwrap();
    let events = db.fill_events(&plan.id).await.unwrap();
    let report = build_report(
        plan,
        tranches,
        events,
        TokenLabel {
            symbol: "USDC".into(),
            decimals: 6,
        },
        TokenLabel {
            symbol: "WETH".into(),
            decimals: 18,
        },
    );
    assert_eq!(report.counts.filled, 4);
    assert_eq!(report.source_spent, U256::from(10_000_000_001u64));
    assert_eq!(report.target_received, report.target_estimated);
    let price = report.average_price.unwrap();
    assert!((price - 0.0005).abs() < 1e-9);

    let table = render_table(&report);
    assert!(table.contains("filled 4/4"));
    assert!(table.contains("[completed]"));

    let path = dir.join("report.json");
    write_json(&report, &path).unwrap();
    let v: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(v["plan"]["status"], "completed");
    assert!(!v["events"].as_array().unwrap().is_empty());

    let _ = std::fs::remove_dir_all(dir);
}
