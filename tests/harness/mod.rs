//! Shared test harness: in-memory store, scripted collaborators, and swap
//! fixtures the scenario tests drive through the real handler.

// Each scenario binary uses its own slice of the harness.
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::Secp256k1;
use bitcoin::util::psbt::PartiallySignedTransaction;
use bitcoin::{Address, Network, OutPoint, Script, Transaction, TxOut, Txid};
use lightning_invoice::{Currency, InvoiceBuilder};
use nloop::bitcoin::{
    public_key_for, random_secret_key, Amount, BlockHeight, FeeRate, PaymentPreimage,
    ReverseSwapScript, SwapScript, Utxo,
};
use nloop::lightning::PaymentParams;
use nloop::store::InMemoryEventStore;
use nloop::swap::command::CommandMeta;
use nloop::swap::deps::{
    Broadcaster, Deps, FeeEstimator, LightningClient, UtxoProvider, WalletClient,
};
use nloop::swap::state::{LoopIn, LoopOut};
use nloop::swap::{Asset, PairId, SwapHandler, SwapId, SwapStatusType};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("nloop=debug")
        .try_init();
}

pub fn meta() -> CommandMeta {
    CommandMeta {
        effective_date: OffsetDateTime::UNIX_EPOCH,
        source: "test".to_string(),
    }
}

pub struct RecordingBroadcaster {
    pub broadcasts: Mutex<Vec<(Transaction, Asset)>>,
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn broadcast_tx(&self, tx: &Transaction, asset: Asset) -> Result<Txid> {
        self.broadcasts
            .lock()
            .expect("broadcast mutex poisoned")
            .push((tx.clone(), asset));
        Ok(tx.txid())
    }
}

pub struct StaticFeeEstimator {
    rate: Mutex<FeeRate>,
}

impl StaticFeeEstimator {
    pub fn set_rate(&self, rate: FeeRate) {
        *self.rate.lock().expect("fee mutex poisoned") = rate;
    }
}

#[async_trait]
impl FeeEstimator for StaticFeeEstimator {
    async fn estimate_fee_rate(&self, _conf_target: u32, _asset: Asset) -> Result<FeeRate> {
        Ok(*self.rate.lock().expect("fee mutex poisoned"))
    }
}

pub struct TestUtxoProvider {
    utxos: Mutex<Vec<Utxo>>,
    pub released: Mutex<Vec<Utxo>>,
}

impl TestUtxoProvider {
    pub fn set_utxos(&self, utxos: Vec<Utxo>) {
        *self.utxos.lock().expect("utxo mutex poisoned") = utxos;
    }
}

#[async_trait]
impl UtxoProvider for TestUtxoProvider {
    async fn select_utxos(&self, amount: Amount, _asset: Asset) -> Result<Vec<Utxo>> {
        let utxos = self.utxos.lock().expect("utxo mutex poisoned").clone();
        let total: u64 = utxos.iter().map(Utxo::value).sum();
        anyhow::ensure!(
            total >= amount.as_sat(),
            "wallet holds {total} sat, {amount} required"
        );
        Ok(utxos)
    }

    async fn sign_swap_psbt(&self, psbt: PartiallySignedTransaction) -> Result<Transaction> {
        let mut tx = psbt.extract_tx();
        for input in &mut tx.input {
            input.witness = vec![vec![0u8; 72], vec![0u8; 33]];
        }
        Ok(tx)
    }

    async fn release(&self, utxos: &[Utxo]) -> Result<()> {
        self.released
            .lock()
            .expect("release mutex poisoned")
            .extend_from_slice(utxos);
        Ok(())
    }
}

pub struct TestWallet {
    pub address: Address,
    fail: AtomicBool,
}

impl TestWallet {
    pub fn fail_next_address(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    fn address(&self) -> Result<Address> {
        if self.fail.swap(false, Ordering::SeqCst) {
            anyhow::bail!("wallet is locked");
        }
        Ok(self.address.clone())
    }
}

#[async_trait]
impl WalletClient for TestWallet {
    async fn change_address(&self, _asset: Asset) -> Result<Address> {
        self.address()
    }

    async fn refund_address(&self, _asset: Asset) -> Result<Address> {
        self.address()
    }
}

pub struct RecordingLightning {
    pub payments: Mutex<Vec<(String, PaymentParams)>>,
}

#[async_trait]
impl LightningClient for RecordingLightning {
    async fn pay_invoice(&self, invoice: &str, params: PaymentParams) -> Result<()> {
        self.payments
            .lock()
            .expect("payments mutex poisoned")
            .push((invoice.to_string(), params));
        Ok(())
    }
}

pub struct TestWorld {
    pub handler: SwapHandler,
    pub store: Arc<InMemoryEventStore>,
    pub broadcaster: Arc<RecordingBroadcaster>,
    pub fee_estimator: Arc<StaticFeeEstimator>,
    pub utxo_provider: Arc<TestUtxoProvider>,
    pub wallet: Arc<TestWallet>,
    pub lightning: Arc<RecordingLightning>,
}

pub fn world() -> TestWorld {
    init_tracing();

    let wallet_address = Address::p2wsh(&Script::new(), Network::Regtest);
    let funding_txid =
        Txid::from_str("00000000000000000000000000000000000000000000000000000000000000f0")
            .expect("static txid");
    let utxos = (0..2)
        .map(|vout| Utxo {
            outpoint: OutPoint::new(funding_txid, vout),
            txout: TxOut {
                value: 1_000_000,
                script_pubkey: wallet_address.script_pubkey(),
            },
        })
        .collect();

    let broadcaster = Arc::new(RecordingBroadcaster {
        broadcasts: Mutex::new(vec![]),
    });
    let fee_estimator = Arc::new(StaticFeeEstimator {
        rate: Mutex::new(FeeRate::from_sat_per_vb(5)),
    });
    let utxo_provider = Arc::new(TestUtxoProvider {
        utxos: Mutex::new(utxos),
        released: Mutex::new(vec![]),
    });
    let wallet = Arc::new(TestWallet {
        address: wallet_address,
        fail: AtomicBool::new(false),
    });
    let lightning = Arc::new(RecordingLightning {
        payments: Mutex::new(vec![]),
    });

    let deps = Deps {
        broadcaster: broadcaster.clone(),
        fee_estimator: fee_estimator.clone(),
        utxo_provider: utxo_provider.clone(),
        wallet: wallet.clone(),
        lightning: lightning.clone(),
    };

    let store = Arc::new(InMemoryEventStore::new());
    let handler = SwapHandler::new(store.clone(), deps);

    TestWorld {
        handler,
        store,
        broadcaster,
        fee_estimator,
        utxo_provider,
        wallet,
        lightning,
    }
}

/// A regtest invoice committing to `preimage`'s payment hash.
pub fn invoice_for(preimage: &PaymentPreimage, amount_msat: u64) -> String {
    let mut rng = StdRng::seed_from_u64(99);
    let node_key = random_secret_key(&mut rng);
    let hash = sha256::Hash::from_inner(preimage.hash().0);

    let secp = Secp256k1::new();
    InvoiceBuilder::new(Currency::Regtest)
        .description("swap".into())
        .payment_hash(hash)
        .current_timestamp()
        .min_final_cltv_expiry(40)
        .amount_milli_satoshis(amount_msat)
        .payment_secret(lightning::ln::PaymentSecret([7u8; 32]))
        .build_signed(|msg| secp.sign_recoverable(msg, &node_key))
        .expect("fixture invoice must build")
        .to_string()
}

pub fn loop_out(timeout: u32) -> LoopOut {
    let mut rng = StdRng::seed_from_u64(101);
    let claim_key = random_secret_key(&mut rng);
    let preimage = PaymentPreimage::random(&mut rng);
    let on_chain_amount = Amount::from_sat(500_000);

    let redeem_script = ReverseSwapScript {
        preimage_hash160: preimage.hash().hash160(),
        claim_pubkey: public_key_for(&claim_key),
        refund_pubkey: public_key_for(&random_secret_key(&mut rng)),
        timeout_block_height: BlockHeight::new(timeout),
    }
    .script();

    LoopOut {
        id: SwapId::new("loopout-1"),
        pair_id: PairId::new(Asset::Btc, Asset::Btc),
        status: SwapStatusType::SwapCreated,
        claim_key,
        preimage,
        redeem_script,
        claim_address: Address::p2wsh(&Script::new(), Network::Regtest),
        invoice: invoice_for(&preimage, on_chain_amount.as_sat() * 1_000),
        prepay_invoice: None,
        on_chain_amount,
        timeout_block_height: BlockHeight::new(timeout),
        sweep_conf_target: 9,
        max_miner_fee: Amount::from_sat(20_000),
        accept_zero_conf: false,
        lockup_tx_hex: None,
        claim_transaction_id: None,
    }
}

pub fn loop_in(timeout: u32) -> LoopIn {
    let mut rng = StdRng::seed_from_u64(103);
    let refund_key = random_secret_key(&mut rng);
    let preimage = PaymentPreimage::random(&mut rng);

    let redeem_script = SwapScript {
        preimage_hash160: preimage.hash().hash160(),
        claim_pubkey: public_key_for(&random_secret_key(&mut rng)),
        refund_pubkey: public_key_for(&refund_key),
        timeout_block_height: BlockHeight::new(timeout),
    }
    .script();

    LoopIn {
        id: SwapId::new("loopin-1"),
        pair_id: PairId::new(Asset::Btc, Asset::Btc),
        status: SwapStatusType::SwapCreated,
        refund_private_key: refund_key,
        redeem_script,
        expected_amount: Amount::from_sat(400_000),
        timeout_block_height: BlockHeight::new(timeout),
        htlc_conf_target: 3,
        lockup_tx_hex: None,
        refund_transaction_id: None,
    }
}

/// The counterparty's HTLC-funding transaction for a loop-out fixture.
pub fn lockup_tx_for(loop_out: &LoopOut) -> Transaction {
    Transaction {
        version: 2,
        lock_time: 0,
        input: vec![],
        output: vec![TxOut {
            value: loop_out.on_chain_amount.as_sat(),
            script_pubkey: loop_out.redeem_script.to_v0_p2wsh(),
        }],
    }
}
